//! Subprocess transport: one child, one reader loop, a correlation map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::framing::Framing;
use crate::message::{error_message, notification_message, request_message, response_message, Incoming};
use crate::{RpcError, RpcResult};

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<Value>>>>;
type ProgressMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A request initiated by the peer (has both `id` and `method`).
///
/// The handler must answer via [`Transport::respond`] or
/// [`Transport::respond_error`], echoing `id`.
#[derive(Debug)]
pub struct ServerRequest {
    /// Peer-chosen request id.
    pub id: Value,
    /// Request method.
    pub method: String,
    /// Request params.
    pub params: Value,
}

/// A notification from the peer that is not routed elsewhere.
#[derive(Debug)]
pub struct RpcNotification {
    /// Notification method.
    pub method: String,
    /// Notification params.
    pub params: Value,
}

/// Receiving ends of the transport's routing channels.
///
/// Returned once at construction; the owner decides who consumes
/// server-initiated requests and generic notifications.
pub struct TransportChannels {
    /// Peer-initiated requests awaiting a response.
    pub requests: mpsc::UnboundedReceiver<ServerRequest>,
    /// Notifications not claimed by progress or feature-flag routing.
    pub notifications: mpsc::UnboundedReceiver<RpcNotification>,
}

/// Framed JSON-RPC connection to one subprocess.
///
/// Cheaply cloneable; clones share the writer, the pending-request map and
/// the progress router. The single reader task classifies every inbound
/// frame: responses fulfil pending requests, peer requests and unclaimed
/// notifications go to the [`TransportChannels`], `$/progress` updates are
/// routed to the channel registered for their token, and
/// `featureFlagsNotification` payloads are retained for later inspection.
#[derive(Clone)]
pub struct Transport {
    framing: Framing,
    writer: Arc<tokio::sync::Mutex<BoxedWriter>>,
    next_id: Arc<AtomicI64>,
    pending: PendingMap,
    progress: ProgressMap,
    feature_flags: Arc<Mutex<Value>>,
    closed: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
}

impl Transport {
    /// Spawn `command` and connect to its stdio.
    ///
    /// Stderr is drained by a dedicated task and forwarded to the log at
    /// debug level under `label`; without draining the child can deadlock on a
    /// full stderr pipe.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Spawn`] if the process cannot be started.
    pub fn spawn(
        command: &str,
        args: &[String],
        envs: &HashMap<String, String>,
        framing: Framing,
        label: &str,
    ) -> RpcResult<(Self, TransportChannels)> {
        let mut child = Command::new(command)
            .args(args)
            .envs(envs)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RpcError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| RpcError::Spawn {
            command: command.to_string(),
            source: std::io::Error::other("child stdin not captured"),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| RpcError::Spawn {
            command: command.to_string(),
            source: std::io::Error::other("child stdout not captured"),
        })?;
        if let Some(stderr) = child.stderr.take() {
            drain_stderr(stderr, label.to_string());
        }

        let (transport, channels) = Self::connect(stdout, stdin, framing);
        *transport.child.lock().expect("child mutex poisoned") = Some(child);
        Ok((transport, channels))
    }

    /// Connect over arbitrary streams (used by tests and stdio serve loops).
    pub fn connect<R, W>(reader: R, writer: W, framing: Framing) -> (Self, TransportChannels)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (notif_tx, notif_rx) = mpsc::unbounded_channel();

        let transport = Self {
            framing,
            writer: Arc::new(tokio::sync::Mutex::new(Box::new(writer) as BoxedWriter)),
            next_id: Arc::new(AtomicI64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            progress: Arc::new(Mutex::new(HashMap::new())),
            feature_flags: Arc::new(Mutex::new(Value::Null)),
            closed: Arc::new(AtomicBool::new(false)),
            child: Arc::new(Mutex::new(None)),
        };

        tokio::spawn(reader_loop(
            reader,
            framing,
            transport.pending.clone(),
            transport.progress.clone(),
            transport.feature_flags.clone(),
            transport.closed.clone(),
            req_tx,
            notif_tx,
        ));

        (
            transport,
            TransportChannels {
                requests: req_rx,
                notifications: notif_rx,
            },
        )
    }

    /// Send a request and await its response.
    ///
    /// Returns the `result` value of the response.
    ///
    /// # Errors
    ///
    /// [`RpcError::Timeout`] if no response arrives in `timeout`;
    /// [`RpcError::TransportClosed`] if the child exits first;
    /// [`RpcError::ErrorResponse`] if the peer answers with an error object.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> RpcResult<Value> {
        if self.is_closed() {
            return Err(RpcError::TransportClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending mutex poisoned")
            .insert(id, tx);

        let msg = request_message(id, method, params);
        if let Err(e) = self.write(&msg).await {
            self.pending
                .lock()
                .expect("pending mutex poisoned")
                .remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Err(_elapsed) => {
                self.pending
                    .lock()
                    .expect("pending mutex poisoned")
                    .remove(&id);
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    seconds: timeout.as_secs(),
                })
            },
            // Sender dropped: the reader loop ended with our id still pending.
            Ok(Err(_closed)) => Err(RpcError::TransportClosed),
            Ok(Ok(message)) => {
                if let Some(err) = message.get("error") {
                    Err(RpcError::ErrorResponse {
                        code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                        message: err
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_string(),
                    })
                } else {
                    Ok(message.get("result").cloned().unwrap_or(Value::Null))
                }
            },
        }
    }

    /// Send a notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the transport is closed.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> RpcResult<()> {
        self.write(&notification_message(method, params)).await
    }

    /// Answer a peer-initiated request.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the transport is closed.
    pub async fn respond(&self, id: &Value, result: Value) -> RpcResult<()> {
        self.write(&response_message(id, result)).await
    }

    /// Answer a peer-initiated request with a JSON-RPC error.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the transport is closed.
    pub async fn respond_error(&self, id: &Value, code: i64, message: &str) -> RpcResult<()> {
        self.write(&error_message(id, code, message)).await
    }

    /// Register a progress channel for `token`.
    ///
    /// Every subsequent `$/progress` notification whose `params.token`
    /// matches is delivered to the returned receiver, in arrival order.
    /// Register before sending the request that streams under the token.
    #[must_use]
    pub fn register_progress(&self, token: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.progress
            .lock()
            .expect("progress mutex poisoned")
            .insert(token.to_string(), tx);
        rx
    }

    /// Drop the progress channel for `token`.
    pub fn unregister_progress(&self, token: &str) {
        self.progress
            .lock()
            .expect("progress mutex poisoned")
            .remove(token);
    }

    /// Latest `featureFlagsNotification` payload (`Null` until one arrives).
    #[must_use]
    pub fn feature_flags(&self) -> Value {
        self.feature_flags
            .lock()
            .expect("feature flags mutex poisoned")
            .clone()
    }

    /// Whether the peer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Kill the child process, if one is attached.
    pub fn kill(&self) {
        if let Some(mut child) = self
            .child
            .lock()
            .expect("child mutex poisoned")
            .take()
        {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "child already exited");
            }
        }
    }

    async fn write(&self, msg: &Value) -> RpcResult<()> {
        if self.is_closed() {
            return Err(RpcError::TransportClosed);
        }
        let bytes = self.framing.encode(msg);
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("framing", &self.framing)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Forward child stderr lines to the log.
fn drain_stderr<R>(stderr: R, label: String)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                debug!(server = %label, "{line}");
            }
        }
    });
}

#[allow(clippy::too_many_arguments)]
async fn reader_loop<R>(
    mut reader: R,
    framing: Framing,
    pending: PendingMap,
    progress: ProgressMap,
    feature_flags: Arc<Mutex<Value>>,
    closed: Arc<AtomicBool>,
    req_tx: mpsc::UnboundedSender<ServerRequest>,
    notif_tx: mpsc::UnboundedSender<RpcNotification>,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                while let Some(msg) = framing.decode(&mut buf) {
                    dispatch(msg, &pending, &progress, &feature_flags, &req_tx, &notif_tx);
                }
            },
            Err(e) => {
                debug!(error = %e, "transport read failed");
                break;
            },
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders unblocks every pending waiter with
    // `TransportClosed` and closes every progress stream.
    pending.lock().expect("pending mutex poisoned").clear();
    progress.lock().expect("progress mutex poisoned").clear();
}

fn dispatch(
    msg: Value,
    pending: &PendingMap,
    progress: &ProgressMap,
    feature_flags: &Arc<Mutex<Value>>,
    req_tx: &mpsc::UnboundedSender<ServerRequest>,
    notif_tx: &mpsc::UnboundedSender<RpcNotification>,
) {
    match Incoming::classify(msg) {
        Incoming::Response { id, message } => {
            let sender = id
                .as_i64()
                .and_then(|id| pending.lock().expect("pending mutex poisoned").remove(&id));
            match sender {
                Some(tx) => {
                    let _ = tx.send(message);
                },
                None => debug!(id = %id, "discarding reply with unknown id"),
            }
        },
        Incoming::Request { id, method, params } => {
            let _ = req_tx.send(ServerRequest { id, method, params });
        },
        Incoming::Notification { method, params } => match method.as_str() {
            "$/progress" => {
                let token = params.get("token").and_then(Value::as_str);
                let value = params.get("value").cloned().unwrap_or(Value::Null);
                let delivered = token.is_some_and(|token| {
                    progress
                        .lock()
                        .expect("progress mutex poisoned")
                        .get(token)
                        .is_some_and(|tx| tx.send(value).is_ok())
                });
                if !delivered {
                    debug!(token = ?token, "progress update with no registered collector");
                }
            },
            "featureFlagsNotification" => {
                *feature_flags.lock().expect("feature flags mutex poisoned") = params.clone();
                let _ = notif_tx.send(RpcNotification { method, params });
            },
            _ => {
                let _ = notif_tx.send(RpcNotification { method, params });
            },
        },
        Incoming::Malformed(msg) => {
            warn!(msg = %msg, "dropping malformed JSON-RPC message");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A scripted peer on the far side of an in-memory pipe.
    struct Peer {
        reader: tokio::io::ReadHalf<tokio::io::DuplexStream>,
        writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
        framing: Framing,
        buf: Vec<u8>,
    }

    impl Peer {
        async fn read_frame(&mut self) -> Value {
            let mut chunk = [0u8; 1024];
            loop {
                if let Some(msg) = self.framing.decode(&mut self.buf) {
                    return msg;
                }
                let n = self.reader.read(&mut chunk).await.unwrap();
                assert!(n > 0, "peer stream closed");
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }

        async fn send(&mut self, msg: &Value) {
            self.writer
                .write_all(&self.framing.encode(msg))
                .await
                .unwrap();
            self.writer.flush().await.unwrap();
        }
    }

    fn pair(framing: Framing) -> (Transport, TransportChannels, Peer) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (read_ours, write_ours) = tokio::io::split(ours);
        let (read_theirs, write_theirs) = tokio::io::split(theirs);
        let (transport, channels) = Transport::connect(read_ours, write_ours, framing);
        (
            transport,
            channels,
            Peer {
                reader: read_theirs,
                writer: write_theirs,
                framing,
                buf: Vec::new(),
            },
        )
    }

    #[tokio::test]
    async fn correlates_out_of_order_responses() {
        let (transport, _channels, mut peer) = pair(Framing::ContentLength);

        let t1 = transport.clone();
        let first =
            tokio::spawn(
                async move { t1.request("a", None, Duration::from_secs(5)).await.unwrap() },
            );
        let r1 = peer.read_frame().await;
        let t2 = transport.clone();
        let second =
            tokio::spawn(
                async move { t2.request("b", None, Duration::from_secs(5)).await.unwrap() },
            );
        let r2 = peer.read_frame().await;

        // Answer in reverse order.
        peer.send(&json!({"jsonrpc": "2.0", "id": r2["id"], "result": "second"}))
            .await;
        peer.send(&json!({"jsonrpc": "2.0", "id": r1["id"], "result": "first"}))
            .await;

        assert_eq!(first.await.unwrap(), json!("first"));
        assert_eq!(second.await.unwrap(), json!("second"));
    }

    #[tokio::test]
    async fn request_ids_are_unique_and_increasing() {
        let (transport, _channels, mut peer) = pair(Framing::Line);

        let mut seen = Vec::new();
        for _ in 0..4 {
            let t = transport.clone();
            let handle =
                tokio::spawn(async move { t.request("m", None, Duration::from_secs(5)).await });
            let frame = peer.read_frame().await;
            seen.push(frame["id"].as_i64().unwrap());
            peer.send(&json!({"jsonrpc": "2.0", "id": frame["id"], "result": null}))
                .await;
            handle.await.unwrap().unwrap();
        }

        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 4, "ids must be unique: {seen:?}");
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn timeout_surfaces_and_session_stays_usable() {
        let (transport, _channels, mut peer) = pair(Framing::ContentLength);

        let t = transport.clone();
        let handle =
            tokio::spawn(async move { t.request("slow", None, Duration::from_millis(50)).await });
        let _ = peer.read_frame().await; // request received but never answered
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Timeout { .. }));

        // A later request still works.
        let t = transport.clone();
        let handle =
            tokio::spawn(async move { t.request("ok", None, Duration::from_secs(5)).await });
        let frame = peer.read_frame().await;
        peer.send(&json!({"jsonrpc": "2.0", "id": frame["id"], "result": 1}))
            .await;
        assert_eq!(handle.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn peer_exit_fails_pending_requests() {
        let (transport, _channels, mut peer) = pair(Framing::ContentLength);

        let t = transport.clone();
        let handle =
            tokio::spawn(async move { t.request("doomed", None, Duration::from_secs(5)).await });
        let _ = peer.read_frame().await;
        drop(peer);

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed));

        // The transport reports closed and refuses further sends.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(transport.is_closed());
        let err = transport
            .request("after", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed));
    }

    #[tokio::test]
    async fn error_response_is_surfaced() {
        let (transport, _channels, mut peer) = pair(Framing::Line);

        let t = transport.clone();
        let handle =
            tokio::spawn(async move { t.request("bad", None, Duration::from_secs(5)).await });
        let frame = peer.read_frame().await;
        peer.send(&json!({
            "jsonrpc": "2.0", "id": frame["id"],
            "error": {"code": -32601, "message": "Method not found: bad"}
        }))
        .await;

        match handle.await.unwrap().unwrap_err() {
            RpcError::ErrorResponse { code, message } => {
                assert_eq!(code, -32601);
                assert!(message.contains("bad"));
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_requests_are_queued_and_answerable() {
        let (transport, mut channels, mut peer) = pair(Framing::ContentLength);

        peer.send(&json!({
            "jsonrpc": "2.0", "id": 41,
            "method": "conversation/invokeClientToolConfirmation",
            "params": {"name": "run_in_terminal"}
        }))
        .await;

        let req = channels.requests.recv().await.unwrap();
        assert_eq!(req.method, "conversation/invokeClientToolConfirmation");
        transport
            .respond(&req.id, json!([{"result": "accept"}, null]))
            .await
            .unwrap();

        let reply = peer.read_frame().await;
        assert_eq!(reply["id"], json!(41));
        assert_eq!(reply["result"][0]["result"], "accept");
    }

    #[tokio::test]
    async fn progress_routed_by_token_in_order() {
        let (transport, _channels, mut peer) = pair(Framing::ContentLength);

        let mut rx = transport.register_progress("tok-1");
        for i in 0..3 {
            peer.send(&json!({
                "jsonrpc": "2.0", "method": "$/progress",
                "params": {"token": "tok-1", "value": {"kind": "report", "n": i}}
            }))
            .await;
        }
        // A different token must not leak into this receiver.
        peer.send(&json!({
            "jsonrpc": "2.0", "method": "$/progress",
            "params": {"token": "tok-2", "value": {"kind": "end"}}
        }))
        .await;
        peer.send(&json!({
            "jsonrpc": "2.0", "method": "$/progress",
            "params": {"token": "tok-1", "value": {"kind": "end"}}
        }))
        .await;

        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap()["n"], json!(i));
        }
        assert_eq!(rx.recv().await.unwrap()["kind"], "end");
        transport.unregister_progress("tok-1");
    }

    #[tokio::test]
    async fn feature_flags_are_retained() {
        let (transport, mut channels, mut peer) = pair(Framing::ContentLength);
        assert_eq!(transport.feature_flags(), Value::Null);

        peer.send(&json!({
            "jsonrpc": "2.0", "method": "featureFlagsNotification",
            "params": {"mcp": true, "chat": true}
        }))
        .await;

        let notif = channels.notifications.recv().await.unwrap();
        assert_eq!(notif.method, "featureFlagsNotification");
        assert_eq!(transport.feature_flags()["mcp"], json!(true));
    }

    #[tokio::test]
    async fn generic_notifications_are_forwarded() {
        let (_transport, mut channels, mut peer) = pair(Framing::ContentLength);
        peer.send(&json!({
            "jsonrpc": "2.0", "method": "textDocument/publishDiagnostics",
            "params": {"uri": "file:///a.py", "diagnostics": []}
        }))
        .await;
        let notif = channels.notifications.recv().await.unwrap();
        assert_eq!(notif.method, "textDocument/publishDiagnostics");
        assert_eq!(notif.params["uri"], "file:///a.py");
    }

    #[tokio::test]
    async fn unknown_response_id_is_discarded() {
        let (transport, _channels, mut peer) = pair(Framing::Line);
        peer.send(&json!({"jsonrpc": "2.0", "id": 999, "result": "stray"}))
            .await;

        // Transport keeps working afterwards.
        let t = transport.clone();
        let handle =
            tokio::spawn(async move { t.request("ping", None, Duration::from_secs(5)).await });
        let frame = peer.read_frame().await;
        peer.send(&json!({"jsonrpc": "2.0", "id": frame["id"], "result": "pong"}))
            .await;
        assert_eq!(handle.await.unwrap().unwrap(), json!("pong"));
    }
}
