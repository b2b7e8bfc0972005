//! Streamed chat reply collection from `$/progress` updates.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::{UpstreamError, UpstreamResult};

/// A classified progress update for one conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// A reply text fragment.
    Delta(String),
    /// One agent round (tool calls and their textual replies).
    AgentRound(Value),
    /// An annotation (file edits and similar).
    Annotation(Value),
    /// A reference (files being read).
    Reference(Value),
    /// Terminal marker; the stream is finite and ends here.
    Done,
}

/// Callback invoked for every classified update.
pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// A fully collected reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyData {
    /// Concatenated reply text.
    pub text: String,
    /// Agent rounds, in arrival order.
    pub agent_rounds: Vec<Value>,
}

/// Collect progress updates for one work-done token until the `end` record.
///
/// Two clocks run: `total` bounds the whole reply, `inactivity` bounds the
/// gap between consecutive updates. Either elapsing is an error; the
/// session itself stays usable.
///
/// # Errors
///
/// [`UpstreamError::Inactivity`] / [`UpstreamError::ReplyTimeout`] on the
/// respective clock, or the transport error when the upstream process dies
/// mid-stream.
#[allow(clippy::arithmetic_side_effects)] // seconds-scale deadlines cannot overflow Instant
pub async fn collect_reply(
    rx: &mut mpsc::UnboundedReceiver<Value>,
    total: Duration,
    inactivity: Duration,
    callback: Option<&ProgressCallback>,
) -> UpstreamResult<ReplyData> {
    let started = tokio::time::Instant::now();
    let total_deadline = started + total;
    let mut inactivity_deadline = started + inactivity;
    let mut reply = ReplyData::default();

    loop {
        let now = tokio::time::Instant::now();
        if now >= total_deadline {
            return Err(UpstreamError::ReplyTimeout {
                seconds: total.as_secs(),
            });
        }
        if now >= inactivity_deadline {
            return Err(UpstreamError::Inactivity {
                seconds: inactivity.as_secs(),
            });
        }

        let wait_until = total_deadline.min(inactivity_deadline);
        match tokio::time::timeout_at(wait_until, rx.recv()).await {
            Ok(Some(update)) => {
                inactivity_deadline = tokio::time::Instant::now() + inactivity;
                if apply_update(&update, &mut reply, callback) {
                    return Ok(reply);
                }
            },
            // Progress channel closed: the upstream process died mid-reply.
            Ok(None) => return Err(maestro_rpc::RpcError::TransportClosed.into()),
            Err(_elapsed) => {
                if wait_until == total_deadline {
                    return Err(UpstreamError::ReplyTimeout {
                        seconds: total.as_secs(),
                    });
                }
                return Err(UpstreamError::Inactivity {
                    seconds: inactivity.as_secs(),
                });
            },
        }
    }
}

/// Fold one raw progress record into the reply. Returns `true` on the
/// terminal `end` record.
///
/// A record may carry several payloads at once: `reply`/`delta`/`message`
/// text fragments, `editAgentRounds`, `annotations`, `references`.
pub(crate) fn apply_update(
    update: &Value,
    reply: &mut ReplyData,
    callback: Option<&ProgressCallback>,
) -> bool {
    let emit = |kind: &ProgressUpdate| {
        if let Some(cb) = callback {
            cb(kind);
        }
    };

    let kind = update.get("kind").and_then(Value::as_str);
    if kind == Some("end") {
        emit(&ProgressUpdate::Done);
        return true;
    }

    for field in ["reply", "delta"] {
        if let Some(text) = update.get(field).and_then(Value::as_str) {
            if !text.is_empty() {
                reply.text.push_str(text);
                emit(&ProgressUpdate::Delta(text.to_string()));
            }
        }
    }
    // Some server versions stream text in `message`; `begin` records carry
    // a status message there that is not reply content.
    if kind != Some("begin") {
        if let Some(text) = update.get("message").and_then(Value::as_str) {
            if !text.is_empty() {
                reply.text.push_str(text);
                emit(&ProgressUpdate::Delta(text.to_string()));
            }
        }
    }

    if let Some(rounds) = update.get("editAgentRounds").and_then(Value::as_array) {
        for round in rounds {
            if let Some(text) = round.get("reply").and_then(Value::as_str) {
                reply.text.push_str(text);
            }
            reply.agent_rounds.push(round.clone());
            emit(&ProgressUpdate::AgentRound(round.clone()));
        }
    }
    if let Some(annotations) = update.get("annotations").and_then(Value::as_array) {
        for annotation in annotations {
            emit(&ProgressUpdate::Annotation(annotation.clone()));
        }
    }
    if let Some(references) = update.get("references").and_then(Value::as_array) {
        for reference in references {
            emit(&ProgressUpdate::Reference(reference.clone()));
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn accumulates_text_fragments() {
        let mut reply = ReplyData::default();
        assert!(!apply_update(&json!({"reply": "Hello"}), &mut reply, None));
        assert!(!apply_update(&json!({"delta": ", "}), &mut reply, None));
        assert!(!apply_update(&json!({"message": "world"}), &mut reply, None));
        assert!(apply_update(&json!({"kind": "end"}), &mut reply, None));
        assert_eq!(reply.text, "Hello, world");
    }

    #[test]
    fn begin_message_is_not_reply_text() {
        let mut reply = ReplyData::default();
        apply_update(
            &json!({"kind": "begin", "message": "thinking..."}),
            &mut reply,
            None,
        );
        assert_eq!(reply.text, "");
    }

    #[test]
    fn agent_rounds_collect_and_append_reply() {
        let mut reply = ReplyData::default();
        apply_update(
            &json!({"editAgentRounds": [
                {"reply": "Edited a file.", "toolCalls": [{"name": "create_file"}]},
                {"toolCalls": [{"name": "run_in_terminal"}]},
            ]}),
            &mut reply,
            None,
        );
        assert_eq!(reply.agent_rounds.len(), 2);
        assert_eq!(reply.text, "Edited a file.");
    }

    #[test]
    fn callback_sees_classified_updates() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let callback: ProgressCallback = Arc::new(move |update| {
            let tag = match update {
                ProgressUpdate::Delta(_) => "delta",
                ProgressUpdate::AgentRound(_) => "agent_round",
                ProgressUpdate::Annotation(_) => "annotation",
                ProgressUpdate::Reference(_) => "reference",
                ProgressUpdate::Done => "done",
            };
            seen_clone.lock().unwrap().push(tag.to_string());
        });

        let mut reply = ReplyData::default();
        apply_update(&json!({"delta": "x"}), &mut reply, Some(&callback));
        apply_update(
            &json!({"annotations": [{}], "references": [{"uri": "file:///a"}]}),
            &mut reply,
            Some(&callback),
        );
        apply_update(&json!({"kind": "end"}), &mut reply, Some(&callback));

        assert_eq!(
            seen.lock().unwrap().as_slice(),
            ["delta", "annotation", "reference", "done"]
        );
    }

    #[tokio::test]
    async fn collects_until_end() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(json!({"reply": "a"})).unwrap();
        tx.send(json!({"reply": "b"})).unwrap();
        tx.send(json!({"kind": "end"})).unwrap();

        let reply = collect_reply(
            &mut rx,
            Duration::from_secs(5),
            Duration::from_secs(5),
            None,
        )
        .await
        .unwrap();
        assert_eq!(reply.text, "ab");
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_timeout_fires_on_the_window() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

        let collector = tokio::spawn(async move {
            collect_reply(
                &mut rx,
                Duration::from_secs(300),
                Duration::from_secs(60),
                None,
            )
            .await
        });

        // An update just before the window keeps the stream alive.
        tokio::time::sleep(Duration::from_millis(59_900)).await;
        tx.send(json!({"delta": "still here"})).unwrap();

        // Then nothing for the full window.
        tokio::time::sleep(Duration::from_secs(61)).await;
        let err = collector.await.unwrap().unwrap_err();
        assert!(matches!(err, UpstreamError::Inactivity { seconds: 60 }));
    }

    #[tokio::test(start_paused = true)]
    async fn total_timeout_fires_despite_activity() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

        let collector = tokio::spawn(async move {
            collect_reply(
                &mut rx,
                Duration::from_secs(60),
                Duration::from_secs(60),
                None,
            )
            .await
        });

        // Keep sending activity so only the total clock can fire.
        for _ in 0..7 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            let _ = tx.send(json!({"delta": "tick"}));
        }
        let err = collector.await.unwrap().unwrap_err();
        assert!(matches!(err, UpstreamError::ReplyTimeout { seconds: 60 }));
    }

    #[tokio::test]
    async fn closed_channel_is_transport_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        drop(tx);
        let err = collect_reply(
            &mut rx,
            Duration::from_secs(5),
            Duration::from_secs(5),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::Rpc(maestro_rpc::RpcError::TransportClosed)
        ));
    }
}
