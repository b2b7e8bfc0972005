//! One supervised language-server subprocess.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use maestro_core::uri::path_to_uri;
use maestro_rpc::{Framing, Transport, TransportChannels};
use serde_json::{json, Value};
use tracing::debug;

use crate::LspResult;

/// How long to wait for pushed diagnostics after opening a document.
const DIAGNOSTICS_DEADLINE: Duration = Duration::from_secs(10);
/// Poll interval for the diagnostics cache.
const DIAGNOSTICS_POLL: Duration = Duration::from_millis(200);
/// Timeout for reference and symbol queries.
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for hover queries.
const HOVER_TIMEOUT: Duration = Duration::from_secs(15);

type DiagnosticsCache = Arc<Mutex<HashMap<String, Vec<Value>>>>;

/// One running language server.
///
/// Diagnostics are pushed by the server (`textDocument/publishDiagnostics`)
/// and cached per URI; queries poll that cache. Document versions increase
/// monotonically per URI.
pub struct LspServer {
    language_id: String,
    transport: Transport,
    diagnostics: DiagnosticsCache,
    open_docs: Mutex<HashMap<String, i64>>,
}

impl LspServer {
    /// Spawn `command` and perform the `initialize`/`initialized` handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or the handshake
    /// fails.
    pub async fn start(
        language_id: &str,
        command: &str,
        args: &[String],
        workspace_root: &Path,
    ) -> LspResult<Self> {
        let (transport, channels) = Transport::spawn(
            command,
            args,
            &HashMap::new(),
            Framing::ContentLength,
            &format!("lsp:{language_id}"),
        )?;
        Self::connect(language_id, transport, channels, workspace_root).await
    }

    /// Handshake over an established transport (tests use an in-memory
    /// pipe).
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails.
    pub async fn connect(
        language_id: &str,
        transport: Transport,
        channels: TransportChannels,
        workspace_root: &Path,
    ) -> LspResult<Self> {
        let diagnostics: DiagnosticsCache = Arc::new(Mutex::new(HashMap::new()));
        spawn_notification_consumer(transport.clone(), channels, diagnostics.clone());

        let root_uri = path_to_uri(workspace_root)?;
        let root_name = workspace_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        transport
            .request(
                "initialize",
                Some(json!({
                    "processId": std::process::id(),
                    "capabilities": {
                        "textDocument": {
                            "publishDiagnostics": {"relatedInformation": true},
                            "hover": {"contentFormat": ["plaintext", "markdown"]},
                            "references": {},
                            "definition": {},
                        },
                        "workspace": {
                            "symbol": {"symbolKind": {"valueSet": (1..=26).collect::<Vec<_>>()}},
                            "workspaceFolders": true,
                        },
                    },
                    "rootUri": root_uri,
                    "rootPath": workspace_root.to_string_lossy(),
                    "workspaceFolders": [{"uri": root_uri, "name": root_name}],
                })),
                QUERY_TIMEOUT,
            )
            .await?;
        transport.notify("initialized", Some(json!({}))).await?;

        Ok(Self {
            language_id: language_id.to_string(),
            transport,
            diagnostics,
            open_docs: Mutex::new(HashMap::new()),
        })
    }

    /// Language id this server was started for.
    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    /// Whether the subprocess is still attached.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.transport.is_closed()
    }

    /// Open a document or push its new content, waiting up to ten seconds
    /// for the server to publish diagnostics for it.
    ///
    /// Returns whatever the cache holds at the deadline, possibly empty.
    #[allow(clippy::arithmetic_side_effects)] // seconds-scale deadlines cannot overflow Instant
    pub async fn diagnostics(&self, file_path: &Path, text: &str) -> Vec<Value> {
        let Ok(uri) = path_to_uri(file_path) else {
            return Vec::new();
        };
        if self.ensure_open(&uri, file_path, text).await.is_err() {
            return Vec::new();
        }

        let deadline = tokio::time::Instant::now() + DIAGNOSTICS_DEADLINE;
        loop {
            if let Some(found) = self
                .diagnostics
                .lock()
                .expect("diagnostics mutex poisoned")
                .get(&uri)
            {
                return found.clone();
            }
            if tokio::time::Instant::now() >= deadline {
                return Vec::new();
            }
            tokio::time::sleep(DIAGNOSTICS_POLL).await;
        }
    }

    /// All references to the symbol at `line`:`character`, declaration
    /// included. Empty on any failure.
    pub async fn references(
        &self,
        file_path: &Path,
        line: u64,
        character: u64,
        text: &str,
    ) -> Vec<Value> {
        let Ok(uri) = path_to_uri(file_path) else {
            return Vec::new();
        };
        if self.ensure_open(&uri, file_path, text).await.is_err() {
            return Vec::new();
        }

        self.transport
            .request(
                "textDocument/references",
                Some(json!({
                    "textDocument": {"uri": uri},
                    "position": {"line": line, "character": character},
                    "context": {"includeDeclaration": true},
                })),
                QUERY_TIMEOUT,
            )
            .await
            .ok()
            .and_then(|result| result.as_array().cloned())
            .unwrap_or_default()
    }

    /// Workspace-wide symbol search. Empty on any failure.
    pub async fn workspace_symbols(&self, query: &str) -> Vec<Value> {
        self.transport
            .request(
                "workspace/symbol",
                Some(json!({"query": query})),
                QUERY_TIMEOUT,
            )
            .await
            .ok()
            .and_then(|result| result.as_array().cloned())
            .unwrap_or_default()
    }

    /// Hover text (signatures, docs) at a position. Empty on any failure.
    pub async fn hover(&self, file_path: &Path, line: u64, character: u64, text: &str) -> String {
        let Ok(uri) = path_to_uri(file_path) else {
            return String::new();
        };
        if self.ensure_open(&uri, file_path, text).await.is_err() {
            return String::new();
        }

        self.transport
            .request(
                "textDocument/hover",
                Some(json!({
                    "textDocument": {"uri": uri},
                    "position": {"line": line, "character": character},
                })),
                HOVER_TIMEOUT,
            )
            .await
            .ok()
            .and_then(|result| result.get("contents").map(flatten_hover))
            .unwrap_or_default()
    }

    /// Shutdown handshake, then kill.
    pub async fn stop(&self) {
        let _ = self
            .transport
            .request("shutdown", None, Duration::from_secs(5))
            .await;
        let _ = self.transport.notify("exit", None).await;
        self.transport.kill();
    }

    /// `didOpen` at version 1, `didChange` with the next version after.
    async fn ensure_open(&self, uri: &str, file_path: &Path, text: &str) -> LspResult<()> {
        let version = {
            let mut docs = self.open_docs.lock().expect("open docs mutex poisoned");
            match docs.get_mut(uri) {
                Some(version) => {
                    *version = version.saturating_add(1);
                    Some(*version)
                },
                None => {
                    docs.insert(uri.to_string(), 1);
                    None
                },
            }
        };

        match version {
            Some(version) => {
                self.transport
                    .notify(
                        "textDocument/didChange",
                        Some(json!({
                            "textDocument": {"uri": uri, "version": version},
                            "contentChanges": [{"text": text}],
                        })),
                    )
                    .await?;
            },
            None => {
                let language_id = maestro_core::language_id_for_path(file_path)
                    .unwrap_or(self.language_id.as_str());
                self.transport
                    .notify(
                        "textDocument/didOpen",
                        Some(json!({
                            "textDocument": {
                                "uri": uri,
                                "languageId": language_id,
                                "version": 1,
                                "text": text,
                            },
                        })),
                    )
                    .await?;
            },
        }
        Ok(())
    }
}

impl std::fmt::Debug for LspServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspServer")
            .field("language_id", &self.language_id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Cache pushed diagnostics, answer server requests with `null`, drop the
/// log/show noise.
fn spawn_notification_consumer(
    transport: Transport,
    mut channels: TransportChannels,
    diagnostics: DiagnosticsCache,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                notif = channels.notifications.recv() => {
                    let Some(notif) = notif else { break };
                    match notif.method.as_str() {
                        "textDocument/publishDiagnostics" => {
                            let uri = notif.params.get("uri").and_then(Value::as_str);
                            if let Some(uri) = uri {
                                let items = notif
                                    .params
                                    .get("diagnostics")
                                    .and_then(Value::as_array)
                                    .cloned()
                                    .unwrap_or_default();
                                diagnostics
                                    .lock()
                                    .expect("diagnostics mutex poisoned")
                                    .insert(uri.to_string(), items);
                            }
                        },
                        "window/logMessage" | "window/showMessage" => {},
                        other => debug!(method = %other, "ignoring LSP notification"),
                    }
                },
                req = channels.requests.recv() => {
                    let Some(req) = req else { break };
                    let _ = transport.respond(&req.id, Value::Null).await;
                },
            }
        }
    });
}

/// Flatten the polymorphic hover `contents` value to plain text.
///
/// Shapes seen in the wild: a bare string, `{value}` / `MarkupContent`,
/// or an array mixing both.
#[must_use]
pub fn flatten_hover(contents: &Value) -> String {
    match contents {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("value")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| contents.to_string()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                Value::Object(obj) => obj
                    .get("value")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                _ => String::new(),
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => contents.to_string(),
    }
}
