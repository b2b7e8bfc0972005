//! Lazy per-language server management and symbol resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use maestro_config::LspServerConfig;
use maestro_core::{language_id_for_path, uri::uri_to_path};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::server::LspServer;
use crate::DEFAULT_SERVERS;

/// A resolved symbol position.
pub type SymbolPosition = (PathBuf, u64, u64);

/// Manages language servers, one per language id, started on first use.
///
/// Cheaply cloneable; clones share the server map.
#[derive(Clone)]
pub struct LspBridge {
    workspace_root: PathBuf,
    config: HashMap<String, LspServerConfig>,
    servers: Arc<RwLock<HashMap<String, Arc<LspServer>>>>,
}

impl LspBridge {
    /// Create a bridge for `workspace_root` with user server overrides.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>, config: HashMap<String, LspServerConfig>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            config,
            servers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Configured languages (for startup banners).
    #[must_use]
    pub fn configured_languages(&self) -> Vec<String> {
        self.config.keys().cloned().collect()
    }

    /// Get (or lazily start) the server for a language id.
    ///
    /// Returns `None` when no server is configured for the language, the
    /// command is missing from `PATH`, or startup fails; callers degrade
    /// to text search.
    pub async fn server_for_language(&self, language_id: &str) -> Option<Arc<LspServer>> {
        {
            let mut servers = self.servers.write().await;
            if let Some(server) = servers.get(language_id) {
                if server.is_running() {
                    return Some(server.clone());
                }
                warn!(language = %language_id, "language server exited, restarting");
                servers.remove(language_id);
            }
        }

        let (command, args) = self.resolve_command(language_id)?;
        if which::which(&command).is_err() {
            debug!(language = %language_id, command = %command, "language server not on PATH");
            return None;
        }

        match LspServer::start(language_id, &command, &args, &self.workspace_root).await {
            Ok(server) => {
                let server = Arc::new(server);
                self.servers
                    .write()
                    .await
                    .insert(language_id.to_string(), server.clone());
                Some(server)
            },
            Err(e) => {
                warn!(language = %language_id, error = %e, "language server failed to start");
                None
            },
        }
    }

    /// Get the server for a file, by extension.
    pub async fn server_for_file(&self, file_path: &Path) -> Option<Arc<LspServer>> {
        let language_id = language_id_for_path(file_path)?;
        self.server_for_language(language_id).await
    }

    /// Resolve a symbol name to `(file, line, character)`.
    ///
    /// Prefers a `workspace/symbol` exact-name match, then the first
    /// partial match, then a definition-pattern text search of `file_path`.
    pub async fn find_symbol_position(
        &self,
        name: &str,
        file_path: &Path,
    ) -> Option<SymbolPosition> {
        if let Some(server) = self.server_for_file(file_path).await {
            let symbols = server.workspace_symbols(name).await;
            if let Some(position) = pick_symbol_position(&symbols, name) {
                return Some(position);
            }
        }
        text_search_position(name, file_path)
    }

    /// Stop every running server.
    pub async fn stop_all(&self) {
        let mut servers = self.servers.write().await;
        for server in servers.values() {
            server.stop().await;
        }
        servers.clear();
    }

    /// Command + args for a language: user config first, then built-ins.
    fn resolve_command(&self, language_id: &str) -> Option<(String, Vec<String>)> {
        if let Some(cfg) = self.config.get(language_id) {
            if !cfg.command.is_empty() {
                return Some((cfg.command.clone(), cfg.args.clone()));
            }
        }
        DEFAULT_SERVERS
            .iter()
            .find(|(lang, _, _)| *lang == language_id)
            .map(|(_, command, args)| {
                (
                    (*command).to_string(),
                    args.iter().map(|a| (*a).to_string()).collect(),
                )
            })
    }
}

impl std::fmt::Debug for LspBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspBridge")
            .field("workspace_root", &self.workspace_root)
            .field("configured", &self.config.len())
            .finish_non_exhaustive()
    }
}

/// Pick a position from `workspace/symbol` results: exact name match wins,
/// then the first result.
fn pick_symbol_position(symbols: &[Value], name: &str) -> Option<SymbolPosition> {
    let exact = symbols
        .iter()
        .find(|sym| sym.get("name").and_then(Value::as_str) == Some(name));
    let chosen = exact.or_else(|| symbols.first())?;

    let location = chosen.get("location")?;
    let uri = location.get("uri").and_then(Value::as_str)?;
    let start = location.get("range")?.get("start")?;
    Some((
        uri_to_path(uri).ok()?,
        start.get("line").and_then(Value::as_u64).unwrap_or(0),
        start.get("character").and_then(Value::as_u64).unwrap_or(0),
    ))
}

/// Fallback: find a definition-looking line (`def name`, `fn name`, …) by
/// text search, then any plain occurrence.
fn text_search_position(name: &str, file_path: &Path) -> Option<SymbolPosition> {
    let content = std::fs::read_to_string(file_path).ok()?;
    let pattern = regex::Regex::new(&format!(
        r"\b(def|class|function|func|fn|const|let|var|type|interface|struct|enum)\s+{}\b",
        regex::escape(name)
    ))
    .ok()?;

    let mut plain: Option<SymbolPosition> = None;
    for (lineno, line) in content.lines().enumerate() {
        if pattern.is_match(line) {
            let col = line.find(name).unwrap_or(0);
            return Some((file_path.to_path_buf(), lineno as u64, col as u64));
        }
        if plain.is_none() {
            if let Some(col) = line.find(name) {
                plain = Some((file_path.to_path_buf(), lineno as u64, col as u64));
            }
        }
    }
    plain
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn picks_exact_symbol_over_first() {
        let symbols = vec![
            json!({"name": "handler_base", "location": {
                "uri": "file:///ws/base.py", "range": {"start": {"line": 1, "character": 0}}}}),
            json!({"name": "handler", "location": {
                "uri": "file:///ws/app.py", "range": {"start": {"line": 10, "character": 4}}}}),
        ];
        let (path, line, character) = pick_symbol_position(&symbols, "handler").unwrap();
        assert_eq!(path, PathBuf::from("/ws/app.py"));
        assert_eq!((line, character), (10, 4));
    }

    #[test]
    fn falls_back_to_first_partial_match() {
        let symbols = vec![json!({"name": "handler_base", "location": {
            "uri": "file:///ws/base.py", "range": {"start": {"line": 1, "character": 2}}}})];
        let (path, line, _) = pick_symbol_position(&symbols, "handler").unwrap();
        assert_eq!(path, PathBuf::from("/ws/base.py"));
        assert_eq!(line, 1);
    }

    #[test]
    fn no_symbols_is_none() {
        assert!(pick_symbol_position(&[], "x").is_none());
    }

    #[test]
    fn text_search_prefers_definition_lines() {
        let mut file = tempfile::NamedTempFile::with_suffix(".py").unwrap();
        writeln!(file, "# handler is defined below").unwrap();
        writeln!(file, "result = handler()").unwrap();
        writeln!(file, "def handler():").unwrap();
        file.flush().unwrap();

        let (_, line, col) = text_search_position("handler", file.path()).unwrap();
        assert_eq!(line, 2);
        assert_eq!(col, 4);
    }

    #[test]
    fn text_search_falls_back_to_plain_occurrence() {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "nothing here").unwrap();
        writeln!(file, "mentions handler somewhere").unwrap();
        file.flush().unwrap();

        let (_, line, _) = text_search_position("handler", file.path()).unwrap();
        assert_eq!(line, 1);
    }

    #[test]
    fn text_search_missing_file_is_none() {
        assert!(text_search_position("x", Path::new("/no/such/file.py")).is_none());
    }

    #[tokio::test]
    async fn unavailable_command_degrades_to_none() {
        let mut config = HashMap::new();
        config.insert(
            "python".to_string(),
            LspServerConfig {
                command: "definitely-not-a-real-language-server".to_string(),
                args: vec![],
            },
        );
        let bridge = LspBridge::new("/tmp/ws", config);
        assert!(bridge.server_for_language("python").await.is_none());
    }

    #[tokio::test]
    async fn unknown_language_degrades_to_none() {
        let bridge = LspBridge::new("/tmp/ws", HashMap::new());
        assert!(bridge.server_for_language("cobol").await.is_none());
        assert!(bridge
            .server_for_file(Path::new("/tmp/data.bin"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn find_symbol_uses_text_fallback_without_server() {
        let mut file = tempfile::NamedTempFile::with_suffix(".cob").unwrap();
        writeln!(file, "const target = 1").unwrap();
        file.flush().unwrap();

        let bridge = LspBridge::new("/tmp/ws", HashMap::new());
        let (path, line, _) = bridge
            .find_symbol_position("target", file.path())
            .await
            .unwrap();
        assert_eq!(path, file.path());
        assert_eq!(line, 0);
    }

    #[test]
    fn config_override_beats_builtin() {
        let mut config = HashMap::new();
        config.insert(
            "python".to_string(),
            LspServerConfig {
                command: "my-pyls".to_string(),
                args: vec!["--custom".to_string()],
            },
        );
        let bridge = LspBridge::new("/tmp/ws", config);
        let (command, args) = bridge.resolve_command("python").unwrap();
        assert_eq!(command, "my-pyls");
        assert_eq!(args, vec!["--custom"]);

        let (command, _) = bridge.resolve_command("go").unwrap();
        assert_eq!(command, "gopls");
        assert!(bridge.resolve_command("cobol").is_none());
    }
}
