//! Execution context handed to every tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use maestro_lsp::LspBridge;

/// Receives file contents after a tool mutates a file, so the upstream
/// session can push `didOpen`/`didChange` with the next document version.
#[async_trait::async_trait]
pub trait DocumentSink: Send + Sync {
    /// A tool wrote `content` to `path`.
    async fn sync_file(&self, path: &Path, content: &str);
}

/// Sink for contexts without an upstream session (tests, dry runs).
#[derive(Debug, Default)]
pub struct NullDocumentSink;

#[async_trait::async_trait]
impl DocumentSink for NullDocumentSink {
    async fn sync_file(&self, _path: &Path, _content: &str) {}
}

/// Immutable context shared by all tool invocations of one session.
#[derive(Clone)]
pub struct ToolContext {
    /// Workspace root directory.
    pub workspace_root: PathBuf,
    /// Document sync back to the upstream session.
    pub docs: Arc<dyn DocumentSink>,
    /// Language-server bridge, when configured.
    pub lsp: Option<LspBridge>,
}

impl ToolContext {
    /// Context with no upstream session and no LSP bridge.
    #[must_use]
    pub fn standalone(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            docs: Arc::new(NullDocumentSink),
            lsp: None,
        }
    }

    /// Attach an LSP bridge.
    #[must_use]
    pub fn with_lsp(mut self, lsp: LspBridge) -> Self {
        self.lsp = Some(lsp);
        self
    }

    /// Attach a document sink.
    #[must_use]
    pub fn with_docs(mut self, docs: Arc<dyn DocumentSink>) -> Self {
        self.docs = docs;
        self
    }

    /// Resolve a possibly-relative path against the workspace root.
    #[must_use]
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.workspace_root.join(p)
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("workspace_root", &self.workspace_root)
            .field("has_lsp", &self.lsp.is_some())
            .finish_non_exhaustive()
    }
}
