//! LSP bridge: real language servers for semantic code intelligence.
//!
//! Lazily starts one language server per language id (user override first,
//! then built-in defaults), speaks Content-Length-framed JSON-RPC to it,
//! and exposes diagnostics, references, workspace symbols and hover. Every
//! operation degrades to a sentinel ("no results", empty list) rather than
//! failing when no server is available; tools fall back to text search.

mod bridge;
mod server;

pub use bridge::LspBridge;
pub use server::LspServer;

use thiserror::Error;

/// Built-in server commands by language id. Users override via the
/// `[lsp.<language>]` config table.
pub const DEFAULT_SERVERS: &[(&str, &str, &[&str])] = &[
    ("python", "pyright-langserver", &["--stdio"]),
    ("typescript", "typescript-language-server", &["--stdio"]),
    ("javascript", "typescript-language-server", &["--stdio"]),
    ("typescriptreact", "typescript-language-server", &["--stdio"]),
    ("javascriptreact", "typescript-language-server", &["--stdio"]),
    ("go", "gopls", &["serve"]),
    ("rust", "rust-analyzer", &[]),
    ("java", "jdtls", &[]),
];

/// Errors from the LSP bridge.
///
/// These stay internal to the crate's supervision paths; the public query
/// surface degrades to sentinels instead.
#[derive(Debug, Error)]
pub enum LspError {
    /// No server command is configured for the language.
    #[error("no language server for {language}")]
    NoServer {
        /// Language id.
        language: String,
    },

    /// Transport-level failure.
    #[error("LSP transport error: {0}")]
    Rpc(#[from] maestro_rpc::RpcError),

    /// Workspace path could not be expressed as a URI.
    #[error("bad workspace path: {0}")]
    BadPath(#[from] maestro_core::uri::UriError),
}

/// Result type for LSP bridge operations.
pub type LspResult<T> = Result<T, LspError>;
