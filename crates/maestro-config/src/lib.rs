//! Configuration for the maestro agent runtime.
//!
//! Two configuration surfaces:
//!
//! - [`RuntimeConfig`]: the user's `config.toml`: workspace, upstream
//!   binary, credentials file, default model, proxy, and the `[mcp]` /
//!   `[lsp]` server tables.
//! - [`AgentConfig`]: a single-agent or orchestrator definition (JSON or
//!   TOML, chosen by extension). A non-empty `workers` array marks an
//!   orchestrator config.

mod agent;
mod runtime;

pub use agent::{AgentConfig, ToolSelection, TransportKind, WorkerConfig};
pub use runtime::{LspServerConfig, McpServerConfig, ProxyConfig, RuntimeConfig};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// The path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// File contents did not parse.
    #[error("invalid config {path}: {message}")]
    Parse {
        /// The path that failed.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Expand a leading `~` to the user's home directory.
#[must_use]
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = text.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    } else if text == "~" {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().to_path_buf();
        }
    }
    path.to_path_buf()
}
