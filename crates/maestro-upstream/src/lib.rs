//! Upstream assistant session management.
//!
//! An [`UpstreamSession`] owns one long-lived language-server subprocess
//! speaking Content-Length-framed JSON-RPC: handshake and authentication,
//! chat conversations with streamed progress, agent-mode tool registration
//! and dispatch, and document version sync. The [`SessionPool`] shares one
//! session per workspace across concurrent callers with refcounted
//! lifetime.

mod auth;
mod pool;
mod progress;
mod session;

pub use auth::AuthInfo;
pub use pool::SessionPool;
pub use progress::{ProgressCallback, ProgressUpdate, ReplyData};
pub use session::{ConversationReply, SessionOptions, TurnOptions, UpstreamSession};

use thiserror::Error;

/// Errors from the upstream session layer.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Credential file problems.
    #[error("auth error: {0}")]
    Auth(String),

    /// No progress updates arrived within the inactivity window.
    #[error("no response from upstream for {seconds}s; check network/proxy settings")]
    Inactivity {
        /// The inactivity window that elapsed.
        seconds: u64,
    },

    /// The whole reply did not finish within the total window.
    #[error("chat response timed out after {seconds}s; check network/proxy settings")]
    ReplyTimeout {
        /// The total window that elapsed.
        seconds: u64,
    },

    /// Transport-level failure (includes the upstream process dying).
    #[error(transparent)]
    Rpc(#[from] maestro_rpc::RpcError),

    /// Workspace path could not be expressed as a URI.
    #[error("bad path: {0}")]
    Uri(#[from] maestro_core::uri::UriError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;
