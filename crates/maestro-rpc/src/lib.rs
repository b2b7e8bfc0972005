//! Framed JSON-RPC subprocess transport.
//!
//! Every subprocess the runtime supervises (the upstream language server,
//! client-side MCP servers, per-language LSP servers, worker agents) speaks
//! JSON-RPC 2.0 over stdio in one of two framings:
//!
//! - [`Framing::ContentLength`]: each object prefixed with
//!   `Content-Length: N\r\n\r\n` (language servers).
//! - [`Framing::Line`]: one object per newline-terminated line (MCP).
//!
//! [`Transport`] owns one child process and multiplexes its stdout into
//! responses (correlated by request id), server→client requests, and
//! notifications, with `$/progress` updates routed to per-token channels.

mod framing;
mod message;
mod transport;

pub use framing::Framing;
pub use message::{
    error_message, notification_message, request_message, response_message, Incoming,
};
pub use transport::{RpcNotification, ServerRequest, Transport, TransportChannels};

use thiserror::Error;

/// Errors from the RPC transport layer.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The child process exited (or the stream closed) with requests in flight.
    #[error("transport closed")]
    TransportClosed,

    /// No response arrived within the deadline.
    #[error("no response for {method} within {seconds}s")]
    Timeout {
        /// The request method.
        method: String,
        /// The deadline that elapsed.
        seconds: u64,
    },

    /// The peer answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    ErrorResponse {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// Failed to spawn the child process.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// I/O error writing to the child.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations.
pub type RpcResult<T> = Result<T, RpcError>;
