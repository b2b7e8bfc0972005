//! Client-side MCP (Model Context Protocol) bridge.
//!
//! Spawns MCP server processes directly, discovers their tools over the
//! line-framed JSON-RPC transport, and exposes them under prefixed names
//! (`mcp_{server}_{tool}`) so they can be registered with the upstream
//! assistant as ordinary client tools. This keeps URL-based and
//! policy-blocked servers usable: the upstream never knows they are MCP.

mod bridge;
mod sanitize;
mod server;

pub use bridge::{McpBridge, McpServerStatus};
pub use sanitize::sanitize_schema;
pub use server::McpServer;

use thiserror::Error;

/// MCP protocol version spoken by the bridge.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Errors from the MCP bridge.
#[derive(Debug, Error)]
pub enum McpError {
    /// Server is not running (never started, failed, or exited).
    #[error("MCP server not running: {name}")]
    ServerNotRunning {
        /// Server name.
        name: String,
    },

    /// The server config has no command (URL-only servers cannot be spawned
    /// as stdio children here without a command).
    #[error("MCP server '{name}' has no command")]
    NoCommand {
        /// Server name.
        name: String,
    },

    /// Transport-level failure.
    #[error("MCP transport error: {0}")]
    Rpc(#[from] maestro_rpc::RpcError),
}

/// Result type for MCP bridge operations.
pub type McpResult<T> = Result<T, McpError>;
