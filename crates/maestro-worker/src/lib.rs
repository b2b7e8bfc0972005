//! Role-specialised worker agents.
//!
//! Both worker kinds share one task-handling contract ([`TaskRunner`]):
//! assemble the prompt from system instructions, shared context, structured
//! input and response-format guidance; drive a conversation on the shared
//! upstream session; soft-validate structured replies. They differ only in
//! transport:
//!
//! - [`serve`]: the subprocess variant: an MCP server on stdin/stdout
//!   exposing `execute_task` / `get_status` / `get_capabilities`.
//! - [`spawn_queue_worker`]: the in-process variant: a task consuming
//!   [`WorkerMessage`]s from an inbox and posting results to a shared
//!   outbox.

mod card;
mod prompt;
mod queue;
mod serve;
mod task;

pub use card::{build_agent_tools, AgentCard};
pub use prompt::build_task_prompt;
pub use queue::{spawn_queue_worker, WorkerHandle, WorkerMessage};
pub use serve::{serve, serve_on, ServeConfig};
pub use task::{TaskOutcome, TaskRunner};

use thiserror::Error;

/// Errors from the worker layer.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Upstream session failure.
    #[error(transparent)]
    Upstream(#[from] maestro_upstream::UpstreamError),

    /// Transport failure on the worker's own MCP channel.
    #[error(transparent)]
    Rpc(#[from] maestro_rpc::RpcError),

    /// Bad worker configuration.
    #[error("invalid worker config: {0}")]
    Config(String),
}

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;
