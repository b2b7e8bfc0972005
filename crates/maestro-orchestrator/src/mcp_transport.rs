//! MCP transport: workers as subprocess MCP servers.
//!
//! Each worker runs as a child process of this binary (`agent-serve`
//! subcommand) speaking line-framed MCP on its stdio; the orchestrator is
//! its MCP client and drives it through the `execute_task` tool.

use std::collections::HashMap;
use std::sync::Arc;

use maestro_config::McpServerConfig;
use maestro_mcp::McpServer;
use maestro_worker::ServeConfig;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::scheduler::{DispatchedTask, TaskReport, TaskStatus, WaveDispatcher};
use crate::settings::OrchestratorSettings;

/// Dispatches waves by invoking `execute_task` on each worker subprocess,
/// one concurrent call per ready task.
pub struct McpDispatcher {
    servers: HashMap<String, Arc<McpServer>>,
}

impl McpDispatcher {
    /// Spawn one worker subprocess per configured role and complete the
    /// MCP handshake with each. Startup failures are logged; tasks for
    /// that role will error at dispatch.
    pub async fn start(settings: &OrchestratorSettings) -> Self {
        let exe = std::env::current_exe()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "maestro".to_string());

        let mut servers = HashMap::new();
        for config in &settings.workers {
            let mut serve_config =
                ServeConfig::from_worker(config, &settings.workspace, settings.proxy.as_ref());
            serve_config.binary = settings.binary.clone();
            serve_config.apps_json = settings.apps_json.clone();
            if serve_config.model.is_none() {
                serve_config.model = settings.model.clone();
            }
            let config_json = match serde_json::to_string(&serve_config) {
                Ok(json) => json,
                Err(e) => {
                    warn!(role = %config.role, error = %e, "cannot serialise worker config");
                    continue;
                },
            };

            let server_config = McpServerConfig {
                command: Some(exe.clone()),
                args: vec!["agent-serve".to_string(), config_json],
                env: HashMap::new(),
                url: None,
            };
            match McpServer::start(&config.role, &server_config).await {
                Ok(server) => {
                    info!(role = %config.role, "worker subprocess ready");
                    servers.insert(config.role.clone(), Arc::new(server));
                },
                Err(e) => {
                    warn!(role = %config.role, error = %e, "worker subprocess failed to start");
                },
            }
        }
        Self { servers }
    }

    /// Stop every worker subprocess.
    pub fn shutdown(&self) {
        for server in self.servers.values() {
            server.stop();
        }
    }
}

#[async_trait::async_trait]
impl WaveDispatcher for McpDispatcher {
    async fn run_wave(&mut self, wave: Vec<DispatchedTask>) -> Vec<(usize, TaskReport)> {
        let calls = wave.into_iter().map(|task| {
            let server = self.servers.get(&task.role).cloned();
            async move {
                let Some(server) = server else {
                    return (
                        task.index,
                        TaskReport::error(format!("No worker found for role: {}", task.role)),
                    );
                };
                let mut arguments = json!({"prompt": task.prompt});
                if task.context.as_object().is_some_and(|c| !c.is_empty()) {
                    arguments["context"] = json!(task.context.to_string());
                }
                match server.call_tool("execute_task", arguments).await {
                    Ok(result) => (task.index, parse_worker_result(&result)),
                    Err(e) => (task.index, TaskReport::error(e.to_string())),
                }
            }
        });
        futures::future::join_all(calls).await
    }
}

impl std::fmt::Debug for McpDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpDispatcher")
            .field("workers", &self.servers.len())
            .finish_non_exhaustive()
    }
}

/// Decode a worker's `execute_task` result: the first text content item
/// carries the outcome JSON (`status`, `reply`/`error`,
/// `agent_rounds_count`, `structured_reply`, `validation_warnings`).
fn parse_worker_result(result: &Value) -> TaskReport {
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|item| item.get("text").or_else(|| item.get("value")))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let Ok(payload) = serde_json::from_str::<Value>(text) else {
        // A worker answering in plain text is still an answer.
        let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
        return TaskReport {
            status: if is_error {
                TaskStatus::Error
            } else {
                TaskStatus::Success
            },
            result: text.to_string(),
            agent_rounds: 0,
            structured_reply: None,
            validation_warnings: Vec::new(),
        };
    };

    let success = payload.get("status").and_then(Value::as_str) == Some("success");
    let text = if success {
        payload.get("reply").and_then(Value::as_str).unwrap_or("")
    } else {
        payload.get("error").and_then(Value::as_str).unwrap_or("worker error")
    };

    TaskReport {
        status: if success {
            TaskStatus::Success
        } else {
            TaskStatus::Error
        },
        result: text.to_string(),
        agent_rounds: payload
            .get("agent_rounds_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize,
        structured_reply: payload.get("structured_reply").cloned(),
        validation_warnings: payload
            .get("validation_warnings")
            .and_then(Value::as_array)
            .map(|warnings| {
                warnings
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
    }
}
