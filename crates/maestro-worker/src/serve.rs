//! The subprocess worker: an MCP server wrapping an upstream session.
//!
//! Runs as a child process spawned by the orchestrator. Stdin/stdout carry
//! line-framed JSON-RPC (the MCP stdio transport); all incidental output
//! must go to stderr, which is why the embedding binary configures its log
//! writer accordingly. On stdin EOF the worker destroys its conversation,
//! stops its upstream session, and exits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use maestro_config::{
    LspServerConfig, McpServerConfig, ProxyConfig, ToolSelection, WorkerConfig,
};
use maestro_rpc::{Framing, ServerRequest, Transport, TransportChannels};
use maestro_schema::CompactSchema;
use maestro_upstream::{SessionOptions, UpstreamSession};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::card::{build_agent_tools, AgentCard};
use crate::task::{TaskOutcome, TaskRunner};
use crate::{WorkerError, WorkerResult};

/// MCP protocol version spoken by the worker server.
const PROTOCOL_VERSION: &str = "2024-11-05";

fn default_role() -> String {
    "worker".to_string()
}

fn default_true() -> bool {
    true
}

fn default_workspace() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Configuration passed to a subprocess worker on argv as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Role identifier.
    #[serde(default = "default_role")]
    pub role: String,
    /// Display name (defaults to the role).
    pub name: Option<String>,
    /// Description for discovery.
    #[serde(default)]
    pub description: String,
    /// System prompt injected on the first turn.
    #[serde(default)]
    pub system_prompt: String,
    /// Model override.
    pub model: Option<String>,
    /// Enabled client tools.
    #[serde(default)]
    pub tools_enabled: ToolSelection,
    /// Agent mode.
    #[serde(default = "default_true")]
    pub agent_mode: bool,
    /// Workspace root.
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    /// Proxy settings.
    pub proxy: Option<ProxyConfig>,
    /// Worker-specific MCP servers.
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
    /// Worker-specific language servers.
    #[serde(default)]
    pub lsp_servers: HashMap<String, LspServerConfig>,
    /// Structured input contract.
    pub question_schema: Option<CompactSchema>,
    /// Structured output contract.
    pub answer_schema: Option<CompactSchema>,
    /// Upstream binary override.
    pub binary: Option<PathBuf>,
    /// Credentials file override.
    pub apps_json: Option<PathBuf>,
}

impl ServeConfig {
    /// Parse from the argv JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error when the JSON does not parse.
    pub fn from_json(text: &str) -> WorkerResult<Self> {
        serde_json::from_str(text).map_err(|e| WorkerError::Config(e.to_string()))
    }

    /// Build from a worker config plus orchestrator-level settings.
    #[must_use]
    pub fn from_worker(
        config: &WorkerConfig,
        workspace: &std::path::Path,
        proxy: Option<&ProxyConfig>,
    ) -> Self {
        Self {
            role: config.role.clone(),
            name: None,
            description: String::new(),
            system_prompt: config.system_prompt.clone(),
            model: config.model.clone(),
            tools_enabled: config.tools_enabled.clone(),
            agent_mode: config.agent_mode,
            workspace: config
                .workspace_root
                .clone()
                .unwrap_or_else(|| workspace.to_path_buf()),
            proxy: config.proxy.clone().or_else(|| proxy.cloned()),
            mcp_servers: config.mcp_servers.clone().unwrap_or_default(),
            lsp_servers: config.lsp_servers.clone().unwrap_or_default(),
            question_schema: config.question_schema.clone(),
            answer_schema: config.answer_schema.clone(),
            binary: None,
            apps_json: None,
        }
    }

    fn card(&self) -> AgentCard {
        AgentCard {
            name: self.name.clone().unwrap_or_else(|| self.role.clone()),
            role: self.role.clone(),
            description: self.description.clone(),
            model: self.model.clone(),
            system_prompt: self.system_prompt.clone(),
            tools_enabled: self.tools_enabled.clone(),
            agent_mode: self.agent_mode,
            version: env!("CARGO_PKG_VERSION").to_string(),
            question_schema: self.question_schema.clone(),
            answer_schema: self.answer_schema.clone(),
        }
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            role: self.role.clone(),
            system_prompt: self.system_prompt.clone(),
            model: self.model.clone(),
            tools_enabled: self.tools_enabled.clone(),
            agent_mode: self.agent_mode,
            workspace_root: Some(self.workspace.clone()),
            proxy: self.proxy.clone(),
            mcp_servers: None,
            lsp_servers: None,
            question_schema: self.question_schema.clone(),
            answer_schema: self.answer_schema.clone(),
        }
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            workspace: self.workspace.clone(),
            agent_mode: self.agent_mode,
            binary: self.binary.clone(),
            apps_json: self.apps_json.clone(),
            mcp_servers: self.mcp_servers.clone(),
            lsp_servers: self.lsp_servers.clone(),
            proxy: self.proxy.clone(),
            tools: self.tools_enabled.clone(),
        }
    }
}

/// Serve MCP on stdin/stdout until EOF. The child-process main loop.
///
/// # Errors
///
/// Returns an error only on transport-level write failures.
pub async fn serve(config: ServeConfig) -> WorkerResult<()> {
    serve_on(tokio::io::stdin(), tokio::io::stdout(), config).await
}

/// Serve MCP over arbitrary streams (tests drive this with an in-memory
/// pipe).
///
/// # Errors
///
/// Returns an error only on transport-level write failures.
pub async fn serve_on<R, W>(reader: R, writer: W, config: ServeConfig) -> WorkerResult<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (transport, channels) = Transport::connect(reader, writer, Framing::Line);
    let TransportChannels {
        mut requests,
        mut notifications,
    } = channels;
    // Peer notifications (`notifications/initialized`) need no reply.
    tokio::spawn(async move {
        while let Some(notif) = notifications.recv().await {
            debug!(method = %notif.method, "worker notification");
        }
    });

    let mut server = AgentServer {
        config,
        transport,
        session: None,
        runner: None,
    };
    info!(role = %server.config.role, "worker serving");

    while let Some(req) = requests.recv().await {
        server.handle(req).await?;
    }

    // stdin closed: release everything before exiting.
    server.shutdown().await;
    info!(role = %server.config.role, "worker exiting");
    Ok(())
}

struct AgentServer {
    config: ServeConfig,
    transport: Transport,
    session: Option<Arc<UpstreamSession>>,
    runner: Option<TaskRunner>,
}

impl AgentServer {
    async fn handle(&mut self, req: ServerRequest) -> WorkerResult<()> {
        let card = self.config.card();
        match req.method.as_str() {
            "initialize" => {
                self.transport
                    .respond(
                        &req.id,
                        json!({
                            "protocolVersion": PROTOCOL_VERSION,
                            "capabilities": {"tools": {}},
                            "serverInfo": {
                                "name": format!("mcp-agent-{}", card.role),
                                "version": card.version,
                            },
                        }),
                    )
                    .await?;
            },
            "tools/list" => {
                let tools = serde_json::to_value(build_agent_tools(&card))
                    .unwrap_or_else(|_| json!([]));
                self.transport
                    .respond(&req.id, json!({"tools": tools}))
                    .await?;
            },
            "tools/call" => {
                let tool = req
                    .params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = req
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let result = match tool.as_str() {
                    "execute_task" => self.execute_task(arguments).await,
                    "get_status" => self.get_status().await,
                    "get_capabilities" => text_content(&card.to_value(), false),
                    other => {
                        self.transport
                            .respond_error(&req.id, -32601, &format!("Unknown tool: {other}"))
                            .await?;
                        return Ok(());
                    },
                };
                self.transport.respond(&req.id, result).await?;
            },
            other => {
                self.transport
                    .respond_error(&req.id, -32601, &format!("Method not found: {other}"))
                    .await?;
            },
        }
        Ok(())
    }

    /// Lazily start the upstream session, then run the task.
    async fn execute_task(&mut self, arguments: Value) -> Value {
        if self.runner.is_none() {
            match UpstreamSession::start(self.config.session_options()).await {
                Ok(session) => {
                    self.runner =
                        Some(TaskRunner::new(session.clone(), &self.config.worker_config()));
                    self.session = Some(session);
                },
                Err(e) => {
                    warn!(error = %e, "worker session startup failed");
                    let outcome = TaskOutcome::error(&self.config.role, e.to_string());
                    return text_content(&outcome.to_value(), true);
                },
            }
        }
        let runner = self.runner.as_ref().expect("runner initialised above");

        let prompt = arguments
            .get("prompt")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let context = parse_context(&arguments);
        let structured = self.structured_fields(&arguments);

        let outcome = runner
            .run_task(prompt, &context, structured.as_ref(), None)
            .await;
        text_content(&outcome.to_value(), !outcome.is_success())
    }

    async fn get_status(&self) -> Value {
        let has_conversation = match &self.runner {
            Some(runner) => runner.has_conversation().await,
            None => false,
        };
        text_content(
            &json!({
                "status": "idle",
                "role": self.config.role,
                "has_conversation": has_conversation,
            }),
            false,
        )
    }

    /// Arguments matching the question schema, minus the built-in
    /// `prompt`/`context` parameters.
    fn structured_fields(&self, arguments: &Value) -> Option<Value> {
        let schema = self.config.question_schema.as_ref()?;
        let args = arguments.as_object()?;
        let mut fields = serde_json::Map::new();
        for name in schema.0.keys() {
            if name == "prompt" || name == "context" {
                continue;
            }
            if let Some(value) = args.get(name) {
                fields.insert(name.clone(), value.clone());
            }
        }
        (!fields.is_empty()).then_some(Value::Object(fields))
    }

    async fn shutdown(&mut self) {
        if let Some(runner) = &self.runner {
            runner.destroy_conversation().await;
        }
        if let Some(session) = &self.session {
            session.stop().await;
        }
    }
}

/// The context argument arrives as a JSON-encoded string; fall back to the
/// raw text when it does not parse.
fn parse_context(arguments: &Value) -> Value {
    match arguments.get("context").and_then(Value::as_str) {
        Some(text) if !text.is_empty() => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        },
        _ => Value::Null,
    }
}

/// MCP tool-call result: one text item carrying the JSON payload.
fn text_content(payload: &Value, is_error: bool) -> Value {
    let mut result = json!({
        "content": [{"type": "text", "text": payload.to_string()}],
    });
    if is_error {
        result["isError"] = json!(true);
    }
    result
}
