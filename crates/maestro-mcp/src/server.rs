//! A single supervised MCP server subprocess.

use std::time::Duration;

use maestro_config::McpServerConfig;
use maestro_rpc::{Framing, Transport, TransportChannels};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{McpError, McpResult, MCP_PROTOCOL_VERSION};

/// Timeout for `initialize` (package-manager launchers download on first run).
const INIT_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for `tools/list`.
const LIST_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for a single `tools/call`.
const CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// One running MCP server with its discovered tools.
pub struct McpServer {
    name: String,
    transport: Transport,
    tools: Vec<Value>,
}

impl McpServer {
    /// Spawn the server process, perform the `initialize` handshake, and
    /// discover its tools.
    ///
    /// The command is resolved via `PATH` first so `.cmd`/`.bat` wrappers
    /// work; an unresolvable command is passed through as-is and surfaces
    /// as a spawn error.
    ///
    /// # Errors
    ///
    /// Returns an error if the config has no command, the process cannot be
    /// spawned, or the handshake fails.
    pub async fn start(name: &str, config: &McpServerConfig) -> McpResult<Self> {
        let command = config.command.as_ref().ok_or_else(|| McpError::NoCommand {
            name: name.to_string(),
        })?;
        let resolved = which::which(command)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| command.clone());

        let (transport, channels) = Transport::spawn(
            &resolved,
            &config.args,
            &config.env,
            Framing::Line,
            &format!("mcp:{name}"),
        )?;
        Self::connect(name, transport, channels).await
    }

    /// Complete the MCP handshake over an established transport.
    ///
    /// Split out from [`McpServer::start`] so tests can drive a scripted
    /// peer over an in-memory pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if `initialize` or `tools/list` fails.
    pub async fn connect(
        name: &str,
        transport: Transport,
        channels: TransportChannels,
    ) -> McpResult<Self> {
        spawn_auto_responder(name.to_string(), transport.clone(), channels);

        let init = transport
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "maestro-mcp-bridge",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                })),
                INIT_TIMEOUT,
            )
            .await?;
        debug!(
            server = %name,
            peer = %init.get("serverInfo").map(ToString::to_string).unwrap_or_default(),
            "MCP handshake complete"
        );
        transport
            .notify("notifications/initialized", Some(json!({})))
            .await?;

        let mut server = Self {
            name: name.to_string(),
            transport,
            tools: Vec::new(),
        };
        server.tools = server.list_tools().await?;
        info!(server = %name, tools = server.tools.len(), "MCP server ready");
        Ok(server)
    }

    /// Server name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tools discovered at startup.
    #[must_use]
    pub fn tools(&self) -> &[Value] {
        &self.tools
    }

    /// Whether the subprocess is still attached.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.transport.is_closed()
    }

    /// Fetch the server's tool list (`tools/list`).
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or timeout.
    pub async fn list_tools(&self) -> McpResult<Vec<Value>> {
        let result = self
            .transport
            .request("tools/list", Some(json!({})), LIST_TIMEOUT)
            .await?;
        Ok(result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Invoke a tool (`tools/call`) and return the raw result object.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or after the 120 s call
    /// timeout.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> McpResult<Value> {
        if !self.is_running() {
            return Err(McpError::ServerNotRunning {
                name: self.name.clone(),
            });
        }
        debug!(server = %self.name, tool = %tool, "calling MCP tool");
        let result = self
            .transport
            .request(
                "tools/call",
                Some(json!({"name": tool, "arguments": arguments})),
                CALL_TIMEOUT,
            )
            .await?;
        Ok(result)
    }

    /// Kill the subprocess.
    pub fn stop(&self) {
        self.transport.kill();
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.name)
            .field("tools", &self.tools.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// MCP servers may issue requests back at us (sampling, roots). The bridge
/// supports none of these: answer every request with an empty result so the
/// server never blocks, and drain notifications so the channel cannot fill.
fn spawn_auto_responder(name: String, transport: Transport, mut channels: TransportChannels) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                req = channels.requests.recv() => {
                    let Some(req) = req else { break };
                    debug!(server = %name, method = %req.method, "auto-answering server request");
                    let _ = transport.respond(&req.id, json!({})).await;
                },
                notif = channels.notifications.recv() => {
                    let Some(notif) = notif else { break };
                    debug!(server = %name, method = %notif.method, "ignoring server notification");
                },
            }
        }
    });
}
