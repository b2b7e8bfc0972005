//! Bridge: many MCP servers behind one prefixed tool surface.

use std::collections::HashMap;
use std::sync::Arc;

use maestro_config::McpServerConfig;
use maestro_core::ToolSchema;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::server::McpServer;
use crate::{sanitize_schema, McpError};

/// Status snapshot of one bridged server.
#[derive(Debug, Clone)]
pub struct McpServerStatus {
    /// Server name.
    pub name: String,
    /// Whether the subprocess is alive.
    pub running: bool,
    /// Tool-name prefix (`mcp_{name}`).
    pub prefix: String,
    /// Number of discovered tools.
    pub tool_count: usize,
}

/// Manages client-side MCP servers and maps their tools to prefixed names.
///
/// Cheaply cloneable; clones share the server set and tool map.
#[derive(Clone)]
pub struct McpBridge {
    workspace_root: String,
    configs: Arc<RwLock<HashMap<String, McpServerConfig>>>,
    servers: Arc<RwLock<HashMap<String, Arc<McpServer>>>>,
    /// Prefixed tool name → (server name, original tool name).
    tool_map: Arc<RwLock<HashMap<String, (String, String)>>>,
}

impl McpBridge {
    /// Create an empty bridge rooted at `workspace_root` (used for
    /// `{workspace}` substitution in server configs).
    #[must_use]
    pub fn new(workspace_root: impl Into<String>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            configs: Arc::new(RwLock::new(HashMap::new())),
            servers: Arc::new(RwLock::new(HashMap::new())),
            tool_map: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register server configurations. Entries without a `command` are
    /// skipped: URL transports cannot be spawned as stdio children.
    pub async fn add_servers(&self, configs: &HashMap<String, McpServerConfig>) {
        let mut stored = self.configs.write().await;
        for (name, config) in configs {
            if config.command.is_none() {
                warn!(server = %name, "skipping MCP server without a command");
                continue;
            }
            stored.insert(name.clone(), config.substituted(&self.workspace_root));
        }
    }

    /// Start every registered server and rebuild the tool map.
    ///
    /// Individual startup failures are logged and skipped; the bridge is
    /// usable with whichever servers came up. Returns the number of servers
    /// running.
    pub async fn start_all(&self) -> usize {
        let configs = self.configs.read().await.clone();
        for (name, config) in &configs {
            if self
                .servers
                .read()
                .await
                .get(name)
                .is_some_and(|s| s.is_running())
            {
                continue;
            }
            match McpServer::start(name, config).await {
                Ok(server) => {
                    self.servers
                        .write()
                        .await
                        .insert(name.clone(), Arc::new(server));
                },
                Err(e) => {
                    warn!(server = %name, error = %e, "MCP server failed to start");
                },
            }
        }
        self.rebuild_tool_map().await;
        let running = self.servers.read().await.len();
        info!(servers = running, "MCP bridge started");
        running
    }

    /// Adopt an already-connected server (tests, dynamic connections).
    pub(crate) async fn adopt(&self, server: McpServer) {
        self.servers
            .write()
            .await
            .insert(server.name().to_string(), Arc::new(server));
        self.rebuild_tool_map().await;
    }

    async fn rebuild_tool_map(&self) {
        let servers = self.servers.read().await;
        let mut map = HashMap::new();
        for (name, server) in servers.iter() {
            for tool in server.tools() {
                let tool_name = tool.get("name").and_then(Value::as_str).unwrap_or_default();
                map.insert(
                    format!("mcp_{name}_{tool_name}"),
                    (name.clone(), tool_name.to_string()),
                );
            }
        }
        *self.tool_map.write().await = map;
    }

    /// Tool schemas for upstream registration: prefixed names, descriptions
    /// tagged with the server, input schemas sanitised with `required`
    /// guaranteed present.
    pub async fn tool_schemas(&self) -> Vec<ToolSchema> {
        let servers = self.servers.read().await;
        let mut schemas = Vec::new();
        for (name, server) in servers.iter() {
            for tool in server.tools() {
                let tool_name = tool.get("name").and_then(Value::as_str).unwrap_or_default();
                let description = tool
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or(tool_name);
                let mut input_schema = tool
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                sanitize_schema(&mut input_schema);

                schemas.push(ToolSchema::with_input(
                    format!("mcp_{name}_{tool_name}"),
                    format!("[{name}] {description}"),
                    input_schema,
                ));
            }
        }
        schemas
    }

    /// Whether `name` is a bridged (prefixed) tool.
    pub async fn is_bridge_tool(&self, name: &str) -> bool {
        self.tool_map.read().await.contains_key(name)
    }

    /// Call a bridged tool and flatten its result to text.
    ///
    /// Never fails: unknown tools, missing servers, timeouts and transport
    /// errors all come back as sentinel text, keeping the agent session
    /// alive.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> String {
        let Some((server_name, tool_name)) = self.tool_map.read().await.get(name).cloned() else {
            return format!("Unknown MCP tool: {name}");
        };
        let Some(server) = self.servers.read().await.get(&server_name).cloned() else {
            return format!("MCP server '{server_name}' not found");
        };

        match server.call_tool(&tool_name, arguments).await {
            Ok(result) => flatten_content(&result),
            Err(McpError::Rpc(maestro_rpc::RpcError::Timeout { .. })) => {
                format!("MCP tool '{tool_name}' timed out")
            },
            Err(e) => format!("MCP tool '{tool_name}' error: {e}"),
        }
    }

    /// Status snapshots for every registered server.
    pub async fn statuses(&self) -> Vec<McpServerStatus> {
        self.servers
            .read()
            .await
            .iter()
            .map(|(name, server)| McpServerStatus {
                name: name.clone(),
                running: server.is_running(),
                prefix: format!("mcp_{name}"),
                tool_count: server.tools().len(),
            })
            .collect()
    }

    /// Total number of bridged tools.
    pub async fn tool_count(&self) -> usize {
        self.tool_map.read().await.len()
    }

    /// Stop every server.
    pub async fn stop_all(&self) {
        for server in self.servers.write().await.values() {
            server.stop();
        }
        self.servers.write().await.clear();
        self.tool_map.write().await.clear();
    }
}

impl std::fmt::Debug for McpBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpBridge")
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

/// Concatenate the `text` / `value` items of an MCP `content` array.
fn flatten_content(result: &Value) -> String {
    let parts: Vec<String> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(obj) => obj
                        .get("text")
                        .or_else(|| obj.get("value"))
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    if parts.is_empty() {
        result.to_string()
    } else {
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_rpc::{Framing, Transport};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::MCP_PROTOCOL_VERSION;

    fn scripted_server(
        tools: Vec<Value>,
        call_result: Value,
    ) -> (Transport, maestro_rpc::TransportChannels) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (read_ours, write_ours) = tokio::io::split(ours);
        let (mut read_theirs, mut write_theirs) = tokio::io::split(theirs);

        tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                while let Some(msg) = Framing::Line.decode(&mut buf) {
                    let Some(id) = msg.get("id").cloned() else {
                        continue;
                    };
                    let reply = match msg.get("method").and_then(Value::as_str) {
                        Some("initialize") => json!({
                            "protocolVersion": MCP_PROTOCOL_VERSION,
                            "capabilities": {},
                            "serverInfo": {"name": "scripted", "version": "0"},
                        }),
                        Some("tools/list") => json!({"tools": tools}),
                        Some("tools/call") => call_result.clone(),
                        _ => json!(null),
                    };
                    let frame =
                        Framing::Line.encode(&json!({"jsonrpc": "2.0", "id": id, "result": reply}));
                    let _ = write_theirs.write_all(&frame).await;
                }
                match read_theirs.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
        });

        Transport::connect(read_ours, write_ours, Framing::Line)
    }

    #[tokio::test]
    async fn prefixes_and_sanitises_tool_schemas() {
        let (transport, channels) = scripted_server(
            vec![json!({
                "name": "read",
                "description": "Read a path",
                "inputSchema": {"anyOf": [
                    {"type": "object", "properties": {"p": {"type": "string"}}},
                    {"type": "null"},
                ]},
            })],
            json!({"content": []}),
        );
        let server = McpServer::connect("fs", transport, channels).await.unwrap();

        let bridge = McpBridge::new("/tmp/ws");
        bridge.adopt(server).await;

        let schemas = bridge.tool_schemas().await;
        assert_eq!(schemas.len(), 1);
        let schema = &schemas[0];
        assert_eq!(schema.name, "mcp_fs_read");
        assert!(schema.description.starts_with("[fs] "));
        assert_eq!(schema.input_schema["type"], "object");
        assert_eq!(schema.input_schema["properties"]["p"]["type"], "string");
        assert_eq!(schema.input_schema["required"], json!([]));

        assert!(bridge.is_bridge_tool("mcp_fs_read").await);
        assert!(!bridge.is_bridge_tool("read").await);
        assert_eq!(bridge.tool_count().await, 1);
    }

    #[tokio::test]
    async fn call_tool_flattens_text_content() {
        let (transport, channels) = scripted_server(
            vec![json!({"name": "read", "inputSchema": {"type": "object", "properties": {}}})],
            json!({"content": [
                {"type": "text", "text": "line one"},
                {"type": "text", "value": "line two"},
                {"type": "image", "data": "…"},
            ]}),
        );
        let server = McpServer::connect("fs", transport, channels).await.unwrap();
        let bridge = McpBridge::new("/tmp/ws");
        bridge.adopt(server).await;

        let text = bridge.call_tool("mcp_fs_read", json!({"p": "/x"})).await;
        assert_eq!(text, "line one\nline two");
    }

    #[tokio::test]
    async fn unknown_tool_is_sentinel_text() {
        let bridge = McpBridge::new("/tmp/ws");
        let text = bridge.call_tool("mcp_missing_tool", json!({})).await;
        assert_eq!(text, "Unknown MCP tool: mcp_missing_tool");
    }

    #[tokio::test]
    async fn url_only_servers_are_skipped() {
        let bridge = McpBridge::new("/tmp/ws");
        let mut configs = HashMap::new();
        configs.insert(
            "remote".to_string(),
            McpServerConfig {
                url: Some("http://localhost:9000/sse".into()),
                ..Default::default()
            },
        );
        bridge.add_servers(&configs).await;
        assert_eq!(bridge.start_all().await, 0);
    }

    #[test]
    fn flatten_falls_back_to_json_dump() {
        let result = json!({"content": [], "isError": false});
        let text = flatten_content(&result);
        assert!(text.contains("isError"));
    }
}
