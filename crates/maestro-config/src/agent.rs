//! Agent and orchestrator configuration files.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use maestro_schema::CompactSchema;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::{LspServerConfig, McpServerConfig, ProxyConfig};
use crate::{ConfigError, ConfigResult};

/// Which client tools a worker may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSelection {
    /// Every registered tool (the `"__ALL__"` sentinel).
    All,
    /// Only the named tools.
    Named(Vec<String>),
}

impl Default for ToolSelection {
    fn default() -> Self {
        Self::All
    }
}

impl ToolSelection {
    /// Whether `name` is enabled under this selection.
    #[must_use]
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(names) => names.iter().any(|n| n == name),
        }
    }
}

impl Serialize for ToolSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("__ALL__"),
            Self::Named(names) => names.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ToolSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) if s == "__ALL__" => Self::All,
            Value::String(s) => Self::Named(vec![s]),
            Value::Array(items) => Self::Named(
                items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(ToOwned::to_owned))
                    .collect(),
            ),
            _ => Self::All,
        })
    }
}

/// Worker transport for orchestration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Workers run as subprocess MCP servers (default).
    #[default]
    Mcp,
    /// Workers run as in-process tasks driven by queues.
    Queue,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mcp => write!(f, "mcp"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

/// Configuration for a single worker agent.
///
/// Per-worker fields override the orchestrator defaults when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Short role identifier (e.g. `"bug_fixer"`).
    pub role: String,
    /// Injected as `<system_instructions>` on the worker's first turn.
    #[serde(default)]
    pub system_prompt: String,
    /// Model override (absent = server default).
    pub model: Option<String>,
    /// Enabled client tools.
    #[serde(default)]
    pub tools_enabled: ToolSelection,
    /// Agent mode (tools, file edits) vs chat-only.
    #[serde(default = "default_true")]
    pub agent_mode: bool,
    /// Workspace override.
    pub workspace_root: Option<PathBuf>,
    /// Proxy override.
    pub proxy: Option<ProxyConfig>,
    /// Worker-specific MCP servers.
    pub mcp_servers: Option<HashMap<String, McpServerConfig>>,
    /// Worker-specific language servers.
    pub lsp_servers: Option<HashMap<String, LspServerConfig>>,
    /// Structured input contract exposed to the orchestrator.
    pub question_schema: Option<CompactSchema>,
    /// Structured output contract soft-validated on replies.
    pub answer_schema: Option<CompactSchema>,
}

fn default_true() -> bool {
    true
}

/// A single-agent or orchestrator definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Description for users and discovery.
    #[serde(default)]
    pub description: String,
    /// Model id.
    pub model: Option<String>,
    /// Agent mode for the main session.
    #[serde(default = "default_true")]
    pub agent_mode: bool,
    /// System prompt for the main session.
    #[serde(default)]
    pub system_prompt: String,
    /// Workspace root.
    pub workspace_root: Option<PathBuf>,
    /// Tool selection.
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Client MCP servers.
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
    /// Bridged language servers.
    #[serde(default)]
    pub lsp_servers: HashMap<String, LspServerConfig>,
    /// Proxy settings.
    pub proxy: Option<ProxyConfig>,
    /// Worker transport (orchestrator configs).
    pub transport: Option<TransportKind>,
    /// Worker definitions. Non-empty marks an orchestrator config.
    #[serde(default)]
    pub workers: Vec<WorkerConfig>,
}

/// The `tools` table of an agent config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Enabled tools.
    #[serde(default)]
    pub enabled: ToolSelection,
}

impl AgentConfig {
    /// Whether this config defines an orchestrator (has workers).
    #[must_use]
    pub fn is_orchestrator(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Load from a JSON or TOML file, chosen by extension.
    ///
    /// A single `[workers]` table (instead of `[[workers]]`) is normalised
    /// to a one-element array.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let mut value: Value = if is_toml {
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        normalise_workers(&mut value);

        serde_json::from_value(value).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// A `workers` table becomes a one-element array.
fn normalise_workers(value: &mut Value) {
    if let Some(workers) = value.get_mut("workers") {
        if workers.is_object() {
            *workers = Value::Array(vec![workers.take()]);
        }
    }
}
