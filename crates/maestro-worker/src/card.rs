//! Agent cards: discovery metadata for subprocess workers.

use maestro_config::{ToolSelection, WorkerConfig};
use maestro_core::ToolSchema;
use maestro_schema::CompactSchema;
use serde_json::{json, Value};

/// Descriptor a subprocess worker advertises through `get_capabilities`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentCard {
    /// Display name.
    pub name: String,
    /// Role identifier.
    pub role: String,
    /// Description for discovery.
    pub description: String,
    /// Model override.
    pub model: Option<String>,
    /// Full system prompt (summarised in the card's wire form).
    pub system_prompt: String,
    /// Enabled client tools.
    pub tools_enabled: ToolSelection,
    /// Agent mode.
    pub agent_mode: bool,
    /// Card version.
    pub version: String,
    /// Structured input contract.
    pub question_schema: Option<CompactSchema>,
    /// Structured output contract.
    pub answer_schema: Option<CompactSchema>,
}

impl AgentCard {
    /// Card for a worker config.
    #[must_use]
    pub fn from_worker(config: &WorkerConfig) -> Self {
        Self {
            name: config.role.clone(),
            role: config.role.clone(),
            description: String::new(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            tools_enabled: config.tools_enabled.clone(),
            agent_mode: config.agent_mode,
            version: env!("CARGO_PKG_VERSION").to_string(),
            question_schema: config.question_schema.clone(),
            answer_schema: config.answer_schema.clone(),
        }
    }

    /// Wire form for `get_capabilities`: the system prompt is truncated to
    /// a 200-character summary.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let summary: String = self.system_prompt.chars().take(200).collect();
        let mut card = json!({
            "name": self.name,
            "role": self.role,
            "description": self.description,
            "model": self.model,
            "system_prompt_summary": summary,
            "tools_enabled": self.tools_enabled,
            "agent_mode": self.agent_mode,
            "version": self.version,
        });
        if let Some(schema) = &self.question_schema {
            card["question_schema"] = serde_json::to_value(schema).unwrap_or(Value::Null);
        }
        if let Some(schema) = &self.answer_schema {
            card["answer_schema"] = serde_json::to_value(schema).unwrap_or(Value::Null);
        }
        card
    }
}

/// The MCP tools a subprocess worker exposes.
///
/// `execute_task` always accepts `prompt` and `context`; a question schema
/// contributes its fields as additional typed parameters, and an answer
/// schema is rendered into the description so the driving model sees the
/// full contract.
#[must_use]
pub fn build_agent_tools(card: &AgentCard) -> Vec<ToolSchema> {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "prompt".into(),
        json!({"type": "string", "description": "The task description / prompt for the agent"}),
    );
    properties.insert(
        "context".into(),
        json!({"type": "string", "description": "Optional JSON-encoded shared context from other agents"}),
    );
    let mut required = vec![json!("prompt")];

    if let Some(schema) = &card.question_schema {
        let question = schema.to_json_schema();
        if let Some(fields) = question.get("properties").and_then(Value::as_object) {
            for (name, prop) in fields {
                properties.insert(name.clone(), prop.clone());
            }
        }
        if let Some(names) = question.get("required").and_then(Value::as_array) {
            for name in names {
                if !required.contains(name) {
                    required.push(name.clone());
                }
            }
        }
    }

    let mut description = format!(
        "Send a task to the {} agent for execution. Returns the agent's reply.",
        card.role
    );
    if let Some(schema) = &card.answer_schema {
        if !schema.is_empty() {
            description.push_str("\n\n");
            description.push_str(&schema.to_description("Expected response fields"));
        }
    }

    vec![
        ToolSchema::with_input(
            "execute_task",
            description,
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        ),
        ToolSchema::new(
            "get_status",
            "Get the current status of this agent (idle/busy, conversation info).",
        ),
        ToolSchema::new(
            "get_capabilities",
            "Get this agent's capabilities: role, model, available tools.",
        ),
    ]
}
