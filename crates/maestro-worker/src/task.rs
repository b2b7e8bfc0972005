//! The shared task-handling contract.

use std::sync::Arc;

use maestro_config::WorkerConfig;
use maestro_core::uri::path_to_uri;
use maestro_schema::{extract_json, soft_validate, CompactSchema};
use maestro_upstream::{ProgressCallback, TurnOptions, UpstreamSession};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::prompt::build_task_prompt;

/// Outcome of one task handled by a worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutcome {
    /// `"success"` or `"error"`.
    pub status: String,
    /// Reply text, or the error message.
    pub reply: String,
    /// Number of agent rounds (tool-call batches) the turn used.
    pub agent_rounds_count: usize,
    /// Role of the worker that produced this.
    pub worker: String,
    /// Schema-matched reply fields merged with extras, when extraction
    /// succeeded.
    pub structured_reply: Option<Value>,
    /// Soft-validation findings.
    pub validation_warnings: Vec<String>,
}

impl TaskOutcome {
    /// An error outcome.
    #[must_use]
    pub fn error(worker: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            reply: message.into(),
            worker: worker.into(),
            ..Default::default()
        }
    }

    /// Whether the task succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Wire shape for the subprocess worker's `execute_task` reply.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("status".into(), json!(self.status));
        if self.is_success() {
            obj.insert("reply".into(), json!(self.reply));
            obj.insert("agent_rounds_count".into(), json!(self.agent_rounds_count));
        } else {
            obj.insert("error".into(), json!(self.reply));
        }
        obj.insert("worker".into(), json!(self.worker));
        if let Some(structured) = &self.structured_reply {
            obj.insert("structured_reply".into(), structured.clone());
        }
        if !self.validation_warnings.is_empty() {
            obj.insert("validation_warnings".into(), json!(self.validation_warnings));
        }
        Value::Object(obj)
    }
}

/// Drives one worker's conversation on a shared upstream session.
///
/// The first task creates the conversation (injecting the system prompt);
/// later tasks are follow-up turns. One task runs at a time.
pub struct TaskRunner {
    session: Arc<UpstreamSession>,
    role: String,
    model: Option<String>,
    agent_mode: bool,
    system_prompt: String,
    question_schema: Option<CompactSchema>,
    answer_schema: Option<CompactSchema>,
    conversation_id: tokio::sync::Mutex<Option<String>>,
}

impl TaskRunner {
    /// Runner for a worker config on an acquired session.
    #[must_use]
    pub fn new(session: Arc<UpstreamSession>, config: &WorkerConfig) -> Self {
        Self {
            session,
            role: config.role.clone(),
            model: config.model.clone(),
            agent_mode: config.agent_mode,
            system_prompt: config.system_prompt.clone(),
            question_schema: config.question_schema.clone(),
            answer_schema: config.answer_schema.clone(),
            conversation_id: tokio::sync::Mutex::new(None),
        }
    }

    /// Worker role.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// The question schema, when the worker declares one.
    #[must_use]
    pub fn question_schema(&self) -> Option<&CompactSchema> {
        self.question_schema.as_ref()
    }

    /// Whether a conversation has been created.
    pub async fn has_conversation(&self) -> bool {
        self.conversation_id.lock().await.is_some()
    }

    /// Execute one task: build the prompt, run the turn, soft-validate the
    /// reply. Failures come back as an error outcome, never as `Err`.
    pub async fn run_task(
        &self,
        prompt: &str,
        context: &Value,
        structured: Option<&Value>,
        on_progress: Option<ProgressCallback>,
    ) -> TaskOutcome {
        let mut conversation = self.conversation_id.lock().await;
        let first_turn = conversation.is_none();

        let actual_prompt = build_task_prompt(
            first_turn.then_some(self.system_prompt.as_str()),
            context,
            structured,
            prompt,
            self.answer_schema.as_ref(),
        );

        let workspace_folder = if self.agent_mode {
            path_to_uri(self.session.workspace_root()).ok()
        } else {
            None
        };
        let opts = TurnOptions {
            model: self.model.clone(),
            agent_mode: self.agent_mode,
            workspace_folder,
            on_progress,
        };

        let result = match conversation.as_deref() {
            None => {
                let reply = self.session.conversation_create(&actual_prompt, &opts).await;
                if let Ok(reply) = &reply {
                    *conversation = Some(reply.conversation_id.clone());
                }
                reply
            },
            Some(id) => self.session.conversation_turn(id, &actual_prompt, &opts).await,
        };
        drop(conversation);

        match result {
            Ok(reply) => {
                debug!(role = %self.role, rounds = reply.agent_rounds.len(), "task complete");
                let mut outcome = TaskOutcome {
                    status: "success".to_string(),
                    reply: reply.reply,
                    agent_rounds_count: reply.agent_rounds.len(),
                    worker: self.role.clone(),
                    structured_reply: None,
                    validation_warnings: Vec::new(),
                };
                self.validate_reply(&mut outcome);
                outcome
            },
            Err(e) => TaskOutcome::error(&self.role, e.to_string()),
        }
    }

    /// Destroy the conversation, if one was created.
    pub async fn destroy_conversation(&self) {
        let id = self.conversation_id.lock().await.take();
        if let Some(id) = id {
            let _ = self.session.conversation_destroy(&id).await;
        }
    }

    /// Soft-validate the reply against the answer schema, attaching the
    /// merged structured reply and any findings.
    fn validate_reply(&self, outcome: &mut TaskOutcome) {
        let Some(schema) = &self.answer_schema else {
            return;
        };
        if schema.is_empty() {
            return;
        }
        let Some(parsed) = extract_json(&outcome.reply) else {
            return;
        };
        let validation = soft_validate(&parsed, schema);

        let mut merged = validation.parsed.clone();
        for (key, value) in &validation.extras {
            merged.insert(key.clone(), value.clone());
        }
        outcome.structured_reply = Some(Value::Object(merged));
        outcome.validation_warnings = validation.warnings;
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("role", &self.role)
            .field("agent_mode", &self.agent_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_rpc::{Framing, Transport};
    use maestro_upstream::SessionOptions;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Upstream peer that replies to every conversation request with a
    /// scripted reply streamed as progress.
    fn scripted_session(replies: Vec<&'static str>) -> Arc<UpstreamSession> {
        let (ours, theirs) = tokio::io::duplex(128 * 1024);
        let (read_ours, write_ours) = tokio::io::split(ours);
        let (mut read_theirs, mut write_theirs) = tokio::io::split(theirs);

        tokio::spawn(async move {
            let mut replies = replies.into_iter();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                while let Some(msg) = Framing::ContentLength.decode(&mut buf) {
                    let Some(id) = msg.get("id").cloned() else {
                        continue;
                    };
                    let method = msg.get("method").and_then(Value::as_str).unwrap_or("");
                    match method {
                        "conversation/create" | "conversation/turn" => {
                            let token = msg["params"]["workDoneToken"].clone();
                            let reply = replies.next().unwrap_or("(exhausted)");
                            let frames = [
                                json!({"jsonrpc": "2.0", "id": id,
                                       "result": [{"conversationId": "conv-t"}]}),
                                json!({"jsonrpc": "2.0", "method": "$/progress",
                                       "params": {"token": token, "value": {"reply": reply}}}),
                                json!({"jsonrpc": "2.0", "method": "$/progress",
                                       "params": {"token": token, "value": {"kind": "end"}}}),
                            ];
                            for frame in frames {
                                let _ = write_theirs
                                    .write_all(&Framing::ContentLength.encode(&frame))
                                    .await;
                            }
                        },
                        _ => {
                            let frame = Framing::ContentLength
                                .encode(&json!({"jsonrpc": "2.0", "id": id, "result": {}}));
                            let _ = write_theirs.write_all(&frame).await;
                        },
                    }
                }
                match read_theirs.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                }
            }
        });

        let (transport, channels) =
            Transport::connect(read_ours, write_ours, Framing::ContentLength);
        UpstreamSession::attach(transport, channels, SessionOptions::new("/tmp/ws"))
    }

    fn reviewer_config() -> WorkerConfig {
        serde_json::from_value(json!({
            "role": "reviewer",
            "system_prompt": "You review code.",
            "agent_mode": false,
            "answer_schema": {
                "approved": {"type": "boolean", "required": true},
                "summary": {"type": "string", "required": true},
            },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn first_task_creates_then_turns() {
        let session = scripted_session(vec!["first reply", "second reply"]);
        let runner = TaskRunner::new(
            session,
            &serde_json::from_value(json!({"role": "coder", "agent_mode": false})).unwrap(),
        );

        assert!(!runner.has_conversation().await);
        let outcome = runner.run_task("do it", &json!({}), None, None).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.reply, "first reply");
        assert!(runner.has_conversation().await);

        let outcome = runner.run_task("again", &json!({}), None, None).await;
        assert_eq!(outcome.reply, "second reply");
    }

    #[tokio::test]
    async fn structured_reply_is_validated() {
        let session = scripted_session(vec![
            "Here you go:\n```json\n{\"approved\": \"true\", \"summary\": \"fine\", \"notes\": 1}\n```",
        ]);
        let runner = TaskRunner::new(session, &reviewer_config());

        let outcome = runner.run_task("review", &json!({}), None, None).await;
        assert!(outcome.is_success());
        let structured = outcome.structured_reply.unwrap();
        assert_eq!(structured["approved"], json!(true));
        assert_eq!(structured["summary"], "fine");
        assert_eq!(structured["notes"], 1);
        assert_eq!(outcome.validation_warnings.len(), 1); // approved coerced
    }

    #[tokio::test]
    async fn prose_reply_has_no_structured_part() {
        let session = scripted_session(vec!["Just words, no JSON."]);
        let runner = TaskRunner::new(session, &reviewer_config());
        let outcome = runner.run_task("review", &json!({}), None, None).await;
        assert!(outcome.is_success());
        assert!(outcome.structured_reply.is_none());
    }

    #[tokio::test]
    async fn outcome_wire_shapes() {
        let ok = TaskOutcome {
            status: "success".into(),
            reply: "done".into(),
            agent_rounds_count: 2,
            worker: "coder".into(),
            structured_reply: None,
            validation_warnings: vec![],
        };
        let v = ok.to_value();
        assert_eq!(v["reply"], "done");
        assert_eq!(v["agent_rounds_count"], 2);
        assert!(v.get("error").is_none());

        let err = TaskOutcome::error("coder", "boom");
        let v = err.to_value();
        assert_eq!(v["status"], "error");
        assert_eq!(v["error"], "boom");
        assert!(v.get("reply").is_none());
    }
}
