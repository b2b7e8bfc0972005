//! The in-process worker: an inbox-driven task on a shared session pool.

use std::sync::Arc;
use std::time::Duration;

use maestro_config::WorkerConfig;
use maestro_upstream::{ProgressCallback, ProgressUpdate, SessionOptions, SessionPool};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::task::TaskRunner;

/// Grace period for a worker to drain on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Messages between the orchestrator and in-process workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Orchestrator → worker: run a task.
    TaskAssign {
        /// Task id minted by the orchestrator.
        task_id: String,
        /// Target worker id.
        worker_id: String,
        /// Task prompt.
        prompt: String,
        /// Shared context from completed dependencies.
        #[serde(default)]
        context: Value,
    },
    /// Worker → orchestrator: terminal result for a task.
    TaskResult {
        /// The task this answers.
        task_id: String,
        /// Originating worker id.
        worker_id: String,
        /// `"success"` or `"error"`.
        status: String,
        /// Reply text or error message.
        result: String,
        /// Number of agent rounds used.
        #[serde(default)]
        agent_rounds: usize,
        /// Soft-validated structured reply, when available.
        #[serde(default)]
        structured_reply: Option<Value>,
        /// Soft-validation findings.
        #[serde(default)]
        validation_warnings: Vec<String>,
    },
    /// Worker → orchestrator: a streaming progress fragment.
    TaskProgress {
        /// The task being worked on.
        task_id: String,
        /// Originating worker id.
        worker_id: String,
        /// Reply delta.
        message: String,
    },
    /// Orchestrator → worker: drain and exit.
    Shutdown,
}

/// Handle to a spawned in-process worker.
pub struct WorkerHandle {
    worker_id: String,
    role: String,
    inbox: mpsc::UnboundedSender<WorkerMessage>,
    join: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// The worker's unique id (`{role}-{hex}`).
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// The worker's role.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Post a message to the worker's inbox. Returns `false` when the
    /// worker has already exited.
    pub fn send(&self, msg: WorkerMessage) -> bool {
        self.inbox.send(msg).is_ok()
    }

    /// Signal shutdown and join with a ten-second grace, aborting after.
    pub async fn shutdown(self) {
        let _ = self.inbox.send(WorkerMessage::Shutdown);
        if tokio::time::timeout(SHUTDOWN_GRACE, self.join).await.is_err() {
            warn!(worker = %self.worker_id, "worker did not drain in time");
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}

/// Spawn an in-process worker for `config`.
///
/// The worker acquires a pooled upstream session for its workspace (so
/// queue workers in one workspace share a single subprocess), then
/// processes one task at a time from its inbox, forwarding reply deltas as
/// progress messages. Session startup failure posts an error result tagged
/// `"__init__"` and exits.
#[must_use]
pub fn spawn_queue_worker(
    config: WorkerConfig,
    options: SessionOptions,
    outbox: mpsc::UnboundedSender<WorkerMessage>,
) -> WorkerHandle {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    let worker_id = format!("{}-{}", config.role, &hex[..6]);
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

    let join = tokio::spawn(run_worker(
        worker_id.clone(),
        config.clone(),
        options,
        inbox_rx,
        outbox,
    ));

    WorkerHandle {
        worker_id,
        role: config.role,
        inbox: inbox_tx,
        join,
    }
}

async fn run_worker(
    worker_id: String,
    config: WorkerConfig,
    options: SessionOptions,
    mut inbox: mpsc::UnboundedReceiver<WorkerMessage>,
    outbox: mpsc::UnboundedSender<WorkerMessage>,
) {
    let session = match SessionPool::global().acquire(options).await {
        Ok(session) => session,
        Err(e) => {
            warn!(worker = %worker_id, error = %e, "worker init failed");
            let _ = outbox.send(WorkerMessage::TaskResult {
                task_id: "__init__".to_string(),
                worker_id,
                status: "error".to_string(),
                result: format!("Worker init failed: {e}"),
                agent_rounds: 0,
                structured_reply: None,
                validation_warnings: Vec::new(),
            });
            return;
        },
    };
    let runner = TaskRunner::new(session.clone(), &config);
    info!(worker = %worker_id, "worker ready");

    while let Some(msg) = inbox.recv().await {
        match msg {
            WorkerMessage::Shutdown => break,
            WorkerMessage::TaskAssign {
                task_id,
                prompt,
                context,
                ..
            } => {
                let progress = progress_forwarder(&outbox, &task_id, &worker_id);
                let outcome = runner
                    .run_task(&prompt, &context, None, Some(progress))
                    .await;
                let _ = outbox.send(WorkerMessage::TaskResult {
                    task_id,
                    worker_id: worker_id.clone(),
                    status: outcome.status.clone(),
                    result: outcome.reply.clone(),
                    agent_rounds: outcome.agent_rounds_count,
                    structured_reply: outcome.structured_reply.clone(),
                    validation_warnings: outcome.validation_warnings.clone(),
                });
            },
            other => debug!(worker = %worker_id, msg = ?other, "ignoring inbox message"),
        }
    }

    runner.destroy_conversation().await;
    SessionPool::global().release(&session).await;
    info!(worker = %worker_id, "worker stopped");
}

/// Forward reply deltas to the outbox as progress messages.
fn progress_forwarder(
    outbox: &mpsc::UnboundedSender<WorkerMessage>,
    task_id: &str,
    worker_id: &str,
) -> ProgressCallback {
    let outbox = outbox.clone();
    let task_id = task_id.to_string();
    let worker_id = worker_id.to_string();
    Arc::new(move |update| {
        if let ProgressUpdate::Delta(delta) = update {
            let _ = outbox.send(WorkerMessage::TaskProgress {
                task_id: task_id.clone(),
                worker_id: worker_id.clone(),
                message: delta.clone(),
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_round_trip_with_snake_case_tags() {
        let assign = WorkerMessage::TaskAssign {
            task_id: "task-1".into(),
            worker_id: "coder-abc".into(),
            prompt: "do".into(),
            context: json!({"k": "v"}),
        };
        let wire = serde_json::to_value(&assign).unwrap();
        assert_eq!(wire["type"], "task_assign");
        assert_eq!(
            serde_json::from_value::<WorkerMessage>(wire).unwrap(),
            assign
        );

        let wire = serde_json::to_value(WorkerMessage::Shutdown).unwrap();
        assert_eq!(wire["type"], "shutdown");

        let result = WorkerMessage::TaskResult {
            task_id: "task-1".into(),
            worker_id: "coder-abc".into(),
            status: "success".into(),
            result: "done".into(),
            agent_rounds: 3,
            structured_reply: Some(json!({"ok": true})),
            validation_warnings: vec!["w".into()],
        };
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["type"], "task_result");
        assert_eq!(wire["agent_rounds"], 3);
    }

    #[tokio::test]
    async fn init_failure_posts_error_and_exits() {
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();
        let config: WorkerConfig =
            serde_json::from_value(json!({"role": "coder", "agent_mode": false})).unwrap();
        let mut options = SessionOptions::new("/tmp/queue-worker-test");
        // An unreadable credentials file fails startup before any spawn.
        options.apps_json = Some("/no/such/apps.json".into());

        let handle = spawn_queue_worker(config, options, outbox_tx);
        let msg = outbox_rx.recv().await.unwrap();
        match msg {
            WorkerMessage::TaskResult {
                task_id, status, result, ..
            } => {
                assert_eq!(task_id, "__init__");
                assert_eq!(status, "error");
                assert!(result.contains("Worker init failed"));
            },
            other => panic!("unexpected message: {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn worker_ids_embed_the_role() {
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel();
        let config: WorkerConfig = serde_json::from_value(json!({"role": "tester"})).unwrap();
        let mut options = SessionOptions::new("/tmp/queue-worker-id-test");
        options.apps_json = Some("/no/such/apps.json".into());

        let handle = spawn_queue_worker(config, options, outbox_tx);
        assert!(handle.worker_id().starts_with("tester-"));
        assert_eq!(handle.role(), "tester");

        let _ = outbox_rx.recv().await; // the init-failure report
        handle.shutdown().await;
    }
}
