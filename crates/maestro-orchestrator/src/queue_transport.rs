//! Queue transport: in-process workers driven over channels.

use std::collections::HashMap;
use std::time::Duration;

use maestro_worker::{spawn_queue_worker, WorkerHandle, WorkerMessage};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::scheduler::{DispatchedTask, TaskReport, TaskStatus, WaveDispatcher};
use crate::settings::OrchestratorSettings;
use crate::{EventSink, OrchestratorEvent};

/// How long to wait for any worker result before giving up on a wave.
const RESULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Dispatches waves to in-process workers through their inboxes, draining
/// the shared result channel until every dispatched task has reported.
pub struct QueueDispatcher {
    handles: HashMap<String, WorkerHandle>,
    results: mpsc::UnboundedReceiver<WorkerMessage>,
    events: Option<EventSink>,
}

impl QueueDispatcher {
    /// Spawn one worker per configured role.
    #[must_use]
    pub fn start(settings: &OrchestratorSettings, events: Option<EventSink>) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let mut handles = HashMap::new();
        for config in &settings.workers {
            let handle = spawn_queue_worker(
                config.clone(),
                settings.worker_session_options(config),
                outbox_tx.clone(),
            );
            handles.insert(config.role.clone(), handle);
        }
        Self {
            handles,
            results: outbox_rx,
            events,
        }
    }

    /// Shut every worker down with the message-then-join grace protocol.
    pub async fn shutdown(self) {
        for (_, handle) in self.handles {
            handle.shutdown().await;
        }
    }
}

#[async_trait::async_trait]
impl WaveDispatcher for QueueDispatcher {
    async fn run_wave(&mut self, wave: Vec<DispatchedTask>) -> Vec<(usize, TaskReport)> {
        let mut reports = Vec::with_capacity(wave.len());
        // task id → plan index for results arriving on the shared channel.
        let mut outstanding: HashMap<String, usize> = HashMap::new();

        for task in wave {
            let Some(handle) = self.handles.get(&task.role) else {
                reports.push((
                    task.index,
                    TaskReport::error(format!("No worker found for role: {}", task.role)),
                ));
                continue;
            };
            let hex = uuid::Uuid::new_v4().simple().to_string();
            let task_id = format!("task-{}", &hex[..8]);
            let sent = handle.send(WorkerMessage::TaskAssign {
                task_id: task_id.clone(),
                worker_id: handle.worker_id().to_string(),
                prompt: task.prompt,
                context: task.context,
            });
            if sent {
                outstanding.insert(task_id, task.index);
            } else {
                reports.push((
                    task.index,
                    TaskReport::error(format!("Worker for role '{}' has exited", task.role)),
                ));
            }
        }

        while !outstanding.is_empty() {
            match tokio::time::timeout(RESULT_TIMEOUT, self.results.recv()).await {
                Ok(Some(WorkerMessage::TaskResult {
                    task_id,
                    status,
                    result,
                    agent_rounds,
                    structured_reply,
                    validation_warnings,
                    ..
                })) => {
                    if task_id == "__init__" {
                        // A worker failed to start; its assigned tasks will
                        // hit the drain timeout below.
                        warn!(error = %result, "worker initialisation failure");
                        continue;
                    }
                    if let Some(index) = outstanding.remove(&task_id) {
                        let status = if status == "success" {
                            TaskStatus::Success
                        } else {
                            TaskStatus::Error
                        };
                        reports.push((
                            index,
                            TaskReport {
                                status,
                                result,
                                agent_rounds,
                                structured_reply,
                                validation_warnings,
                            },
                        ));
                    }
                },
                Ok(Some(WorkerMessage::TaskProgress {
                    task_id, message, ..
                })) => {
                    if let Some(sink) = &self.events {
                        sink(OrchestratorEvent::Progress { task_id, message });
                    }
                },
                Ok(Some(_)) => {},
                Ok(None) | Err(_) => {
                    warn!(
                        outstanding = outstanding.len(),
                        "timed out waiting for worker results"
                    );
                    for (_, index) in outstanding.drain() {
                        reports.push((
                            index,
                            TaskReport::error("Timeout waiting for worker results"),
                        ));
                    }
                },
            }
        }

        reports
    }
}

impl std::fmt::Debug for QueueDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDispatcher")
            .field("workers", &self.handles.len())
            .finish_non_exhaustive()
    }
}
