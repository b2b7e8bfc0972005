//! Dependency-ordered wave scheduling, transport-agnostic.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::plan::PlannedTask;
use crate::{EventSink, OrchestratorEvent};

/// Terminal status of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The worker completed the task.
    Success,
    /// The worker failed (or never answered); downstream tasks still run.
    Error,
    /// The task never became ready (unsatisfiable dependencies) or its
    /// transport went away before dispatch.
    Skipped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// What a dispatcher reports back for one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Terminal status.
    pub status: TaskStatus,
    /// Reply text or error message.
    pub result: String,
    /// Agent rounds used.
    pub agent_rounds: usize,
    /// Soft-validated structured reply, when the worker produced one.
    pub structured_reply: Option<Value>,
    /// Soft-validation findings.
    pub validation_warnings: Vec<String>,
}

impl TaskReport {
    /// An error report.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Error,
            result: message.into(),
            agent_rounds: 0,
            structured_reply: None,
            validation_warnings: Vec::new(),
        }
    }
}

/// One task handed to a dispatcher, with its dependency context built.
#[derive(Debug, Clone)]
pub struct DispatchedTask {
    /// Plan index.
    pub index: usize,
    /// Worker role.
    pub role: String,
    /// Task prompt.
    pub prompt: String,
    /// Context object carrying `result_from_{role}_task_{i}` entries.
    pub context: Value,
}

/// A worker transport: runs one wave of ready tasks to completion.
///
/// The MCP transport awaits one concurrent `execute_task` call per task;
/// the queue transport posts assignments and drains the shared result
/// channel. Either way the wave's reports come back together.
#[async_trait::async_trait]
pub trait WaveDispatcher: Send {
    /// Run every task of the wave and report each task's outcome.
    async fn run_wave(&mut self, wave: Vec<DispatchedTask>) -> Vec<(usize, TaskReport)>;
}

/// A task's final record in plan order.
#[derive(Debug, Clone)]
pub struct CompletedTask {
    /// Plan index.
    pub index: usize,
    /// Worker role.
    pub worker_role: String,
    /// Task description.
    pub task: String,
    /// Terminal status.
    pub status: TaskStatus,
    /// Reply text, error message, or a skip note.
    pub result: String,
    /// Soft-validated structured reply.
    pub structured_reply: Option<Value>,
    /// Soft-validation findings.
    pub validation_warnings: Vec<String>,
}

/// Run the plan: repeatedly dispatch every task whose dependencies are
/// complete, as one wave, until nothing more becomes ready.
///
/// Tasks whose dependencies can never complete (self-references, cycles)
/// are reported as skipped. A failed task completes with its error text;
/// its dependents still run and see that text in their context.
pub async fn run_schedule(
    tasks: &[PlannedTask],
    shared_context: Option<&Value>,
    dispatcher: &mut dyn WaveDispatcher,
    events: Option<&EventSink>,
) -> Vec<CompletedTask> {
    let mut completed: HashMap<usize, TaskReport> = HashMap::new();
    let mut pending: BTreeSet<usize> = (0..tasks.len()).collect();

    loop {
        let ready: Vec<usize> = pending
            .iter()
            .copied()
            .filter(|&i| tasks[i].depends_on.iter().all(|d| completed.contains_key(d)))
            .collect();
        if ready.is_empty() {
            break;
        }

        let mut wave = Vec::with_capacity(ready.len());
        for index in ready {
            pending.remove(&index);
            let task = &tasks[index];
            emit(
                events,
                OrchestratorEvent::Assign {
                    index,
                    role: task.worker_role.clone(),
                    task: task.task.clone(),
                },
            );
            wave.push(DispatchedTask {
                index,
                role: task.worker_role.clone(),
                prompt: task.task.clone(),
                context: dependency_context(task, tasks, &completed, shared_context),
            });
        }

        debug!(tasks = wave.len(), "dispatching wave");
        for (index, report) in dispatcher.run_wave(wave).await {
            emit(
                events,
                OrchestratorEvent::TaskDone {
                    index,
                    role: tasks.get(index).map(|t| t.worker_role.clone()).unwrap_or_default(),
                    success: report.status == TaskStatus::Success,
                },
            );
            completed.insert(index, report);
        }
    }

    tasks
        .iter()
        .enumerate()
        .map(|(index, task)| match completed.remove(&index) {
            Some(report) => CompletedTask {
                index,
                worker_role: task.worker_role.clone(),
                task: task.task.clone(),
                status: report.status,
                result: report.result,
                structured_reply: report.structured_reply,
                validation_warnings: report.validation_warnings,
            },
            None => CompletedTask {
                index,
                worker_role: task.worker_role.clone(),
                task: task.task.clone(),
                status: TaskStatus::Skipped,
                result: "Not executed".to_string(),
                structured_reply: None,
                validation_warnings: Vec::new(),
            },
        })
        .collect()
}

/// Context for a task: the shared context plus one
/// `result_from_{role}_task_{i}` entry per completed dependency.
fn dependency_context(
    task: &PlannedTask,
    tasks: &[PlannedTask],
    completed: &HashMap<usize, TaskReport>,
    shared: Option<&Value>,
) -> Value {
    let mut context: Map<String, Value> = shared
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for &dep in &task.depends_on {
        let role = tasks.get(dep).map(|t| t.worker_role.as_str()).unwrap_or("");
        let result = completed.get(&dep).map(|r| r.result.as_str()).unwrap_or("");
        context.insert(format!("result_from_{role}_task_{dep}"), json!(result));
    }
    Value::Object(context)
}

fn emit(events: Option<&EventSink>, event: OrchestratorEvent) {
    if let Some(sink) = events {
        sink(event);
    }
}
