//! The orchestrator: plan → dispatch → aggregate → summarise.
//!
//! A high-level goal is decomposed by the orchestrator's own chat-only
//! upstream conversation into a JSON task plan, scheduled in dependency
//! order across worker agents (subprocess MCP servers or in-process queue
//! workers), and the collected results are summarised by a final chat
//! turn. A single worker's failure never aborts the pipeline: its error
//! text flows into dependent tasks' context and the run completes with a
//! partial result.

mod mcp_transport;
mod plan;
mod queue_transport;
mod scheduler;
mod settings;

pub use mcp_transport::McpDispatcher;
pub use plan::{parse_plan, planning_prompt, PlannedTask};
pub use queue_transport::QueueDispatcher;
pub use scheduler::{
    run_schedule, CompletedTask, DispatchedTask, TaskReport, TaskStatus, WaveDispatcher,
};
pub use settings::{default_workers, OrchestratorSettings};

use std::sync::Arc;

use maestro_config::TransportKind;
use maestro_upstream::{SessionPool, TurnOptions, UpstreamSession};
use thiserror::Error;
use tracing::info;

/// Errors from the orchestration pipeline.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The planning session failed (the only fatal condition: the upstream
    /// process is gone or never came up).
    #[error(transparent)]
    Upstream(#[from] maestro_upstream::UpstreamError),
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Pipeline progress events, for UI integration.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// The plan is ready.
    Planned {
        /// The validated tasks.
        tasks: Vec<PlannedTask>,
    },
    /// A task was dispatched to a worker.
    Assign {
        /// Plan index.
        index: usize,
        /// Worker role.
        role: String,
        /// Task description.
        task: String,
    },
    /// A streaming fragment from a queue worker.
    Progress {
        /// Task id.
        task_id: String,
        /// Reply delta.
        message: String,
    },
    /// A task reached a terminal state.
    TaskDone {
        /// Plan index.
        index: usize,
        /// Worker role.
        role: String,
        /// Whether it succeeded.
        success: bool,
    },
}

/// Event callback.
pub type EventSink = Arc<dyn Fn(OrchestratorEvent) + Send + Sync>;

/// Result of one orchestrated run.
#[derive(Debug, Clone)]
pub struct OrchestratorRun {
    /// The validated plan.
    pub tasks: Vec<PlannedTask>,
    /// Per-task records in plan order.
    pub results: Vec<CompletedTask>,
    /// The closing summary (or an in-band failure note).
    pub summary: String,
}

/// Orchestrator agent: owns a chat-only planning conversation and drives
/// worker agents through the configured transport.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    events: Option<EventSink>,
    session: Option<Arc<UpstreamSession>>,
    pooled: bool,
    conversation_id: Option<String>,
}

impl Orchestrator {
    /// Orchestrator for the given settings.
    #[must_use]
    pub fn new(settings: OrchestratorSettings) -> Self {
        Self {
            settings,
            events: None,
            session: None,
            pooled: false,
            conversation_id: None,
        }
    }

    /// Use a pre-established planning session (tests, embedders). The
    /// session is not released on [`Orchestrator::stop`].
    #[must_use]
    pub fn with_session(settings: OrchestratorSettings, session: Arc<UpstreamSession>) -> Self {
        Self {
            settings,
            events: None,
            session: Some(session),
            pooled: false,
            conversation_id: None,
        }
    }

    /// Attach an event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// The settings in use.
    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Execute a goal end to end.
    ///
    /// # Errors
    ///
    /// Returns an error only when the planning session cannot be
    /// established or dies; worker failures are reported in the results.
    pub async fn run(&mut self, goal: &str) -> OrchestratorResult<OrchestratorRun> {
        self.ensure_session().await?;

        let tasks = self.plan(goal).await?;
        info!(tasks = tasks.len(), "plan ready");
        self.emit(OrchestratorEvent::Planned {
            tasks: tasks.clone(),
        });

        let results = self.dispatch(&tasks).await;
        let summary = self.summarize(goal, &results).await;

        Ok(OrchestratorRun {
            tasks,
            results,
            summary,
        })
    }

    /// Release the planning session and conversation.
    pub async fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Some(id) = self.conversation_id.take() {
                let _ = session.conversation_destroy(&id).await;
            }
            if self.pooled {
                SessionPool::global().release(&session).await;
            }
        }
    }

    async fn ensure_session(&mut self) -> OrchestratorResult<()> {
        if self.session.is_none() {
            let session = SessionPool::global()
                .acquire(self.settings.planning_session_options())
                .await?;
            self.session = Some(session);
            self.pooled = true;
        }
        Ok(())
    }

    /// Decompose the goal via the planning conversation.
    async fn plan(&mut self, goal: &str) -> OrchestratorResult<Vec<PlannedTask>> {
        let session = self.session.as_ref().expect("session ensured");
        let prompt = planning_prompt(&self.settings.workers, goal);
        let opts = TurnOptions {
            model: self.settings.model.clone(),
            ..Default::default()
        };

        let reply = match &self.conversation_id {
            None => {
                let reply = session.conversation_create(&prompt, &opts).await?;
                self.conversation_id = Some(reply.conversation_id.clone());
                reply
            },
            Some(id) => session.conversation_turn(id, &prompt, &opts).await?,
        };

        Ok(parse_plan(&reply.reply, &self.settings.roles(), goal))
    }

    /// Run the plan on the configured transport.
    async fn dispatch(&self, tasks: &[PlannedTask]) -> Vec<CompletedTask> {
        match self.settings.transport {
            TransportKind::Queue => {
                let mut dispatcher =
                    QueueDispatcher::start(&self.settings, self.events.clone());
                let results =
                    run_schedule(tasks, None, &mut dispatcher, self.events.as_ref()).await;
                dispatcher.shutdown().await;
                results
            },
            TransportKind::Mcp => {
                let mut dispatcher = McpDispatcher::start(&self.settings).await;
                let results =
                    run_schedule(tasks, None, &mut dispatcher, self.events.as_ref()).await;
                dispatcher.shutdown();
                results
            },
        }
    }

    /// Ask the planning conversation for a closing summary. Failure is
    /// reported in-band, never propagated.
    async fn summarize(&self, goal: &str, results: &[CompletedTask]) -> String {
        let Some(session) = &self.session else {
            return "Summary generation failed: no session".to_string();
        };
        let Some(conversation_id) = &self.conversation_id else {
            return "Summary generation failed: no planning conversation".to_string();
        };

        let prompt = format!(
            "The original goal was: {goal}\n\n\
             Here are the results from the worker agents:\n{}\n\n\
             Please provide a concise summary of what was accomplished, any issues \
             encountered, and next steps if applicable.",
            results_digest(results)
        );
        let opts = TurnOptions {
            model: self.settings.model.clone(),
            ..Default::default()
        };
        match session.conversation_turn(conversation_id, &prompt, &opts).await {
            Ok(reply) => reply.reply,
            Err(e) => format!("Summary generation failed: {e}"),
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(sink) = &self.events {
            sink(event);
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.settings.workers.len())
            .field("transport", &self.settings.transport)
            .finish_non_exhaustive()
    }
}

/// First 500 characters of each result, one line per task.
fn results_digest(results: &[CompletedTask]) -> String {
    results
        .iter()
        .map(|r| {
            let snippet: String = r.result.chars().take(500).collect();
            format!("Task {} [{}] ({}): {snippet}", r.index, r.worker_role, r.status)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
