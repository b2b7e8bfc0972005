//! Goal decomposition: the planning prompt and plan validation.

use maestro_config::WorkerConfig;
use maestro_schema::extract_json;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Planning instructions given to the orchestrator's own model.
const PLANNING_SYSTEM_PROMPT: &str = "\
You are an orchestrator agent. Your job is to break down complex tasks into \
discrete subtasks and assign them to specialised worker agents.

Available workers:
{workers_description}

When given a task, respond with a JSON array of subtask assignments. Each \
element must have:
- \"worker_role\": one of the available worker roles
- \"task\": a clear, self-contained description of what the worker should do
- \"depends_on\": list of task indices (0-based) that must complete first, or []

Example response:
```json
[
  {\"worker_role\": \"bug_fixer\", \"task\": \"Find and fix the null pointer in auth.py line 42\", \"depends_on\": []},
  {\"worker_role\": \"test_writer\", \"task\": \"Write unit tests for the auth.py fix\", \"depends_on\": [0]}
]
```

IMPORTANT: Respond ONLY with the JSON array. No other text.";

/// One planned subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedTask {
    /// Role of the worker that should run this.
    pub worker_role: String,
    /// Self-contained task description.
    pub task: String,
    /// Indices of tasks that must complete first.
    pub depends_on: Vec<usize>,
}

/// The full planning prompt for a goal.
#[must_use]
pub fn planning_prompt(workers: &[WorkerConfig], goal: &str) -> String {
    let description = workers
        .iter()
        .map(|w| {
            let summary: String = w.system_prompt.chars().take(120).collect();
            format!("- {}: {}", w.role, summary)
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "{}\n\nGoal: {goal}",
        PLANNING_SYSTEM_PROMPT.replace("{workers_description}", &description)
    )
}

/// Parse and validate the model's plan reply.
///
/// - Unknown roles are reassigned to the first worker.
/// - `task` defaults to empty, `depends_on` to `[]`.
/// - Out-of-range dependency indices are rejected here, before dispatch
///   (in-range but unsatisfiable dependencies are left for the scheduler
///   to report as skipped).
/// - When no JSON array can be extracted at all, the goal becomes a single
///   task for the first worker.
#[must_use]
pub fn parse_plan(reply: &str, roles: &[String], goal: &str) -> Vec<PlannedTask> {
    let fallback = || {
        vec![PlannedTask {
            worker_role: roles.first().cloned().unwrap_or_default(),
            task: goal.to_string(),
            depends_on: Vec::new(),
        }]
    };

    let Some(Value::Array(entries)) = extract_json(reply) else {
        debug!("plan extraction failed, falling back to a single task");
        return fallback();
    };

    let total = entries.len();
    entries
        .iter()
        .map(|entry| {
            let role = entry
                .get("worker_role")
                .and_then(Value::as_str)
                .filter(|role| roles.iter().any(|r| r == role))
                .map_or_else(
                    || {
                        let first = roles.first().cloned().unwrap_or_default();
                        warn!(entry = %entry, fallback = %first, "unknown worker role in plan");
                        first
                    },
                    ToOwned::to_owned,
                );
            let task = entry
                .get("task")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let depends_on = entry
                .get("depends_on")
                .and_then(Value::as_array)
                .map(|deps| {
                    deps.iter()
                        .filter_map(Value::as_u64)
                        .map(|d| d as usize)
                        .filter(|d| {
                            let in_range = *d < total;
                            if !in_range {
                                warn!(index = d, "dropping out-of-range dependency");
                            }
                            in_range
                        })
                        .collect()
                })
                .unwrap_or_default();

            PlannedTask {
                worker_role: role,
                task,
                depends_on,
            }
        })
        .collect()
}
