use serde::{Deserialize, Serialize};

use crate::agent::context::{ExecutionResult, TaskContext};

/// Serializable execution result tree for one scenario run:
/// scenario → retry history → per-task results. Downstream report generation
/// encodes this as YAML or JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub scenario_id: String,
    pub goal: String,
    pub success: bool,
    pub attempts: Vec<AttemptReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptReport {
    /// Zero-based attempt number; 0 is the initial attempt.
    pub index: u32,
    pub tasks: Vec<TaskReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub scenario_id: String,
    pub goal: String,
    pub status: TaskStatus,
    pub context: Option<TaskContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Failed,
    Cancelled,
    NotRun,
}

impl TaskStatus {
    pub fn from_result(result: &ExecutionResult) -> Self {
        match result {
            ExecutionResult::Success => TaskStatus::Success,
            ExecutionResult::Failed(_) => TaskStatus::Failed,
            ExecutionResult::Cancelled(_) => TaskStatus::Cancelled,
        }
    }
}

impl RunReport {
    /// Human-readable status dump, used in the goal-not-archived error and
    /// in logs.
    pub fn status_dump(&self) -> String {
        let mut out = format!("scenario '{}': {}\n", self.scenario_id, self.goal);
        for attempt in &self.attempts {
            out.push_str(&format!("attempt {}:\n", attempt.index + 1));
            for task in &attempt.tasks {
                let steps = task
                    .context
                    .as_ref()
                    .map(|c| c.steps.len())
                    .unwrap_or(0);
                out.push_str(&format!(
                    "  [{:?}] {} ({} steps) - {}\n",
                    task.status, task.scenario_id, steps, task.goal
                ));
            }
        }
        out
    }
}
