use serde::{Deserialize, Serialize};

use crate::errors::PilotError;

/// Snapshot of a scenario run, published after every step of the currently
/// running task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningInfo {
    pub total_tasks: usize,
    /// Zero-based index of the task currently executing.
    pub current_task_index: usize,
    pub completed_steps: usize,
    pub max_step_count: usize,
    pub retried_tasks: u32,
    pub max_retry: u32,
}

impl RunningInfo {
    pub fn describe(&self) -> String {
        format!(
            "task {}/{}, step {}/{}, retry {}/{}",
            self.current_task_index + 1,
            self.total_tasks,
            self.completed_steps,
            self.max_step_count,
            self.retried_tasks,
            self.max_retry
        )
    }
}

/// Observer the engine reports through. Passed explicitly wherever progress
/// is produced; there is no process-global status feed.
pub trait ProgressReporter: Send + Sync {
    fn on_running_info(&self, _info: &RunningInfo) {}

    fn on_task_started(&self, _scenario_id: &str, _index: usize, _total: usize) {}

    fn on_task_finished(&self, _scenario_id: &str, _achieved: bool) {}

    /// Unexpected errors caught at the top of the task loop land here.
    fn on_error(&self, _error: &PilotError) {}
}

/// Reporter that forwards everything to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn on_running_info(&self, info: &RunningInfo) {
        tracing::info!(progress = %info.describe(), "scenario progress");
    }

    fn on_task_started(&self, scenario_id: &str, index: usize, total: usize) {
        tracing::info!(scenario = %scenario_id, index, total, "task started");
    }

    fn on_task_finished(&self, scenario_id: &str, achieved: bool) {
        tracing::info!(scenario = %scenario_id, achieved, "task finished");
    }

    fn on_error(&self, error: &PilotError) {
        tracing::error!(error = %error, "unexpected error in task loop");
    }
}

/// Reporter that swallows everything; the default for embedders that bring
/// their own observer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl ProgressReporter for NullReporter {}
