use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::context::ExecutionResult;
use crate::agent::engine::{Agent, StepListener};
use crate::config::ProjectConfig;
use crate::errors::{PilotError, PilotResult};
use crate::interceptor::builtins::{CacheEvictionInterceptor, DecisionCacheInterceptor};
use crate::interceptor::InterceptorSet;
use crate::scenario::model::{AgentConfig, AgentTask, ScenarioGraph};
use crate::scenario::progress::{ProgressReporter, RunningInfo};
use crate::scenario::report::{AttemptReport, RunReport, TaskReport, TaskStatus};
use crate::scenario::resolver::resolve_task_chain;

/// An `AgentTask` paired with the agent currently (or previously) executing
/// it.
#[derive(Clone)]
pub struct TaskAssignment {
    pub task: AgentTask,
    pub agent: Arc<Agent>,
}

/// Runs one scenario: resolves its task chain, executes the chain with one
/// fresh agent per task, and retries the whole chain on failure up to the
/// scenario's retry budget.
pub struct ScenarioExecutor {
    graph: ScenarioGraph,
    project: ProjectConfig,
    config: AgentConfig,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
    assignments: Mutex<Vec<TaskAssignment>>,
    history: Mutex<Vec<Vec<TaskAssignment>>>,
}

impl ScenarioExecutor {
    pub fn new(
        graph: ScenarioGraph,
        project: ProjectConfig,
        config: AgentConfig,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            graph,
            project,
            config,
            reporter,
            cancel: CancellationToken::new(),
            assignments: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// True while any task agent of the current attempt is running.
    pub fn is_running(&self) -> bool {
        self.assignments.lock().iter().any(|a| a.agent.is_running())
    }

    /// Requests cooperative cancellation of the current attempt and any
    /// queued retries.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Full retry history: one assignment list per attempt.
    pub fn assignment_history(&self) -> Vec<Vec<TaskAssignment>> {
        self.history.lock().clone()
    }

    pub async fn execute(&self, scenario_id: &str) -> PilotResult<RunReport> {
        let scenario = self
            .graph
            .get(scenario_id)
            .ok_or_else(|| PilotError::Scenario(format!("unknown scenario '{scenario_id}'")))?;
        let goal = scenario.goal.clone();
        let max_retry = scenario.max_retry.unwrap_or(self.project.max_retry);
        let tasks = resolve_task_chain(&self.graph, scenario_id, &self.project)?;

        let mut attempts: Vec<AttemptReport> = Vec::new();
        let mut retries_used: u32 = 0;

        loop {
            // Agents from the previous attempt must not keep driving the
            // device.
            for assignment in self.assignments.lock().iter() {
                assignment.agent.cancel();
            }

            let attempt = self.run_attempt(&tasks, retries_used, max_retry).await;
            attempts.push(AttemptReport {
                index: retries_used,
                tasks: attempt.reports,
            });

            if attempt.cancelled {
                tracing::info!(scenario = %scenario_id, "scenario run cancelled");
                return Err(PilotError::Cancelled);
            }
            if attempt.all_succeeded {
                tracing::info!(scenario = %scenario_id, retries = retries_used, "scenario succeeded");
                return Ok(RunReport {
                    scenario_id: scenario_id.to_string(),
                    goal,
                    success: true,
                    attempts,
                });
            }
            if retries_used >= max_retry {
                let report = RunReport {
                    scenario_id: scenario_id.to_string(),
                    goal,
                    success: false,
                    attempts,
                };
                let status = report.status_dump();
                tracing::error!(scenario = %scenario_id, "retry budget exhausted\n{status}");
                return Err(PilotError::GoalNotArchived {
                    attempts: retries_used + 1,
                    status,
                });
            }
            retries_used += 1;
            tracing::info!(
                scenario = %scenario_id,
                retry = retries_used,
                max_retry,
                "retrying scenario chain"
            );
        }
    }

    async fn run_attempt(
        &self,
        tasks: &[AgentTask],
        retries_used: u32,
        max_retry: u32,
    ) -> AttemptOutcome {
        let total_tasks = tasks.len();
        let config = self.attempt_config();
        let current: Vec<TaskAssignment> = tasks
            .iter()
            .enumerate()
            .map(|(index, task)| TaskAssignment {
                task: task.clone(),
                agent: Agent::new(
                    task.clone(),
                    config.clone(),
                    self.reporter.clone(),
                    self.cancel.child_token(),
                    Some(self.step_listener(task, index, total_tasks, retries_used, max_retry)),
                ),
            })
            .collect();
        *self.assignments.lock() = current.clone();
        self.history.lock().push(current.clone());

        let mut reports = Vec::new();
        let mut all_succeeded = true;
        let mut cancelled = false;

        for (index, assignment) in current.iter().enumerate() {
            self.reporter
                .on_task_started(&assignment.task.scenario_id, index, total_tasks);
            let result = assignment.agent.clone().run().await;
            self.reporter
                .on_task_finished(&assignment.task.scenario_id, result.is_success());
            reports.push(TaskReport {
                scenario_id: assignment.task.scenario_id.clone(),
                goal: assignment.task.goal.clone(),
                status: TaskStatus::from_result(&result),
                context: Some(assignment.agent.context_snapshot()),
            });
            match result {
                ExecutionResult::Success => {}
                ExecutionResult::Cancelled(_) => {
                    cancelled = true;
                    all_succeeded = false;
                    break;
                }
                ExecutionResult::Failed(_) => {
                    all_succeeded = false;
                    break;
                }
            }
        }
        for assignment in current.iter().skip(reports.len()) {
            reports.push(TaskReport {
                scenario_id: assignment.task.scenario_id.clone(),
                goal: assignment.task.goal.clone(),
                status: TaskStatus::NotRun,
                context: None,
            });
        }

        AttemptOutcome {
            reports,
            all_succeeded,
            cancelled,
        }
    }

    /// The per-attempt agent configuration: the caller-supplied interceptor
    /// set plus the cache links, rebuilt fresh so nothing leaks across
    /// attempts.
    fn attempt_config(&self) -> AgentConfig {
        let interceptors = self
            .base_interceptors()
            .with_decision(Arc::new(DecisionCacheInterceptor::new(
                self.config.cache.clone(),
            )))
            .with_execution(Arc::new(CacheEvictionInterceptor::new(
                self.config.cache.clone(),
            )));
        AgentConfig {
            interceptors,
            ..self.config.clone()
        }
    }

    fn base_interceptors(&self) -> InterceptorSet {
        self.config.interceptors.clone()
    }

    fn step_listener(
        &self,
        task: &AgentTask,
        index: usize,
        total_tasks: usize,
        retries_used: u32,
        max_retry: u32,
    ) -> StepListener {
        let reporter = self.reporter.clone();
        let max_step_count = task.max_step_count;
        Arc::new(move |completed_steps: usize| {
            reporter.on_running_info(&RunningInfo {
                total_tasks,
                current_task_index: index,
                completed_steps,
                max_step_count,
                retried_tasks: retries_used,
                max_retry,
            });
        })
    }
}

struct AttemptOutcome {
    reports: Vec<TaskReport>,
    all_succeeded: bool,
    cancelled: bool,
}
