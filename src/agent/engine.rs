use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::context::{ContextHolder, ExchangeLog, ExecutionResult, Step, TaskContext};
use crate::agent::step::StepOutcome;
use crate::ai::{Ai, DecisionInput, DecisionOutput, ImageAssertionInput, ImageAssertionOutput};
use crate::device::{focus, Device};
use crate::errors::{PilotError, PilotResult};
use crate::interceptor::builtins::{
    AssertionHistoryInterceptor, AutoAchieveInterceptor, InitialCommandsInterceptor,
};
use crate::interceptor::{
    ActionExecutionInput, ExecutionInput, InitializationInput, Pipeline,
};
use crate::scenario::model::{AgentConfig, AgentTask, FormFactor, ScenarioKind};
use crate::scenario::progress::ProgressReporter;

/// Callback invoked after every completed step with the meaningful step
/// count so far. The scenario executor uses it to publish running info.
pub type StepListener = Arc<dyn Fn(usize) + Send + Sync>;

/// Runtime actor for exactly one task. Created fresh on every retry attempt
/// so no per-agent state survives across attempts.
pub struct Agent {
    pub(crate) task: AgentTask,
    pub(crate) config: AgentConfig,
    pub(crate) context: Mutex<ContextHolder>,
    pub(crate) reporter: Arc<dyn ProgressReporter>,
    pub(crate) run_id: String,
    pub(crate) exchange_log: ExchangeLog,
    running: AtomicBool,
    cancel: CancellationToken,
    on_step: Option<StepListener>,
    pub(crate) decision_pipeline: Pipeline<DecisionInput, DecisionOutput>,
    pub(crate) assertion_pipeline: Pipeline<ImageAssertionInput, ImageAssertionOutput>,
    pub(crate) action_pipeline: Pipeline<ActionExecutionInput, ()>,
    init_pipeline: Pipeline<InitializationInput, ()>,
}

impl Agent {
    pub fn new(
        task: AgentTask,
        config: AgentConfig,
        reporter: Arc<dyn ProgressReporter>,
        cancel: CancellationToken,
        on_step: Option<StepListener>,
    ) -> Arc<Self> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let context = ContextHolder::new(&task.scenario_id, &task.goal, task.max_step_count);
        let artifact_dir = config
            .artifact_dir
            .join(&task.scenario_id)
            .join(&run_id);
        let exchange_log = ExchangeLog::new(&artifact_dir, &run_id);

        // Per-task chain links on top of the configured set. Later additions
        // wrap earlier ones, so the initialization-only short circuit ends
        // up outermost and bypasses caching entirely.
        let mut interceptors = config.interceptors.clone();
        if !task.initial_commands.is_empty() {
            interceptors
                .initialization
                .push(Arc::new(InitialCommandsInterceptor::new(
                    task.initial_commands.clone(),
                )));
        }
        interceptors
            .image_assertion
            .push(Arc::new(AssertionHistoryInterceptor::new()));
        if task.kind == ScenarioKind::InitializationOnly {
            interceptors.decision.push(Arc::new(AutoAchieveInterceptor));
        }

        let decision_pipeline = {
            let ai = config.ai.clone();
            Pipeline::new(
                interceptors.decision.clone(),
                Box::new(move |input: DecisionInput| {
                    let ai = ai.clone();
                    Box::pin(async move { ai.decide_next_actions(input).await })
                }),
            )
        };
        let assertion_pipeline = {
            let ai = config.ai.clone();
            Pipeline::new(
                interceptors.image_assertion.clone(),
                Box::new(move |input: ImageAssertionInput| {
                    let ai = ai.clone();
                    Box::pin(async move { ai.assert_images(input).await })
                }),
            )
        };
        let action_pipeline = Pipeline::new(
            interceptors.action_execution.clone(),
            Box::new(|input: ActionExecutionInput| {
                Box::pin(async move { execute_device_action(input).await })
            }),
        );
        let init_pipeline = Pipeline::new(
            interceptors.initialization.clone(),
            Box::new(|_input: InitializationInput| Box::pin(async move { Ok(()) })),
        );

        let config = AgentConfig {
            interceptors,
            artifact_dir,
            ..config
        };

        Arc::new(Self {
            task,
            config,
            context: Mutex::new(context),
            reporter,
            run_id,
            exchange_log,
            running: AtomicBool::new(false),
            cancel,
            on_step,
            decision_pipeline,
            assertion_pipeline,
            action_pipeline,
            init_pipeline,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn context_snapshot(&self) -> TaskContext {
        self.context.lock().snapshot()
    }

    /// Runs the task to completion, wrapped in the whole-task-execution
    /// pipeline so cross-cutting concerns observe the final result.
    pub async fn run(self: Arc<Self>) -> ExecutionResult {
        let pipeline = {
            let agent = Arc::clone(&self);
            Pipeline::new(
                self.config.interceptors.execution.clone(),
                Box::new(move |input: ExecutionInput| {
                    let agent = Arc::clone(&agent);
                    Box::pin(async move { agent.run_inner(input).await })
                }),
            )
        };
        let input = ExecutionInput {
            scenario_id: self.task.scenario_id.clone(),
            goal: self.task.goal.clone(),
        };
        match pipeline.run(input).await {
            Ok(result) => result,
            Err(e) => {
                self.reporter.on_error(&e);
                self.context
                    .lock()
                    .add_step(Step::feedback(format!("task run aborted: {e}")));
                ExecutionResult::Failed(self.context_snapshot())
            }
        }
    }

    async fn run_inner(self: Arc<Self>, input: ExecutionInput) -> PilotResult<ExecutionResult> {
        self.running.store(true, Ordering::SeqCst);
        let result = self.drive(&input).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn drive(&self, input: &ExecutionInput) -> PilotResult<ExecutionResult> {
        tracing::info!(scenario = %input.scenario_id, goal = %input.goal, run = %self.run_id, "task started");

        let init_input = InitializationInput {
            device: self.config.device.clone(),
            scenario_id: self.task.scenario_id.clone(),
        };
        let init = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Ok(ExecutionResult::Cancelled(self.context_snapshot()));
            }
            res = self.init_pipeline.run(init_input) => res,
        };
        if let Err(e) = init {
            tracing::warn!(error = %e, "initialization failed, aborting task");
            self.context
                .lock()
                .add_step(Step::feedback(format!("initialization failed: {e}")));
            return Ok(ExecutionResult::Failed(self.context_snapshot()));
        }

        loop {
            if self.context.lock().meaningful_step_count() >= self.task.max_step_count {
                tracing::warn!(
                    budget = self.task.max_step_count,
                    "step budget exhausted without reaching the goal"
                );
                return Ok(ExecutionResult::Failed(self.context_snapshot()));
            }

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("cancellation observed between steps");
                    return Ok(ExecutionResult::Cancelled(self.context_snapshot()));
                }
                outcome = self.execute_step() => outcome,
            };

            match outcome {
                Ok(StepOutcome::GoalAchieved) => {
                    tracing::info!(scenario = %input.scenario_id, "goal achieved");
                    return Ok(ExecutionResult::Success);
                }
                Ok(StepOutcome::Failed) => {
                    return Ok(ExecutionResult::Failed(self.context_snapshot()));
                }
                Ok(StepOutcome::Continue) => {}
                Err(PilotError::Cancelled) => {
                    return Ok(ExecutionResult::Cancelled(self.context_snapshot()));
                }
                Err(e) => {
                    // Unclassified error at the top of the task loop.
                    self.reporter.on_error(&e);
                    self.context
                        .lock()
                        .add_step(Step::feedback(format!("unexpected error: {e}")));
                    return Ok(ExecutionResult::Failed(self.context_snapshot()));
                }
            }

            if let Some(on_step) = &self.on_step {
                on_step(self.context.lock().meaningful_step_count());
            }
            tokio::task::yield_now().await;
        }
    }
}

/// Base handler of the action-execution pipeline: performs one device
/// action. On focus-driven form factors a tap becomes focus navigation plus
/// a select press.
async fn execute_device_action(input: ActionExecutionInput) -> PilotResult<()> {
    use crate::agent::actions::{AgentAction, KeyCode};

    match (&input.action, input.form_factor) {
        (AgentAction::Tap { target }, FormFactor::Tv) => {
            focus::move_focus_to_element(&*input.device, target).await?;
            input
                .device
                .execute_actions(&[AgentAction::PressKey {
                    key: KeyCode::DpadCenter,
                }])
                .await
        }
        _ => input.device.execute_actions(&[input.action.clone()]).await,
    }
}
