//! The per-step state machine: capture, cache-key computation, stuck-screen
//! detection, decision, assertion gating, action execution.
use std::time::Duration;

use crate::agent::actions::{ActionKind, AgentAction};
use crate::agent::context::Step;
use crate::agent::engine::Agent;
use crate::ai::{DecisionInput, ImageAssertionInput};
use crate::cache::decision_cache_key;
use crate::device::Device;
use crate::errors::PilotResult;
use crate::interceptor::ActionExecutionInput;
use crate::mcp::{resolve_enabled_tools, McpTool, ToolExecutor, ToolSchemaDialect};
use crate::perception::compact::{format_tree, optimize_tree, CompactionOptions};
use crate::perception::screenshot::{
    encode_base64, reencode, screens_identical, stuck_screen_feedback,
};
use crate::scenario::model::FormFactor;

const SCREENSHOT_ATTEMPTS: u32 = 3;
const SCREENSHOT_RETRY_PAUSE: Duration = Duration::from_secs(1);
const HIERARCHY_ATTEMPTS: u32 = 3;

/// Terminal verdict of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    GoalAchieved,
    Failed,
    Continue,
}

impl Agent {
    pub(crate) async fn execute_step(&self) -> PilotResult<StepOutcome> {
        // Screenshot, with a bounded retry for transient capture failures.
        let png = match self.capture_screenshot_with_retry().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "screenshot missing after retries");
                self.context.lock().add_step(Step::new(Some(AgentAction::Failed {
                    reason: format!("screenshot capture failed: {e}"),
                })));
                return Ok(StepOutcome::Failed);
            }
        };
        let screenshot_bytes = reencode(&png, self.config.screenshot_format)?;
        let screenshot_path = self.save_screenshot(&screenshot_bytes).await?;

        // UI hierarchy, retried while the capture has no node within device
        // bounds.
        let (optimized, raw_len) = self.capture_optimized_tree().await?;
        let optimized_tree = format_tree(&optimized);
        let focused_tree = if self.task.form_factor == FormFactor::Tv {
            let snapshot = self.config.device.focused_hierarchy().await?;
            let focused = optimize_tree(
                &snapshot.root,
                &CompactionOptions::new(snapshot.device_bounds),
            );
            Some(format_tree(&focused))
        } else {
            None
        };
        tracing::debug!(
            tree_chars = optimized_tree.len(),
            raw_chars = raw_len,
            "hierarchy captured"
        );

        let formatted_context = self.context.lock().formatted_context();
        let cache_key = decision_cache_key(
            &self.config.build_version,
            &optimized_tree,
            &formatted_context,
        );

        // Stuck-screen check: identical pixels after the last action mean
        // the model needs feedback, not another decision.
        if let Some(previous_path) = self.previous_screenshot_without_feedback() {
            if let Ok(previous) = tokio::fs::read(&previous_path).await {
                if screens_identical(&previous, &screenshot_bytes)? {
                    tracing::info!("screen unchanged since last action, adding synthetic feedback");
                    self.context
                        .lock()
                        .add_step(Step::feedback(stuck_screen_feedback()));
                    return Ok(StepOutcome::Continue);
                }
            }
        }

        let tools = self.enumerate_tools().await?;
        let mut allowed_action_kinds = self.task.allowed_action_kinds.clone();
        if tools.is_empty() {
            allowed_action_kinds.retain(|k| *k != ActionKind::InvokeTool);
        }

        let step_number = self.context.lock().current_step_number();
        let decision = self
            .decision_pipeline
            .run(DecisionInput {
                goal: self.task.goal.clone(),
                step_number,
                max_step_count: self.task.max_step_count,
                formatted_context,
                optimized_tree,
                focused_tree,
                screenshot_base64: encode_base64(&screenshot_bytes),
                screenshot_path: screenshot_path.clone(),
                allowed_action_kinds,
                tools: tools.clone(),
                instructions: self.config.instructions.clone(),
                cache_key,
                cache_reads_disabled: self.task.cache_reads_disabled
                    || self.config.cache_reads_disabled,
            })
            .await?;

        // A goal-achieved claim only stands if every configured screenshot
        // assertion agrees.
        let mut steps = vec![decision.step.clone()];
        let mut goal_rejected = false;
        if decision.actions.iter().any(AgentAction::is_goal_achieved)
            && !self.task.image_assertions.is_empty()
        {
            let verdict = self
                .assertion_pipeline
                .run(ImageAssertionInput {
                    screenshot_path: screenshot_path.clone(),
                    assertions: self.task.image_assertions.clone(),
                    history: Vec::new(),
                })
                .await?;
            let failures: Vec<_> = verdict.results.iter().filter(|r| !r.passed).collect();
            if !failures.is_empty() {
                tracing::info!(failed = failures.len(), "goal claim rejected by assertions");
                goal_rejected = true;
                steps = failures
                    .iter()
                    .map(|r| {
                        Step::feedback(format!(
                            "The goal is not achieved yet. Assertion {:?} is unfulfilled \
                             ({}% fulfilled): {}",
                            r.prompt,
                            r.fulfillment_percent,
                            r.explanation.as_deref().unwrap_or("no explanation")
                        ))
                    })
                    .collect();
            }
        }

        {
            let mut context = self.context.lock();
            for step in &steps {
                context.add_step(step.clone());
                if let Err(e) = self.exchange_log.append(step) {
                    tracing::warn!(error = %e, "failed to append exchange log");
                }
            }
        }
        if goal_rejected {
            return Ok(StepOutcome::Continue);
        }

        match self.context.lock().last_step().and_then(|s| s.action.clone()) {
            Some(action) if action.is_goal_achieved() => return Ok(StepOutcome::GoalAchieved),
            Some(action) if action.is_failed() => return Ok(StepOutcome::Failed),
            _ => {}
        }

        self.perform_actions(&decision.actions, &tools).await?;
        Ok(StepOutcome::Continue)
    }

    /// Executes the decided actions. Automation failures are caught per
    /// action and turned into feedback steps; the loop keeps going.
    async fn perform_actions(
        &self,
        actions: &[AgentAction],
        tools: &[McpTool],
    ) -> PilotResult<()> {
        for action in actions.iter().filter(|a| !a.is_sentinel()) {
            match action {
                AgentAction::InvokeTool { name, arguments } => {
                    let feedback = self.invoke_tool(name, arguments.clone(), tools).await;
                    self.context.lock().add_step(Step::feedback(feedback));
                }
                _ => {
                    let result = self
                        .action_pipeline
                        .run(ActionExecutionInput {
                            device: self.config.device.clone(),
                            action: action.clone(),
                            form_factor: self.task.form_factor,
                        })
                        .await;
                    if let Err(e) = result {
                        tracing::warn!(error = %e, action = %action.describe(), "action failed");
                        self.context.lock().add_step(Step::feedback(format!(
                            "Could not {}: {e}",
                            action.describe()
                        )));
                    }
                }
            }
        }
        if let Err(e) = self.config.device.wait_for_settle().await {
            tracing::warn!(error = %e, "device did not settle after actions");
        }
        Ok(())
    }

    async fn invoke_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        tools: &[McpTool],
    ) -> String {
        let Some(executor) = &self.config.tools else {
            return format!("Tool {name} is unavailable: no tool executor configured");
        };
        let Some(tool) = tools.iter().find(|t| t.name == name) else {
            return format!("Tool {name} is unavailable or disabled");
        };
        match executor.invoke(tool, arguments).await {
            Ok(text) => format!("Tool {name} returned: {text}"),
            Err(e) => format!("Tool {name} failed: {e}"),
        }
    }

    async fn capture_screenshot_with_retry(&self) -> PilotResult<Vec<u8>> {
        let mut last_error = None;
        for attempt in 0..SCREENSHOT_ATTEMPTS {
            match self.config.device.screenshot().await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "screenshot capture failed");
                    last_error = Some(e);
                    if attempt + 1 < SCREENSHOT_ATTEMPTS {
                        tokio::time::sleep(SCREENSHOT_RETRY_PAUSE).await;
                    }
                }
            }
        }
        Err(last_error.expect("at least one attempt"))
    }

    /// Captures and compacts the hierarchy, retrying while nothing within
    /// device bounds survives compaction.
    async fn capture_optimized_tree(
        &self,
    ) -> PilotResult<(crate::perception::tree::UiNode, usize)> {
        let mut last = None;
        for attempt in 0..HIERARCHY_ATTEMPTS {
            let snapshot = self.config.device.capture_hierarchy().await?;
            let optimized = optimize_tree(
                &snapshot.root,
                &CompactionOptions::new(snapshot.device_bounds),
            );
            let raw_len = snapshot.raw.len();
            if !optimized.children.is_empty() || optimized.has_content() {
                return Ok((optimized, raw_len));
            }
            tracing::warn!(attempt, "no node within device bounds, recapturing");
            last = Some((optimized, raw_len));
            if attempt + 1 < HIERARCHY_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
        Ok(last.expect("at least one attempt"))
    }

    async fn enumerate_tools(&self) -> PilotResult<Vec<McpTool>> {
        let Some(executor) = &self.config.tools else {
            return Ok(Vec::new());
        };
        let tools = executor.list_tools(ToolSchemaDialect::default()).await?;
        Ok(resolve_enabled_tools(
            tools,
            &self.config.tool_defaults,
            &self.task.tool_overrides,
        ))
    }

    async fn save_screenshot(&self, bytes: &[u8]) -> PilotResult<String> {
        let step_number = self.context.lock().steps().len() + 1;
        let file = self.config.artifact_dir.join(format!(
            "step_{step_number}.{}",
            self.config.screenshot_format.extension()
        ));
        tokio::fs::create_dir_all(&self.config.artifact_dir).await?;
        tokio::fs::write(&file, bytes).await?;
        Ok(file.to_string_lossy().into_owned())
    }

    /// Path of the previous step's screenshot, but only when that step
    /// carried no feedback; feedback already tells the model what happened.
    fn previous_screenshot_without_feedback(&self) -> Option<String> {
        let context = self.context.lock();
        let last = context.last_step()?;
        if last.feedback.is_some() {
            return None;
        }
        last.screenshot_path.clone()
    }
}
