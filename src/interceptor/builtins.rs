//! Built-in interceptors. Everything here is an ordinary chain link; none of
//! these behaviors are special-cased in the step machine or the agent loop.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::agent::actions::AgentAction;
use crate::agent::context::{ExecutionResult, Step};
use crate::ai::{
    DecisionInput, DecisionOutput, ImageAssertionInput, ImageAssertionOutput,
    ImageAssertionResult,
};
use crate::cache::{CachedDecision, DecisionCache};
use crate::device::Device;
use crate::errors::PilotResult;
use crate::interceptor::{ExecutionInput, InitializationInput, Interceptor, Next};
use crate::scenario::model::InitialCommand;

// ── Decision caching ────────────────────────────────────────────────────────

/// Replays cached decisions and records fresh ones.
///
/// On a hit the chain is short-circuited: the cached step is replayed with
/// the current screenshot path and a fresh timestamp. On a miss the decision
/// comes from the rest of the chain (ultimately the AI) and is stored, so
/// writes only ever follow a genuine AI call. Reads are skipped when the
/// scenario or project disables them.
pub struct DecisionCacheInterceptor {
    cache: Arc<dyn DecisionCache>,
}

impl DecisionCacheInterceptor {
    pub fn new(cache: Arc<dyn DecisionCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Interceptor<DecisionInput, DecisionOutput> for DecisionCacheInterceptor {
    async fn intercept(
        &self,
        input: DecisionInput,
        next: Next<'_, DecisionInput, DecisionOutput>,
    ) -> PilotResult<DecisionOutput> {
        let key = input.cache_key.clone();
        if !input.cache_reads_disabled {
            if let Some(cached) = self.cache.get(&key).await? {
                tracing::info!(key = %key, "decision cache hit, replaying");
                let mut step = cached.step.clone();
                step.screenshot_path = Some(input.screenshot_path.clone());
                step.timestamp = Utc::now();
                step.cache_key = Some(key);
                step.cache_hit = true;
                return Ok(DecisionOutput {
                    actions: cached.actions,
                    step,
                });
            }
        }

        let mut output = next.proceed(input).await?;
        output.step.cache_key = Some(key.clone());
        self.cache
            .set(
                &key,
                CachedDecision {
                    actions: output.actions.clone(),
                    step: output.step.clone(),
                },
            )
            .await?;
        tracing::debug!(key = %key, "decision cached");
        Ok(output)
    }
}

// ── Assertion history ───────────────────────────────────────────────────────

/// Feeds earlier assertion verdicts from this run back into every
/// image-assertion request and accumulates the new ones.
#[derive(Default)]
pub struct AssertionHistoryInterceptor {
    history: Mutex<Vec<ImageAssertionResult>>,
}

impl AssertionHistoryInterceptor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Interceptor<ImageAssertionInput, ImageAssertionOutput> for AssertionHistoryInterceptor {
    async fn intercept(
        &self,
        mut input: ImageAssertionInput,
        next: Next<'_, ImageAssertionInput, ImageAssertionOutput>,
    ) -> PilotResult<ImageAssertionOutput> {
        input.history = self.history.lock().clone();
        let output = next.proceed(input).await?;
        self.history.lock().extend(output.results.iter().cloned());
        Ok(output)
    }
}

// ── Declarative initialization ──────────────────────────────────────────────

/// Runs a scenario's declarative initialization commands against the device
/// before handing off to the rest of the initialization chain.
pub struct InitialCommandsInterceptor {
    commands: Vec<InitialCommand>,
}

impl InitialCommandsInterceptor {
    pub fn new(commands: Vec<InitialCommand>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl Interceptor<InitializationInput, ()> for InitialCommandsInterceptor {
    async fn intercept(
        &self,
        input: InitializationInput,
        next: Next<'_, InitializationInput, ()>,
    ) -> PilotResult<()> {
        for command in &self.commands {
            tracing::debug!(?command, scenario = %input.scenario_id, "running initial command");
            let actions: Vec<AgentAction> = match command {
                InitialCommand::PressBack { times } => {
                    (0..*times).map(|_| AgentAction::Back).collect()
                }
                InitialCommand::Wait { milliseconds } => vec![AgentAction::Wait {
                    milliseconds: *milliseconds,
                }],
                InitialCommand::LaunchApp { package } => vec![AgentAction::LaunchApp {
                    package: package.clone(),
                }],
                InitialCommand::ClearAppData { package } => vec![AgentAction::ClearAppData {
                    package: package.clone(),
                }],
                InitialCommand::OpenLink { url } => vec![AgentAction::OpenLink {
                    url: url.clone(),
                }],
                InitialCommand::ReplayScript { name } => vec![AgentAction::ReplayScript {
                    name: name.clone(),
                }],
            };
            input.device.execute_actions(&actions).await?;
        }
        if !self.commands.is_empty() {
            input.device.wait_for_settle().await?;
        }
        next.proceed(input).await
    }
}

// ── Initialization-only scenarios ───────────────────────────────────────────

/// Decision interceptor for scenarios that only exercise their
/// initialization commands: every decision is "goal achieved" and the AI is
/// never consulted.
pub struct AutoAchieveInterceptor;

#[async_trait]
impl Interceptor<DecisionInput, DecisionOutput> for AutoAchieveInterceptor {
    async fn intercept(
        &self,
        input: DecisionInput,
        _next: Next<'_, DecisionInput, DecisionOutput>,
    ) -> PilotResult<DecisionOutput> {
        let action = AgentAction::GoalAchieved {
            summary: Some("initialization-only scenario".into()),
        };
        let step = Step::new(Some(action.clone()))
            .with_screenshot(input.screenshot_path.clone())
            .with_cache_key(input.cache_key.clone());
        Ok(DecisionOutput {
            actions: vec![action],
            step,
        })
    }
}

// ── Cache invalidation on failed runs ───────────────────────────────────────

/// Whole-execution interceptor that removes every cache entry a run recorded
/// when the run ends `Failed` or `Cancelled`, so aborted runs never poison
/// later lookups.
pub struct CacheEvictionInterceptor {
    cache: Arc<dyn DecisionCache>,
}

impl CacheEvictionInterceptor {
    pub fn new(cache: Arc<dyn DecisionCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Interceptor<ExecutionInput, ExecutionResult> for CacheEvictionInterceptor {
    async fn intercept(
        &self,
        input: ExecutionInput,
        next: Next<'_, ExecutionInput, ExecutionResult>,
    ) -> PilotResult<ExecutionResult> {
        let scenario_id = input.scenario_id.clone();
        let result = next.proceed(input).await?;
        if let ExecutionResult::Failed(context) | ExecutionResult::Cancelled(context) = &result {
            let keys = context.cache_keys();
            tracing::info!(
                scenario = %scenario_id,
                entries = keys.len(),
                "run did not succeed, evicting its cache entries"
            );
            for key in keys {
                self.cache.remove(&key).await?;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryCache;
    use crate::interceptor::{BaseFn, Pipeline};

    fn decision_input(key: &str, disabled: bool) -> DecisionInput {
        DecisionInput {
            goal: "g".into(),
            step_number: 1,
            max_step_count: 10,
            formatted_context: "ctx".into(),
            optimized_tree: "tree".into(),
            focused_tree: None,
            screenshot_base64: String::new(),
            screenshot_path: "/tmp/shot_1.png".into(),
            allowed_action_kinds: Vec::new(),
            tools: Vec::new(),
            instructions: None,
            cache_key: key.into(),
            cache_reads_disabled: disabled,
        }
    }

    fn ai_base(counter: Arc<Mutex<u32>>) -> Box<BaseFn<DecisionInput, DecisionOutput>> {
        Box::new(move |input: DecisionInput| {
            let counter = counter.clone();
            Box::pin(async move {
                *counter.lock() += 1;
                let action = AgentAction::Back;
                Ok(DecisionOutput {
                    actions: vec![action.clone()],
                    step: Step::new(Some(action))
                        .with_screenshot(input.screenshot_path)
                        .with_cache_key(input.cache_key),
                })
            })
        })
    }

    #[tokio::test]
    async fn second_identical_decision_is_served_from_cache() {
        let cache = Arc::new(MemoryCache::default());
        let calls = Arc::new(Mutex::new(0));
        let pipeline = Pipeline::new(
            vec![Arc::new(DecisionCacheInterceptor::new(cache)) as _],
            ai_base(calls.clone()),
        );

        let first = pipeline.run(decision_input("k", false)).await.unwrap();
        assert!(!first.step.cache_hit);

        let mut second_input = decision_input("k", false);
        second_input.screenshot_path = "/tmp/shot_2.png".into();
        let second = pipeline.run(second_input).await.unwrap();
        assert!(second.step.cache_hit);
        assert_eq!(second.actions, first.actions);
        assert_eq!(second.step.screenshot_path.as_deref(), Some("/tmp/shot_2.png"));
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn disabled_reads_always_reach_the_ai() {
        let cache = Arc::new(MemoryCache::default());
        let calls = Arc::new(Mutex::new(0));
        let pipeline = Pipeline::new(
            vec![Arc::new(DecisionCacheInterceptor::new(cache)) as _],
            ai_base(calls.clone()),
        );
        pipeline.run(decision_input("k", true)).await.unwrap();
        pipeline.run(decision_input("k", true)).await.unwrap();
        assert_eq!(*calls.lock(), 2);
    }

    #[tokio::test]
    async fn auto_achieve_short_circuits_the_ai() {
        let calls = Arc::new(Mutex::new(0));
        let pipeline = Pipeline::new(
            vec![Arc::new(AutoAchieveInterceptor) as _],
            ai_base(calls.clone()),
        );
        let out = pipeline.run(decision_input("k", false)).await.unwrap();
        assert!(out.actions[0].is_goal_achieved());
        assert_eq!(*calls.lock(), 0);
    }

    #[tokio::test]
    async fn assertion_history_accumulates() {
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_in_base = seen.clone();
        let base: Box<BaseFn<ImageAssertionInput, ImageAssertionOutput>> =
            Box::new(move |input: ImageAssertionInput| {
                let seen = seen_in_base.clone();
                Box::pin(async move {
                    seen.lock().push(input.history.len());
                    Ok(ImageAssertionOutput {
                        results: vec![ImageAssertionResult {
                            prompt: "p".into(),
                            passed: true,
                            fulfillment_percent: 100,
                            explanation: None,
                        }],
                    })
                })
            });
        let pipeline = Pipeline::new(
            vec![Arc::new(AssertionHistoryInterceptor::new()) as _],
            base,
        );
        let input = ImageAssertionInput {
            screenshot_path: "/tmp/a.png".into(),
            assertions: Vec::new(),
            history: Vec::new(),
        };
        pipeline.run(input.clone()).await.unwrap();
        pipeline.run(input).await.unwrap();
        assert_eq!(*seen.lock(), vec![0, 1]);
    }
}
