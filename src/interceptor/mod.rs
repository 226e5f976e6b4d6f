pub mod builtins;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::agent::actions::AgentAction;
use crate::agent::context::ExecutionResult;
use crate::ai::{DecisionInput, DecisionOutput, ImageAssertionInput, ImageAssertionOutput};
use crate::device::Device;
use crate::errors::PilotResult;
use crate::scenario::model::FormFactor;

/// Base handler at the end of a pipeline: the default behavior ("call the
/// AI", "run the device action") that interceptors wrap.
pub type BaseFn<I, O> = dyn Fn(I) -> BoxFuture<'static, PilotResult<O>> + Send + Sync;

/// One link of a middleware chain. An interceptor may rewrite the input,
/// short-circuit without calling `next.proceed`, call it more than once, or
/// rewrite the output on the way back out.
#[async_trait]
pub trait Interceptor<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn intercept(&self, input: I, next: Next<'_, I, O>) -> PilotResult<O>;
}

/// Continuation handed to an interceptor: the not-yet-run remainder of the
/// chain plus the base handler.
pub struct Next<'a, I, O> {
    rest: &'a [Arc<dyn Interceptor<I, O>>],
    base: &'a BaseFn<I, O>,
}

impl<'a, I, O> Next<'a, I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub async fn proceed(&self, input: I) -> PilotResult<O> {
        // Later-registered interceptors sit at the end of the list and run
        // outermost; peeling from the back preserves that contract.
        match self.rest.split_last() {
            Some((outer, rest)) => {
                outer
                    .intercept(
                        input,
                        Next {
                            rest,
                            base: self.base,
                        },
                    )
                    .await
            }
            None => (self.base)(input).await,
        }
    }
}

/// A fully built chain for one intercept point, constructed once per agent
/// configuration.
pub struct Pipeline<I, O> {
    interceptors: Vec<Arc<dyn Interceptor<I, O>>>,
    base: Box<BaseFn<I, O>>,
}

impl<I, O> Pipeline<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn new(interceptors: Vec<Arc<dyn Interceptor<I, O>>>, base: Box<BaseFn<I, O>>) -> Self {
        Self { interceptors, base }
    }

    pub async fn run(&self, input: I) -> PilotResult<O> {
        Next {
            rest: &self.interceptors,
            base: &*self.base,
        }
        .proceed(input)
        .await
    }
}

// ── Intercept point I/O types ───────────────────────────────────────────────

/// Input to the task-initialization point.
#[derive(Clone)]
pub struct InitializationInput {
    pub device: Arc<dyn Device>,
    pub scenario_id: String,
}

/// Input to the action-execution point; one device action per invocation so
/// failures are caught per action.
#[derive(Clone)]
pub struct ActionExecutionInput {
    pub device: Arc<dyn Device>,
    pub action: AgentAction,
    pub form_factor: FormFactor,
}

/// Input to the whole-task-execution point.
#[derive(Clone, Debug)]
pub struct ExecutionInput {
    pub scenario_id: String,
    pub goal: String,
}

pub type InitializationInterceptor = Arc<dyn Interceptor<InitializationInput, ()>>;
pub type DecisionInterceptor = Arc<dyn Interceptor<DecisionInput, DecisionOutput>>;
pub type ImageAssertionInterceptor =
    Arc<dyn Interceptor<ImageAssertionInput, ImageAssertionOutput>>;
pub type ActionExecutionInterceptor = Arc<dyn Interceptor<ActionExecutionInput, ()>>;
pub type ExecutionInterceptor = Arc<dyn Interceptor<ExecutionInput, ExecutionResult>>;

/// Registered interceptors for every intercept point. Registration order is
/// significant: later additions wrap earlier ones.
#[derive(Clone, Default)]
pub struct InterceptorSet {
    pub initialization: Vec<InitializationInterceptor>,
    pub decision: Vec<DecisionInterceptor>,
    pub image_assertion: Vec<ImageAssertionInterceptor>,
    pub action_execution: Vec<ActionExecutionInterceptor>,
    pub execution: Vec<ExecutionInterceptor>,
}

impl InterceptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initialization(mut self, interceptor: InitializationInterceptor) -> Self {
        self.initialization.push(interceptor);
        self
    }

    pub fn with_decision(mut self, interceptor: DecisionInterceptor) -> Self {
        self.decision.push(interceptor);
        self
    }

    pub fn with_image_assertion(mut self, interceptor: ImageAssertionInterceptor) -> Self {
        self.image_assertion.push(interceptor);
        self
    }

    pub fn with_action_execution(mut self, interceptor: ActionExecutionInterceptor) -> Self {
        self.action_execution.push(interceptor);
        self
    }

    pub fn with_execution(mut self, interceptor: ExecutionInterceptor) -> Self {
        self.execution.push(interceptor);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        short_circuit: bool,
        proceed_times: usize,
    }

    impl Recorder {
        fn new(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                log,
                short_circuit: false,
                proceed_times: 1,
            }
        }
    }

    #[async_trait]
    impl Interceptor<String, String> for Recorder {
        async fn intercept(
            &self,
            input: String,
            next: Next<'_, String, String>,
        ) -> PilotResult<String> {
            self.log.lock().push(format!("{}:pre", self.name));
            if self.short_circuit {
                return Ok(format!("{}-short", self.name));
            }
            let mut out = String::new();
            for _ in 0..self.proceed_times {
                out = next.proceed(input.clone()).await?;
            }
            self.log.lock().push(format!("{}:post", self.name));
            Ok(out)
        }
    }

    fn base(log: Arc<Mutex<Vec<String>>>) -> Box<BaseFn<String, String>> {
        Box::new(move |input: String| {
            let log = log.clone();
            Box::pin(async move {
                log.lock().push("base".to_string());
                Ok(format!("base({input})"))
            })
        })
    }

    #[tokio::test]
    async fn later_registered_interceptor_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(
            vec![
                Arc::new(Recorder::new("x", log.clone())) as Arc<dyn Interceptor<_, _>>,
                Arc::new(Recorder::new("y", log.clone())),
            ],
            base(log.clone()),
        );
        let out = pipeline.run("in".to_string()).await.unwrap();
        assert_eq!(out, "base(in)");
        assert_eq!(
            *log.lock(),
            vec!["y:pre", "x:pre", "base", "x:post", "y:post"]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_inner_chain_and_base() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut y = Recorder::new("y", log.clone());
        y.short_circuit = true;
        let pipeline = Pipeline::new(
            vec![
                Arc::new(Recorder::new("x", log.clone())) as Arc<dyn Interceptor<_, _>>,
                Arc::new(y),
            ],
            base(log.clone()),
        );
        let out = pipeline.run("in".to_string()).await.unwrap();
        assert_eq!(out, "y-short");
        assert_eq!(*log.lock(), vec!["y:pre"]);
    }

    #[tokio::test]
    async fn proceed_may_run_more_than_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut y = Recorder::new("y", log.clone());
        y.proceed_times = 2;
        let pipeline = Pipeline::new(
            vec![Arc::new(y) as Arc<dyn Interceptor<_, _>>],
            base(log.clone()),
        );
        pipeline.run("in".to_string()).await.unwrap();
        assert_eq!(
            log.lock().iter().filter(|l| *l == "base").count(),
            2
        );
    }

    #[tokio::test]
    async fn empty_pipeline_is_just_the_base() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline: Pipeline<String, String> = Pipeline::new(Vec::new(), base(log.clone()));
        let out = pipeline.run("solo".to_string()).await.unwrap();
        assert_eq!(out, "base(solo)");
    }
}
