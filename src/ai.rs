use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::actions::{ActionKind, AgentAction};
use crate::agent::context::Step;
use crate::errors::PilotResult;
use crate::mcp::McpTool;
use crate::scenario::model::Scenario;

/// Everything the model sees for one decision. `formatted_context` and
/// `optimized_tree` are exactly the strings hashed into the cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionInput {
    pub goal: String,
    pub step_number: usize,
    pub max_step_count: usize,
    pub formatted_context: String,
    pub optimized_tree: String,
    /// Compacted subtree under the focused node; present on TV form factors.
    pub focused_tree: Option<String>,
    pub screenshot_base64: String,
    pub screenshot_path: String,
    pub allowed_action_kinds: Vec<ActionKind>,
    pub tools: Vec<McpTool>,
    /// Extra instructions appended to the prompt, from project settings.
    pub instructions: Option<String>,
    pub cache_key: String,
    /// Scenario- or project-level switch that skips cache reads.
    pub cache_reads_disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOutput {
    pub actions: Vec<AgentAction>,
    pub step: Step,
}

/// One screenshot expectation attached to a scenario, checked whenever the
/// model claims the goal is achieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAssertion {
    pub prompt: String,
    /// Minimum fulfilment percentage to pass; defaults to 80.
    #[serde(default = "default_required_fulfillment")]
    pub required_fulfillment_percent: u8,
}

fn default_required_fulfillment() -> u8 {
    80
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAssertionInput {
    pub screenshot_path: String,
    pub assertions: Vec<ImageAssertion>,
    /// Results from earlier checks in this run, so the model sees what it
    /// already judged.
    pub history: Vec<ImageAssertionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAssertionResult {
    pub prompt: String,
    pub passed: bool,
    pub fulfillment_percent: u8,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAssertionOutput {
    pub results: Vec<ImageAssertionResult>,
}

impl ImageAssertionOutput {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioGenerationInput {
    pub prompt: String,
    /// Existing scenarios, so generated ones can depend on them.
    pub known_scenarios: Vec<Scenario>,
}

/// Capability boundary to the language model provider.
///
/// Implementations own prompt construction and response parsing; a response
/// the provider cannot map onto `AgentAction`s must surface as
/// `PilotError::AiResponseParse`.
#[async_trait]
pub trait Ai: Send + Sync {
    async fn decide_next_actions(&self, input: DecisionInput) -> PilotResult<DecisionOutput>;

    async fn assert_images(&self, input: ImageAssertionInput) -> PilotResult<ImageAssertionOutput>;

    /// Used by the external scenario-authoring flow, not by the engine.
    async fn generate_scenarios(
        &self,
        input: ScenarioGenerationInput,
    ) -> PilotResult<Vec<Scenario>>;
}
