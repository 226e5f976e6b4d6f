use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::actions::ActionKind;
use crate::ai::{Ai, ImageAssertion};
use crate::cache::DecisionCache;
use crate::device::Device;
use crate::interceptor::InterceptorSet;
use crate::mcp::ToolExecutor;
use crate::perception::screenshot::ScreenshotFormat;

/// Target device class. Affects the default action set and the navigation
/// model (pointer vs. D-pad focus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormFactor {
    #[default]
    Unspecified,
    Mobile,
    Tv,
    Web,
}

impl FormFactor {
    pub fn is_specified(&self) -> bool {
        !matches!(self, FormFactor::Unspecified)
    }
}

/// How a scenario's steps are decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// The model picks actions step by step.
    #[default]
    AiDriven,
    /// Only the initialization commands run; the goal is then declared
    /// achieved without consulting the model.
    InitializationOnly,
}

/// Declarative setup executed before the step loop starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitialCommand {
    PressBack { times: u32 },
    Wait { milliseconds: u64 },
    LaunchApp { package: String },
    ClearAppData { package: String },
    OpenLink { url: String },
    ReplayScript { name: String },
}

/// One node of the declarative scenario graph. A scenario names at most one
/// dependency, forming a chain back to a root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub depends_on: Option<String>,
    /// Falls back to the project default when absent.
    #[serde(default)]
    pub max_retry: Option<u32>,
    /// Falls back to the project default when absent.
    #[serde(default)]
    pub max_step_count: Option<usize>,
    #[serde(default)]
    pub form_factor: FormFactor,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub kind: ScenarioKind,
    #[serde(default)]
    pub initial_commands: Vec<InitialCommand>,
    #[serde(default)]
    pub image_assertions: Vec<ImageAssertion>,
    #[serde(default)]
    pub additional_action_kinds: Vec<ActionKind>,
    /// Scenario-level switch that skips decision-cache reads.
    #[serde(default)]
    pub cache_reads_disabled: bool,
    #[serde(default)]
    pub tool_overrides: HashMap<String, bool>,
}

impl Scenario {
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            depends_on: None,
            max_retry: None,
            max_step_count: None,
            form_factor: FormFactor::Unspecified,
            tags: BTreeSet::new(),
            kind: ScenarioKind::AiDriven,
            initial_commands: Vec::new(),
            image_assertions: Vec::new(),
            additional_action_kinds: Vec::new(),
            cache_reads_disabled: false,
            tool_overrides: HashMap::new(),
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on = Some(id.into());
        self
    }
}

/// The whole declarative graph, as loaded from a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioGraph {
    pub scenarios: Vec<Scenario>,
}

impl ScenarioGraph {
    pub fn new(scenarios: Vec<Scenario>) -> Self {
        Self { scenarios }
    }

    pub fn get(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    /// A leaf is a scenario no other scenario depends on. A "run all" sweep
    /// executes exactly the leaves.
    pub fn is_leaf(&self, id: &str) -> bool {
        !self
            .scenarios
            .iter()
            .any(|s| s.depends_on.as_deref() == Some(id))
    }

    pub fn leaves(&self) -> Vec<&Scenario> {
        self.scenarios
            .iter()
            .filter(|s| self.is_leaf(&s.id))
            .collect()
    }
}

/// One resolved, executable unit of a scenario chain: the scenario itself or
/// one of its ancestors, with every project-level fallback already applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub scenario_id: String,
    pub goal: String,
    pub max_step_count: usize,
    /// Effective form factor, never `Unspecified`.
    pub form_factor: FormFactor,
    pub allowed_action_kinds: Vec<ActionKind>,
    pub kind: ScenarioKind,
    pub initial_commands: Vec<InitialCommand>,
    pub image_assertions: Vec<ImageAssertion>,
    pub cache_reads_disabled: bool,
    pub tool_overrides: HashMap<String, bool>,
}

/// Action set available before any scenario- or project-level additions.
pub fn default_action_kinds(form_factor: FormFactor) -> Vec<ActionKind> {
    let mut kinds = match form_factor {
        FormFactor::Tv => vec![
            ActionKind::Tap,
            ActionKind::InputText,
            ActionKind::PressKey,
            ActionKind::Wait,
        ],
        FormFactor::Web => vec![
            ActionKind::Tap,
            ActionKind::InputText,
            ActionKind::Scroll,
            ActionKind::Wait,
        ],
        FormFactor::Mobile | FormFactor::Unspecified => vec![
            ActionKind::Tap,
            ActionKind::InputText,
            ActionKind::Scroll,
            ActionKind::Back,
            ActionKind::Wait,
        ],
    };
    kinds.push(ActionKind::InvokeTool);
    kinds.push(ActionKind::GoalAchieved);
    kinds.push(ActionKind::Failed);
    kinds
}

/// Immutable per-attempt wiring for the agents of one scenario run: the
/// interceptor set, the capability handles, prompt extras, and options.
#[derive(Clone)]
pub struct AgentConfig {
    pub interceptors: InterceptorSet,
    pub device: Arc<dyn Device>,
    pub ai: Arc<dyn Ai>,
    pub cache: Arc<dyn DecisionCache>,
    pub tools: Option<Arc<dyn ToolExecutor>>,
    /// Extra prompt instructions from project settings.
    pub instructions: Option<String>,
    pub build_version: String,
    pub screenshot_format: ScreenshotFormat,
    pub artifact_dir: PathBuf,
    /// Project-level switch that skips decision-cache reads.
    pub cache_reads_disabled: bool,
    pub tool_defaults: HashMap<String, bool>,
}
