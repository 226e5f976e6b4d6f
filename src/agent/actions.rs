use serde::{Deserialize, Serialize};

use crate::perception::element::ElementIdentifier;

/// One action the model can choose for a step. `GoalAchieved` and `Failed`
/// are sentinels that terminate the task loop instead of touching the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    Tap { target: ElementIdentifier },
    InputText { text: String },
    PressKey { key: KeyCode },
    Scroll { direction: ScrollDirection },
    Back,
    Wait { milliseconds: u64 },
    LaunchApp { package: String },
    ClearAppData { package: String },
    OpenLink { url: String },
    ReplayScript { name: String },
    InvokeTool { name: String, arguments: serde_json::Value },
    GoalAchieved { summary: Option<String> },
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyCode {
    DpadUp,
    DpadDown,
    DpadLeft,
    DpadRight,
    DpadCenter,
    Back,
    Home,
    Enter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Gate set for which action variants a scenario allows the model to pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Tap,
    InputText,
    PressKey,
    Scroll,
    Back,
    Wait,
    LaunchApp,
    ClearAppData,
    OpenLink,
    ReplayScript,
    InvokeTool,
    GoalAchieved,
    Failed,
}

impl AgentAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            AgentAction::Tap { .. } => ActionKind::Tap,
            AgentAction::InputText { .. } => ActionKind::InputText,
            AgentAction::PressKey { .. } => ActionKind::PressKey,
            AgentAction::Scroll { .. } => ActionKind::Scroll,
            AgentAction::Back => ActionKind::Back,
            AgentAction::Wait { .. } => ActionKind::Wait,
            AgentAction::LaunchApp { .. } => ActionKind::LaunchApp,
            AgentAction::ClearAppData { .. } => ActionKind::ClearAppData,
            AgentAction::OpenLink { .. } => ActionKind::OpenLink,
            AgentAction::ReplayScript { .. } => ActionKind::ReplayScript,
            AgentAction::InvokeTool { .. } => ActionKind::InvokeTool,
            AgentAction::GoalAchieved { .. } => ActionKind::GoalAchieved,
            AgentAction::Failed { .. } => ActionKind::Failed,
        }
    }

    pub fn is_goal_achieved(&self) -> bool {
        matches!(self, AgentAction::GoalAchieved { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AgentAction::Failed { .. })
    }

    /// Sentinels end the loop without being executed on the device.
    pub fn is_sentinel(&self) -> bool {
        self.is_goal_achieved() || self.is_failed()
    }

    /// Short description used in feedback steps and logs.
    pub fn describe(&self) -> String {
        match self {
            AgentAction::Tap { target } => format!("tap {}#{}", target.fingerprint, target.occurrence),
            AgentAction::InputText { text } => format!("input text {text:?}"),
            AgentAction::PressKey { key } => format!("press key {key:?}"),
            AgentAction::Scroll { direction } => format!("scroll {direction:?}"),
            AgentAction::Back => "press back".to_string(),
            AgentAction::Wait { milliseconds } => format!("wait {milliseconds}ms"),
            AgentAction::LaunchApp { package } => format!("launch app {package}"),
            AgentAction::ClearAppData { package } => format!("clear app data {package}"),
            AgentAction::OpenLink { url } => format!("open link {url}"),
            AgentAction::ReplayScript { name } => format!("replay script {name}"),
            AgentAction::InvokeTool { name, .. } => format!("invoke tool {name}"),
            AgentAction::GoalAchieved { .. } => "goal achieved".to_string(),
            AgentAction::Failed { reason } => format!("failed: {reason}"),
        }
    }
}
