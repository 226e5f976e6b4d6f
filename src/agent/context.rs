use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::actions::AgentAction;
use crate::errors::PilotResult;

/// One recorded perceive-decide-(assert)-act cycle. Never mutated once
/// appended to the context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub action: Option<AgentAction>,
    /// Feedback text shown to the model on the next decision (human-written
    /// or synthetic, e.g. the stuck-screen notice).
    pub feedback: Option<String>,
    pub screenshot_path: Option<String>,
    pub ai_request: Option<String>,
    pub ai_response: Option<String>,
    pub cache_key: Option<String>,
    pub cache_hit: bool,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub fn new(action: Option<AgentAction>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            action,
            feedback: None,
            screenshot_path: None,
            ai_request: None,
            ai_response: None,
            cache_key: None,
            cache_hit: false,
            timestamp: Utc::now(),
        }
    }

    pub fn feedback(text: impl Into<String>) -> Self {
        let mut step = Self::new(None);
        step.feedback = Some(text.into());
        step
    }

    pub fn with_screenshot(mut self, path: impl Into<String>) -> Self {
        self.screenshot_path = Some(path.into());
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// A step counts toward the model-visible step number unless it carries
    /// no action or records an explicit failure.
    pub fn is_meaningful(&self) -> bool {
        match &self.action {
            None => false,
            Some(action) => !action.is_failed(),
        }
    }
}

/// Append-only step history for one task execution.
#[derive(Debug, Clone)]
pub struct ContextHolder {
    scenario_id: String,
    goal: String,
    max_step_count: usize,
    started_at: DateTime<Utc>,
    steps: Vec<Step>,
}

impl ContextHolder {
    pub fn new(scenario_id: impl Into<String>, goal: impl Into<String>, max_step_count: usize) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            goal: goal.into(),
            max_step_count,
            started_at: Utc::now(),
            steps: Vec::new(),
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn max_step_count(&self) -> usize {
        self.max_step_count
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn meaningful_step_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_meaningful()).count()
    }

    /// Step number presented to the model for the upcoming decision.
    pub fn current_step_number(&self) -> usize {
        self.meaningful_step_count() + 1
    }

    pub fn cache_keys(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.cache_key.clone())
            .collect()
    }

    /// Deterministic conversation rendering used both as model input and as
    /// the context component of the cache key. Must not contain volatile
    /// data (timestamps, paths), or equal decision points would stop
    /// hashing equal.
    pub fn formatted_context(&self) -> String {
        let mut out = format!("goal: {}\n", self.goal);
        for step in &self.steps {
            if let Some(action) = &step.action {
                out.push_str(&format!(
                    "action: {}\n",
                    serde_json::to_string(action).unwrap_or_default()
                ));
            }
            if let Some(feedback) = &step.feedback {
                out.push_str(&format!("feedback: {feedback}\n"));
            }
        }
        out
    }

    pub fn snapshot(&self) -> TaskContext {
        TaskContext {
            scenario_id: self.scenario_id.clone(),
            goal: self.goal.clone(),
            max_step_count: self.max_step_count,
            started_at: self.started_at,
            steps: self.steps.clone(),
        }
    }
}

/// Immutable snapshot of a task execution, carried by terminal results and
/// reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub scenario_id: String,
    pub goal: String,
    pub max_step_count: usize,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<Step>,
}

impl TaskContext {
    pub fn goal_achieved(&self) -> bool {
        self.steps
            .last()
            .and_then(|s| s.action.as_ref())
            .map(|a| a.is_goal_achieved())
            .unwrap_or(false)
    }

    pub fn cache_keys(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.cache_key.clone())
            .collect()
    }
}

/// Terminal outcome of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success,
    Failed(TaskContext),
    Cancelled(TaskContext),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success)
    }
}

/// Append-only JSONL log of raw AI exchanges for one task run.
pub struct ExchangeLog {
    file_path: PathBuf,
}

#[derive(Serialize)]
struct ExchangeEntry<'a> {
    ts: i64,
    step_id: &'a str,
    cache_key: Option<&'a str>,
    cache_hit: bool,
    request: Option<&'a str>,
    response: Option<&'a str>,
}

impl ExchangeLog {
    pub fn new(dir: &Path, run_id: &str) -> Self {
        Self {
            file_path: dir.join(format!("exchanges_{run_id}.jsonl")),
        }
    }

    /// Appends one step's exchange to the JSONL file.
    pub fn append(&self, step: &Step) -> PilotResult<()> {
        let entry = ExchangeEntry {
            ts: step.timestamp.timestamp_millis(),
            step_id: &step.id,
            cache_key: step.cache_key.as_deref(),
            cache_hit: step.cache_hit,
            request: step.ai_request.as_deref(),
            response: step.ai_response.as_deref(),
        };
        let line = serde_json::to_string(&entry)?;
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meaningful_count_skips_feedback_and_failure_steps() {
        let mut ctx = ContextHolder::new("s1", "do a thing", 10);
        ctx.add_step(Step::new(Some(AgentAction::Back)));
        ctx.add_step(Step::feedback("screen did not change"));
        ctx.add_step(Step::new(Some(AgentAction::Failed {
            reason: "lost".into(),
        })));
        assert_eq!(ctx.meaningful_step_count(), 1);
        assert_eq!(ctx.current_step_number(), 2);
    }

    #[test]
    fn formatted_context_is_stable_across_volatile_fields() {
        let mut a = ContextHolder::new("s1", "goal", 10);
        let mut b = ContextHolder::new("s1", "goal", 10);
        let step_a = Step::new(Some(AgentAction::Back)).with_screenshot("/tmp/a.png");
        let step_b = Step::new(Some(AgentAction::Back)).with_screenshot("/other/b.png");
        a.add_step(step_a);
        b.add_step(step_b);
        assert_eq!(a.formatted_context(), b.formatted_context());
    }

    #[test]
    fn exchange_log_appends_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = ExchangeLog::new(dir.path(), "run1");
        let mut step = Step::new(Some(AgentAction::Back));
        step.ai_request = Some("req".into());
        step.ai_response = Some("res".into());
        log.append(&step).unwrap();
        log.append(&step).unwrap();
        let content =
            std::fs::read_to_string(dir.path().join("exchanges_run1.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("\"request\":\"req\""));
    }
}
