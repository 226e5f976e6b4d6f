//! MCP-style tool execution boundary.
//!
//! Tools are listed and invoked through an external executor; the engine only
//! decides which tools are visible to the model, merging project-level
//! defaults with per-scenario overrides.
use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::PilotResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Schema dialect the executor should use when describing tool inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSchemaDialect {
    #[default]
    JsonSchema,
    FunctionCalling,
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn list_tools(&self, dialect: ToolSchemaDialect) -> PilotResult<Vec<McpTool>>;

    /// Invokes one tool and returns its textual result.
    async fn invoke(&self, tool: &McpTool, args: serde_json::Value) -> PilotResult<String>;
}

/// Filters the executor's tool list down to the enabled set.
///
/// Resolution order per tool: scenario override, then project default, then
/// enabled. Mirrors the scenario-over-project fallback used everywhere else
/// in the engine.
pub fn resolve_enabled_tools(
    tools: Vec<McpTool>,
    project_defaults: &HashMap<String, bool>,
    scenario_overrides: &HashMap<String, bool>,
) -> Vec<McpTool> {
    tools
        .into_iter()
        .filter(|tool| {
            scenario_overrides
                .get(&tool.name)
                .or_else(|| project_defaults.get(&tool.name))
                .copied()
                .unwrap_or(true)
        })
        .collect()
}
