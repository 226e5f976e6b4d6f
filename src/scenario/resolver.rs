//! Scenario dependency resolution.
//!
//! A scenario's executable form is its ancestor chain plus itself, ordered
//! root-ancestor-first. Cyclic chains are rejected outright rather than
//! silently truncated.
use std::collections::HashSet;

use crate::agent::actions::ActionKind;
use crate::config::ProjectConfig;
use crate::errors::{PilotError, PilotResult};
use crate::scenario::model::{
    default_action_kinds, AgentTask, FormFactor, Scenario, ScenarioGraph,
};

/// Resolves `scenario_id` into its ordered task chain.
pub fn resolve_task_chain(
    graph: &ScenarioGraph,
    scenario_id: &str,
    project: &ProjectConfig,
) -> PilotResult<Vec<AgentTask>> {
    let target = graph
        .get(scenario_id)
        .ok_or_else(|| PilotError::Scenario(format!("unknown scenario '{scenario_id}'")))?;

    let mut visited = HashSet::new();
    let mut tasks = Vec::new();
    walk(graph, target, target, project, &mut visited, &mut tasks)?;
    Ok(tasks)
}

fn walk(
    graph: &ScenarioGraph,
    scenario: &Scenario,
    target: &Scenario,
    project: &ProjectConfig,
    visited: &mut HashSet<String>,
    tasks: &mut Vec<AgentTask>,
) -> PilotResult<()> {
    if !visited.insert(scenario.id.clone()) {
        return Err(PilotError::Scenario(format!(
            "cyclic dependency chain involving '{}'",
            scenario.id
        )));
    }
    if let Some(dep_id) = &scenario.depends_on {
        let dependency = graph.get(dep_id).ok_or_else(|| {
            PilotError::Scenario(format!(
                "scenario '{}' depends on unknown scenario '{dep_id}'",
                scenario.id
            ))
        })?;
        // Ancestors run first.
        walk(graph, dependency, target, project, visited, tasks)?;
    }
    tasks.push(build_task(scenario, target, project));
    Ok(())
}

fn build_task(scenario: &Scenario, target: &Scenario, project: &ProjectConfig) -> AgentTask {
    let form_factor = effective_form_factor(scenario, target, project);
    let mut allowed = default_action_kinds(form_factor);
    merge_kinds(&mut allowed, &project.additional_action_kinds);
    merge_kinds(&mut allowed, &scenario.additional_action_kinds);

    AgentTask {
        scenario_id: scenario.id.clone(),
        goal: scenario.goal.clone(),
        max_step_count: scenario.max_step_count.unwrap_or(project.max_step_count),
        form_factor,
        allowed_action_kinds: allowed,
        kind: scenario.kind,
        initial_commands: scenario.initial_commands.clone(),
        image_assertions: scenario.image_assertions.clone(),
        cache_reads_disabled: scenario.cache_reads_disabled,
        tool_overrides: scenario.tool_overrides.clone(),
    }
}

/// Explicit setting, then the target scenario's, then the project's, then
/// Mobile.
fn effective_form_factor(
    scenario: &Scenario,
    target: &Scenario,
    project: &ProjectConfig,
) -> FormFactor {
    [
        scenario.form_factor,
        target.form_factor,
        project.default_form_factor,
    ]
    .into_iter()
    .find(FormFactor::is_specified)
    .unwrap_or(FormFactor::Mobile)
}

fn merge_kinds(into: &mut Vec<ActionKind>, extra: &[ActionKind]) {
    for kind in extra {
        if !into.contains(kind) {
            into.push(*kind);
        }
    }
}
