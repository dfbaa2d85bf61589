// Orchestra Engine — Task scheduling & reviewer loop (spec.md §4.4 "Task
// scheduling")
//
// Single logical driver: tasks run serially even when dependencies would
// allow parallelism (spec.md §5 "determinism over throughput").

use log::warn;
use std::collections::HashSet;

use crate::atoms::constants::{MAX_PREFETCH_FILES, MAX_PREFETCH_FILE_BYTES, MAX_PREFETCH_TOTAL_BYTES, MAX_TASK_ATTEMPTS};
use crate::atoms::error::{OrchestraError, OrchestraResult};
use crate::atoms::traits::{HistoryStore, RagIndexer, SecretScrubber};
use crate::atoms::types::{AgentEvent, AgentEventType, Plan, ReviewResult, StepStatus, StepUpdate, Task};
use crate::engine::agent::{self, Agent, RunOptions};
use crate::engine::events::EventSinks;
use crate::engine::tools::{ToolContext, ToolSet};

use super::planning;

/// Drive every task in `plan` to completion, ticking `plan_markdown`'s
/// checkboxes (and re-persisting it) as each task finishes. Returns
/// `Err(Deadlock)` if a full scheduling pass makes no progress.
#[allow(clippy::too_many_arguments)]
pub async fn execute_plan(
    plan: &Plan,
    plan_markdown: &mut String,
    plan_relative_path: &str,
    planner_tools: Option<&ToolSet>,
    project_brief: &str,
    executor: &mut Agent,
    mut reviewer: Option<&mut Agent>,
    session_id: &str,
    tool_ctx: &ToolContext,
    history: &dyn HistoryStore,
    indexer: Option<&dyn RagIndexer>,
    scrubber: &dyn SecretScrubber,
    events: &EventSinks,
) -> OrchestraResult<()> {
    let mut completed: HashSet<String> = HashSet::new();
    let mut remaining: Vec<&Task> = plan.tasks.iter().collect();

    while !remaining.is_empty() {
        tool_ctx.check_cancelled()?;

        let ready: Vec<&Task> = remaining.iter().copied().filter(|t| t.depends_on.iter().all(|d| completed.contains(d))).collect();

        if ready.is_empty() {
            return Err(OrchestraError::Deadlock(format!(
                "no progress possible: {} task(s) remain with unresolved dependencies",
                remaining.len()
            )));
        }

        for task in ready {
            execute_task(task, project_brief, executor, reviewer.as_deref_mut(), session_id, tool_ctx, history, indexer, scrubber, events).await?;

            completed.insert(task.id.clone());
            *plan_markdown = planning::mark_task_done(plan_markdown, &task.id);
            planning::persist_markdown(planner_tools, tool_ctx, plan_relative_path, plan_markdown).await?;

            events
                .step(StepUpdate {
                    step_id: task.id.clone(),
                    status: StepStatus::Done,
                    message: format!("{} done", task.id),
                    plan_id: None,
                    plan_yaml: None,
                })
                .await;
        }

        remaining.retain(|t| !completed.contains(&t.id));
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn execute_task(
    task: &Task,
    project_brief: &str,
    executor: &mut Agent,
    mut reviewer: Option<&mut Agent>,
    session_id: &str,
    tool_ctx: &ToolContext,
    history: &dyn HistoryStore,
    indexer: Option<&dyn RagIndexer>,
    scrubber: &dyn SecretScrubber,
    events: &EventSinks,
) -> OrchestraResult<()> {
    events.agent(AgentEvent::new(AgentEventType::Running, Some(executor.role), format!("starting {}", task.id)));
    events
        .step(StepUpdate { step_id: task.id.clone(), status: StepStatus::Running, message: format!("{} running", task.id), plan_id: None, plan_yaml: None })
        .await;

    let self_review_note = reviewer.is_none();
    let mut prior_findings: Option<String> = None;

    for attempt in 1..=MAX_TASK_ATTEMPTS {
        tool_ctx.check_cancelled()?;

        let prompt = build_task_prompt(project_brief, task, tool_ctx, self_review_note, prior_findings.as_deref());

        let output = match agent::run(executor, &prompt, session_id, tool_ctx, history, indexer, scrubber, RunOptions::default()).await {
            Ok(text) => text,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                if attempt == MAX_TASK_ATTEMPTS {
                    mark_blocked(events, &task.id, &format!("executor failed: {e}")).await;
                    return Err(e);
                }
                warn!("[orchestrator] {} executor attempt {attempt} failed: {e}", task.id);
                continue;
            }
        };

        let Some(reviewer_agent) = reviewer.as_deref_mut() else {
            return Ok(());
        };

        events.agent(AgentEvent::new(AgentEventType::Reviewing, Some(reviewer_agent.role), task.id.clone()));

        let review_prompt = build_review_prompt(task, &output);
        let review_reply = agent::run(reviewer_agent, &review_prompt, session_id, tool_ctx, history, None, scrubber, RunOptions::default()).await?;

        match parse_review(&review_reply) {
            Some(result) if result.approved => return Ok(()),
            Some(result) => {
                prior_findings = Some(format_findings(&result));
            }
            None => {
                warn!("[orchestrator] {} reviewer reply did not parse as JSON; treating as rejection", task.id);
                prior_findings = Some(review_reply);
            }
        }

        if attempt == MAX_TASK_ATTEMPTS {
            mark_blocked(events, &task.id, &format!("rejected after {MAX_TASK_ATTEMPTS} attempts")).await;
            return Err(OrchestraError::tool("reviewer", format!("{} rejected after {MAX_TASK_ATTEMPTS} attempts", task.id)));
        }
    }

    Ok(())
}

async fn mark_blocked(events: &EventSinks, task_id: &str, reason: &str) {
    events
        .step(StepUpdate { step_id: task_id.to_string(), status: StepStatus::Blocked, message: format!("{task_id}: {reason}"), plan_id: None, plan_yaml: None })
        .await;
}

fn build_task_prompt(project_brief: &str, task: &Task, tool_ctx: &ToolContext, self_review_note: bool, prior_findings: Option<&str>) -> String {
    let mut out = format!("Project brief: {project_brief}\n\nTask {}: {}\n", task.id, task.description);

    if !task.files_to_modify.is_empty() {
        out.push_str(&format!("Files to modify: {}\n", task.files_to_modify.join(", ")));
    }
    if !task.files_to_create.is_empty() {
        out.push_str(&format!("Files to create: {}\n", task.files_to_create.join(", ")));
    }
    if self_review_note {
        out.push_str("\nNo Reviewer teammate is available for this run — self-review your change before finishing.\n");
    }
    if let Some(findings) = prior_findings {
        out.push_str(&format!("\nPrior review findings to address:\n{findings}\n"));
    }

    let prefetch = prefetch_referenced_files(tool_ctx, task);
    if !prefetch.is_empty() {
        out.push_str("\nExisting file contents:\n");
        out.push_str(&prefetch);
    }

    out
}

fn prefetch_referenced_files(tool_ctx: &ToolContext, task: &Task) -> String {
    let mut out = String::new();
    let mut total = 0usize;

    for path in task.files_to_modify.iter().chain(task.files_to_create.iter()).take(MAX_PREFETCH_FILES) {
        if total >= MAX_PREFETCH_TOTAL_BYTES {
            break;
        }
        let Ok(resolved) = crate::engine::tools::resolve_in_sandbox(&tool_ctx.working_dir, path) else { continue };
        let Ok(content) = std::fs::read_to_string(&resolved) else { continue };
        let snippet = crate::atoms::types::truncate_utf8(&content, MAX_PREFETCH_FILE_BYTES);
        if total + snippet.len() > MAX_PREFETCH_TOTAL_BYTES {
            break;
        }
        out.push_str(&format!("\n--- {path} ---\n{snippet}\n"));
        total += snippet.len();
    }

    out
}

fn build_review_prompt(task: &Task, executor_output: &str) -> String {
    format!(
        "Review the following work for task {} ({}).\n\
         Executor output:\n{executor_output}\n\n\
         Respond with only a JSON object: {{\"approved\": <bool>, \"findings\": [{{\"file\":\"...\",\"line\":<int>,\"severity\":\"critical|high|medium|low\",\"description\":\"...\"}}]}}",
        task.id, task.description
    )
}

/// Strict JSON parse only (spec.md §9 open question: "prefer a strict JSON
/// parse; do not invent new heuristics" for tolerating malformed review text).
fn parse_review(reply: &str) -> Option<ReviewResult> {
    serde_json::from_str(reply.trim()).ok()
}

fn format_findings(result: &ReviewResult) -> String {
    result.findings.iter().map(|f| format!("- [{:?}] {}:{} — {}", f.severity, f.file, f.line, f.description)).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_review_accepts_strict_json() {
        let result = parse_review(r#"{"approved": true, "findings": []}"#).unwrap();
        assert!(result.approved);
    }

    #[test]
    fn parse_review_rejects_non_json_prose() {
        assert!(parse_review("approved: true, looks good").is_none());
    }

    #[test]
    fn build_task_prompt_notes_self_review_when_no_reviewer() {
        let task = Task { id: "t1".into(), description: "add a function".into(), ..Default::default() };
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let prompt = build_task_prompt("build a widget", &task, &ctx, true, None);
        assert!(prompt.contains("self-review"));
    }
}
