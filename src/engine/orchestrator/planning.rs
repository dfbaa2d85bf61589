// Orchestra Engine — Plan construction & persistence (spec.md §4.4, §6)
//
// Named `planning` rather than `plan` to keep this module distinct from
// `engine::tools::plan`'s `write_plan_md` tool definition.

use log::warn;
use regex::Regex;
use std::sync::LazyLock;

use crate::atoms::constants::{MAX_PLAN_ATTEMPTS, PLAN_DIR, PLAN_TITLE_MAX_CHARS};
use crate::atoms::error::OrchestraResult;
use crate::atoms::traits::{HistoryStore, SecretScrubber};
use crate::atoms::types::{truncate_utf8, Plan, Task};
use crate::engine::agent::{Agent, RunOptions};
use crate::engine::tools::{Tool, ToolContext, ToolSet};

static UNSAFE_ID_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid regex"));

/// `task_YYYYMMDD_HHMMSS`, normalised by stripping unsafe characters
/// (spec.md §4.4 "Plan persistence").
pub fn generate_plan_id(now: chrono::DateTime<chrono::Utc>) -> String {
    let raw = format!("task_{}", now.format("%Y%m%d_%H%M%S"));
    UNSAFE_ID_CHARS.replace_all(&raw, "").to_string()
}

pub fn plan_relative_path(plan_id: &str) -> String {
    format!("{PLAN_DIR}/{plan_id}.md")
}

pub fn lock_relative_path(plan_id: &str) -> String {
    format!("{PLAN_DIR}/{plan_id}.lock")
}

/// Ask the Planner for a YAML plan (up to `MAX_PLAN_ATTEMPTS`). Falls back to
/// a single-task plan wrapping the prompt verbatim when the planner is
/// unavailable or every attempt fails to yield a parseable non-empty plan
/// (spec.md §4.4 "Plan construction").
#[allow(clippy::too_many_arguments)]
pub async fn construct_plan(
    planner: Option<&mut Agent>,
    prompt: &str,
    session_id: &str,
    tool_ctx: &ToolContext,
    history: &dyn HistoryStore,
    scrubber: &dyn SecretScrubber,
) -> Plan {
    let Some(planner) = planner else {
        return fallback_plan(prompt);
    };

    for attempt in 1..=MAX_PLAN_ATTEMPTS {
        let planning_prompt = format!(
            "Produce a plan for the following request as a YAML document with exactly this shape:\n\
             tasks:\n  - id: <string>\n    description: <string>\n    files_to_modify: [<string>, ...]\n    files_to_create: [<string>, ...]\n    depends_on: [<string>, ...]\n\n\
             Respond with only the YAML document. Request: {prompt}"
        );

        let reply = crate::engine::agent::run(planner, &planning_prompt, session_id, tool_ctx, history, None, scrubber, RunOptions::default()).await;

        match reply {
            Ok(text) => match parse_plan_yaml(&text) {
                Some(plan) => return plan,
                None => warn!("[orchestrator] plan attempt {attempt} did not parse as a non-empty plan"),
            },
            Err(e) => warn!("[orchestrator] plan attempt {attempt} planner call failed: {e}"),
        }
    }

    fallback_plan(prompt)
}

/// Parse a (possibly fenced) YAML reply into a normalised non-empty `Plan`.
pub fn parse_plan_yaml(text: &str) -> Option<Plan> {
    let cleaned = strip_code_fences(text);
    let mut plan: Plan = serde_yaml::from_str(&cleaned).ok()?;
    if plan.tasks.is_empty() {
        return None;
    }
    normalize_plan(&mut plan);
    Some(plan)
}

fn fallback_plan(prompt: &str) -> Plan {
    Plan { tasks: vec![Task { id: "t1".into(), description: prompt.to_string(), ..Default::default() }] }
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let without_lang = trimmed.strip_prefix("```yaml").or_else(|| trimmed.strip_prefix("```yml")).or_else(|| trimmed.strip_prefix("```"));
    match without_lang {
        Some(rest) => rest.trim_end_matches("```").trim().to_string(),
        None => trimmed.to_string(),
    }
}

fn normalize_plan(plan: &mut Plan) {
    for (i, task) in plan.tasks.iter_mut().enumerate() {
        let trimmed_id = task.id.trim().to_string();
        task.id = if trimmed_id.is_empty() { format!("t{}", i + 1) } else { trimmed_id };
        task.description = task.description.trim().to_string();
    }
}

/// Render the plan markdown body (spec.md §6 "Plan file format").
pub fn render_markdown(plan_id: &str, prompt: &str, plan: &Plan) -> String {
    let title = truncate_utf8(prompt, PLAN_TITLE_MAX_CHARS);
    let mut steps = String::new();
    for task in &plan.tasks {
        steps.push_str(&format!("- [ ] {} | {}\n", task.id, task.description));
    }
    let yaml = serde_yaml::to_string(plan).unwrap_or_default();
    format!(
        "# Task: {title}\n**id**: {plan_id}\n**status**: in_progress\n\n\
         ## Steps\n{steps}\n\
         ## Context\nGenerated by Planner. Update checkboxes as tasks complete.\n\n\
         ## YAML\n```yaml\n{yaml}```\n"
    )
}

/// Tick the checkbox for `task_id` from `[ ]` to `[x]`.
pub fn mark_task_done(markdown: &str, task_id: &str) -> String {
    let needle = format!("- [ ] {task_id} |");
    let replacement = format!("- [x] {task_id} |");
    markdown.replacen(&needle, &replacement, 1)
}

/// Persist plan markdown via the Planner's `write_plan_md` tool when bound,
/// otherwise through a freshly instantiated one (spec.md §4.4 "Plan
/// persistence" — "via the Planner's write_plan_md tool when available, else
/// a freshly instantiated planner tool").
pub async fn persist_markdown(planner_tools: Option<&ToolSet>, tool_ctx: &ToolContext, relative_path: &str, content: &str) -> OrchestraResult<()> {
    let args = serde_json::json!({ "path": relative_path, "content": content });
    if let Some(tools) = planner_tools {
        if let Some(tool) = tools.get("write_plan_md") {
            tool.execute(tool_ctx, &args).await?;
            return Ok(());
        }
    }
    crate::engine::tools::plan::WritePlanMdTool.execute(tool_ctx, &args).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_normalized_plan_id() {
        let now = chrono::DateTime::parse_from_rfc3339("2026-07-26T10:15:30Z").unwrap().with_timezone(&chrono::Utc);
        assert_eq!(generate_plan_id(now), "task_20260726_101530");
    }

    #[test]
    fn parses_fenced_yaml_plan() {
        let raw = "```yaml\ntasks:\n  - id: t1\n    description: a\n```";
        let plan = parse_plan_yaml(raw).unwrap();
        assert_eq!(plan.tasks[0].id, "t1");
    }

    #[test]
    fn rejects_empty_task_list() {
        assert!(parse_plan_yaml("tasks: []").is_none());
    }

    #[test]
    fn fallback_plan_wraps_prompt_verbatim() {
        let plan = fallback_plan("fix the bug");
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].description, "fix the bug");
    }

    #[test]
    fn mark_task_done_ticks_only_matching_checkbox() {
        let markdown = "- [ ] t1 | first\n- [ ] t2 | second\n";
        let updated = mark_task_done(markdown, "t1");
        assert!(updated.contains("- [x] t1 | first"));
        assert!(updated.contains("- [ ] t2 | second"));
    }

    #[test]
    fn render_markdown_includes_checklist_and_yaml() {
        let plan = Plan { tasks: vec![Task { id: "t1".into(), description: "a".into(), ..Default::default() }] };
        let markdown = render_markdown("task_1", "implement something", &plan);
        assert!(markdown.contains("- [ ] t1 | a"));
        assert!(markdown.contains("## YAML"));
    }
}
