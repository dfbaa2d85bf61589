// Orchestra Engine — write_plan_md tool (spec.md §4.2, §6)
//
// The only tool that may write under `.orchestra/plans/`; the regex-
// constrained target keeps a Planner from ever being tricked into writing
// outside its designated plan file.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;

use super::{resolve_in_sandbox, Tool, ToolContext};
use crate::atoms::error::{OrchestraError, OrchestraResult};

static PLAN_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\.orchestra/plans/[A-Za-z0-9._-]+\.md$").expect("valid regex"));

pub struct WritePlanMdTool;

#[async_trait]
impl Tool for WritePlanMdTool {
    fn name(&self) -> &str {
        "write_plan_md"
    }

    fn description(&self) -> &str {
        "Persist the current plan as markdown under .orchestra/plans/."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Must match .orchestra/plans/<id>.md" },
                "content": { "type": "string", "description": "Plan markdown content" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> OrchestraResult<String> {
        ctx.check_cancelled()?;
        let raw_path = args["path"].as_str().ok_or_else(|| OrchestraError::tool("write_plan_md", "missing 'path' argument"))?;
        let content = args["content"].as_str().ok_or_else(|| OrchestraError::tool("write_plan_md", "missing 'content' argument"))?;

        if !PLAN_PATH_RE.is_match(raw_path) {
            return Err(OrchestraError::tool(
                "write_plan_md",
                format!("'{raw_path}' does not match .orchestra/plans/<id>.md"),
            ));
        }

        let resolved = resolve_in_sandbox(&ctx.working_dir, raw_path)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&resolved, content)?;

        Ok(format!("wrote {} bytes to {}", content.len(), raw_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn regex_accepts_valid_plan_path() {
        assert!(PLAN_PATH_RE.is_match(".orchestra/plans/abc-123.md"));
    }

    #[test]
    fn regex_rejects_traversal_and_other_dirs() {
        assert!(!PLAN_PATH_RE.is_match(".orchestra/plans/../secrets.md"));
        assert!(!PLAN_PATH_RE.is_match(".orchestra/other/abc.md"));
        assert!(!PLAN_PATH_RE.is_match("plans/abc.md"));
    }

    #[tokio::test]
    async fn rejects_path_outside_plans_dir() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let tool = WritePlanMdTool;
        let err = tool.execute(&ctx, &json!({"path": "notes.md", "content": "x"})).await.unwrap_err();
        assert!(matches!(err, OrchestraError::Tool { .. }));
    }

    #[tokio::test]
    async fn writes_valid_plan_path() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let tool = WritePlanMdTool;
        tool.execute(&ctx, &json!({"path": ".orchestra/plans/p1.md", "content": "# Plan"})).await.unwrap();
        let written = std::fs::read_to_string(dir.path().join(".orchestra/plans/p1.md")).unwrap();
        assert_eq!(written, "# Plan");
    }
}
