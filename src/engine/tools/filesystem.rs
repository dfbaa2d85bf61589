// Orchestra Engine — read_file / write_file tools (spec.md §4.2)
//
// Grounded on the teacher's engine/tools/filesystem.rs `resolve_and_validate`
// path-escape guard and write-then-diff flow, trimmed to the two tools
// spec.md's role table actually assigns (no list_directory/append_file/
// delete_file — those are teacher-only verticals with no SPEC_FULL.md
// counterpart).

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{resolve_in_sandbox, Tool, ToolContext};
use crate::atoms::error::{OrchestraError, OrchestraResult};
use crate::atoms::types::{AgentEvent, AgentEventType};

const MAX_READ_BYTES: usize = 64_000;
const INTERNAL_PLAN_PREFIX: &str = ".orchestra/";

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file within the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative or absolute path to read" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> OrchestraResult<String> {
        ctx.check_cancelled()?;
        let raw_path = args["path"].as_str().ok_or_else(|| OrchestraError::tool("read_file", "missing 'path' argument"))?;
        let resolved = resolve_in_sandbox(&ctx.working_dir, raw_path)?;

        let content = std::fs::read_to_string(&resolved)
            .map_err(|e| OrchestraError::tool("read_file", format!("failed to read '{raw_path}': {e}")))?;

        if content.len() > MAX_READ_BYTES {
            let truncated = crate::atoms::types::truncate_utf8(&content, MAX_READ_BYTES);
            Ok(format!("{truncated}\n[truncated, {} total bytes]", content.len()))
        } else {
            Ok(content)
        }
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file within the workspace, creating it if absent."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Workspace-relative or absolute path to write" },
                "content": { "type": "string", "description": "The full content to write" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> OrchestraResult<String> {
        ctx.check_cancelled()?;
        let raw_path = args["path"].as_str().ok_or_else(|| OrchestraError::tool("write_file", "missing 'path' argument"))?;
        let content = args["content"].as_str().ok_or_else(|| OrchestraError::tool("write_file", "missing 'content' argument"))?;
        let resolved = resolve_in_sandbox(&ctx.working_dir, raw_path)?;

        let old_content = std::fs::read_to_string(&resolved).ok();

        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&resolved, content)?;

        let relative = raw_path.trim_start_matches('/');
        if !relative.starts_with(INTERNAL_PLAN_PREFIX) {
            if let Some(sinks) = &ctx.events {
                let diff = build_diff(old_content.as_deref().unwrap_or(""), content);
                sinks.agent(
                    AgentEvent::new(AgentEventType::FileDiff, None, relative.to_string())
                        .with_payload(json!({ "path": relative, "diff": diff })),
                );
            }
        }

        Ok(format!("wrote {} bytes to {}", content.len(), raw_path))
    }
}

/// A minimal unified-style line diff — enough for a UI to render old/new,
/// not a full LCS algorithm.
fn build_diff(old: &str, new: &str) -> Vec<(String, String)> {
    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let max = old_lines.len().max(new_lines.len());
    (0..max)
        .filter_map(|i| {
            let o = old_lines.get(i).copied().unwrap_or("");
            let n = new_lines.get(i).copied().unwrap_or("");
            if o == n {
                None
            } else {
                Some((o.to_string(), n.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());

        let write = WriteFileTool;
        write.execute(&ctx, &json!({"path": "a.txt", "content": "hello"})).await.unwrap();

        let read = ReadFileTool;
        let out = read.execute(&ctx, &json!({"path": "a.txt"})).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn write_rejects_path_escape() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let write = WriteFileTool;
        let err = write.execute(&ctx, &json!({"path": "../../etc/passwd", "content": "x"})).await.unwrap_err();
        assert!(matches!(err, OrchestraError::Tool { .. }));
    }

    #[tokio::test]
    async fn write_emits_file_diff_event_for_non_internal_path() {
        let dir = tempdir().unwrap();
        let (sinks, _step_rx, mut agent_rx) = crate::engine::events::EventSinks::new(8, 8);
        let ctx = ToolContext::new(dir.path()).with_events(sinks);
        let write = WriteFileTool;
        write.execute(&ctx, &json!({"path": "a.rs", "content": "fn main() {}"})).await.unwrap();
        let event = agent_rx.try_recv().unwrap();
        assert_eq!(event.event_type, crate::atoms::types::AgentEventType::FileDiff);
    }

    #[test]
    fn reads_are_arc_safe_across_threads() {
        let tool: Arc<dyn Tool> = Arc::new(ReadFileTool);
        assert_eq!(tool.name(), "read_file");
    }
}
