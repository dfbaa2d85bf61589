// Orchestra Engine — run_command tool (spec.md §4.2)
//
// Two personalities share one implementation: Coder gets `unrestricted()`,
// Analyst gets `read_only()` which enforces the allowlist/metacharacter
// guard before falling through to the same shell-exec path. Grounded on the
// teacher's engine/tools/exec.rs timeout/kill-on-drop pattern.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::process::Command;

use super::{Tool, ToolContext};
use crate::atoms::constants::{DISALLOWED_SHELL_METACHARS, READ_ONLY_COMMANDS, READ_ONLY_GIT_SUBCOMMANDS};
use crate::atoms::error::{OrchestraError, OrchestraResult};

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_TIMEOUT_SECS: u64 = 600;
const MAX_OUTPUT_BYTES: usize = 50_000;

pub struct RunCommandTool {
    read_only: bool,
}

impl RunCommandTool {
    pub fn unrestricted() -> Self {
        RunCommandTool { read_only: false }
    }

    pub fn read_only() -> Self {
        RunCommandTool { read_only: true }
    }
}

/// Apply the read-only guard: first token must be an allowed read-only
/// command (git further limited to a read-only subcommand set), and the
/// command string must not contain a shell metacharacter that could chain
/// into a write.
fn check_read_only_guard(command: &str) -> OrchestraResult<()> {
    for metachar in DISALLOWED_SHELL_METACHARS {
        if command.contains(metachar) {
            return Err(OrchestraError::tool("run_command", format!("disallowed shell metacharacter '{metachar}' in read-only mode")));
        }
    }

    let mut tokens = command.split_whitespace();
    let first = tokens.next().unwrap_or("");

    if !READ_ONLY_COMMANDS.contains(&first) {
        return Err(OrchestraError::tool("run_command", format!("'{first}' is not a read-only command")));
    }

    if first == "sed" && command.contains("-i") {
        return Err(OrchestraError::tool("run_command", "sed -i is not permitted in read-only mode".to_string()));
    }

    if first == "git" {
        let subcommand = tokens.next().unwrap_or("");
        if !READ_ONLY_GIT_SUBCOMMANDS.contains(&subcommand) {
            return Err(OrchestraError::tool("run_command", format!("git subcommand '{subcommand}' is not permitted in read-only mode")));
        }
    }

    Ok(())
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        if self.read_only {
            "Run a read-only shell command (inspection only; no writes) within the workspace."
        } else {
            "Run a shell command within the workspace and return its combined output."
        }
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute" },
                "timeout": { "type": "integer", "description": "Timeout in seconds (default 120, max 600)" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> OrchestraResult<String> {
        ctx.check_cancelled()?;
        let command = args["command"].as_str().ok_or_else(|| OrchestraError::tool("run_command", "missing 'command' argument"))?;

        if self.read_only {
            check_read_only_guard(command)?;
        }

        let timeout_secs = args["timeout"].as_u64().unwrap_or(DEFAULT_TIMEOUT_SECS).min(MAX_TIMEOUT_SECS);

        let mut child = Command::new("sh")
            .args(["-c", command])
            .current_dir(&ctx.working_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| OrchestraError::tool("run_command", format!("failed to spawn process: {e}")))?;
        child.kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
            .await
            .map_err(|_| OrchestraError::tool("run_command", format!("command timed out after {timeout_secs}s")))?
            .map_err(|e| OrchestraError::tool("run_command", format!("process error: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut combined = String::new();
        combined.push_str(&stdout);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push_str("\n--- stderr ---\n");
            }
            combined.push_str(&stderr);
        }
        let combined = combined.trim().to_string();

        let combined = if combined.is_empty() {
            format!("(exit code: {})", output.status.code().unwrap_or(-1))
        } else if combined.len() > MAX_OUTPUT_BYTES {
            format!("{}\n[truncated]", crate::atoms::types::truncate_utf8(&combined, MAX_OUTPUT_BYTES))
        } else {
            combined
        };

        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_only_guard_allows_git_status() {
        assert!(check_read_only_guard("git status").is_ok());
    }

    #[test]
    fn read_only_guard_blocks_git_push() {
        assert!(check_read_only_guard("git push origin main").is_err());
    }

    #[test]
    fn read_only_guard_blocks_metacharacters() {
        assert!(check_read_only_guard("cat a.txt > b.txt").is_err());
        assert!(check_read_only_guard("ls; rm -rf /").is_err());
    }

    #[test]
    fn read_only_guard_blocks_sed_inplace() {
        assert!(check_read_only_guard("sed -i s/a/b/ file.txt").is_err());
        assert!(check_read_only_guard("sed s/a/b/ file.txt").is_ok());
    }

    #[test]
    fn read_only_guard_blocks_disallowed_command() {
        assert!(check_read_only_guard("rm -rf /").is_err());
    }

    #[tokio::test]
    async fn unrestricted_tool_runs_command() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let tool = RunCommandTool::unrestricted();
        let out = tool.execute(&ctx, &json!({"command": "echo hello"})).await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn read_only_tool_rejects_write_command() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext::new(dir.path());
        let tool = RunCommandTool::read_only();
        let err = tool.execute(&ctx, &json!({"command": "rm -rf ."})).await.unwrap_err();
        assert!(matches!(err, OrchestraError::Tool { .. }));
    }
}
