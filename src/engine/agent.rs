// Orchestra Engine — Agent run-loop (spec.md §4.3)
//
// One shared loop used by every role (Planner, Coder, Reviewer, Analyst) —
// grounded on the teacher's `run_orchestrator_loop`, trimmed of the
// boss/worker HIL-approval branching (spec.md scopes human approval to the
// Orchestrator's plan gate, not individual tool calls) and the
// provider-specific thought-signature bookkeeping.

use log::{info, warn};
use std::sync::Arc;

use crate::atoms::constants::{MAX_PREFETCH_FILES, MAX_PREFETCH_FILE_BYTES, MAX_PREFETCH_TOTAL_BYTES, MAX_TOOL_ITERATIONS};
use crate::atoms::error::{OrchestraError, OrchestraResult};
use crate::atoms::traits::{HistoryStore, Provider, RagIndexer, SecretScrubber};
use crate::atoms::types::{AgentEvent, AgentEventType, AgentRole, CompletionResponse, Message, ToolCall};
use crate::engine::tools::{ToolContext, ToolSet};
use crate::engine::types::{classify_dispatch_mode, DispatchMode};

/// Prompt pair an agent is configured with — task-mode and chat-mode system
/// prompts (spec.md §4.3 step 3 "Set the active system prompt accordingly").
#[derive(Clone)]
pub struct SystemPrompts {
    pub task: String,
    pub chat: String,
}

/// Cheaply cloneable so the Orchestrator can hand a restricted copy (e.g. a
/// read-only ToolSet for a conversational turn) to the run-loop without
/// disturbing the role's configured agent.
#[derive(Clone)]
pub struct Agent {
    pub role: AgentRole,
    pub provider: Arc<dyn Provider>,
    pub model: String,
    pub prompts: SystemPrompts,
    pub tools: ToolSet,
}

impl Agent {
    /// spec.md §4.3 "Validation": ready iff provider is set, model id is
    /// non-empty, task and chat prompts are non-empty, and ToolSet is bound.
    /// An unbound ToolSet is rebound to the role's defaults rather than
    /// treated as a failure.
    pub fn ensure_ready(&mut self) -> OrchestraResult<()> {
        if self.model.trim().is_empty() {
            return Err(OrchestraError::NotReady("model id is empty".into()));
        }
        if self.prompts.task.trim().is_empty() || self.prompts.chat.trim().is_empty() {
            return Err(OrchestraError::NotReady("task/chat system prompt is empty".into()));
        }
        if self.tools.is_empty() {
            self.tools = crate::engine::tools::default_tools_for_role(self.role);
        }
        Ok(())
    }
}

pub struct RunOptions<'a> {
    pub mode: Option<DispatchMode>,
    pub on_token: Option<&'a (dyn Fn(&str) + Send + Sync)>,
    pub on_tool_call: Option<&'a (dyn Fn(&ToolCall) + Send + Sync)>,
}

impl Default for RunOptions<'_> {
    fn default() -> Self {
        RunOptions { mode: None, on_token: None, on_tool_call: None }
    }
}

/// Run the Agent's bounded tool-use loop for a single user prompt
/// (spec.md §4.3). Returns the final assistant text.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    agent: &mut Agent,
    prompt: &str,
    session_id: &str,
    tool_ctx: &ToolContext,
    history: &dyn HistoryStore,
    indexer: Option<&dyn RagIndexer>,
    scrubber: &dyn SecretScrubber,
    options: RunOptions<'_>,
) -> OrchestraResult<String> {
    tool_ctx.check_cancelled()?;
    agent.ensure_ready()?;

    agent.provider.ping().await.map_err(|e| crate::engine::providers::fold_provider_error(agent.provider.name(), e))?;

    let mode = options.mode.unwrap_or_else(|| classify_dispatch_mode(prompt));
    let system_prompt = match mode {
        DispatchMode::Task => agent.prompts.task.clone(),
        DispatchMode::Chat => agent.prompts.chat.clone(),
    };

    let mut effective_prompt = prompt.to_string();
    if mode == DispatchMode::Task {
        if let Some(indexer) = indexer {
            if let Ok(chunks) = indexer.query(prompt).await {
                effective_prompt = prepend_context(prompt, &chunks);
            }
        }
    }

    let history_messages = history.get_messages(session_id).await.unwrap_or_default();

    let mut messages = Vec::with_capacity(history_messages.len() + 2);
    messages.push(Message::system(scrubber.clean(&format!("{}\n\n{}", system_prompt, agent.tools.prompt_block()))));
    messages.extend(history_messages);
    messages.push(Message::user(scrubber.clean(&effective_prompt)));

    let tool_defs = agent.tools.definitions();

    for iteration in 1..=MAX_TOOL_ITERATIONS {
        tool_ctx.check_cancelled()?;

        info!("[agent] {} iteration {}/{}", agent.role, iteration, MAX_TOOL_ITERATIONS);

        let response: CompletionResponse = agent
            .provider
            .complete(&agent.model, &messages, &tool_defs, options.on_token)
            .await
            .map_err(|e| crate::engine::providers::fold_provider_error(agent.provider.name(), e))?;

        if !response.has_tool_calls() {
            let final_text = scrubber.clean(&response.text);
            let _ = history.save_message(session_id, "user", None, &effective_prompt, None).await;
            let _ = history.save_message(session_id, "assistant", Some(agent.role.as_str()), &final_text, None).await;
            return Ok(final_text);
        }

        messages.push(Message::assistant(response.text.clone(), Some(response.tool_calls.clone())));

        for tool_call in &response.tool_calls {
            tool_ctx.check_cancelled()?;

            if let Some(cb) = options.on_tool_call {
                cb(tool_call);
            }

            let args = normalize_tool_arguments(&tool_call.arguments);

            if let Some(sinks) = &tool_ctx.events {
                sinks.agent(dispatch_event(agent.role, &tool_call.name, &args));
            }

            let result_json = match agent.tools.get(&tool_call.name) {
                Some(tool) => match tool.execute(tool_ctx, &args).await {
                    Ok(output) => serde_json::json!({ "ok": true, "output": truncate_for_log(&output), "data": output }),
                    Err(OrchestraError::Cancelled) => return Err(OrchestraError::Cancelled),
                    Err(e) => serde_json::json!({ "ok": false, "error": e.to_string() }),
                },
                None => serde_json::json!({ "ok": false, "error": format!("unknown tool '{}'", tool_call.name) }),
            };

            messages.push(Message::tool(tool_call.id.clone(), tool_call.name.clone(), result_json.to_string()));
        }
    }

    warn!("[agent] {} exceeded {} tool-call iterations", agent.role, MAX_TOOL_ITERATIONS);
    Err(OrchestraError::IterationLimit)
}

/// Tolerate both a raw JSON object and a JSON-encoded string for tool-call
/// arguments (spec.md §4.3 step 6c).
fn normalize_tool_arguments(raw: &serde_json::Value) -> serde_json::Value {
    match raw {
        serde_json::Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({})),
        other => other.clone(),
    }
}

/// Classify a tool call into the lifecycle event spec.md §3's ordering
/// ("thinking → reading/writing/running → reviewing → done|error") expects,
/// carrying the path (or command) the tool acts on in the payload.
fn dispatch_event(role: AgentRole, tool_name: &str, args: &serde_json::Value) -> AgentEvent {
    let event_type = match tool_name {
        "read_file" => AgentEventType::Reading,
        "write_file" | "write_plan_md" => AgentEventType::Writing,
        "run_command" => AgentEventType::Running,
        _ => AgentEventType::Thinking,
    };
    let path = args.get("path").and_then(|v| v.as_str()).map(str::to_string);
    let command = args.get("command").and_then(|v| v.as_str()).map(str::to_string);
    let detail = path.clone().or_else(|| command.clone()).unwrap_or_else(|| tool_name.to_string());
    let mut event = AgentEvent::new(event_type, Some(role), detail);
    if let Some(path) = path {
        event = event.with_payload(serde_json::json!({ "path": path }));
    } else if let Some(command) = command {
        event = event.with_payload(serde_json::json!({ "command": command }));
    }
    event
}

fn truncate_for_log(output: &str) -> &str {
    crate::atoms::types::truncate_utf8(output, 500)
}

fn prepend_context(prompt: &str, chunks: &[crate::atoms::traits::RetrievedChunk]) -> String {
    let mut block = String::from("Relevant codebase context:\n");
    let mut total = 0usize;
    for chunk in chunks.iter().take(MAX_PREFETCH_FILES) {
        let content = crate::atoms::types::truncate_utf8(&chunk.content, MAX_PREFETCH_FILE_BYTES);
        if total + content.len() > MAX_PREFETCH_TOTAL_BYTES {
            break;
        }
        block.push_str(&format!("\n--- {} ---\n{}\n", chunk.filepath, content));
        total += content.len();
    }
    format!("{block}\n{prompt}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_string_encoded_arguments() {
        let raw = serde_json::Value::String(r#"{"path":"a.rs"}"#.to_string());
        let normalized = normalize_tool_arguments(&raw);
        assert_eq!(normalized["path"], "a.rs");
    }

    #[test]
    fn passes_through_object_arguments() {
        let raw = serde_json::json!({"path": "a.rs"});
        let normalized = normalize_tool_arguments(&raw);
        assert_eq!(normalized["path"], "a.rs");
    }

    #[test]
    fn dispatch_event_classifies_write_file_as_writing_with_path() {
        let event = dispatch_event(AgentRole::Coder, "write_file", &serde_json::json!({"path": "hamid.ts", "content": ""}));
        assert_eq!(event.event_type, AgentEventType::Writing);
        assert_eq!(event.payload["path"], "hamid.ts");
    }

    #[test]
    fn dispatch_event_classifies_run_command_with_command_payload() {
        let event = dispatch_event(AgentRole::Coder, "run_command", &serde_json::json!({"command": "cargo test"}));
        assert_eq!(event.event_type, AgentEventType::Running);
        assert_eq!(event.payload["command"], "cargo test");
    }

    #[test]
    fn prepend_context_labels_chunks() {
        let chunks = vec![crate::atoms::traits::RetrievedChunk { filepath: "src/lib.rs".into(), content: "fn main() {}".into() }];
        let out = prepend_context("fix the bug", &chunks);
        assert!(out.contains("Relevant codebase context"));
        assert!(out.contains("src/lib.rs"));
        assert!(out.ends_with("fix the bug"));
    }
}
