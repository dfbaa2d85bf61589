// ── Orchestra Atoms: Pure Data Types ───────────────────────────────────────
// All plain struct/enum definitions with no logic.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.
//
// These types are re-exported from engine::types via `pub use crate::atoms::types::*;`
// so `use crate::engine::types::*` is the one import call sites need.

use serde::{Deserialize, Serialize};

// ── Messages (spec.md §3 "Message", "ToolCall", "CompletionResponse") ──────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model. `arguments` is opaque JSON — vendors
/// that emit a JSON-encoded string instead of an object are normalised to a
/// raw object by the provider adapter before this type is constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Present on `Role::Tool` messages — the id of the call this answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Present on `Role::Tool` messages — the tool name, for provider wire
    /// formats that want it (e.g. OpenAI's `name` field).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message { role: Role::System, content: content.into(), tool_calls: None, tool_call_id: None, name: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message { role: Role::User, content: content.into(), tool_calls: None, tool_call_id: None, name: None }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Message { role: Role::Assistant, content: content.into(), tool_calls, tool_call_id: None, name: None }
    }

    pub fn tool(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }
}

/// The uniform response returned by every `Provider::complete` call
/// (spec.md §3 "CompletionResponse", §4.1).
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<String>,
}

impl CompletionResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A streamed text/tool-call delta from a provider's wire protocol. Internal
/// to provider adapters — never crosses the `Provider` trait boundary itself;
/// adapters accumulate these into a single `CompletionResponse`.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub delta_text: Option<String>,
    pub tool_call_deltas: Vec<ToolCallDelta>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub function_name: Option<String>,
    pub arguments_delta: Option<String>,
}

// ── Tool definitions (spec.md §4.2) ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-Schema describing the tool's input object.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub output: String,
    pub success: bool,
}

// ── Providers ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Google,
    /// Any OpenAI-compatible REST API (OpenRouter, Ollama, self-hosted gateways).
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: Option<String>,
}

// ── Roles & strategy (spec.md §3 "Strategy", §4.4) ─────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Planner,
    Coder,
    Reviewer,
    Analyst,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Coder => "coder",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Analyst => "analyst",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Strategy {
    /// Planner + Coder + Reviewer all present.
    Full,
    /// Planner + Reviewer only — analysis-only, no code execution.
    NoCoder,
    /// Planner + Coder, no Reviewer — executor self-reviews.
    NoReviewer,
    /// Planner only reachable.
    Solo,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Full => "full",
            Strategy::NoCoder => "no-coder",
            Strategy::NoReviewer => "no-reviewer",
            Strategy::Solo => "solo",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Fast,
    Plan,
}

// ── Plan model (spec.md §3 "Plan", "Task", §6 YAML schema) ────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub files_to_create: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Plan {
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone)]
pub struct PlanApproval {
    pub plan_id: String,
    pub approved: bool,
    /// Raw edited YAML, if the user modified the plan before approving.
    pub edited_plan: Option<String>,
}

// ── Review (spec.md §6 "Review JSON schema") ───────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewFinding {
    pub file: String,
    pub line: i64,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub approved: bool,
    #[serde(default)]
    pub findings: Vec<ReviewFinding>,
}

// ── Progress streams (spec.md §3 "StepUpdate", "AgentEvent") ──────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
    Blocked,
    PlanReady,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepUpdate {
    pub step_id: String,
    pub status: StepStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_yaml: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventType {
    Thinking,
    Planning,
    Reading,
    Writing,
    Running,
    Reviewing,
    Waiting,
    FileDiff,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub event_type: AgentEventType,
    pub role: Option<AgentRole>,
    pub detail: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl AgentEvent {
    pub fn new(event_type: AgentEventType, role: Option<AgentRole>, detail: impl Into<String>) -> Self {
        AgentEvent {
            event_type,
            role,
            detail: detail.into(),
            payload: serde_json::Value::Null,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ── Session (spec.md §3 "Session") ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub working_dir: std::path::PathBuf,
    pub mode: ExecutionMode,
}

/// Truncate a UTF-8 string to at most `max` bytes without splitting a
/// multi-byte character, appending no ellipsis — callers add their own
/// truncation marker when one is wanted.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
