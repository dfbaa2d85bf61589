// Orchestra Engine — Tool Registry & Dispatcher
//
// Each tool group is a self-contained module with definitions + an executor.
// Grounded on the teacher's engine/tools/mod.rs dispatch pattern (a ToolSet
// here instead of a free match, since spec.md §4.2 requires insertion-order
// preservation, duplicate-name rejection, and a role-scoped default set).

pub mod exec;
pub mod filesystem;
pub mod plan;

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::atoms::error::{OrchestraError, OrchestraResult};
use crate::atoms::types::{AgentRole, ToolDefinition};
use crate::engine::events::EventSinks;

/// Execution context handed to every tool — the sandbox root, a cancellation
/// flag checked on entry (spec.md §4.2 "every tool checks context
/// cancellation on entry"), and an optional event sink for `write_file`'s
/// diff notifications.
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub cancelled: Arc<std::sync::atomic::AtomicBool>,
    pub events: Option<EventSinks>,
}

impl ToolContext {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        ToolContext {
            working_dir: working_dir.into(),
            cancelled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventSinks) -> Self {
        self.events = Some(events);
        self
    }

    pub fn check_cancelled(&self) -> OrchestraResult<()> {
        if self.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
            Err(OrchestraError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A single invocable tool: name, description, JSON-Schema parameters, and an
/// async executor closure. Dynamic dispatch keeps `ToolSet` homogeneous
/// without an enum of every tool kind (spec.md §9 "dynamic tool dispatch").
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    async fn execute(&self, ctx: &ToolContext, args: &Value) -> OrchestraResult<String>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition { name: self.name().to_string(), description: self.description().to_string(), parameters: self.parameters() }
    }
}

/// Ordered, duplicate-free collection of tools bound to an agent
/// (spec.md §4.2 "A ToolSet preserves insertion order and disallows duplicate
/// names").
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        ToolSet { tools: Vec::new() }
    }

    /// Returns `false` (and does not insert) if the name is already present.
    pub fn insert(&mut self, tool: Arc<dyn Tool>) -> bool {
        if self.tools.iter().any(|t| t.name() == tool.name()) {
            return false;
        }
        self.tools.push(tool);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// A deterministic, human-readable listing appended to the system prompt
    /// so the model knows which tools exist (spec.md §4.2 "PromptBlock()").
    pub fn prompt_block(&self) -> String {
        if self.tools.is_empty() {
            return String::new();
        }
        let mut out = String::from("Available tools:\n");
        for tool in &self.tools {
            out.push_str(&format!("- {}: {}\n", tool.name(), tool.description()));
        }
        out
    }
}

/// Default tools bound to an agent of the given role (spec.md §4.2 table).
pub fn default_tools_for_role(role: AgentRole) -> ToolSet {
    let mut set = ToolSet::new();
    match role {
        AgentRole::Planner => {
            set.insert(Arc::new(filesystem::ReadFileTool));
            set.insert(Arc::new(plan::WritePlanMdTool));
        }
        AgentRole::Coder => {
            set.insert(Arc::new(filesystem::ReadFileTool));
            set.insert(Arc::new(filesystem::WriteFileTool));
            set.insert(Arc::new(exec::RunCommandTool::unrestricted()));
        }
        AgentRole::Reviewer => {
            set.insert(Arc::new(filesystem::ReadFileTool));
        }
        AgentRole::Analyst => {
            set.insert(Arc::new(filesystem::ReadFileTool));
            set.insert(Arc::new(exec::RunCommandTool::read_only()));
        }
    }
    set
}

/// Resolve a raw path parameter to an absolute path rooted at `working_dir`
/// (spec.md §4.2 "Workspace sandbox"). Absolute inputs are accepted only
/// when they already land inside the root.
pub fn resolve_in_sandbox(working_dir: &Path, raw_path: &str) -> OrchestraResult<PathBuf> {
    let candidate = if Path::new(raw_path).is_absolute() {
        PathBuf::from(raw_path)
    } else {
        working_dir.join(raw_path)
    };

    let normalized = normalize_path(&candidate);
    let root = normalize_path(working_dir);

    if !normalized.starts_with(&root) {
        return Err(OrchestraError::Tool { tool: "sandbox".into(), message: "path escapes workspace root".into() });
    }
    Ok(normalized)
}

/// Lexically collapse `.`/`..` segments without touching the filesystem —
/// the target may not exist yet (e.g. `write_file` creating a new path), so
/// `canonicalize()` isn't usable here.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
