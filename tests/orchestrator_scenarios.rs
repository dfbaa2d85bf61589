// Integration tests for the six testable properties in spec.md §8, driven
// end to end through `Orchestrator::run` with scripted mock providers —
// no real network calls, no real LLM.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use orchestra_core::engine::agent::{Agent, SystemPrompts};
use orchestra_core::engine::events::EventSinks;
use orchestra_core::engine::orchestrator::{FsPlanLockWriter, Orchestrator};
use orchestra_core::engine::tools::default_tools_for_role;
use orchestra_core::{
    AgentRole, CompletionResponse, ExecutionMode, HistoryStore, Message, NoopScrubber, PlanApproval, Provider, ProviderError, StepStatus, ToolCall,
    ToolDefinition,
};

/// Returns one scripted `CompletionResponse` per `complete` call, in order.
/// Panics (via an `Err`) if the script runs dry — a test bug, not a runtime
/// one, so surfacing it as a provider error is good enough to fail the test.
struct ScriptedProvider {
    name: &'static str,
    script: Mutex<VecDeque<CompletionResponse>>,
}

impl ScriptedProvider {
    fn texts(name: &'static str, replies: Vec<&str>) -> Self {
        let script = replies
            .into_iter()
            .map(|text| CompletionResponse { text: text.to_string(), tool_calls: vec![], stop_reason: None })
            .collect();
        ScriptedProvider { name, script: Mutex::new(script) }
    }

    fn with_tool_call_then_text(name: &'static str, call: ToolCall, final_text: &str) -> Self {
        let first = CompletionResponse { text: String::new(), tool_calls: vec![call], stop_reason: None };
        let second = CompletionResponse { text: final_text.to_string(), tool_calls: vec![], stop_reason: None };
        ScriptedProvider { name, script: Mutex::new(VecDeque::from([first, second])) }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec![])
    }

    async fn complete(
        &self,
        _model: &str,
        _messages: &[Message],
        _tools: &[ToolDefinition],
        _on_token: Option<&orchestra_core::OnToken<'_>>,
    ) -> Result<CompletionResponse, ProviderError> {
        self.script.lock().unwrap().pop_front().ok_or_else(|| ProviderError::Transport("scripted provider exhausted".into()))
    }
}

/// No cross-call memory needed for these scenarios — every scripted prompt
/// is self-contained.
struct InertHistory;

#[async_trait]
impl HistoryStore for InertHistory {
    async fn get_messages(&self, _session_id: &str) -> Result<Vec<Message>, String> {
        Ok(vec![])
    }

    async fn save_message(&self, _session_id: &str, _role: &str, _agent_role: Option<&str>, _content: &str, _tokens: Option<u64>) -> Result<(), String> {
        Ok(())
    }
}

fn make_agent(role: AgentRole, provider: Arc<dyn Provider>) -> Agent {
    Agent {
        role,
        provider,
        model: "mock-model".into(),
        prompts: SystemPrompts { task: "You plan and execute software tasks.".into(), chat: "You chat helpfully.".into() },
        tools: default_tools_for_role(role),
    }
}

fn new_orchestrator(
    planner: Option<Agent>,
    coder: Option<Agent>,
    reviewer: Option<Agent>,
    working_dir: &std::path::Path,
) -> (Orchestrator, tokio::sync::mpsc::Receiver<orchestra_core::StepUpdate>) {
    let (sinks, step_rx, _agent_rx) = EventSinks::new(64, 64);
    let orchestrator = Orchestrator::new(
        planner,
        coder,
        reviewer,
        working_dir,
        Arc::new(InertHistory),
        None,
        Arc::new(NoopScrubber),
        Arc::new(FsPlanLockWriter),
        sinks,
    );
    (orchestrator, step_rx)
}

fn extract_plan_id(result: &str) -> &str {
    result.strip_prefix("plan ").and_then(|s| s.strip_suffix(" completed")).expect("run() result should be 'plan <id> completed'")
}

// Scenario A — full strategy happy path: Planner + Coder + Reviewer all
// available produces a two-task plan whose dependency order is respected,
// every task reviewed and approved, and the run ends with both the plan
// markdown and its `.lock` file on disk.
#[tokio::test]
async fn scenario_a_full_strategy_happy_path() {
    let dir = tempfile::tempdir().unwrap();

    let planner = make_agent(
        AgentRole::Planner,
        Arc::new(ScriptedProvider::texts(
            "planner",
            vec!["tasks:\n  - id: t1\n    description: add a helper\n  - id: t2\n    description: wire it up\n    depends_on: [t1]\n"],
        )),
    );
    let coder = make_agent(AgentRole::Coder, Arc::new(ScriptedProvider::texts("coder", vec![r#"{"status":"done"}"#, r#"{"status":"done"}"#])));
    let reviewer = make_agent(
        AgentRole::Reviewer,
        Arc::new(ScriptedProvider::texts("reviewer", vec![r#"{"approved": true, "findings": []}"#, r#"{"approved": true, "findings": []}"#])),
    );

    let (mut orchestrator, mut step_rx) = new_orchestrator(Some(planner), Some(coder), Some(reviewer), dir.path());
    tokio::spawn(async move { while step_rx.recv().await.is_some() {} });

    let result = orchestrator.run("implement the thing", ExecutionMode::Fast, "session-a").await.unwrap();
    let plan_id = extract_plan_id(&result);

    let plan_dir = dir.path().join(".orchestra/plans");
    assert!(plan_dir.join(format!("{plan_id}.md")).exists());
    assert!(plan_dir.join(format!("{plan_id}.lock")).exists());

    let markdown = std::fs::read_to_string(plan_dir.join(format!("{plan_id}.md"))).unwrap();
    assert!(markdown.contains("- [x] t1"));
    assert!(markdown.contains("- [x] t2"));
}

// Scenario B — plan mode blocks on approval: Run() with ExecutionMode::Plan
// must not execute any task until a matching PlanApproval arrives on the
// approval channel, and completes once it does.
#[tokio::test]
async fn scenario_b_plan_mode_waits_for_approval() {
    let dir = tempfile::tempdir().unwrap();

    let planner = make_agent(AgentRole::Planner, Arc::new(ScriptedProvider::texts("planner", vec!["tasks:\n  - id: t1\n    description: solo task\n"])));
    let coder = make_agent(AgentRole::Coder, Arc::new(ScriptedProvider::texts("coder", vec![r#"{"status":"done"}"#])));
    let reviewer = make_agent(AgentRole::Reviewer, Arc::new(ScriptedProvider::texts("reviewer", vec![r#"{"approved": true, "findings": []}"#])));

    let (mut orchestrator, mut step_rx) = new_orchestrator(Some(planner), Some(coder), Some(reviewer), dir.path());
    let approval = orchestrator.approval_channel();

    let run_handle = tokio::spawn(async move { orchestrator.run("implement the thing", ExecutionMode::Plan, "session-b").await });

    let mut plan_id = None;
    while let Some(update) = step_rx.recv().await {
        if update.status == StepStatus::PlanReady {
            plan_id = update.plan_id;
            break;
        }
    }
    let plan_id = plan_id.expect("expected a PlanReady step update carrying a plan_id");

    tokio::spawn(async move { while step_rx.recv().await.is_some() {} });

    approval.submit(PlanApproval { plan_id: plan_id.clone(), approved: true, edited_plan: None });

    let result = run_handle.await.unwrap().unwrap();
    assert_eq!(extract_plan_id(&result), plan_id);
    assert!(dir.path().join(format!(".orchestra/plans/{plan_id}.lock")).exists());
}

// Scenario B (rejection branch) — a rejected plan fails the run with
// PlanRejected and never produces a `.lock` file.
#[tokio::test]
async fn scenario_b_rejected_plan_never_executes() {
    let dir = tempfile::tempdir().unwrap();

    // Coder/reviewer scripts are empty: if execution were (incorrectly)
    // attempted after rejection, the scripted providers would return an
    // exhausted-script error instead of silently succeeding.
    let planner = make_agent(AgentRole::Planner, Arc::new(ScriptedProvider::texts("planner", vec!["tasks:\n  - id: t1\n    description: solo task\n"])));
    let coder = make_agent(AgentRole::Coder, Arc::new(ScriptedProvider::texts("coder", vec![])));

    let (mut orchestrator, mut step_rx) = new_orchestrator(Some(planner), Some(coder), None, dir.path());
    let approval = orchestrator.approval_channel();

    let run_handle = tokio::spawn(async move { orchestrator.run("implement the thing", ExecutionMode::Plan, "session-reject").await });

    let mut plan_id = None;
    while let Some(update) = step_rx.recv().await {
        if update.status == StepStatus::PlanReady {
            plan_id = update.plan_id;
            break;
        }
    }
    let plan_id = plan_id.expect("expected a PlanReady step update carrying a plan_id");
    tokio::spawn(async move { while step_rx.recv().await.is_some() {} });

    approval.submit(PlanApproval { plan_id: plan_id.clone(), approved: false, edited_plan: None });

    let err = run_handle.await.unwrap().unwrap_err();
    assert!(err.to_string().to_lowercase().contains("reject"));
    assert!(!dir.path().join(format!(".orchestra/plans/{plan_id}.lock")).exists());
}

// Scenario C — no-coder strategy runs analysis through the Planner itself
// and never touches a Coder role (because there isn't one), while the
// Reviewer still gates task completion.
#[tokio::test]
async fn scenario_c_no_coder_strategy_uses_planner_as_executor() {
    let dir = tempfile::tempdir().unwrap();

    let planner = make_agent(
        AgentRole::Planner,
        Arc::new(ScriptedProvider::texts(
            "planner",
            vec!["tasks:\n  - id: t1\n    description: describe the refactor\n", r#"{"status":"analysis only, no files touched"}"#],
        )),
    );
    let reviewer = make_agent(AgentRole::Reviewer, Arc::new(ScriptedProvider::texts("reviewer", vec![r#"{"approved": true, "findings": []}"#])));

    let (mut orchestrator, mut step_rx) = new_orchestrator(Some(planner), None, Some(reviewer), dir.path());
    tokio::spawn(async move { while step_rx.recv().await.is_some() {} });

    let result = orchestrator.run("describe how to refactor the module", ExecutionMode::Fast, "session-c").await.unwrap();
    let plan_id = extract_plan_id(&result);

    assert!(dir.path().join(format!(".orchestra/plans/{plan_id}.lock")).exists());
    // No coder agent was ever configured, so nothing could have written
    // outside the plan directory.
    assert!(std::fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).all(|e| e.file_name() == ".orchestra"));
}

// Scenario D — a single tool-dispatch round trip emits a `writing` agent
// event carrying the target path before the tool result comes back.
#[tokio::test]
async fn scenario_d_tool_dispatch_emits_writing_event_with_path() {
    use orchestra_core::engine::agent::RunOptions;
    use orchestra_core::engine::tools::ToolContext;
    use orchestra_core::AgentEventType;

    let dir = tempfile::tempdir().unwrap();
    let (sinks, _step_rx, mut agent_rx) = EventSinks::new(16, 16);
    let tool_ctx = ToolContext::new(dir.path()).with_events(sinks);

    let call = ToolCall { id: "call-1".into(), name: "write_file".into(), arguments: serde_json::json!({"path": "hamid.ts", "content": "export function hamid(): string {\n\treturn \"hamid\";\n}\n"}) };
    let mut coder = make_agent(AgentRole::Coder, Arc::new(ScriptedProvider::with_tool_call_then_text("coder", call, r#"{"status":"done"}"#)));

    let text = orchestra_core::engine::agent::run(
        &mut coder,
        "add a hamid helper",
        "session-d",
        &tool_ctx,
        &InertHistory,
        None,
        &NoopScrubber,
        RunOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(text, r#"{"status":"done"}"#);

    let mut saw_writing_event = false;
    while let Ok(event) = agent_rx.try_recv() {
        if event.event_type == AgentEventType::Writing {
            assert_eq!(event.payload["path"], "hamid.ts");
            saw_writing_event = true;
        }
    }
    assert!(saw_writing_event, "expected a Writing event carrying path: hamid.ts");
    assert!(dir.path().join("hamid.ts").exists());
}

// Scenario E — a conversational prompt never creates anything under
// `.orchestra/`, even when asked to "plan" something, because the
// conversational path is restricted to a read-only tool set.
#[tokio::test]
async fn scenario_e_conversational_prompt_never_touches_orchestra_dir() {
    let dir = tempfile::tempdir().unwrap();

    let coder = make_agent(AgentRole::Coder, Arc::new(ScriptedProvider::texts("coder", vec!["Sure — here's a quick explanation."])));
    let (mut orchestrator, mut step_rx) = new_orchestrator(None, Some(coder), None, dir.path());
    tokio::spawn(async move { while step_rx.recv().await.is_some() {} });

    let reply = orchestrator.run("what does this function do?", ExecutionMode::Fast, "session-e").await.unwrap();
    assert_eq!(reply, "Sure — here's a quick explanation.");
    assert!(!dir.path().join(".orchestra").exists());
}

// Scenario F — an unresolvable dependency graph fails the run with
// Deadlock rather than hanging or silently dropping tasks.
#[tokio::test]
async fn scenario_f_unresolvable_dependency_cycle_fails_with_deadlock() {
    let dir = tempfile::tempdir().unwrap();

    let planner = make_agent(
        AgentRole::Planner,
        Arc::new(ScriptedProvider::texts(
            "planner",
            vec!["tasks:\n  - id: t1\n    description: first\n    depends_on: [t2]\n  - id: t2\n    description: second\n    depends_on: [t1]\n"],
        )),
    );

    let (mut orchestrator, mut step_rx) = new_orchestrator(Some(planner), None, None, dir.path());
    tokio::spawn(async move { while step_rx.recv().await.is_some() {} });

    let err = orchestrator.run("build two interdependent things", ExecutionMode::Fast, "session-f").await.unwrap_err();
    assert!(matches!(err, orchestra_core::OrchestraError::Deadlock(_)));
}
