// Orchestra Engine — Orchestrator (spec.md §4.4)
//
// Module layout:
//   approval.rs   — single-slot plan-approval rendezvous channel
//   strategy.rs   — role-availability → Strategy derivation
//   planning.rs   — plan construction (Planner YAML) + markdown persistence
//   execution.rs  — dependency-ordered task scheduling + reviewer loop
//   mod.rs        — state machine entry point: Run() / SubmitPlanApproval()
//
// State machine (spec.md §4.4):
//   Idle → Classify → {Conversational | TaskFlow}
//   TaskFlow → DeriveStrategy → BuildPlan → PersistPlanMd
//             → (mode=plan? AwaitApproval : skip)
//             → (strategy=no-coder? AnalysisOnly : ExecutePlan)
//             → WritePlanLock(async) → Done
//
// Grounded on the teacher's `engine/orchestrator/mod.rs` `run_project` entry
// point and module split, generalised from Tauri project/app-handle plumbing
// to the plain async-trait collaborators spec.md §6 names.

pub mod approval;
pub mod execution;
pub mod planning;
pub mod strategy;

use async_trait::async_trait;
use log::{error, info};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::atoms::error::{OrchestraError, OrchestraResult};
use crate::atoms::traits::{HistoryStore, PlanLockWriter, RagIndexer, SecretScrubber};
use crate::atoms::types::{AgentEvent, AgentEventType, ExecutionMode, StepStatus, StepUpdate};
use crate::engine::agent::{self, Agent, RunOptions};
use crate::engine::events::EventSinks;
use crate::engine::tools::ToolContext;
use crate::engine::types::{classify_dispatch_mode, DispatchMode};

pub use approval::ApprovalChannel;

/// Filesystem-backed default for `PlanLockWriter` (spec.md §6 "lock file
/// body"). Hosts may inject a test double for deterministic assertions on
/// `.lock` creation without touching the real filesystem.
pub struct FsPlanLockWriter;

#[async_trait]
impl PlanLockWriter for FsPlanLockWriter {
    async fn write_lock(&self, plan_dir: &std::path::Path, plan_id: &str) -> Result<(), String> {
        let body = format!("status=done\nplan_id={plan_id}\nfinished_at={}\n", chrono::Utc::now().to_rfc3339());
        let path = plan_dir.join(format!("{plan_id}.lock"));
        tokio::fs::write(&path, body).await.map_err(|e| e.to_string())
    }
}

/// Owns the (optional) per-role agents and every injected collaborator for a
/// single orchestrated run. Construct one per project/session.
pub struct Orchestrator {
    pub planner: Option<Agent>,
    pub coder: Option<Agent>,
    pub reviewer: Option<Agent>,
    pub working_dir: PathBuf,
    pub history: Arc<dyn HistoryStore>,
    pub indexer: Option<Arc<dyn RagIndexer>>,
    pub scrubber: Arc<dyn SecretScrubber>,
    pub lock_writer: Arc<dyn PlanLockWriter>,
    pub events: EventSinks,
    approval: Arc<ApprovalChannel>,
    cancelled: Arc<AtomicBool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: Option<Agent>,
        coder: Option<Agent>,
        reviewer: Option<Agent>,
        working_dir: impl Into<PathBuf>,
        history: Arc<dyn HistoryStore>,
        indexer: Option<Arc<dyn RagIndexer>>,
        scrubber: Arc<dyn SecretScrubber>,
        lock_writer: Arc<dyn PlanLockWriter>,
        events: EventSinks,
    ) -> Self {
        Orchestrator {
            planner,
            coder,
            reviewer,
            working_dir: working_dir.into(),
            history,
            indexer,
            scrubber,
            lock_writer,
            events,
            approval: Arc::new(ApprovalChannel::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A clonable handle a caller keeps *before* invoking `run` so
    /// `SubmitPlanApproval` can reach the gate from another task while `run`
    /// holds `&mut self` (spec.md §4.4 "Secondary entry: SubmitPlanApproval").
    pub fn approval_channel(&self) -> Arc<ApprovalChannel> {
        self.approval.clone()
    }

    /// A clonable handle a caller can flip to cancel an in-flight `run`.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn tool_context(&self) -> ToolContext {
        ToolContext { working_dir: self.working_dir.clone(), cancelled: self.cancelled.clone(), events: Some(self.events.clone()) }
    }

    /// Public entry (spec.md §4.4 "Run(ctx, prompt)").
    pub async fn run(&mut self, prompt: &str, mode: ExecutionMode, session_id: &str) -> OrchestraResult<String> {
        let tool_ctx = self.tool_context();
        tool_ctx.check_cancelled()?;

        if prompt.trim().is_empty() {
            return Err(OrchestraError::from("prompt is empty"));
        }

        let result = match classify_dispatch_mode(prompt) {
            DispatchMode::Chat => self.run_conversational(prompt, session_id, &tool_ctx).await,
            DispatchMode::Task => self.run_task_flow(prompt, mode, session_id, &tool_ctx).await,
        };

        if let Err(e) = &result {
            error!("[orchestrator] run failed: {e}");
            self.events.agent(AgentEvent::new(AgentEventType::Error, None, e.to_string()));
            self.events
                .step(StepUpdate { step_id: "run".into(), status: StepStatus::Failed, message: e.to_string(), plan_id: None, plan_yaml: None })
                .await;
        }

        result
    }

    /// Non-task prompts get a single conversational turn from the best
    /// available agent (Coder > Planner > Reviewer) and must never touch
    /// `.orchestra/` (spec.md §4.4 "Classification").
    async fn run_conversational(&mut self, prompt: &str, session_id: &str, tool_ctx: &ToolContext) -> OrchestraResult<String> {
        let mut agent = self
            .pick_conversational_agent()
            .ok_or_else(|| OrchestraError::NotReady("no agent is configured for a conversational turn".into()))?
            .clone();

        // A read-only tool set structurally guarantees the conversational
        // path can't write under .orchestra/ regardless of what the model
        // is asked to do (spec.md §8 property 6).
        let mut restricted_tools = crate::engine::tools::ToolSet::new();
        restricted_tools.insert(Arc::new(crate::engine::tools::filesystem::ReadFileTool));
        agent.tools = restricted_tools;

        let options = RunOptions { mode: Some(DispatchMode::Chat), on_token: None, on_tool_call: None };
        let text = agent::run(&mut agent, prompt, session_id, tool_ctx, self.history.as_ref(), self.indexer.as_deref(), self.scrubber.as_ref(), options).await?;

        self.events.agent(AgentEvent::new(AgentEventType::Done, Some(agent.role), "conversational turn complete"));
        self.events
            .step(StepUpdate { step_id: "conversation".into(), status: StepStatus::Done, message: "done".into(), plan_id: None, plan_yaml: None })
            .await;

        Ok(text)
    }

    fn pick_conversational_agent(&mut self) -> Option<&mut Agent> {
        if self.coder.is_some() {
            self.coder.as_mut()
        } else if self.planner.is_some() {
            self.planner.as_mut()
        } else {
            self.reviewer.as_mut()
        }
    }

    async fn run_task_flow(&mut self, prompt: &str, mode: ExecutionMode, session_id: &str, tool_ctx: &ToolContext) -> OrchestraResult<String> {
        let (strategy, _availability) = strategy::derive_strategy(self.planner.as_mut(), self.coder.as_mut(), self.reviewer.as_mut()).await?;
        info!("[orchestrator] strategy = {}", strategy.as_str());

        let mut plan = planning::construct_plan(self.planner.as_mut(), prompt, session_id, tool_ctx, self.history.as_ref(), self.scrubber.as_ref()).await;

        let plan_id = planning::generate_plan_id(chrono::Utc::now());
        let plan_relpath = planning::plan_relative_path(&plan_id);
        let mut markdown = planning::render_markdown(&plan_id, prompt, &plan);

        let planner_tools = self.planner.as_ref().map(|a| &a.tools);
        planning::persist_markdown(planner_tools, tool_ctx, &plan_relpath, &markdown).await?;

        let plan_yaml = serde_yaml::to_string(&plan).unwrap_or_default();
        self.events
            .step(StepUpdate {
                step_id: "plan".into(),
                status: StepStatus::PlanReady,
                message: format!("plan ready ({} tasks)", plan.tasks.len()),
                plan_id: Some(plan_id.clone()),
                plan_yaml: Some(plan_yaml),
            })
            .await;

        if mode == ExecutionMode::Plan {
            self.events.agent(AgentEvent::new(AgentEventType::Waiting, None, "waiting for plan approval").with_payload(serde_json::json!({ "plan_id": plan_id })));

            let decision = self.approval.await_decision(&plan_id, &self.cancelled).await?;
            if !decision.approved {
                return Err(OrchestraError::PlanRejected(format!("plan {plan_id} was rejected")));
            }
            if let Some(edited_yaml) = decision.edited_plan {
                if let Some(edited) = planning::parse_plan_yaml(&edited_yaml) {
                    plan = edited;
                    markdown = planning::render_markdown(&plan_id, prompt, &plan);
                    let planner_tools = self.planner.as_ref().map(|a| &a.tools);
                    planning::persist_markdown(planner_tools, tool_ctx, &plan_relpath, &markdown).await?;
                }
            }
        }

        // Clone the Planner's ToolSet before taking the mutable borrows
        // `select_agents` needs — an `Option<&ToolSet>` borrowed from
        // `self.planner` can't coexist with `executor`/`reviewer` once they
        // may alias the same field.
        let planner_tools = self.planner.as_ref().map(|a| a.tools.clone());
        let (executor, reviewer) = select_agents(strategy, &mut self.planner, &mut self.coder, &mut self.reviewer)?;

        execution::execute_plan(
            &plan,
            &mut markdown,
            &plan_relpath,
            planner_tools.as_ref(),
            prompt,
            executor,
            reviewer,
            session_id,
            tool_ctx,
            self.history.as_ref(),
            self.indexer.as_deref(),
            self.scrubber.as_ref(),
            &self.events,
        )
        .await?;

        let plan_dir = self.working_dir.join(crate::atoms::constants::PLAN_DIR);
        self.lock_writer.write_lock(&plan_dir, &plan_id).await.map_err(OrchestraError::Other)?;

        self.events.agent(AgentEvent::new(AgentEventType::Done, None, "run complete"));
        self.events
            .step(StepUpdate { step_id: "run".into(), status: StepStatus::Done, message: "done".into(), plan_id: Some(plan_id.clone()), plan_yaml: None })
            .await;

        Ok(format!("plan {plan_id} completed"))
    }
}

/// Select the executor (Coder > Planner > Reviewer) and, when one exists and
/// isn't already the executor, the reviewer — per the already-derived
/// `Strategy` (spec.md §4.4 "Executor/Reviewer selection"). `strategy` must
/// come from `strategy::derive_strategy`, not be recomputed from presence
/// alone — a role can be present yet unavailable (failed ping).
fn select_agents<'a>(
    strategy: crate::atoms::types::Strategy,
    planner: &'a mut Option<Agent>,
    coder: &'a mut Option<Agent>,
    reviewer: &'a mut Option<Agent>,
) -> OrchestraResult<(&'a mut Agent, Option<&'a mut Agent>)> {
    use crate::atoms::types::{AgentRole, Strategy};

    let executor_role = match strategy {
        Strategy::Full | Strategy::NoReviewer => AgentRole::Coder,
        Strategy::NoCoder | Strategy::Solo => AgentRole::Planner,
    };

    let executor = match executor_role {
        AgentRole::Coder => coder.as_mut().or(planner.as_mut()),
        _ => planner.as_mut(),
    }
    .ok_or_else(|| OrchestraError::NotReady("no executor agent available".into()))?;

    let reviewer_ref = match strategy {
        Strategy::Full | Strategy::NoCoder => reviewer.as_mut().filter(|r| r.role != executor_role),
        Strategy::NoReviewer | Strategy::Solo => None,
    };

    Ok((executor, reviewer_ref))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_agents_prefers_coder_over_planner() {
        use crate::engine::agent::SystemPrompts;
        use crate::engine::tools::ToolSet;

        struct DummyProvider;
        #[async_trait]
        impl crate::atoms::traits::Provider for DummyProvider {
            fn name(&self) -> &str {
                "dummy"
            }
            async fn ping(&self) -> Result<(), crate::atoms::traits::ProviderError> {
                Ok(())
            }
            async fn list_models(&self) -> Result<Vec<String>, crate::atoms::traits::ProviderError> {
                Ok(vec![])
            }
            async fn complete(
                &self,
                _model: &str,
                _messages: &[crate::atoms::types::Message],
                _tools: &[crate::atoms::types::ToolDefinition],
                _on_token: Option<&crate::atoms::traits::OnToken<'_>>,
            ) -> Result<crate::atoms::types::CompletionResponse, crate::atoms::traits::ProviderError> {
                Ok(crate::atoms::types::CompletionResponse::default())
            }
        }

        fn make(role: crate::atoms::types::AgentRole) -> Agent {
            Agent {
                role,
                provider: Arc::new(DummyProvider),
                model: "m".into(),
                prompts: SystemPrompts { task: "t".into(), chat: "c".into() },
                tools: ToolSet::new(),
            }
        }

        let mut planner = Some(make(crate::atoms::types::AgentRole::Planner));
        let mut coder = Some(make(crate::atoms::types::AgentRole::Coder));
        let mut reviewer = Some(make(crate::atoms::types::AgentRole::Reviewer));

        let (executor, reviewer_ref) = select_agents(crate::atoms::types::Strategy::Full, &mut planner, &mut coder, &mut reviewer).unwrap();
        assert_eq!(executor.role, crate::atoms::types::AgentRole::Coder);
        assert_eq!(reviewer_ref.unwrap().role, crate::atoms::types::AgentRole::Reviewer);
    }
}
