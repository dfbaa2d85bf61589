// Orchestra Engine — provider adapters, the sandboxed tool registry, the
// agent run-loop, and the orchestrator that ties them together.
//
// Module layout:
//   http.rs          — shared HTTP retry / circuit-breaker utilities
//   types.rs         — re-export of atoms::types plus engine-only helpers
//   events.rs         — progress streams: StepUpdate sink, AgentEvent sink
//   providers/        — vendor wire-format adapters behind the Provider trait
//   tools/            — role-scoped sandboxed tools
//   agent.rs          — the bounded tool-use run-loop
//   orchestrator/     — dispatch, strategy, planning, approval, execution

pub mod agent;
pub mod events;
pub mod http;
pub mod orchestrator;
pub mod providers;
pub mod tools;
pub mod types;
