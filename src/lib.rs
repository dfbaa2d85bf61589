// Orchestra Core — the headless core of a multi-agent code-automation
// runtime. See SPEC_FULL.md / DESIGN.md for the module map and grounding.

pub mod atoms;
pub mod engine;

pub use atoms::error::{OrchestraError, OrchestraResult};
pub use atoms::traits::{HistoryStore, NoopScrubber, OnToken, PlanLockWriter, Provider, ProviderError, RagIndexer, SecretScrubber};
pub use atoms::types::*;
pub use engine::orchestrator::Orchestrator;
