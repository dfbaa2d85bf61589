// ── Orchestra Atoms: Error Types ────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, Provider, Tool, Config…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `Cancelled` is a unit variant so it can be compared by identity
//     (`matches!(e, OrchestraError::Cancelled)`) rather than by message text —
//     spec.md §8 property 9 requires callers to distinguish user cancellation
//     from other failures this way.
//   • No variant carries secret material (API keys, tokens) in its message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestraError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parse failure (plan documents).
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// AI provider HTTP or API-level failure.
    #[error("provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Provider credentials missing or rejected.
    #[error("auth error: {provider}")]
    Auth { provider: String },

    /// Tool execution failure (invalid args, path escape, disallowed command).
    /// Not fatal — re-encoded into the tool-result JSON so the model can
    /// course-correct.
    #[error("tool error: {tool}: {message}")]
    Tool { tool: String, message: String },

    /// Orchestrator / agent / store dependency missing or invalid for the
    /// current run.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Engine or agent configuration is invalid or missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// User rejected a proposed plan.
    #[error("plan rejected: {0}")]
    PlanRejected(String),

    /// Plan task dependencies are unresolvable — a full scheduling pass made
    /// no progress, or a task referenced an unknown `depends_on` id. Spec.md
    /// §9 treats both as indistinguishable and maps them to this variant.
    #[error("deadlock: {0}")]
    Deadlock(String),

    /// Agent exceeded the bounded tool-use iteration budget.
    #[error("tool-call iteration limit exceeded")]
    IterationLimit,

    /// The run was cancelled. Compared by identity, never by string match.
    #[error("cancelled")]
    Cancelled,

    /// Catch-all for errors that do not yet have a dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl OrchestraError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool { tool: tool.into(), message: message.into() }
    }

    /// Identity check for the cancellation sentinel (spec.md §8 property 9).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrchestraError::Cancelled)
    }
}

impl From<String> for OrchestraError {
    fn from(s: String) -> Self {
        OrchestraError::Other(s)
    }
}

impl From<&str> for OrchestraError {
    fn from(s: &str) -> Self {
        OrchestraError::Other(s.to_string())
    }
}

pub type OrchestraResult<T> = Result<T, OrchestraError>;
