// ── Orchestra Atoms: Trait Contracts ────────────────────────────────────────
// The seams between orchestra-core and everything spec.md §1 calls an
// external collaborator (TUI, config loader, credential store, SQLite
// session store, RAG indexer, secret scrubber). The core depends only on
// these traits; a host binary wires in concrete implementations.

use async_trait::async_trait;
use std::fmt;

use super::types::{CompletionResponse, Message, ToolDefinition};

// ── Provider (spec.md §4.1) ─────────────────────────────────────────────────

/// Errors local to a provider adapter, before being folded into the crate's
/// `OrchestraError` at the call site. Kept distinct from `OrchestraError` so
/// adapters can be unit-tested against the wire-format contract alone,
/// mirroring the teacher's `atoms::traits::ProviderError` / `AiProvider` split.
#[derive(Debug)]
pub enum ProviderError {
    /// Credentials missing or rejected by the vendor (HTTP 401/403).
    Auth(String),
    /// Any other non-OK HTTP response; carries status and a truncated body.
    Api { status: u16, message: String },
    /// HTTP 429 with an optional `Retry-After` hint.
    RateLimited { message: String, retry_after_secs: Option<u64> },
    /// Connection / transport-level failure (DNS, TLS, timeout, stream read).
    Transport(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(m) => write!(f, "auth error: {m}"),
            ProviderError::Api { status, message } => write!(f, "api error {status}: {message}"),
            ProviderError::RateLimited { message, .. } => write!(f, "rate limited: {message}"),
            ProviderError::Transport(m) => write!(f, "transport error: {m}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Callback invoked once per streamed text delta (spec.md §4.1, §9 "streaming
/// tokens are pushed through a callback rather than a coroutine to keep the
/// Provider interface synchronous at the boundary").
pub type OnToken<'a> = dyn Fn(&str) + Send + Sync + 'a;

/// Uniform contract every vendor adapter implements (spec.md §4.1).
///
/// - `tools` empty: adapter MAY stream, invoking `on_token` per delta.
/// - `tools` non-empty: adapter MUST use non-streaming request/response.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn ping(&self) -> Result<(), ProviderError>;

    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;

    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        on_token: Option<&OnToken<'_>>,
    ) -> Result<CompletionResponse, ProviderError>;
}

// ── History store (spec.md §6) ──────────────────────────────────────────────

/// The SQLite-backed message/session store is out of scope (spec.md §1); the
/// core depends on this trait only.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, String>;

    async fn save_message(
        &self,
        session_id: &str,
        role: &str,
        agent_role: Option<&str>,
        content: &str,
        tokens: Option<u64>,
    ) -> Result<(), String>;
}

// ── Session settings (spec.md §6) ───────────────────────────────────────────

pub trait SessionSettings: Send + Sync {
    /// Normalise a raw, possibly-absent execution-mode string to `"fast"` or
    /// `"plan"`.
    fn normalize_execution_mode(&self, raw: Option<&str>) -> String;
}

// ── RAG indexer (spec.md §6, optional) ──────────────────────────────────────

pub struct RetrievedChunk {
    pub filepath: String,
    pub content: String,
}

#[async_trait]
pub trait RagIndexer: Send + Sync {
    async fn query(&self, prompt: &str) -> Result<Vec<RetrievedChunk>, String>;
}

// ── Secret scrubber (spec.md §6) ────────────────────────────────────────────

pub trait SecretScrubber: Send + Sync {
    /// Idempotent redaction: `clean(clean(x)) == clean(x)` (spec.md §8 property 7).
    fn clean(&self, text: &str) -> String;
}

/// No-op scrubber for embedders that don't wire one in.
pub struct NoopScrubber;

impl SecretScrubber for NoopScrubber {
    fn clean(&self, text: &str) -> String {
        text.to_string()
    }
}

// ── Plan lock writer (spec.md §4.4 "Completion") ────────────────────────────

/// Writes the `.lock` sidecar after all tasks succeed. A host may inject a
/// test double here; the default implementation writes to the filesystem.
#[async_trait]
pub trait PlanLockWriter: Send + Sync {
    async fn write_lock(&self, plan_dir: &std::path::Path, plan_id: &str) -> Result<(), String>;
}
