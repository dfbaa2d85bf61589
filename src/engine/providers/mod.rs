// Orchestra Engine — Provider Registry
//
// `build_provider` returns a `Box<dyn Provider>` so adding a new vendor never
// requires touching the orchestrator or the agent run-loop — only a new
// adapter module and a match arm here.
//
// Grounded on the teacher's `engine/providers/mod.rs` `AnyProvider` factory.

pub mod anthropic;
pub mod google;
pub mod openai;

use crate::atoms::error::OrchestraError;
use crate::atoms::traits::{Provider, ProviderError};
use crate::atoms::types::{ProviderConfig, ProviderKind};

/// Construct the right concrete adapter for a `ProviderConfig`.
///
/// To add a new OpenAI-compatible vendor: give it a `ProviderKind::Custom`
/// config with the right `base_url` — no code change needed here. To add a
/// vendor with a genuinely different wire format, add a module plus a match
/// arm below.
pub fn build_provider(config: &ProviderConfig) -> Box<dyn Provider> {
    match config.kind {
        ProviderKind::Anthropic => Box::new(anthropic::AnthropicProvider::new(config)),
        ProviderKind::Google => Box::new(google::GoogleProvider::new(config)),
        ProviderKind::OpenAI | ProviderKind::Custom => Box::new(openai::OpenAiProvider::new(config)),
    }
}

/// Fold an adapter-local `ProviderError` into the crate's `OrchestraError` at
/// the call site, tagging it with the provider name that produced it
/// (spec.md §7 "ProviderError" / "AuthError").
pub fn fold_provider_error(provider_name: &str, error: ProviderError) -> OrchestraError {
    match error {
        ProviderError::Auth(_) => OrchestraError::Auth { provider: provider_name.to_string() },
        ProviderError::Api { status, message } => OrchestraError::provider(provider_name, format!("{status}: {message}")),
        ProviderError::RateLimited { message, retry_after_secs } => OrchestraError::provider(
            provider_name,
            match retry_after_secs {
                Some(secs) => format!("rate limited (retry after {secs}s): {message}"),
                None => format!("rate limited: {message}"),
            },
        ),
        ProviderError::Transport(message) => OrchestraError::provider(provider_name, message),
    }
}
