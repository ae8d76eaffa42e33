//! Model-id routing: picks the provider transport a given model id belongs
//! to and constructs it.
//!
//! Grounded on `examples/block-goose/crates/goose/src/providers/factory.rs`'s
//! `create(name, model) -> Result<Box<dyn Provider>>` dispatch, generalized
//! from an explicit provider-name argument into model-id substring sniffing
//! (OpenRouter's `/`, `claude`, `gpt`/`o1`/`o3`, `gemini`, `mistral`/
//! `codestral`/`mixtral`, `llama`) plus a generic OpenAI-compatible fallback
//! for anything else.

use std::time::Duration;

use crate::completion::Client;
use crate::error::ProviderError;
use crate::model::ModelConfig;
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::cerebras::CerebrasProvider;
use crate::providers::google::GoogleProvider;
use crate::providers::mistral::MistralProvider;
use crate::providers::openai::OpenAiCompatibleProvider;
use crate::providers::openrouter::OpenRouterProvider;

/// Provider a model id was routed to, for callers that want to report it
/// (telemetry, a setup surface) without downcasting the trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutedProvider {
    Anthropic,
    OpenAi,
    Google,
    Mistral,
    Cerebras,
    OpenRouter,
    /// No known vendor pattern matched; routed to the OpenAI-compatible
    /// transport with no native-format storage (SPEC_FULL.md §4 "generic-
    /// conversion fallback").
    Generic,
}

impl RoutedProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutedProvider::Anthropic => "anthropic",
            RoutedProvider::OpenAi => "openai",
            RoutedProvider::Google => "google",
            RoutedProvider::Mistral => "mistral",
            RoutedProvider::Cerebras => "cerebras",
            RoutedProvider::OpenRouter => "openrouter",
            RoutedProvider::Generic => "generic",
        }
    }
}

/// Classifies a model id into the provider that should serve it. Pure and
/// side-effect free so a setup surface can preview routing decisions before
/// constructing a client.
pub fn classify(model_id: &str) -> RoutedProvider {
    let lower = model_id.to_lowercase();
    if lower.contains('/') {
        RoutedProvider::OpenRouter
    } else if lower.contains("claude") {
        RoutedProvider::Anthropic
    } else if lower.contains("gpt") || lower.contains("o1") || lower.contains("o3") {
        RoutedProvider::OpenAi
    } else if lower.contains("gemini") {
        RoutedProvider::Google
    } else if lower.contains("mistral") || lower.contains("codestral") || lower.contains("mixtral") {
        RoutedProvider::Mistral
    } else if lower.contains("llama") {
        RoutedProvider::Cerebras
    } else {
        RoutedProvider::Generic
    }
}

const GENERIC_TIMEOUT: Duration = Duration::from_secs(600);

/// Builds the `Client` a model id should be dispatched to, resolving its API
/// key from the matched provider's usual environment variables unless
/// `api_key` is given explicitly.
pub fn build_client(model: ModelConfig, api_key: Option<String>) -> Result<Box<dyn Client>, ProviderError> {
    match classify(&model.model_name) {
        RoutedProvider::Anthropic => Ok(Box::new(AnthropicProvider::new(model, api_key)?)),
        RoutedProvider::OpenAi => Ok(Box::new(OpenAiCompatibleProvider::new(model, api_key)?)),
        RoutedProvider::Google => Ok(Box::new(GoogleProvider::new(model, api_key)?)),
        RoutedProvider::Mistral => Ok(Box::new(MistralProvider::new(model, api_key)?)),
        RoutedProvider::Cerebras => Ok(Box::new(CerebrasProvider::new(model, api_key)?)),
        RoutedProvider::OpenRouter => Ok(Box::new(OpenRouterProvider::new(model, api_key)?)),
        RoutedProvider::Generic => Ok(Box::new(OpenAiCompatibleProvider::with_variant(
            "generic",
            model,
            api_key,
            "LLM_PROVIDER_API_KEY",
            "LLM_PROVIDER_HOST",
            "https://api.openai.com",
            "max_tokens",
            GENERIC_TIMEOUT,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_vendor_prefix() {
        assert_eq!(classify("mistralai/codestral-2508"), RoutedProvider::OpenRouter);
    }

    #[test]
    fn routes_claude_to_anthropic() {
        assert_eq!(classify("claude-3-5-sonnet-20241022"), RoutedProvider::Anthropic);
    }

    #[test]
    fn routes_gpt_and_o_series_to_openai() {
        assert_eq!(classify("gpt-4o"), RoutedProvider::OpenAi);
        assert_eq!(classify("o1-mini"), RoutedProvider::OpenAi);
        assert_eq!(classify("o3"), RoutedProvider::OpenAi);
    }

    #[test]
    fn routes_gemini_to_google() {
        assert_eq!(classify("gemini-2.0-flash"), RoutedProvider::Google);
    }

    #[test]
    fn routes_mistral_family_names_to_mistral() {
        assert_eq!(classify("mistral-large-latest"), RoutedProvider::Mistral);
        assert_eq!(classify("codestral-2508"), RoutedProvider::Mistral);
        assert_eq!(classify("open-mixtral-8x22b"), RoutedProvider::Mistral);
    }

    #[test]
    fn routes_llama_to_cerebras() {
        assert_eq!(classify("llama3.1-70b"), RoutedProvider::Cerebras);
    }

    #[test]
    fn unknown_model_id_falls_back_to_generic() {
        assert_eq!(classify("some-unreleased-model"), RoutedProvider::Generic);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify("CLAUDE-3-Opus"), RoutedProvider::Anthropic);
    }
}
