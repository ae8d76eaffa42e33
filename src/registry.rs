//! Aggregated provider metadata for a setup surface: a directory a caller can
//! render without constructing a client first, extending the `ListModels`/
//! `ValidateAPIKey` operations each transport exposes.
//!
//! Grounded on the shape of
//! `examples/block-goose/crates/goose/src/providers/factory.rs::providers()`
//! (a flat `Vec` of per-provider metadata gathered from each module) and each
//! provider's own `config_keys()` function added alongside its transport.
//! Unlike `block-goose`'s `catalog.rs`, this core does not embed a
//! models.dev-style data file — per-model context-window/pricing data is an
//! orchestration concern outside a provider-protocol core, so the registry
//! exposes the static facts this crate actually knows: required config,
//! default/fast model, and where to read a provider's docs.

use crate::completion::Client;
use crate::config::ConfigKey;
use crate::router::RoutedProvider;

/// Static facts about one supported provider, independent of any particular
/// [`crate::model::ModelConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub config_keys: Vec<ConfigKey>,
    pub default_model: &'static str,
    pub fast_model: Option<&'static str>,
    /// A small compiled-in fallback list `list_models_or_fallback` returns
    /// when the live models endpoint can't be reached (SPEC_FULL.md §4
    /// "static known-model list ... falling back to the static list on any
    /// transport error").
    pub static_models: &'static [&'static str],
    pub docs_url: &'static str,
}

/// Every provider this crate ships a transport for, in the order
/// `router::classify` prefers them.
pub fn providers() -> Vec<ProviderInfo> {
    vec![
        ProviderInfo {
            id: "anthropic",
            display_name: "Anthropic",
            config_keys: crate::providers::anthropic::config_keys(),
            default_model: "claude-sonnet-4-20250514",
            fast_model: Some("claude-3-5-haiku-20241022"),
            static_models: &["claude-sonnet-4-20250514", "claude-3-5-haiku-20241022"],
            docs_url: "https://docs.anthropic.com/en/api/getting-started",
        },
        ProviderInfo {
            id: "openai",
            display_name: "OpenAI",
            config_keys: crate::providers::openai::config_keys(),
            default_model: "gpt-4o",
            fast_model: Some("gpt-4o-mini"),
            static_models: &["gpt-4o", "gpt-4o-mini"],
            docs_url: "https://platform.openai.com/docs/api-reference",
        },
        ProviderInfo {
            id: "google",
            display_name: "Google GenAI",
            config_keys: crate::providers::google::config_keys(),
            default_model: "gemini-2.0-flash",
            fast_model: Some("gemini-2.0-flash-lite"),
            static_models: &["gemini-2.0-flash", "gemini-2.0-flash-lite"],
            docs_url: "https://ai.google.dev/gemini-api/docs",
        },
        ProviderInfo {
            id: "mistral",
            display_name: "Mistral",
            config_keys: crate::providers::mistral::config_keys(),
            default_model: "mistral-large-latest",
            fast_model: Some("mistral-small-latest"),
            static_models: &["mistral-large-latest", "mistral-small-latest", "codestral-latest"],
            docs_url: "https://docs.mistral.ai/api/",
        },
        ProviderInfo {
            id: "cerebras",
            display_name: "Cerebras",
            config_keys: crate::providers::cerebras::config_keys(),
            default_model: "llama3.1-70b",
            fast_model: Some("llama3.1-8b"),
            static_models: &["llama3.1-70b", "llama3.1-8b"],
            docs_url: "https://inference-docs.cerebras.ai/",
        },
        ProviderInfo {
            id: "openrouter",
            display_name: "OpenRouter",
            config_keys: crate::providers::openrouter::config_keys(),
            default_model: "anthropic/claude-sonnet-4",
            fast_model: None,
            static_models: &["anthropic/claude-sonnet-4", "openai/gpt-4o", "google/gemini-2.0-flash"],
            docs_url: "https://openrouter.ai/docs",
        },
    ]
}

/// Looks up one provider's static metadata by the id `router::classify`
/// would produce, or `None` for [`RoutedProvider::Generic`] which has no
/// fixed identity to describe.
pub fn lookup(provider: RoutedProvider) -> Option<ProviderInfo> {
    providers().into_iter().find(|p| p.id == provider.as_str())
}

/// Lists a provider's models: the compiled-in static list merged with a
/// best-effort live fetch, falling back to the static list alone if the live
/// call fails (SPEC_FULL.md §4 "Provider registry" extension). Sorted and
/// deduplicated so repeated entries between the static list and a live
/// response collapse into one.
pub async fn list_models_or_fallback(info: &ProviderInfo, client: &dyn Client) -> Vec<String> {
    let mut models: Vec<String> = info.static_models.iter().map(|s| s.to_string()).collect();
    if let Ok(live) = client.list_models().await {
        models.extend(live);
    }
    models.sort();
    models.dedup();
    models
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{ChunkSink, CompletionRequest, CompletionResponse};
    use crate::error::ProviderError;
    use async_trait::async_trait;

    struct FailingClient;

    #[async_trait]
    impl Client for FailingClient {
        async fn complete_with_request(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            unimplemented!()
        }

        async fn stream(
            &self,
            _request: &CompletionRequest,
            _sink: &mut ChunkSink<'_>,
        ) -> Result<CompletionResponse, ProviderError> {
            unimplemented!()
        }

        fn get_model_name(&self) -> &str {
            "mock"
        }

        async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
            Err(ProviderError::NetworkError("unreachable in test".to_string()))
        }

        async fn validate_api_key(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn list_models_falls_back_to_static_list_on_transport_error() {
        let info = lookup(RoutedProvider::Anthropic).unwrap();
        let models = list_models_or_fallback(&info, &FailingClient).await;
        assert_eq!(models.len(), info.static_models.len());
        for model in info.static_models {
            assert!(models.contains(&model.to_string()));
        }
    }

    #[test]
    fn every_router_provider_except_generic_has_metadata() {
        for routed in [
            RoutedProvider::Anthropic,
            RoutedProvider::OpenAi,
            RoutedProvider::Google,
            RoutedProvider::Mistral,
            RoutedProvider::Cerebras,
            RoutedProvider::OpenRouter,
        ] {
            assert!(lookup(routed).is_some(), "missing metadata for {routed:?}");
        }
        assert!(lookup(RoutedProvider::Generic).is_none());
    }

    #[test]
    fn provider_ids_are_unique() {
        let ids: Vec<&str> = providers().iter().map(|p| p.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(ids.len(), sorted.len());
    }
}
