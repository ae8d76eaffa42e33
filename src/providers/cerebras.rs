//! Cerebras: OpenAI-shaped native client with `max_completion_tokens`.
//!
//! Grounded on `examples/block-goose/crates/goose/src/providers/cerebras.rs`'s
//! pattern of reusing the OpenAI request/response shape with a narrower
//! field set: OpenAI-shaped, `max_completion_tokens` rather than
//! `max_tokens`, otherwise a strict subset. No equivalent Cerebras file was
//! present in the retrieval pack; this thin wrapper is built from the
//! sibling OpenAI transport plus that narrower field list rather than
//! copied verbatim.

use std::time::Duration;

use async_trait::async_trait;

use crate::completion::{ChunkSink, Client, CompletionRequest, CompletionResponse};
use crate::config::ConfigKey;
use crate::error::ProviderError;
use crate::model::ModelConfig;

use super::openai::OpenAiCompatibleProvider;

pub const PROVIDER_NAME: &str = "cerebras";
const DEFAULT_HOST: &str = "https://api.cerebras.ai";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub fn config_keys() -> Vec<ConfigKey> {
    vec![ConfigKey::new("CEREBRAS_API_KEY", true, true, None)]
}

pub struct CerebrasProvider {
    inner: OpenAiCompatibleProvider,
}

impl CerebrasProvider {
    pub fn new(model: ModelConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let inner = OpenAiCompatibleProvider::with_variant(
            PROVIDER_NAME,
            model,
            api_key,
            "CEREBRAS_API_KEY",
            "CEREBRAS_HOST",
            DEFAULT_HOST,
            "max_completion_tokens",
            DEFAULT_TIMEOUT,
        )?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Client for CerebrasProvider {
    async fn complete_with_request(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.inner.complete_with_request(request).await
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        sink: &mut ChunkSink<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        self.inner.stream(request, sink).await
    }

    fn get_model_name(&self) -> &str {
        self.inner.get_model_name()
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.list_models().await
    }

    async fn validate_api_key(&self) -> Result<(), ProviderError> {
        self.inner.validate_api_key().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_max_completion_tokens_field() {
        let provider =
            CerebrasProvider::new(ModelConfig::new("llama3.1-70b"), Some("key".to_string())).unwrap();
        let request = CompletionRequest::new(vec![crate::message::Message::user().with_text("hi")])
            .with_caching(false, None);
        let request = crate::completion::CompletionRequest {
            max_tokens: Some(512),
            ..request
        };
        let body = provider.inner.build_request(&request).unwrap();
        assert_eq!(body["max_completion_tokens"], 512);
        assert!(body.get("max_tokens").is_none());
    }
}
