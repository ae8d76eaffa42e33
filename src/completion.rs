//! The provider-agnostic completion contract (spec §3, §4.1).
//!
//! Grounded on `examples/block-goose/crates/goose-llm/src/types.rs` for the
//! response/usage shape, extended with the request envelope and streaming
//! sink this core needs (that FFI-facing crate doesn't stream; the full
//! `goose` crate's per-provider `stream()` methods ground the streaming half,
//! see `providers/mod.rs`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ProviderError;
use crate::message::Message;

/// Only `5m` and `1h` are meaningful; anything else collapses to `OneHour`
/// (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheTtl {
    FiveMinutes,
    OneHour,
}

impl CacheTtl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTtl::FiveMinutes => "5m",
            CacheTtl::OneHour => "1h",
        }
    }
}

impl Default for CacheTtl {
    fn default() -> Self {
        CacheTtl::OneHour
    }
}

impl From<&str> for CacheTtl {
    fn from(s: &str) -> Self {
        match s {
            "5m" => CacheTtl::FiveMinutes,
            _ => CacheTtl::OneHour,
        }
    }
}

/// A tool the model may call: name, description, and a JSON-schema parameter
/// shape (vendor-agnostic; each converter renders it into its own wire form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolDescriptor>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub enable_caching: bool,
    pub cache_ttl: Option<CacheTtl>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_caching(mut self, enabled: bool, ttl: Option<CacheTtl>) -> Self {
        self.enable_caching = enabled;
        self.cache_ttl = ttl;
        self
    }

    pub fn effective_cache_ttl(&self) -> CacheTtl {
        self.cache_ttl.unwrap_or_default()
    }
}

/// Canonical tool-call shape on the wire leaving this crate: matches the
/// OpenAI-family `{id, type, function: {name, arguments}}` shape per spec §3,
/// which every provider's response is normalized into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: ToolCallFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub cache_read_tokens: Option<u32>,
    pub cache_write_tokens: Option<u32>,
    pub cost: Option<f64>,
}

impl Usage {
    pub fn total_tokens(&self) -> Option<u32> {
        match (self.input_tokens, self.output_tokens) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: String,
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>, stop_reason: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: stop_reason.into(),
            usage: None,
        }
    }
}

/// Per-delta text callback invoked synchronously in arrival order during a
/// streaming call (spec §4.1, §4.3). A returned error aborts the stream.
pub type ChunkSink<'a> = dyn FnMut(&str) -> Result<(), ProviderError> + Send + 'a;

/// The public, provider-agnostic client contract (spec §4.1).
#[async_trait]
pub trait Client: Send + Sync {
    /// One-shot convenience over a single user message.
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse, ProviderError> {
        let request = CompletionRequest::new(vec![Message::user().with_text(prompt)]);
        self.complete_with_request(&request).await
    }

    async fn complete_with_request(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Streams text deltas to `sink` in arrival order; tool-call deltas are
    /// accumulated internally and are not forwarded (spec §4.1). Returns the
    /// fully assembled response once the stream completes.
    async fn stream(
        &self,
        request: &CompletionRequest,
        sink: &mut ChunkSink<'_>,
    ) -> Result<CompletionResponse, ProviderError>;

    fn get_model_name(&self) -> &str;

    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;

    async fn validate_api_key(&self) -> Result<(), ProviderError>;
}

/// Validates the invariants spec §8 requires of every `CompletionRequest`
/// right before it is handed to a transport: at least one message after
/// conversion. Transports call this after running their own converter.
pub fn ensure_non_empty(native_message_count: usize) -> Result<(), ProviderError> {
    if native_message_count == 0 {
        Err(ProviderError::Validation(
            "requires at least one message".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// A flattened view of raw usage fields as vendors report them, before being
/// mapped into the unified [`Usage`] shape. Kept as a `HashMap` since some
/// vendors add bespoke fields (e.g. OpenRouter's `cost`).
pub type RawUsageFields = HashMap<String, serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_ttl_parses_known_values_and_defaults_to_one_hour() {
        assert_eq!(CacheTtl::from("5m"), CacheTtl::FiveMinutes);
        assert_eq!(CacheTtl::from("1h"), CacheTtl::OneHour);
        assert_eq!(CacheTtl::from("garbage"), CacheTtl::OneHour);
    }

    #[test]
    fn ensure_non_empty_rejects_zero_messages() {
        assert!(ensure_non_empty(0).is_err());
        assert!(ensure_non_empty(1).is_ok());
    }

    #[test]
    fn usage_total_tokens_requires_both_fields() {
        let usage = Usage {
            input_tokens: Some(10),
            output_tokens: Some(5),
            ..Default::default()
        };
        assert_eq!(usage.total_tokens(), Some(15));
        assert_eq!(Usage::default().total_tokens(), None);
    }
}
