//! OpenRouter transport and native converter: an OpenAI-shaped proxy in
//! front of many vendors, gated per-request on which vendor actually serves
//! the `vendor/model` id.
//!
//! Grounded on
//! `examples/block-goose/crates/goose/src/providers/openrouter.rs` for the
//! `HTTP-Referer`/`X-Title` headers and the underlying-vendor cache gating
//! (`update_request_for_anthropic`/`is_google_model` there), generalized from
//! its anthropic-only special case into an `openai`/`anthropic`/`google`
//! allow-list, plus the Mistral `call_id`-stripping rule for tool calls
//! passed through to that vendor.

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use crate::completion::{ChunkSink, Client, CompletionRequest, CompletionResponse, ToolCall, Usage};
use crate::config::{resolve_api_key, resolve_param, ConfigKey};
use crate::error::{map_http_error, ProviderError};
use crate::message::{Message, NativeAttachment, Role, ToolCallRecord};
use crate::model::ModelConfig;

use super::api_client::{ApiClient, AuthMethod};
use super::utils::{extract_text_content, is_blank_delta, sanitize_function_name, sse_data_payload};

pub const PROVIDER_NAME: &str = "openrouter";
const DEFAULT_HOST: &str = "https://openrouter.ai";
const CHAT_PATH: &str = "api/v1/chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const APP_REFERER: &str = "https://github.com/block/goose";
const APP_TITLE: &str = "Goose";

/// Underlying vendors whose OpenRouter-proxied requests accept the
/// multipart `cache_control` content shape (spec.md §4.2).
const CACHE_CAPABLE_VENDORS: &[&str] = &["openai", "anthropic", "google"];

/// Reasoning keys a vendor's response may use instead of plain `content`
/// (spec.md §4.2 "OpenAI-family"); OpenRouter captures these inbound but
/// never writes them back (it is not OpenAI-native).
const REASONING_KEYS: &[&str] = &["reasoning", "thinking", "reasoning_content", "thinking_content"];

pub fn config_keys() -> Vec<ConfigKey> {
    vec![ConfigKey::new("OPENROUTER_API_KEY", true, true, None)]
}

pub struct OpenRouterProvider {
    client: ApiClient,
    model: ModelConfig,
}

impl OpenRouterProvider {
    pub fn new(model: ModelConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let key = resolve_api_key(api_key, &["OPENROUTER_API_KEY"])?;
        let host = resolve_param("OPENROUTER_HOST", DEFAULT_HOST);
        let client = ApiClient::with_timeout(host, AuthMethod::BearerToken(key), DEFAULT_TIMEOUT)?
            .with_header("HTTP-Referer", APP_REFERER)?
            .with_header("X-Title", APP_TITLE)?;
        Ok(Self { client, model })
    }

    pub fn model_family(&self) -> &str {
        &self.model.model_name
    }

    /// The `vendor` half of a `vendor/model` id, lowercased. Empty when the
    /// model id carries no prefix.
    fn vendor(&self) -> &str {
        self.model
            .model_name
            .split('/')
            .next()
            .unwrap_or("")
    }

    fn cache_capable(&self) -> bool {
        CACHE_CAPABLE_VENDORS.contains(&self.vendor())
    }

    fn is_mistral(&self) -> bool {
        self.vendor().contains("mistral")
    }

    fn message_to_native(&self, message: &Message, mark_system_cache: bool) -> Value {
        if message.role == Role::Tool {
            return json!({
                "role": "tool",
                "tool_call_id": message.tool_id.clone().unwrap_or_default(),
                "content": message.content,
            });
        }

        let role = match message.role {
            Role::Assistant => "assistant",
            Role::System => "system",
            _ => "user",
        };

        let content_value = if mark_system_cache {
            json!([{
                "type": "text",
                "text": message.content,
                "cache_control": {"type": "ephemeral"},
            }])
        } else {
            json!(message.content)
        };

        let mut native = json!({"role": role, "content": content_value});
        if message.role == Role::Assistant && !message.tool_calls.is_empty() {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .enumerate()
                .map(|(index, call)| {
                    let id = if call.id.trim().is_empty() {
                        ToolCallRecord::generated_id(index)
                    } else {
                        call.id.clone()
                    };
                    json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": sanitize_function_name(&call.name),
                            "arguments": call.arguments,
                        },
                    })
                })
                .collect();
            native["tool_calls"] = json!(calls);
        }
        native
    }

    /// Strips a stray `call_id` field from every assistant tool-call in
    /// `native` when this request targets Mistral through OpenRouter (spec.md
    /// §4.2: "assistant tool-calls must have any `call_id` field stripped —
    /// only `id` is permitted"). Operates in place on a reused native
    /// attachment, which is the only path that could carry the field.
    fn strip_mistral_call_id(&self, mut native: Value) -> Value {
        if !self.is_mistral() {
            return native;
        }
        if let Some(calls) = native.get_mut("tool_calls").and_then(Value::as_array_mut) {
            for call in calls {
                if let Some(obj) = call.as_object_mut() {
                    obj.remove("call_id");
                }
            }
        }
        native
    }

    fn convert_to_native(&self, request: &CompletionRequest) -> Vec<Value> {
        let mut native = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_prompt {
            let mark_cache = request.enable_caching && self.cache_capable();
            native.push(self.message_to_native(&Message::system().with_text(system), mark_cache));
        }

        for message in &request.messages {
            if message.role == Role::System {
                continue;
            }
            if let Some(attachment) = &message.native {
                if attachment.matches(PROVIDER_NAME, self.model_family()) {
                    native.push(self.strip_mistral_call_id(attachment.payload.clone()));
                    continue;
                }
                tracing::warn!("native attachment tag mismatch, re-converting message");
            }
            native.push(self.message_to_native(message, false));
        }
        native
    }

    fn native_to_message(&self, native: &Value) -> Message {
        let role_str = native.get("role").and_then(Value::as_str).unwrap_or("user");
        let mut message = match role_str {
            "assistant" => Message::assistant(),
            "tool" => Message::tool(),
            _ => Message::user(),
        };
        message.content = extract_text_content(native.get("content"));
        if role_str == "tool" {
            message.tool_id = native.get("tool_call_id").and_then(Value::as_str).map(str::to_string);
        }
        if let Some(calls) = native.get("tool_calls").and_then(Value::as_array) {
            message.tool_calls = calls
                .iter()
                .map(|call| {
                    let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                    let name = call
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let arguments = call
                        .get("function")
                        .and_then(|f| f.get("arguments"))
                        .and_then(Value::as_str)
                        .unwrap_or("{}");
                    ToolCallRecord::new(id, name, arguments)
                })
                .collect();
        }
        for key in REASONING_KEYS {
            if let Some(text) = native.get(*key).and_then(Value::as_str) {
                message.reasoning = Some(text.to_string());
                break;
            }
        }
        message.native = Some(NativeAttachment::new(PROVIDER_NAME, self.model_family(), native.clone()));
        message
    }

    fn build_request(&self, request: &CompletionRequest) -> Result<Value, ProviderError> {
        let native_messages = self.convert_to_native(request);
        crate::completion::ensure_non_empty(native_messages.len())?;

        let mut body = json!({
            "model": self.model.model_name,
            "messages": native_messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": sanitize_function_name(&tool.name),
                            "description": tool.description,
                            "parameters": tool.parameters,
                        },
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        Ok(body)
    }

    fn response_to_completion(&self, body: &Value) -> Result<CompletionResponse, ProviderError> {
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| ProviderError::RequestFailed("response has no choices".to_string()))?;
        let message = choice.get("message").cloned().unwrap_or(Value::Null);
        let content = extract_text_content(message.get("content"));
        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .map(|call| {
                        let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                        let name = call
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let arguments = call
                            .get("function")
                            .and_then(|f| f.get("arguments"))
                            .and_then(Value::as_str)
                            .unwrap_or("{}");
                        ToolCall::new(id, name, arguments)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let stop_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .unwrap_or("stop")
            .to_string();
        let usage = body.get("usage").map(|u| Usage {
            input_tokens: u.get("prompt_tokens").and_then(Value::as_u64).map(|n| n as u32),
            output_tokens: u.get("completion_tokens").and_then(Value::as_u64).map(|n| n as u32),
            cache_read_tokens: u
                .get("prompt_tokens_details")
                .and_then(|d| d.get("cached_tokens"))
                .and_then(Value::as_u64)
                .map(|n| n as u32),
            cache_write_tokens: None,
            cost: u.get("cost").and_then(Value::as_f64),
        });
        Ok(CompletionResponse {
            content,
            tool_calls,
            stop_reason,
            usage,
        })
    }
}

struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[async_trait]
impl Client for OpenRouterProvider {
    async fn complete_with_request(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let span = tracing::info_span!(
            "chat",
            otel.name = format!("chat {}", self.model.model_name),
            gen_ai.request.model = %self.model.model_name,
            gen_ai.system = PROVIDER_NAME,
            gen_ai.operation.name = "chat"
        );
        let _enter = span.enter();

        let body = self.build_request(request)?;
        let response = self.client.request(CHAT_PATH).response_post(&body).await?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(map_http_error(status, Some(&payload)));
        }
        self.response_to_completion(&payload)
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        sink: &mut ChunkSink<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        let mut body = self.build_request(request)?;
        body["stream"] = json!(true);

        let response = self.client.request(CHAT_PATH).response_post(&body).await?;
        let status = response.status();
        if !status.is_success() {
            let payload: Option<Value> = response.json().await.ok();
            return Err(map_http_error(status, payload.as_ref()));
        }

        let byte_stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let mut lines = FramedRead::new(
            StreamReader::new(byte_stream),
            LinesCodec::new_with_max_length(1024 * 1024),
        );

        let mut content = String::new();
        let mut tool_calls: std::collections::HashMap<i32, PendingToolCall> = std::collections::HashMap::new();
        let mut order: Vec<i32> = Vec::new();
        let mut stop_reason = "stop".to_string();

        while let Some(line) = lines
            .try_next()
            .await
            .map_err(|e| ProviderError::StreamDecode(e.to_string()))?
        {
            let Some(data) = sse_data_payload(&line) else {
                continue;
            };
            let chunk: Value = serde_json::from_str(data)
                .map_err(|e| ProviderError::StreamDecode(format!("invalid chunk JSON: {e}")))?;
            let Some(choice) = chunk.get("choices").and_then(Value::as_array).and_then(|c| c.first())
            else {
                continue;
            };
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                stop_reason = reason.to_string();
            }
            let Some(delta) = choice.get("delta") else {
                continue;
            };

            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !is_blank_delta(text) {
                    sink(text)?;
                }
                content.push_str(text);
            }

            if let Some(deltas) = delta.get("tool_calls").and_then(Value::as_array) {
                for delta_call in deltas {
                    let Some(index) = delta_call.get("index").and_then(Value::as_i64).map(|n| n as i32)
                    else {
                        continue;
                    };
                    let arg_fragment = delta_call
                        .get("function")
                        .and_then(|f| f.get("arguments"))
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    if let Some(pending) = tool_calls.get_mut(&index) {
                        pending.arguments.push_str(arg_fragment);
                    } else {
                        let id = delta_call.get("id").and_then(Value::as_str).unwrap_or_default();
                        let name = delta_call
                            .get("function")
                            .and_then(|f| f.get("name"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        tool_calls.insert(
                            index,
                            PendingToolCall {
                                id: id.to_string(),
                                name: name.to_string(),
                                arguments: arg_fragment.to_string(),
                            },
                        );
                        order.push(index);
                    }
                }
            }
        }

        let tool_calls = order
            .into_iter()
            .filter_map(|index| tool_calls.remove(&index))
            .map(|pending| ToolCall::new(pending.id, pending.name, pending.arguments))
            .collect();

        Ok(CompletionResponse {
            content,
            tool_calls,
            stop_reason,
            usage: None,
        })
    }

    fn get_model_name(&self) -> &str {
        &self.model.model_name
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self.client.request("api/v1/models").response_get().await?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(map_http_error(status, Some(&payload)));
        }
        let models = payload
            .get("data")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("id").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn validate_api_key(&self) -> Result<(), ProviderError> {
        self.list_models().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::CompletionRequest;

    fn provider(model_id: &str) -> OpenRouterProvider {
        OpenRouterProvider::new(ModelConfig::new(model_id), Some("test-key".to_string())).unwrap()
    }

    #[test]
    fn scenario_mistral_via_openrouter_uses_plain_string_system_and_no_cache() {
        let provider = provider("mistralai/codestral-2508");
        let request = CompletionRequest::new(vec![Message::user().with_text("hi")])
            .with_system_prompt("sys")
            .with_caching(true, None);
        let native = provider.convert_to_native(&request);
        assert!(native[0]["content"].is_string());
        assert!(!serde_json::to_string(&native).unwrap().contains("cache_control"));
    }

    #[test]
    fn anthropic_via_openrouter_gets_cache_markers() {
        let provider = provider("anthropic/claude-3.5-sonnet");
        let request = CompletionRequest::new(vec![Message::user().with_text("hi")])
            .with_system_prompt("sys")
            .with_caching(true, None);
        let native = provider.convert_to_native(&request);
        assert_eq!(native[0]["content"][0]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn mistral_vendor_strips_call_id_from_reused_native_attachment() {
        let provider = provider("mistralai/codestral-2508");
        let native = json!({
            "role": "assistant",
            "content": "",
            "tool_calls": [{"id": "abc123", "call_id": "abc123", "type": "function", "function": {"name": "f", "arguments": "{}"}}],
        });
        let stripped = provider.strip_mistral_call_id(native);
        assert!(stripped["tool_calls"][0].get("call_id").is_none());
        assert_eq!(stripped["tool_calls"][0]["id"], "abc123");
    }

    #[test]
    fn vendor_extraction_reads_prefix_before_slash() {
        let provider = provider("openai/gpt-4o");
        assert_eq!(provider.vendor(), "openai");
    }

    #[test]
    fn reasoning_is_captured_on_inbound_but_never_written_back() {
        let provider = provider("anthropic/claude-3.5-sonnet");
        let native = json!({"role": "assistant", "content": "hi", "reasoning": "thinking..."});
        let restored = provider.native_to_message(&native);
        assert_eq!(restored.reasoning.as_deref(), Some("thinking..."));

        let outbound = provider.message_to_native(&restored, false);
        assert!(outbound.get("reasoning").is_none());
        assert!(outbound.get("reasoning_content").is_none());
    }
}
