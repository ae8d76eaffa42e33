//! The OpenAI-compatible chat-completions transport and converter.
//!
//! Grounded on `examples/block-goose/crates/goose/src/providers/openai.rs`
//! (request construction, bearer auth, organization/project headers) and
//! `providers/formats/openai.rs` / `formats/moonshot.rs` for message
//! conversion and the SSE streaming-delta accumulation keyed by
//! `delta.tool_calls[].index` (spec.md §4.2, §4.3). This transport is shared,
//! parameterized by `chat_path`, `max_tokens_field`, and timeout, by plain
//! OpenAI and [`super::cerebras`] (each of which is OpenAI-shaped on the wire
//! with no cache-gating quirks). [`super::openrouter`] and
//! [`super::mistral`] need converter-level differences significant enough
//! that they carry their own `Client` impls instead.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{json, Value};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;

use crate::completion::{ChunkSink, Client, CompletionRequest, CompletionResponse, ToolCall, Usage};
use crate::config::{resolve_api_key, resolve_param, ConfigKey};
use crate::error::{map_http_error, ProviderError};
use crate::message::{Message, NativeAttachment, Role, ToolCallRecord};
use crate::model::ModelConfig;

use super::api_client::{ApiClient, AuthMethod};
use super::utils::{extract_text_content, is_blank_delta, sanitize_function_name, sse_data_payload};

pub const PROVIDER_NAME: &str = "openai";
const DEFAULT_HOST: &str = "https://api.openai.com";
const DEFAULT_CHAT_PATH: &str = "v1/chat/completions";

pub fn config_keys() -> Vec<ConfigKey> {
    vec![ConfigKey::new("OPENAI_API_KEY", true, true, None)]
}

/// Reasoning keys a vendor's response may use instead of plain `content`
/// (spec.md §4.2 "OpenAI-family").
const REASONING_KEYS: &[&str] = &["reasoning", "thinking", "reasoning_content", "thinking_content"];

pub struct OpenAiCompatibleProvider {
    client: ApiClient,
    model: ModelConfig,
    provider_name: &'static str,
    chat_path: String,
    max_tokens_field: &'static str,
    /// Whether reasoning text is written back onto outbound assistant
    /// messages (true only for OpenAI itself, per spec.md §4.2).
    writeback_reasoning: bool,
}

impl OpenAiCompatibleProvider {
    pub fn new(model: ModelConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let key = resolve_api_key(api_key, &["OPENAI_API_KEY"])?;
        let host = resolve_param("OPENAI_HOST", DEFAULT_HOST);
        let chat_path = resolve_param("OPENAI_BASE_PATH", DEFAULT_CHAT_PATH);
        let client = ApiClient::new(host, AuthMethod::BearerToken(key))?;
        Ok(Self {
            client,
            model,
            provider_name: PROVIDER_NAME,
            chat_path,
            max_tokens_field: "max_tokens",
            writeback_reasoning: true,
        })
    }

    /// Constructs a generic OpenAI-shaped transport for a vendor that speaks
    /// the same wire protocol under a different host/env var/field name
    /// (Cerebras, the generic-conversion fallback).
    pub fn with_variant(
        provider_name: &'static str,
        model: ModelConfig,
        api_key: Option<String>,
        env_var: &'static str,
        host_env_var: &'static str,
        default_host: &'static str,
        max_tokens_field: &'static str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let key = resolve_api_key(api_key, &[env_var])?;
        let host = resolve_param(host_env_var, default_host);
        let client = ApiClient::with_timeout(host, AuthMethod::BearerToken(key), timeout)?;
        Ok(Self {
            client,
            model,
            provider_name,
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            max_tokens_field,
            writeback_reasoning: false,
        })
    }

    pub fn model_family(&self) -> &str {
        &self.model.model_name
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider_name
    }

    /// Indices (in chronological order, assistant messages excluded) of the
    /// last two user messages — the cache-control placement target for
    /// OpenAI-family transports (spec.md §4.2 concrete scenario 2).
    fn last_two_user_indices(messages: &[Message]) -> Vec<usize> {
        let user_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::User)
            .map(|(i, _)| i)
            .collect();
        let start = user_indices.len().saturating_sub(2);
        user_indices[start..].to_vec()
    }

    fn message_to_native(&self, message: &Message, mark_cache: bool) -> Value {
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

        let content_value = if mark_cache {
            json!([{
                "type": "text",
                "text": message.content,
                "cache_control": {"type": "ephemeral"},
            }])
        } else {
            json!(message.content)
        };

        let mut native = json!({"role": role, "content": content_value});

        if message.role == Role::Assistant {
            if !message.tool_calls.is_empty() {
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
            if self.writeback_reasoning {
                if let Some(reasoning) = &message.reasoning {
                    native["reasoning_content"] = json!(reasoning);
                }
            }
        }
        native
    }

    fn convert_to_native(&self, request: &CompletionRequest) -> Vec<Value> {
        let cache_targets = if request.enable_caching {
            Self::last_two_user_indices(&request.messages)
        } else {
            Vec::new()
        };

        let mut native = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_prompt {
            if request.enable_caching {
                native.push(json!({
                    "role": "system",
                    "content": [{
                        "type": "text",
                        "text": system,
                        "cache_control": {"type": "ephemeral"},
                    }],
                }));
            } else {
                native.push(json!({"role": "system", "content": system}));
            }
        }

        for (index, message) in request.messages.iter().enumerate() {
            if message.role == Role::System {
                continue;
            }
            if let Some(attachment) = &message.native {
                if attachment.matches(self.provider_name, self.model_family()) {
                    native.push(attachment.payload.clone());
                    continue;
                }
                tracing::warn!("native attachment tag mismatch, re-converting message");
            }
            let mark_cache = cache_targets.contains(&index);
            native.push(self.message_to_native(message, mark_cache));
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
            message.tool_id = native
                .get("tool_call_id")
                .and_then(Value::as_str)
                .map(str::to_string);
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
        message.native = Some(NativeAttachment::new(
            self.provider_name,
            self.model_family(),
            native.clone(),
        ));
        message
    }

    pub(crate) fn build_request(&self, request: &CompletionRequest) -> Result<Value, ProviderError> {
        let native_messages = self.convert_to_native(request);
        crate::completion::ensure_non_empty(native_messages.len())?;

        let mut body = json!({
            "model": self.model.model_name,
            "messages": native_messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body[self.max_tokens_field] = json!(max_tokens);
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
impl Client for OpenAiCompatibleProvider {
    async fn complete_with_request(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let span = tracing::info_span!(
            "chat",
            otel.name = format!("chat {}", self.model.model_name),
            gen_ai.request.model = %self.model.model_name,
            gen_ai.system = self.provider_name,
            gen_ai.operation.name = "chat"
        );
        let _enter = span.enter();

        let body = self.build_request(request)?;
        let response = self
            .client
            .request(&self.chat_path)
            .response_post(&body)
            .await?;
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

        let response = self
            .client
            .request(&self.chat_path)
            .response_post(&body)
            .await?;
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
        let mut tool_calls: HashMap<i32, PendingToolCall> = HashMap::new();
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
        let response = self.client.request("v1/models").response_get().await?;
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

    fn provider() -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(ModelConfig::new("gpt-4o"), Some("test-key".to_string())).unwrap()
    }

    #[test]
    fn scenario_caches_system_and_last_two_user_messages() {
        let provider = provider();
        let messages = vec![
            Message::user().with_text("a"),
            Message::assistant().with_text("b"),
            Message::user().with_text("c"),
            Message::assistant().with_text("d"),
            Message::user().with_text("e"),
        ];
        let request = CompletionRequest::new(messages)
            .with_system_prompt("sys")
            .with_caching(true, None);
        let native = provider.convert_to_native(&request);

        // index 0 = system
        assert_eq!(native[0]["content"][0]["cache_control"]["type"], "ephemeral");
        // user:a is native[1], has no marker
        assert!(native[1]["content"].is_string());
        // user:c is native[3]
        assert_eq!(native[3]["content"][0]["cache_control"]["type"], "ephemeral");
        // user:e is native[5]
        assert_eq!(native[5]["content"][0]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn tool_call_round_trips() {
        let provider = provider();
        let message = Message::assistant()
            .with_tool_calls(vec![ToolCallRecord::new("call_1", "search", "{\"q\":1}")]);
        let native = provider.message_to_native(&message, false);
        let restored = provider.native_to_message(&native);
        assert_eq!(restored.tool_calls[0].id, "call_1");
        assert_eq!(restored.tool_calls[0].name, "search");
        assert_eq!(restored.tool_calls[0].arguments, "{\"q\":1}");
    }

    #[test]
    fn reasoning_round_trips_for_openai_native() {
        let provider = provider();
        let native = json!({"role": "assistant", "content": "hi", "reasoning_content": "thinking..."});
        let restored = provider.native_to_message(&native);
        assert_eq!(restored.reasoning.as_deref(), Some("thinking..."));
    }

    #[test]
    fn reasoning_is_captured_even_when_writeback_is_disabled() {
        // Cerebras and other non-OpenAI-native variants never write
        // `reasoning` back onto outbound messages, but inbound capture is a
        // whole-family behavior (spec.md §4.2 "OpenAI-family").
        let provider = OpenAiCompatibleProvider::with_variant(
            "cerebras",
            ModelConfig::new("llama3.1-70b"),
            Some("test-key".to_string()),
            "CEREBRAS_API_KEY",
            "CEREBRAS_HOST",
            "https://api.cerebras.ai/v1",
            "max_completion_tokens",
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(!provider.writeback_reasoning);
        let native = json!({"role": "assistant", "content": "hi", "reasoning": "thinking..."});
        let restored = provider.native_to_message(&native);
        assert_eq!(restored.reasoning.as_deref(), Some("thinking..."));
    }
}
