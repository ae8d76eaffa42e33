//! Mistral chat-completions transport and native converter.
//!
//! Grounded on the shared OpenAI-shaped wire conventions established in
//! `super::openai` (this crate's own transport, itself grounded on
//! `examples/block-goose/crates/goose/src/providers/openai.rs`) — no
//! Mistral-specific file was present in the retrieval pack, so this module
//! builds the OpenAI-compatible request/response shape directly and layers
//! the vendor's documented peculiarities on top (spec.md §4.2 "Mistral"):
//! tool-call id normalization to `^[A-Za-z0-9]{1,9}$`, hallucinated-name
//! suffix recovery, and dropping empty assistant turns the API rejects.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
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
use super::utils::{extract_text_content, is_blank_delta, sse_data_payload};

pub const PROVIDER_NAME: &str = "mistral";
const DEFAULT_HOST: &str = "https://api.mistral.ai";
const CHAT_PATH: &str = "v1/chat/completions";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const NORMALIZED_ID_LEN: usize = 9;

pub fn config_keys() -> Vec<ConfigKey> {
    vec![ConfigKey::new("MISTRAL_API_KEY", true, true, None)]
}

/// True when `id` already satisfies Mistral's tool-call id constraint
/// (spec.md §4.2, §8 "matches `^[A-Za-z0-9]{1,9}$`").
fn is_valid_tool_call_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= NORMALIZED_ID_LEN && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Normalizes a tool-call id to Mistral's constraint. Idempotent (spec §8):
/// a string that already matches is returned unchanged; an oversized or
/// non-alphanumeric id is replaced by a 9-char base36 prefix of a stable hash
/// of the original (spec.md §4.2 concrete scenario 3).
pub fn normalize_tool_call_id(id: &str) -> String {
    if is_valid_tool_call_id(id) {
        return id.to_string();
    }
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    let mut value = hasher.finish();
    let mut digits = [0u8; NORMALIZED_ID_LEN];
    for slot in digits.iter_mut() {
        *slot = ID_ALPHABET[(value % ID_ALPHABET.len() as u64) as usize];
        value /= ID_ALPHABET.len() as u64;
    }
    String::from_utf8(digits.to_vec()).expect("alphabet is ASCII")
}

/// Sanitizes a tool/function name for Mistral's `[A-Za-z0-9_.-]+`
/// constraint, additionally recovering from a hallucinated JSON prefix by
/// keeping only the text after the last `}` (spec.md §4.2).
pub fn sanitize_mistral_function_name(name: &str) -> String {
    let after_brace = match name.rfind('}') {
        Some(idx) => &name[idx + 1..],
        None => name,
    };
    super::utils::sanitize_function_name(after_brace)
}

pub struct MistralProvider {
    client: ApiClient,
    model: ModelConfig,
}

impl MistralProvider {
    pub fn new(model: ModelConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let key = resolve_api_key(api_key, &["MISTRAL_API_KEY"])?;
        let host = resolve_param("MISTRAL_HOST", DEFAULT_HOST);
        let client = ApiClient::with_timeout(host, AuthMethod::BearerToken(key), DEFAULT_TIMEOUT)?;
        Ok(Self { client, model })
    }

    pub fn model_family(&self) -> &str {
        &self.model.model_name
    }

    fn message_to_native(&self, message: &Message) -> Option<Value> {
        if message.role == Role::Tool {
            return Some(json!({
                "role": "tool",
                "tool_call_id": message.tool_id.as_deref().map(normalize_tool_call_id).unwrap_or_default(),
                "content": message.content,
            }));
        }

        let role = match message.role {
            Role::Assistant => "assistant",
            _ => "user",
        };

        // Per spec.md §4.2, §8: an assistant turn with no content and no
        // tool calls is dropped outright — the API rejects it.
        if message.role == Role::Assistant && message.content.is_empty() && message.tool_calls.is_empty() {
            return None;
        }

        let mut native = json!({"role": role, "content": message.content});
        if message.role == Role::Assistant && !message.tool_calls.is_empty() {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    let id = normalize_tool_call_id(&call.id);
                    json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": sanitize_mistral_function_name(&call.name),
                            "arguments": call.arguments,
                        },
                    })
                })
                .collect();
            native["tool_calls"] = json!(calls);
        }
        Some(native)
    }

    fn convert_to_native(&self, request: &CompletionRequest) -> Vec<Value> {
        let mut native = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_prompt {
            native.push(json!({"role": "system", "content": system}));
        }
        for message in &request.messages {
            if message.role == Role::System {
                continue;
            }
            if let Some(attachment) = &message.native {
                if attachment.matches(PROVIDER_NAME, self.model_family()) {
                    native.push(attachment.payload.clone());
                    continue;
                }
                tracing::warn!("native attachment tag mismatch, re-converting message");
            }
            if let Some(converted) = self.message_to_native(message) {
                native.push(converted);
            }
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
                            "name": sanitize_mistral_function_name(&tool.name),
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
            cache_read_tokens: None,
            cache_write_tokens: None,
            cost: None,
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
impl Client for MistralProvider {
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
                                id: normalize_tool_call_id(id),
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

    fn provider() -> MistralProvider {
        MistralProvider::new(ModelConfig::new("mistral-large-latest"), Some("test-key".to_string())).unwrap()
    }

    #[test]
    fn scenario_id_normalization() {
        let normalized = normalize_tool_call_id("toolu_01ABCDEF_very_long_id");
        assert_eq!(normalized.len(), NORMALIZED_ID_LEN);
        assert!(normalized.bytes().all(|b| b.is_ascii_alphanumeric()));
        assert_ne!(normalized, "toolu_01ABCDEF_very_long_id");
    }

    #[test]
    fn id_normalization_is_idempotent() {
        let once = normalize_tool_call_id("toolu_01ABCDEF_very_long_id");
        let twice = normalize_tool_call_id(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn id_normalization_leaves_valid_ids_alone() {
        assert_eq!(normalize_tool_call_id("abc123"), "abc123");
    }

    #[test]
    fn id_normalization_is_deterministic() {
        let a = normalize_tool_call_id("same-input-twice!!");
        let b = normalize_tool_call_id("same-input-twice!!");
        assert_eq!(a, b);
    }

    #[test]
    fn hallucinated_json_prefix_in_name_is_stripped() {
        let name = r#"{"action":"search"}todo"#;
        assert_eq!(sanitize_mistral_function_name(name), "todo");
    }

    #[test]
    fn empty_assistant_turn_with_no_tool_calls_is_dropped() {
        let provider = provider();
        let messages = vec![
            Message::user().with_text("hi"),
            Message::assistant().with_text(""),
        ];
        let request = CompletionRequest::new(messages);
        let native = provider.convert_to_native(&request);
        assert_eq!(native.len(), 1);
    }

    #[test]
    fn assistant_turn_with_tool_calls_and_empty_content_is_kept() {
        let provider = provider();
        let messages = vec![
            Message::user().with_text("hi"),
            Message::assistant()
                .with_text("")
                .with_tool_calls(vec![ToolCallRecord::new("call1", "search", "{}")]),
        ];
        let request = CompletionRequest::new(messages);
        let native = provider.convert_to_native(&request);
        assert_eq!(native.len(), 2);
    }

    #[test]
    fn tool_call_ids_are_normalized_on_outbound() {
        let provider = provider();
        let message = Message::assistant()
            .with_tool_calls(vec![ToolCallRecord::new("toolu_way_too_long_to_be_valid", "search", "{}")]);
        let native = provider.message_to_native(&message).unwrap();
        let id = native["tool_calls"][0]["id"].as_str().unwrap();
        assert!(id.len() <= NORMALIZED_ID_LEN);
        assert!(id.bytes().all(|b| b.is_ascii_alphanumeric()));
    }
}
