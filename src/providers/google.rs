//! Google GenAI (Gemini) transport and native converter.
//!
//! Grounded on `examples/block-goose/crates/goose/src/providers/google.rs` for
//! the transport shell (host, `x-goog-api-key` header, `v1beta/models`
//! listing) and on
//! `examples/grafbase-nexus/crates/llm/src/provider/google/input.rs` for the
//! `contents`/`parts`/role mapping and the `functionResponse` wrapping rule
//! (wrap a non-object tool result as `{"result": ...}` rather than rejecting
//! it), since `block-goose`'s own `formats::google` request builder was not
//! present in the retrieval pack. Thought-signature handling is new: it
//! round-trips through the `base64` crate already in the dependency stack.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
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
use super::utils::sanitize_function_name;

pub const PROVIDER_NAME: &str = "google";
const DEFAULT_HOST: &str = "https://generativelanguage.googleapis.com";

pub fn config_keys() -> Vec<ConfigKey> {
    vec![
        ConfigKey::new("GEMINI_API_KEY", true, true, None),
        ConfigKey::new("GOOGLE_API_KEY", false, true, None),
    ]
}

pub struct GoogleProvider {
    client: ApiClient,
    model: ModelConfig,
}

impl GoogleProvider {
    pub fn new(model: ModelConfig, api_key: Option<String>) -> Result<Self, ProviderError> {
        let key = resolve_api_key(api_key, &["GEMINI_API_KEY", "GOOGLE_API_KEY"])?;
        let host = resolve_param("GOOGLE_HOST", DEFAULT_HOST);
        let client = ApiClient::new(
            host,
            AuthMethod::ApiKey {
                header_name: "x-goog-api-key".to_string(),
                key,
            },
        )?
        .with_header("Content-Type", "application/json")?;
        Ok(Self { client, model })
    }

    pub fn model_family(&self) -> &str {
        &self.model.model_name
    }

    fn generate_path(&self) -> String {
        format!("v1beta/models/{}:generateContent", self.model.model_name)
    }

    fn stream_path(&self) -> String {
        format!(
            "v1beta/models/{}:streamGenerateContent?alt=sse",
            self.model.model_name
        )
    }

    fn thought_signature_to_wire(signature: &str) -> Option<String> {
        BASE64.decode(signature).ok().map(|bytes| BASE64.encode(bytes))
    }

    fn thought_signature_from_wire(signature: &str) -> Option<String> {
        BASE64.decode(signature).ok().map(|bytes| BASE64.encode(bytes))
    }

    /// Wraps a tool-result's content into the JSON object `functionResponse`
    /// requires, per spec.md §4.2: parse as JSON, use it as-is if it's
    /// already an object, otherwise wrap non-object JSON or non-JSON text as
    /// `{"result": ...}` (grounded on grafbase-nexus's google input converter).
    fn function_response_value(content: &str) -> Value {
        match serde_json::from_str::<Value>(content) {
            Ok(value) if value.is_object() => value,
            _ => json!({"result": content}),
        }
    }

    fn message_to_native(&self, message: &Message) -> Value {
        if message.role == Role::Tool {
            let name = message.tool_name.clone().unwrap_or_default();
            return json!({
                "role": "user",
                "parts": [{
                    "functionResponse": {
                        "name": name,
                        "response": Self::function_response_value(&message.content),
                    },
                }],
            });
        }

        let role = match message.role {
            Role::Assistant => "model",
            _ => "user",
        };

        let mut parts: Vec<Value> = Vec::new();
        if !message.content.is_empty() {
            parts.push(json!({"text": message.content}));
        }
        for (index, call) in message.tool_calls.iter().enumerate() {
            let name = sanitize_function_name(&call.name);
            let args = call.parsed_arguments().unwrap_or_else(|_| json!({}));
            let mut function_call = json!({"name": name, "args": args});
            if let Some(signature) = &call.thought_signature {
                if let Some(wire_signature) = Self::thought_signature_to_wire(signature) {
                    function_call["thoughtSignature"] = json!(wire_signature);
                }
            }
            if call.thought {
                function_call["thought"] = json!(true);
            }
            let _ = index;
            parts.push(json!({"functionCall": function_call}));
        }
        if parts.is_empty() {
            parts.push(json!({"text": ""}));
        }
        json!({"role": role, "parts": parts})
    }

    fn convert_to_native(&self, request: &CompletionRequest) -> Vec<Value> {
        let mut contents = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            if message.role == Role::System {
                continue;
            }
            if let Some(attachment) = &message.native {
                if attachment.matches(PROVIDER_NAME, self.model_family()) {
                    contents.push(attachment.payload.clone());
                    continue;
                }
                tracing::warn!("native attachment tag mismatch, re-converting message");
            }
            contents.push(self.message_to_native(message));
        }
        contents
    }

    fn native_to_message(&self, native: &Value) -> Message {
        let role_str = native.get("role").and_then(Value::as_str).unwrap_or("user");
        let mut message = if role_str == "model" {
            Message::assistant()
        } else {
            Message::user()
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut tool_name = None;
        let mut is_tool_response = false;

        if let Some(parts) = native.get("parts").and_then(Value::as_array) {
            for (index, part) in parts.iter().enumerate() {
                if let Some(t) = part.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                } else if let Some(call) = part.get("functionCall") {
                    let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                    let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                    let mut record =
                        ToolCallRecord::new(ToolCallRecord::generated_id(index), name, args.to_string());
                    if let Some(signature) = call.get("thoughtSignature").and_then(Value::as_str) {
                        if let Some(stored) = Self::thought_signature_from_wire(signature) {
                            record = record.with_thought_signature(stored);
                        }
                    }
                    if call.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                        record = record.with_thought(true);
                    }
                    tool_calls.push(record);
                } else if let Some(response) = part.get("functionResponse") {
                    is_tool_response = true;
                    tool_name = response
                        .get("name")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    if let Some(resp) = response.get("response") {
                        text.push_str(&resp.to_string());
                    }
                }
            }
        }

        if is_tool_response {
            message.role = Role::Tool;
            message.tool_name = tool_name;
        }
        message.content = text;
        message.tool_calls = tool_calls;
        message.native = Some(NativeAttachment::new(PROVIDER_NAME, self.model_family(), native.clone()));
        message
    }

    fn build_request(&self, request: &CompletionRequest) -> Result<Value, ProviderError> {
        let contents = self.convert_to_native(request);
        crate::completion::ensure_non_empty(contents.len())?;

        let mut body = json!({"contents": contents});
        if let Some(system) = &request.system_prompt {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(temp) = request.temperature {
            generation_config.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max_tokens) = request.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = Value::Object(generation_config);
        }

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": sanitize_function_name(&tool.name),
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }
        Ok(body)
    }

    fn response_to_completion(&self, body: &Value) -> CompletionResponse {
        let candidate = body
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first());

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(parts) = candidate
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
        {
            for (index, part) in parts.iter().enumerate() {
                if let Some(t) = part.get("text").and_then(Value::as_str) {
                    content.push_str(t);
                } else if let Some(call) = part.get("functionCall") {
                    let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                    let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                    tool_calls.push(ToolCall::new(ToolCallRecord::generated_id(index), name, args.to_string()));
                }
            }
        }
        let stop_reason = candidate
            .and_then(|c| c.get("finishReason"))
            .and_then(Value::as_str)
            .unwrap_or("STOP")
            .to_string();
        let usage = body.get("usageMetadata").map(|u| Usage {
            input_tokens: u.get("promptTokenCount").and_then(Value::as_u64).map(|n| n as u32),
            output_tokens: u
                .get("candidatesTokenCount")
                .and_then(Value::as_u64)
                .map(|n| n as u32),
            cache_read_tokens: u
                .get("cachedContentTokenCount")
                .and_then(Value::as_u64)
                .map(|n| n as u32),
            cache_write_tokens: None,
            cost: None,
        });
        CompletionResponse {
            content,
            tool_calls,
            stop_reason,
            usage,
        }
    }
}

struct PendingToolCall {
    name: String,
    arguments: String,
}

#[async_trait]
impl Client for GoogleProvider {
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
        let path = self.generate_path();
        let response = self.client.request(&path).response_post(&body).await?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(map_http_error(status, Some(&payload)));
        }
        Ok(self.response_to_completion(&payload))
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        sink: &mut ChunkSink<'_>,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = self.build_request(request)?;
        let path = self.stream_path();
        let response = self.client.request(&path).response_post(&body).await?;
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
        let mut tool_calls: HashMap<usize, PendingToolCall> = HashMap::new();
        let mut order: Vec<usize> = Vec::new();
        let mut stop_reason = "STOP".to_string();

        while let Some(line) = lines
            .try_next()
            .await
            .map_err(|e| ProviderError::StreamDecode(e.to_string()))?
        {
            let Some(data) = super::utils::sse_data_payload(&line) else {
                continue;
            };
            let chunk: Value = serde_json::from_str(data)
                .map_err(|e| ProviderError::StreamDecode(format!("invalid chunk JSON: {e}")))?;
            let Some(candidate) = chunk.get("candidates").and_then(Value::as_array).and_then(|c| c.first())
            else {
                continue;
            };
            if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
                stop_reason = reason.to_string();
            }
            let Some(parts) = candidate
                .get("content")
                .and_then(|c| c.get("parts"))
                .and_then(Value::as_array)
            else {
                continue;
            };
            for (index, part) in parts.iter().enumerate() {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    if !super::utils::is_blank_delta(text) {
                        sink(text)?;
                    }
                    content.push_str(text);
                } else if let Some(call) = part.get("functionCall") {
                    let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                    let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                    tool_calls.insert(
                        index,
                        PendingToolCall {
                            name: name.to_string(),
                            arguments: args.to_string(),
                        },
                    );
                    order.push(index);
                }
            }
        }

        let tool_calls = order
            .into_iter()
            .filter_map(|index| tool_calls.remove(&index).map(|p| (index, p)))
            .map(|(index, pending)| ToolCall::new(ToolCallRecord::generated_id(index), pending.name, pending.arguments))
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
        let response = self.client.request("v1beta/models").response_get().await?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(map_http_error(status, Some(&payload)));
        }
        let mut models: Vec<String> = payload
            .get("models")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get("name").and_then(Value::as_str))
                    .map(|name| name.rsplit('/').next().unwrap_or(name).to_string())
                    .collect()
            })
            .unwrap_or_default();
        models.sort();
        Ok(models)
    }

    async fn validate_api_key(&self) -> Result<(), ProviderError> {
        self.list_models().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionRequest, ToolDescriptor};

    fn provider() -> GoogleProvider {
        GoogleProvider::new(ModelConfig::new("gemini-2.5-pro"), Some("test-key".to_string())).unwrap()
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let provider = provider();
        let message = Message::assistant().with_text("hi");
        let native = provider.message_to_native(&message);
        assert_eq!(native["role"], "model");
    }

    #[test]
    fn tool_call_round_trips_with_thought_signature() {
        let provider = provider();
        let signature = BASE64.encode(b"opaque-thought-bytes");
        let message = Message::assistant()
            .with_tool_calls(vec![ToolCallRecord::new("ignored_id", "search", "{\"q\":1}")
                .with_thought_signature(signature.clone())]);
        let native = provider.message_to_native(&message);
        let restored = provider.native_to_message(&native);
        assert_eq!(restored.tool_calls[0].name, "search");
        assert_eq!(restored.tool_calls[0].thought_signature, Some(signature));
    }

    #[test]
    fn tool_call_round_trips_thought_boolean() {
        let provider = provider();
        let message = Message::assistant().with_tool_calls(vec![ToolCallRecord::new(
            "ignored_id",
            "search",
            "{\"q\":1}",
        )
        .with_thought(true)]);
        let native = provider.message_to_native(&message);
        assert_eq!(native["parts"][0]["functionCall"]["thought"], true);
        let restored = provider.native_to_message(&native);
        assert!(restored.tool_calls[0].thought);

        let plain = ToolCallRecord::new("id2", "search", "{}");
        let plain_message = Message::assistant().with_tool_calls(vec![plain]);
        let plain_native = provider.message_to_native(&plain_message);
        assert!(plain_native["parts"][0]["functionCall"].get("thought").is_none());
        let plain_restored = provider.native_to_message(&plain_native);
        assert!(!plain_restored.tool_calls[0].thought);
    }

    #[test]
    fn tool_response_wraps_non_object_content_as_result() {
        let message = Message::tool().with_text("42").with_tool_result("call_1", "search");
        let provider = provider();
        let native = provider.message_to_native(&message);
        assert_eq!(native["parts"][0]["functionResponse"]["response"]["result"], "42");
    }

    #[test]
    fn tool_response_passes_through_object_content() {
        let message = Message::tool()
            .with_text("{\"ok\":true}")
            .with_tool_result("call_1", "search");
        let provider = provider();
        let native = provider.message_to_native(&message);
        assert_eq!(native["parts"][0]["functionResponse"]["response"]["ok"], true);
    }

    #[test]
    fn no_cache_control_markers_are_ever_emitted() {
        let provider = provider();
        let request = CompletionRequest::new(vec![Message::user().with_text("hi")])
            .with_system_prompt("sys")
            .with_tools(vec![ToolDescriptor::new("t1", "d", json!({}))])
            .with_caching(true, None);
        let body = provider.build_request(&request).unwrap();
        assert!(!body.to_string().contains("cache_control"));
    }
}
