//! The unified conversational message model.
//!
//! Grounded on `examples/block-goose/crates/goose/src/message.rs` (role +
//! content-list shape), collapsed to a single `content` string plus explicit
//! optional fields for tool calls / tool linkage / reasoning instead of a
//! content-block list, because every vendor's content-block layout is
//! reconstructed from these fields by its own converter — carrying a block
//! list here would just be another lossy unified form.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

/// A single assistant-originated request to invoke a named function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments — always a string on the wire (spec §3).
    pub arguments: String,
    /// Opaque base64 thought signature Google GenAI attaches to a function
    /// call produced under extended thinking; preserved verbatim across
    /// round-trips (spec §3, §4.2 "Google GenAI"). `None` for every other
    /// vendor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
    /// Google GenAI's `thought` boolean, marking a function call emitted as
    /// part of an extended-thinking step; round-trips alongside
    /// `thought_signature` (spec §4.2 "Google GenAI"). `false` for every
    /// other vendor.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub thought: bool,
}

impl ToolCallRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            thought_signature: None,
            thought: false,
        }
    }

    pub fn with_thought_signature(mut self, signature: impl Into<String>) -> Self {
        self.thought_signature = Some(signature.into());
        self
    }

    pub fn with_thought(mut self, thought: bool) -> Self {
        self.thought = thought;
        self
    }

    /// Generates the `tool_call_<index>` placeholder id used when a vendor's
    /// wire payload omits an id (spec §3 tool-call invariants).
    pub fn generated_id(index: usize) -> String {
        format!("tool_call_{index}")
    }

    pub fn parsed_arguments(&self) -> Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            Ok(Value::Object(Default::default()))
        } else {
            serde_json::from_str(&self.arguments)
        }
    }
}

/// A provider-specific payload carried alongside a unified message so it can
/// be re-serialized verbatim, preserving cache keys (spec §3, §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeAttachment {
    pub provider: String,
    pub model_family: String,
    pub payload: Value,
}

impl NativeAttachment {
    pub fn new(provider: impl Into<String>, model_family: impl Into<String>, payload: Value) -> Self {
        Self {
            provider: provider.into(),
            model_family: model_family.into(),
            payload,
        }
    }

    /// True when this attachment was produced for the exact outbound target
    /// and can be shipped verbatim instead of being re-converted.
    pub fn matches(&self, provider: &str, model_family: &str) -> bool {
        self.provider == provider && self.model_family == model_family
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Unix timestamp (seconds) this message was created.
    pub created: i64,
    pub content: String,
    /// Assistant-only: ordered tool-call requests emitted in this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Tool-role only: which prior tool-call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    /// Tool-role only: the name of the tool that produced this result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Assistant-only: chain-of-thought / reasoning text, when the vendor
    /// exposes it (preserved for OpenAI-family on round-trip, spec §8).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<NativeAttachment>,
}

impl Message {
    fn new(role: Role) -> Self {
        Self {
            role,
            created: Utc::now().timestamp(),
            content: String::new(),
            tool_calls: Vec::new(),
            tool_id: None,
            tool_name: None,
            reasoning: None,
            native: None,
        }
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    pub fn system() -> Self {
        Self::new(Role::System)
    }

    pub fn tool() -> Self {
        Self::new(Role::Tool)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.content = text.into();
        self
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallRecord>) -> Self {
        self.tool_calls = calls;
        self
    }

    pub fn with_tool_result(mut self, tool_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        self.tool_id = Some(tool_id.into());
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_native(mut self, native: NativeAttachment) -> Self {
        self.native = Some(native);
        self
    }

    pub fn is_tool_call(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_tool_response(&self) -> bool {
        self.role == Role::Tool
    }

    /// Per spec §3: a tool-role message without a `tool_id` is downgraded to
    /// a plain user text message rather than dropped, as long as it carries
    /// content. Returns `self` unchanged when it's already well-formed or
    /// has nothing worth keeping.
    pub fn downgrade_if_unlinked(mut self) -> Self {
        if self.role == Role::Tool && self.tool_id.is_none() {
            if self.content.trim().is_empty() {
                return self;
            }
            self.role = Role::User;
            self.tool_name = None;
        }
        self
    }

    /// Assigns placeholder ids (`tool_call_<index>`) to any tool call in this
    /// turn that arrived without one.
    pub fn normalize_tool_call_ids(mut self) -> Self {
        for (index, call) in self.tool_calls.iter_mut().enumerate() {
            if call.id.trim().is_empty() {
                call.id = ToolCallRecord::generated_id(index);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_no_tool_calls() {
        let msg = Message::user().with_text("hi");
        assert!(!msg.is_tool_call());
        assert_eq!(msg.content, "hi");
    }

    #[test]
    fn unlinked_tool_message_downgrades_to_user_text() {
        let msg = Message::tool().with_text("some result");
        let downgraded = msg.downgrade_if_unlinked();
        assert_eq!(downgraded.role, Role::User);
        assert_eq!(downgraded.content, "some result");
    }

    #[test]
    fn empty_unlinked_tool_message_is_left_alone() {
        let msg = Message::tool();
        let downgraded = msg.clone().downgrade_if_unlinked();
        assert_eq!(downgraded, msg);
    }

    #[test]
    fn normalize_tool_call_ids_fills_missing_ids() {
        let msg = Message::assistant()
            .with_tool_calls(vec![ToolCallRecord::new("", "search", "{}")])
            .normalize_tool_call_ids();
        assert_eq!(msg.tool_calls[0].id, "tool_call_0");
    }

    #[test]
    fn native_attachment_matches_exact_provider_and_family() {
        let native = NativeAttachment::new("anthropic", "claude-4", serde_json::json!({}));
        assert!(native.matches("anthropic", "claude-4"));
        assert!(!native.matches("anthropic", "claude-3"));
        assert!(!native.matches("openai", "claude-4"));
    }
}
