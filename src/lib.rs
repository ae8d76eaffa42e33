//! Provider-agnostic LLM client core for a coding-assistant CLI.
//!
//! Grounded on `examples/block-goose/crates/goose-llm/src/lib.rs`'s flat
//! `mod X; pub use X::Y;` shape, extended with additional modules (`router`,
//! `registry`, `conversation`, `parser`) alongside the original split of
//! message/model/completion/providers.

mod completion;
mod config;
mod conversation;
mod error;
mod message;
mod model;
mod parser;
mod registry;
mod router;
mod providers;

pub use completion::{
    CacheTtl, ChunkSink, Client, CompletionRequest, CompletionResponse, ToolCall, ToolCallFunction,
    ToolDescriptor, Usage,
};
pub use config::{env_hint, resolve_api_key, resolve_param, ConfigKey};
pub use conversation::ConversationStore;
pub use error::{map_http_error, truncate_echo, ParseError, ProviderError};
pub use message::{Message, NativeAttachment, Role, ToolCallRecord};
pub use model::ModelConfig;
pub use parser::parse_json;
pub use registry::{
    list_models_or_fallback, lookup as provider_info, providers as provider_registry, ProviderInfo,
};
pub use router::{build_client, classify, RoutedProvider};

pub use providers::anthropic::AnthropicProvider;
pub use providers::cerebras::CerebrasProvider;
pub use providers::google::GoogleProvider;
pub use providers::mistral::MistralProvider;
pub use providers::openai::OpenAiCompatibleProvider;
pub use providers::openrouter::OpenRouterProvider;
