//! `ModelConfig`: the opaque model identifier plus request-shaping knobs.
//!
//! Grounded on `examples/block-goose/crates/goose/src/model.rs`. Trimmed to
//! the fields the provider core actually consumes — context-window bookkeeping
//! and the "predefined models" override layer are orchestration concerns out
//! of this crate's scope.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    /// A cheaper/faster sibling model this provider can use for auxiliary
    /// calls; the core only stores the alias, orchestration decides when to
    /// reach for it.
    pub fast_model: Option<String>,
}

impl ModelConfig {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            temperature: None,
            max_tokens: None,
            fast_model: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<i32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_fast(mut self, fast_model: impl Into<String>) -> Self {
        self.fast_model = Some(fast_model.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_compose() {
        let cfg = ModelConfig::new("gpt-4o")
            .with_temperature(Some(0.2))
            .with_max_tokens(Some(1024))
            .with_fast("gpt-4o-mini");
        assert_eq!(cfg.model_name, "gpt-4o");
        assert_eq!(cfg.temperature, Some(0.2));
        assert_eq!(cfg.fast_model.as_deref(), Some("gpt-4o-mini"));
    }
}
