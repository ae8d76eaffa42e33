//! Error types shared by every provider transport and the response parser.
//!
//! Grounded on `examples/block-goose/crates/goose/src/providers/errors.rs`: a
//! `thiserror`-derived enum with a `reqwest`/`anyhow` conversion layer so
//! transport code can use `?` against `anyhow::Result` internally and still
//! surface a typed error at the public boundary.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Construction error: {0}")]
    Construction(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Context length exceeded: {0}")]
    ContextLengthExceeded(String),

    #[error("Rate limit exceeded: {details}")]
    RateLimitExceeded {
        details: String,
        retry_delay: Option<Duration>,
    },

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Stream decode error: {0}")]
    StreamDecode(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Usage data error: {0}")]
    UsageError(String),

    #[error("Unsupported operation: {0}")]
    NotImplemented(String),
}

impl ProviderError {
    /// A short, stable label for telemetry dimensions (never free-form text).
    pub fn telemetry_type(&self) -> &'static str {
        match self {
            ProviderError::Construction(_) => "construction",
            ProviderError::Authentication(_) => "auth",
            ProviderError::Validation(_) => "validation",
            ProviderError::ContextLengthExceeded(_) => "context_length",
            ProviderError::RateLimitExceeded { .. } => "rate_limit",
            ProviderError::ServerError(_) => "server",
            ProviderError::NetworkError(_) => "network",
            ProviderError::RequestFailed(_) => "request",
            ProviderError::StreamDecode(_) => "stream_decode",
            ProviderError::ExecutionError(_) => "execution",
            ProviderError::UsageError(_) => "usage",
            ProviderError::NotImplemented(_) => "not_implemented",
        }
    }
}

const MAX_ECHO_LEN: usize = 200;

/// Truncates a string to at most `MAX_ECHO_LEN` chars for inclusion in error
/// messages, so a malformed multi-KB body never bloats a log line.
pub fn truncate_echo(s: &str) -> String {
    if s.chars().count() <= MAX_ECHO_LEN {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(MAX_ECHO_LEN).collect();
        format!("{truncated}...")
    }
}

fn is_network_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || (err.status().is_none() && err.is_request())
}

fn provider_error_from_reqwest(error: &reqwest::Error) -> ProviderError {
    if is_network_error(error) {
        let msg = if error.is_timeout() {
            "Request timed out — check your network connection and try again.".to_string()
        } else if error.is_connect() {
            if let Some(url) = error.url() {
                if let Some(host) = url.host_str() {
                    let port_info = url.port().map(|p| format!(":{p}")).unwrap_or_default();
                    format!(
                        "Could not connect to {host}{port_info} — check your network connection and try again."
                    )
                } else {
                    "Could not connect to the provider — check your network connection and try again."
                        .to_string()
                }
            } else {
                "Could not connect to the provider — check your network connection and try again."
                    .to_string()
            }
        } else {
            "Network error — check your network connection and try again.".to_string()
        };
        return ProviderError::NetworkError(msg);
    }

    let mut details = vec![];
    if let Some(status) = error.status() {
        details.push(format!("status: {status}"));
    }
    let msg = if details.is_empty() {
        error.to_string()
    } else {
        format!("{} ({})", error, details.join(", "))
    };
    ProviderError::RequestFailed(msg)
}

impl From<anyhow::Error> for ProviderError {
    fn from(error: anyhow::Error) -> Self {
        if let Some(reqwest_err) = error.downcast_ref::<reqwest::Error>() {
            return provider_error_from_reqwest(reqwest_err);
        }
        ProviderError::ExecutionError(error.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        provider_error_from_reqwest(&error)
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(error: serde_json::Error) -> Self {
        ProviderError::RequestFailed(format!("JSON error: {error}"))
    }
}

/// Maps a non-2xx HTTP response into the appropriate [`ProviderError`]
/// variant. Shared by every provider so status handling stays uniform.
pub fn map_http_error(status: StatusCode, body: Option<&serde_json::Value>) -> ProviderError {
    let message = body
        .and_then(|b| {
            b.get("error")
                .and_then(|e| e.get("message").or_else(|| e.as_str().map(|_| e)))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            body.map(|b| truncate_echo(&b.to_string()))
                .unwrap_or_else(|| "<empty body>".to_string())
        });

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Authentication(message)
        }
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimitExceeded {
            details: message,
            retry_delay: None,
        },
        StatusCode::BAD_REQUEST => {
            let lower = message.to_lowercase();
            if lower.contains("too long") || lower.contains("too many") || lower.contains("context") {
                ProviderError::ContextLengthExceeded(message)
            } else {
                ProviderError::RequestFailed(format!("{status}: {message}"))
            }
        }
        status if status.is_server_error() => ProviderError::ServerError(message),
        status => ProviderError::RequestFailed(format!("{status}: {message}")),
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed to parse JSON from model output: {message} (input: {truncated_input:?})")]
pub struct ParseError {
    pub message: String,
    pub truncated_input: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, input: &str) -> Self {
        Self {
            message: message.into(),
            truncated_input: truncate_echo(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_echo_leaves_short_strings_alone() {
        assert_eq!(truncate_echo("hello"), "hello");
    }

    #[test]
    fn truncate_echo_caps_long_strings() {
        let long = "a".repeat(500);
        let echoed = truncate_echo(&long);
        assert!(echoed.ends_with("..."));
        assert_eq!(echoed.chars().count(), MAX_ECHO_LEN + 3);
    }

    #[test]
    fn map_http_error_classifies_context_length() {
        let body = serde_json::json!({"error": {"message": "prompt is too long for this model"}});
        let err = map_http_error(StatusCode::BAD_REQUEST, Some(&body));
        assert!(matches!(err, ProviderError::ContextLengthExceeded(_)));
    }

    #[test]
    fn map_http_error_classifies_auth() {
        let err = map_http_error(StatusCode::UNAUTHORIZED, None);
        assert!(matches!(err, ProviderError::Authentication(_)));
    }
}
