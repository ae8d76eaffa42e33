//! A small HTTP client wrapper shared by every transport.
//!
//! Grounded closely on
//! `examples/block-goose/crates/goose/src/providers/api_client.rs`: an
//! `AuthMethod` enum, a host + default-header `reqwest::Client` wrapper, and
//! a per-request builder. Trimmed of its mTLS/OpenTelemetry propagation
//! machinery (out of scope for this core — those are ambient deployment
//! concerns of the full agent, not the provider protocol layer) while
//! keeping its bearer/api-key auth switch and JSON request/response helpers
//! intact.

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Response, StatusCode,
};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::error::ProviderError;

pub enum AuthMethod {
    BearerToken(String),
    ApiKey { header_name: String, key: String },
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::BearerToken(_) => f.debug_tuple("BearerToken").field(&"[hidden]").finish(),
            AuthMethod::ApiKey { header_name, .. } => f
                .debug_struct("ApiKey")
                .field("header_name", header_name)
                .field("key", &"[hidden]")
                .finish(),
        }
    }
}

pub struct ApiResponse {
    pub status: StatusCode,
    pub payload: Option<Value>,
}

impl ApiResponse {
    pub async fn from_response(response: Response) -> Result<Self, ProviderError> {
        let status = response.status();
        let payload = response.json().await.ok();
        Ok(Self { status, payload })
    }
}

pub struct ApiClient {
    client: Client,
    host: String,
    auth: AuthMethod,
    default_headers: HeaderMap,
}

impl ApiClient {
    /// No per-request timeout: Anthropic/Google/OpenAI-native rely on the
    /// caller's context to bound a call, not a client-side deadline (spec §5
    /// "unbounded for Anthropic/Google/OpenAI clients").
    pub fn new(host: impl Into<String>, auth: AuthMethod) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::Construction(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            host: host.into(),
            auth,
            default_headers: HeaderMap::new(),
        })
    }

    pub fn with_timeout(
        host: impl Into<String>,
        auth: AuthMethod,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Construction(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            host: host.into(),
            auth,
            default_headers: HeaderMap::new(),
        })
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self, ProviderError> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| ProviderError::Construction(format!("invalid header name {key}: {e}")))?;
        let val = HeaderValue::from_str(value)
            .map_err(|e| ProviderError::Construction(format!("invalid header value for {key}: {e}")))?;
        self.default_headers.insert(name, val);
        Ok(self)
    }

    fn build_url(&self, path: &str) -> Result<url::Url, ProviderError> {
        let mut base = url::Url::parse(&self.host)
            .map_err(|e| ProviderError::Construction(format!("invalid base URL: {e}")))?;
        let base_path = base.path();
        if !base_path.is_empty() && base_path != "/" && !base_path.ends_with('/') {
            base.set_path(&format!("{base_path}/"));
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| ProviderError::Construction(format!("failed to construct URL: {e}")))
    }

    pub fn request<'a>(&'a self, path: &'a str) -> ApiRequestBuilder<'a> {
        ApiRequestBuilder {
            client: self,
            path,
            headers: HeaderMap::new(),
        }
    }

    pub async fn api_post(&self, path: &str, payload: &Value) -> Result<ApiResponse, ProviderError> {
        self.request(path).api_post(payload).await
    }

    pub async fn api_get(&self, path: &str) -> Result<ApiResponse, ProviderError> {
        self.request(path).api_get().await
    }
}

pub struct ApiRequestBuilder<'a> {
    client: &'a ApiClient,
    path: &'a str,
    headers: HeaderMap,
}

impl<'a> ApiRequestBuilder<'a> {
    pub fn header(mut self, key: &str, value: &str) -> Result<Self, ProviderError> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| ProviderError::Construction(format!("invalid header name {key}: {e}")))?;
        let val = HeaderValue::from_str(value)
            .map_err(|e| ProviderError::Construction(format!("invalid header value for {key}: {e}")))?;
        self.headers.insert(name, val);
        Ok(self)
    }

    async fn send<F>(&self, build: F) -> Result<reqwest::RequestBuilder, ProviderError>
    where
        F: FnOnce(url::Url, &Client) -> reqwest::RequestBuilder,
    {
        let url = self.client.build_url(self.path)?;
        let mut request = build(url, &self.client.client);
        request = request.headers(self.client.default_headers.clone());
        request = request.headers(self.headers.clone());
        request = match &self.client.auth {
            AuthMethod::BearerToken(token) => {
                request.header("Authorization", format!("Bearer {token}"))
            }
            AuthMethod::ApiKey { header_name, key } => request.header(header_name.as_str(), key),
        };
        Ok(request)
    }

    pub async fn response_post(self, payload: &Value) -> Result<Response, ProviderError> {
        tracing::debug!(
            "LLM_REQUEST: {}",
            serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string())
        );
        let request = self.send(|url, client| client.post(url)).await?;
        Ok(request.json(payload).send().await?)
    }

    pub async fn api_post(self, payload: &Value) -> Result<ApiResponse, ProviderError> {
        let response = self.response_post(payload).await?;
        ApiResponse::from_response(response).await
    }

    pub async fn response_get(self) -> Result<Response, ProviderError> {
        let request = self.send(|url, client| client.get(url)).await?;
        Ok(request.send().await?)
    }

    pub async fn api_get(self) -> Result<ApiResponse, ProviderError> {
        let response = self.response_get().await?;
        ApiResponse::from_response(response).await
    }
}

/// Converts a completed response into a typed [`ApiResponse`], applying the
/// shared non-2xx -> [`ProviderError`] mapping used by every transport.
pub async fn api_call_result(response: Response) -> Result<Value, ProviderError> {
    let status = response.status();
    let payload: Option<Value> = response.json().await.ok();
    if status.is_success() {
        payload.ok_or_else(|| ProviderError::RequestFailed("response body is not valid JSON".to_string()))
    } else {
        Err(crate::error::map_http_error(status, payload.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_joins_path_segments() {
        let client = ApiClient::new(
            "https://api.example.com",
            AuthMethod::BearerToken("secret".to_string()),
        )
        .unwrap();
        let url = client.build_url("v1/messages").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/messages");
    }

    #[test]
    fn build_url_respects_existing_base_path() {
        let client = ApiClient::new(
            "https://api.example.com/proxy",
            AuthMethod::BearerToken("secret".to_string()),
        )
        .unwrap();
        let url = client.build_url("v1/messages").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/proxy/v1/messages");
    }
}
