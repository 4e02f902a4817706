//! HTTP transport to the scoring provider

use async_trait::async_trait;
use serde_json::json;

use rl_core::error::ScoreError;
use rl_core::settings::API_KEY_HEADER;

/// One scoring request: `POST {endpoint}` with `{"url": url}`.
#[derive(Debug, Clone, Copy)]
pub struct ScoreRequest<'a> {
    pub endpoint: &'a str,
    pub url: &'a str,
    pub api_key: Option<&'a str>,
}

/// Status and body of a provider response, whatever the status.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request. Only transport-level failures are errors; non-2xx
    /// statuses come back as responses.
    async fn post_json(&self, request: ScoreRequest<'_>) -> Result<TransportResponse, ScoreError>;
}

/// [`Transport`] over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ScoreError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("risklens/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScoreError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, request: ScoreRequest<'_>) -> Result<TransportResponse, ScoreError> {
        let mut builder = self
            .client
            .post(request.endpoint)
            .json(&json!({ "url": request.url }));
        if let Some(key) = request.api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ScoreError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ScoreError::Transport(format!("Failed to read response body: {}", e)))?;

        log::debug!("POST {} -> {} ({} bytes)", request.endpoint, status, body.len());
        Ok(TransportResponse { status, body })
    }
}
