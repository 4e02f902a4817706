//! Scoring Client
//!
//! One URL in, one [`ScoreResult`] out. The client never returns an error:
//! invalid input, timeouts, transport failures, non-2xx statuses and
//! malformed bodies all become unscored, fail-open results with `reason` and
//! `error` filled in.

use std::sync::Arc;
use std::time::Duration;

use rl_core::error::ScoreError;
use rl_core::normalize::{from_error, normalize_response};
use rl_core::settings::Settings;
use rl_core::types::ScoreResult;
use rl_core::url::parse_http_url;

use crate::transport::{ScoreRequest, Transport};

/// Where and how to reach the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl From<&Settings> for ScoringConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            endpoint: settings.score_endpoint(),
            api_key: settings.api_key.clone(),
            timeout: settings.request_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct ScoringClient {
    transport: Arc<dyn Transport>,
    config: ScoringConfig,
}

impl ScoringClient {
    pub fn new(transport: Arc<dyn Transport>, config: ScoringConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score one URL.
    pub async fn score(&self, url: &str) -> ScoreResult {
        if let Err(e) = parse_http_url(url) {
            log::debug!("Not scoring {}: {}", url, e);
            return from_error(&e, None);
        }

        let request = ScoreRequest {
            endpoint: &self.config.endpoint,
            url,
            api_key: self.config.api_key.as_deref(),
        };

        match tokio::time::timeout(self.config.timeout, self.transport.post_json(request)).await {
            Ok(Ok(response)) => normalize_response(response.status, &response.body),
            Ok(Err(e)) => {
                log::warn!("Scoring {} failed: {}", url, e);
                from_error(&e, None)
            }
            Err(_) => {
                let e = ScoreError::Timeout(self.config.timeout);
                log::warn!("Scoring {} failed: {}", url, e);
                from_error(&e, None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use rl_core::types::Label;
    use std::sync::Mutex;

    struct CannedTransport {
        response: Result<TransportResponse, ScoreError>,
        delay: Duration,
        seen: Mutex<Vec<(String, String, Option<String>)>>,
    }

    impl CannedTransport {
        fn new(status: u16, body: &str) -> Self {
            Self {
                response: Ok(TransportResponse {
                    status,
                    body: body.to_string(),
                }),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn post_json(
            &self,
            request: ScoreRequest<'_>,
        ) -> Result<TransportResponse, ScoreError> {
            self.seen.lock().unwrap().push((
                request.endpoint.to_string(),
                request.url.to_string(),
                request.api_key.map(str::to_string),
            ));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.clone()
        }
    }

    fn client(transport: Arc<CannedTransport>) -> ScoringClient {
        let mut settings = Settings::default();
        settings.api_base_url = "http://scorer.test/".to_string();
        settings.api_key = Some("secret".to_string());
        ScoringClient::new(transport, ScoringConfig::from(&settings))
    }

    #[tokio::test]
    async fn test_success() {
        let transport = Arc::new(CannedTransport::new(
            200,
            r#"{"verdict":"phishing","prob_phishing":0.91,"score":91.0}"#,
        ));
        let result = client(transport.clone()).score("https://evil.test/login").await;
        assert_eq!(result.score, Some(91.0));
        assert_eq!(result.label, Label::Danger);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            (
                "http://scorer.test/score".to_string(),
                "https://evil.test/login".to_string(),
                Some("secret".to_string())
            )
        );
    }

    #[tokio::test]
    async fn test_invalid_url_makes_no_request() {
        let transport = Arc::new(CannedTransport::new(200, r#"{"score": 99}"#));
        let client = client(transport.clone());

        for url in ["ftp://files.test/", "not a url", "chrome://settings"] {
            let result = client.score(url).await;
            assert_eq!(result.score, None);
            assert_eq!(result.label, Label::Safe);
            assert_eq!(result.reason, "invalid URL / unsupported scheme");
        }
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_open() {
        let mut transport = CannedTransport::new(200, r#"{"score": 99}"#);
        transport.delay = Duration::from_secs(120);
        let result = client(Arc::new(transport)).score("https://slow.test/").await;

        assert_eq!(result.score, None);
        assert_eq!(result.label, Label::Safe);
        assert!(result.reason.contains("unreachable"));
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_transport_error_fails_open() {
        let mut transport = CannedTransport::new(200, "");
        transport.response = Err(ScoreError::Transport("connection refused".into()));
        let result = client(Arc::new(transport)).score("https://down.test/").await;
        assert_eq!(result.score, None);
        assert_eq!(result.reason, "Network error");
        assert!(result.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_non_success_status() {
        let transport = Arc::new(CannedTransport::new(500, r#"{"error": "model not loaded"}"#));
        let result = client(transport).score("https://x.test/").await;
        assert_eq!(result.score, None);
        assert_eq!(result.reason, "model not loaded");
        assert!(result.raw.is_some());
    }
}
