//! Shared fixtures for gatekeeper integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use rl_client::{Gatekeeper, ScoreRequest, Transport, TransportResponse};
use rl_core::{ManualClock, MemoryStorage, ScoreError};

pub const WARNING_PAGE: &str = "moz-extension://test-uuid/warning.html";

/// How the fake provider answers for one host.
#[derive(Debug, Clone)]
pub enum Reply {
    Score(f64),
    Status(u16, String),
    Hang,
}

/// Scoring provider double: scripted replies per host, a call counter, and
/// an optional delay to hold calls in flight.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<HashMap<String, Reply>>,
    calls: AtomicUsize,
    delay: Mutex<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, host: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(host.to_string(), reply);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedProvider {
    async fn post_json(&self, request: ScoreRequest<'_>) -> Result<TransportResponse, ScoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let host = rl_core::url::hostname_of(request.url).unwrap_or_default();
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&host)
            .cloned()
            .unwrap_or(Reply::Score(10.0));
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match reply {
            Reply::Score(score) => Ok(TransportResponse {
                status: 200,
                body: json!({
                    "score": score,
                    "verdict": if score >= 70.0 { "phishing" } else { "legitimate" },
                    "why_flagged": { "has_ip_address": 0.4, "url_length": -0.1 },
                })
                .to_string(),
            }),
            Reply::Status(status, body) => Ok(TransportResponse { status, body }),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ScoreError::Transport("hung up".into()))
            }
        }
    }
}

pub struct Harness {
    pub gatekeeper: Arc<Gatekeeper>,
    pub provider: Arc<ScriptedProvider>,
    pub storage: Arc<MemoryStorage>,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(MemoryStorage::new()))
    }

    pub fn with_storage(storage: Arc<MemoryStorage>) -> Self {
        let provider = ScriptedProvider::new();
        let clock = ManualClock::new(1_700_000_000_000);
        let gatekeeper = Gatekeeper::builder(storage.clone(), provider.clone())
            .clock(Arc::new(clock.clone()))
            .warning_page(WARNING_PAGE)
            .build();
        Self {
            gatekeeper: Arc::new(gatekeeper),
            provider,
            storage,
            clock,
        }
    }
}
