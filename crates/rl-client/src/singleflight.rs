//! Single-flight deduplication
//!
//! While a lookup for a host is in flight, later callers for the same host
//! wait for its result instead of calling the provider again. If the leading
//! call is dropped before it finishes, waiting callers run their own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

use rl_core::types::ScoreResult;

type Slot = watch::Receiver<Option<ScoreResult>>;

#[derive(Debug, Default)]
pub struct SingleFlight {
    inflight: Mutex<HashMap<String, Slot>>,
}

enum Role {
    Leader(watch::Sender<Option<ScoreResult>>),
    Follower(Slot),
}

/// Removes the in-flight slot when the leader finishes or is dropped.
struct LeaderGuard<'a> {
    flight: &'a SingleFlight,
    key: &'a str,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        self.flight.lock().remove(self.key);
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.inflight.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Run `call` for `key` unless a call for the same key is already in
    /// flight, in which case wait for that call's result.
    pub async fn run<F, Fut>(&self, key: &str, call: F) -> ScoreResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ScoreResult>,
    {
        let role = {
            let mut inflight = self.lock();
            match inflight.get(key) {
                Some(slot) => Role::Follower(slot.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.to_string(), rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Leader(tx) => {
                let _guard = LeaderGuard { flight: self, key };
                let result = call().await;
                tx.send_replace(Some(result.clone()));
                result
            }
            Role::Follower(mut slot) => {
                log::debug!("Joining in-flight lookup for {}", key);
                let shared = match slot.wait_for(Option::is_some).await {
                    Ok(value) => value.clone(),
                    Err(_) => None,
                };
                match shared {
                    Some(result) => result,
                    None => call().await,
                }
            }
        }
    }
}
