//! Event dispatcher
//!
//! Browser callbacks become typed [`Command`]s on one queue, drained by a
//! single task. Navigation decisions and bypass grants are handled inline,
//! so a grant is visible to the navigation queued right after it. Anything
//! that has to reach the scoring provider is spawned so a slow provider
//! never holds up the next navigation.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use rl_core::messages::Message;
use rl_core::storage::StorageChange;
use rl_core::types::{DecisionReason, NavigationRequest, NavigationResult, RequestType};

use crate::gatekeeper::Gatekeeper;

#[derive(Debug)]
pub enum Command {
    /// A navigation is about to start; the decision goes back on `reply`.
    Navigate {
        url: String,
        request_type: RequestType,
        tab_id: i32,
        reply: oneshot::Sender<NavigationResult>,
    },
    TabLoadComplete {
        tab_id: i32,
        url: String,
    },
    TabActivated {
        tab_id: i32,
    },
    TabRemoved {
        tab_id: i32,
    },
    Message(Message),
    StorageChanged(Vec<StorageChange>),
}

pub struct Dispatcher {
    gatekeeper: Arc<Gatekeeper>,
    rx: mpsc::Receiver<Command>,
}

impl Dispatcher {
    /// Create a dispatcher and the handle that feeds it.
    pub fn new(gatekeeper: Arc<Gatekeeper>, capacity: usize) -> (Self, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { gatekeeper, rx }, DispatcherHandle { tx })
    }

    /// Process commands until every handle is dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.dispatch(command);
        }
        log::debug!("Dispatcher stopped: all handles dropped");
    }

    fn dispatch(&self, command: Command) {
        match command {
            Command::Navigate {
                url,
                request_type,
                tab_id,
                reply,
            } => {
                let req = NavigationRequest {
                    url: &url,
                    request_type,
                    tab_id,
                };
                let result = self.gatekeeper.on_before_navigate(&req);
                if reply.send(result).is_err() {
                    log::debug!("Navigation in tab {} no longer waiting for a decision", tab_id);
                }
            }
            Command::TabLoadComplete { tab_id, url } => {
                let gatekeeper = self.gatekeeper.clone();
                tokio::spawn(async move {
                    gatekeeper.on_tab_load_complete(tab_id, &url).await;
                });
            }
            Command::TabActivated { tab_id } => {
                let gatekeeper = self.gatekeeper.clone();
                tokio::spawn(async move {
                    gatekeeper.on_tab_activated(tab_id).await;
                });
            }
            Command::TabRemoved { tab_id } => self.gatekeeper.on_tab_removed(tab_id),
            Command::Message(Message::AllowOnce { url, host }) => {
                self.gatekeeper.allow_once(&url, host.as_deref());
            }
            Command::Message(message) => {
                let gatekeeper = self.gatekeeper.clone();
                tokio::spawn(async move {
                    gatekeeper.handle_message(message).await;
                });
            }
            Command::StorageChanged(changes) => {
                for change in changes {
                    self.gatekeeper.apply_storage_change(change);
                }
            }
        }
    }
}

/// Cloneable sender side of a [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Command>,
}

impl DispatcherHandle {
    /// Ask for a navigation decision. Allows if the dispatcher is gone.
    pub async fn navigate(&self, url: &str, request_type: RequestType, tab_id: i32) -> NavigationResult {
        let (reply, rx) = oneshot::channel();
        let command = Command::Navigate {
            url: url.to_string(),
            request_type,
            tab_id,
            reply,
        };
        if self.tx.send(command).await.is_err() {
            log::warn!("Dispatcher closed; allowing navigation to {}", url);
            return NavigationResult::allow(DecisionReason::Error);
        }
        rx.await
            .unwrap_or_else(|_| NavigationResult::allow(DecisionReason::Error))
    }

    /// Queue a command. Returns false if the dispatcher is gone.
    pub async fn send(&self, command: Command) -> bool {
        self.tx.send(command).await.is_ok()
    }
}
