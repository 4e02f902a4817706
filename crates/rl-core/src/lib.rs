//! RiskLens Core Library
//!
//! This crate provides the gatekeeper logic behind the RiskLens browser
//! extension. It performs no network I/O of its own: remote scores are fed in
//! as normalized [`ScoreResult`]s and every decision is made against in-memory
//! state that mirrors a [`Storage`] backend.
//!
//! # Architecture
//!
//! A navigation attempt is checked by the [`Interceptor`] against the bypass
//! [`Allowlist`] and then the [`HostRiskCache`]. Scores arrive on page load or
//! tab activation, are written into the cache and projected per tab by the
//! [`TabStatePublisher`]. Anything that cannot be determined fails open.
//!
//! # Modules
//!
//! - `types`: Shared type definitions (scores, labels, decisions, tab state)
//! - `error`: Error taxonomy for scoring, storage and interception
//! - `url`: Scheme checks and hostname extraction
//! - `clock`: Millisecond wall clock, with a manual clock for tests
//! - `normalize`: Provider response normalization into `ScoreResult`
//! - `cache`: Host-keyed risk cache with lazy TTL eviction
//! - `allowlist`: Host-keyed bypass allowlist with lazy expiry
//! - `settings`: User settings, defaults and change notifications
//! - `storage`: Persistence trait with memory and JSON-file backends
//! - `interceptor`: Navigation interception decision
//! - `interstitial`: Warning page URL contract
//! - `messages`: Runtime messages exchanged with UI contexts
//! - `tab_state`: Per-tab score projection and indicator

pub mod allowlist;
pub mod cache;
pub mod clock;
pub mod error;
pub mod interceptor;
pub mod interstitial;
pub mod messages;
pub mod normalize;
pub mod settings;
pub mod storage;
pub mod tab_state;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use allowlist::Allowlist;
pub use cache::HostRiskCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{InterceptError, ScoreError, StorageError};
pub use interceptor::Interceptor;
pub use interstitial::WarningParams;
pub use messages::Message;
pub use settings::{Settings, SettingsChange, ThresholdPolicy};
pub use storage::{JsonFileStorage, MemoryStorage, Storage, StorageChange};
pub use tab_state::{TabIndicator, TabStatePublisher, TabSurface};
pub use types::{
    DecisionReason, HostCacheEntry, Label, NavigationDecision, NavigationRequest,
    NavigationResult, RequestType, ScoreResult, TabState,
};
