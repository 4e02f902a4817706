//! RiskLens Client
//!
//! The asynchronous half of the gatekeeper: talking to the remote scoring
//! provider and reacting to browser events.
//!
//! # Modules
//!
//! - `transport`: HTTP POST to the scoring endpoint
//! - `scoring`: Scoring client (validation, timeout, fail-open normalization)
//! - `singleflight`: Deduplication of concurrent lookups for the same host
//! - `gatekeeper`: The owned context object tying settings, cache, allowlist
//!   and tab state together
//! - `dispatcher`: Single-task event queue in front of the gatekeeper

pub mod dispatcher;
pub mod gatekeeper;
pub mod scoring;
pub mod singleflight;
pub mod transport;

pub use dispatcher::{Command, Dispatcher, DispatcherHandle};
pub use gatekeeper::{Gatekeeper, GatekeeperBuilder};
pub use scoring::{ScoringClient, ScoringConfig};
pub use singleflight::SingleFlight;
pub use transport::{HttpTransport, ScoreRequest, Transport, TransportResponse};
