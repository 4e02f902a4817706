//! User settings
//!
//! Settings are loaded once from storage and afterwards only change through
//! [`SettingsChange`]s, which mirror the per-key change notifications the
//! extension's storage area emits.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "ts")]
use ts_rs::TS;

use crate::clock::minutes_to_ms;
use crate::storage::Storage;
use crate::url::endpoint_url;

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_API_BASE_URL: &str = "https://risklens-api-9e7l.onrender.com";
pub const DEFAULT_DANGER_THRESHOLD: f64 = 70.0;
pub const DEFAULT_CACHE_TTL_MINUTES: f64 = 10.0;
pub const DEFAULT_BYPASS_MINUTES: f64 = 60.0;
/// Long enough to ride out a cold start of the hosted model.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Path of the scoring endpoint under the API base.
pub const SCORE_PATH: &str = "/score";

/// Header carrying the optional API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Whether the danger threshold may be changed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum ThresholdPolicy {
    /// Always use [`DEFAULT_DANGER_THRESHOLD`]; stored values are ignored
    #[default]
    Fixed,
    Configurable,
}

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub blocking_enabled: bool,
    pub danger_threshold: f64,
    pub cache_ttl_minutes: f64,
    pub bypass_duration_minutes: f64,
    pub api_base_url: String,
    pub api_key: Option<String>,
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub request_timeout_secs: u64,
    /// Cache unscored results as well (shields a degraded provider)
    pub cache_failures: bool,
    pub threshold_policy: ThresholdPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            blocking_enabled: true,
            danger_threshold: DEFAULT_DANGER_THRESHOLD,
            cache_ttl_minutes: DEFAULT_CACHE_TTL_MINUTES,
            bypass_duration_minutes: DEFAULT_BYPASS_MINUTES,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cache_failures: false,
            threshold_policy: ThresholdPolicy::Fixed,
        }
    }
}

impl Settings {
    /// Storage keys of every persisted field.
    pub const KEYS: [&'static str; 9] = [
        "blockingEnabled",
        "dangerThreshold",
        "cacheTtlMinutes",
        "bypassDurationMinutes",
        "apiBaseUrl",
        "apiKey",
        "requestTimeoutSecs",
        "cacheFailures",
        "thresholdPolicy",
    ];

    /// Load settings, merging stored values over defaults.
    ///
    /// The threshold policy is read first so that a stored threshold is
    /// ignored under the fixed policy.
    pub fn from_storage(storage: &dyn Storage) -> Self {
        let mut settings = Self::default();
        let mut keys = Self::KEYS.to_vec();
        keys.sort_by_key(|k| *k != "thresholdPolicy");

        for key in keys {
            match storage.get(key) {
                Ok(Some(value)) => {
                    if let Some(change) = SettingsChange::from_storage(key, &value) {
                        settings.apply(change);
                    } else {
                        log::warn!("Ignoring invalid stored setting {} = {}", key, value);
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("Failed to read setting {}: {}", key, e),
            }
        }
        settings
    }

    /// Apply one change. Returns false if it was rejected or had no effect.
    pub fn apply(&mut self, change: SettingsChange) -> bool {
        let before = self.clone();
        match change {
            SettingsChange::BlockingEnabled(v) => self.blocking_enabled = v,
            SettingsChange::DangerThreshold(v) => {
                if self.threshold_policy == ThresholdPolicy::Fixed {
                    log::debug!("Danger threshold is fixed; ignoring {}", v);
                    return false;
                }
                self.danger_threshold = sanitize(v, DEFAULT_DANGER_THRESHOLD);
            }
            SettingsChange::CacheTtlMinutes(v) => {
                self.cache_ttl_minutes = sanitize(v, DEFAULT_CACHE_TTL_MINUTES)
            }
            SettingsChange::BypassDurationMinutes(v) => {
                self.bypass_duration_minutes = sanitize(v, DEFAULT_BYPASS_MINUTES)
            }
            SettingsChange::ApiBaseUrl(v) => {
                let v = v.trim();
                self.api_base_url = if v.is_empty() {
                    DEFAULT_API_BASE_URL.to_string()
                } else {
                    v.to_string()
                };
            }
            SettingsChange::ApiKey(v) => self.api_key = v.filter(|k| !k.is_empty()),
            SettingsChange::RequestTimeoutSecs(v) => {
                self.request_timeout_secs = if v == 0 { DEFAULT_REQUEST_TIMEOUT_SECS } else { v }
            }
            SettingsChange::CacheFailures(v) => self.cache_failures = v,
            SettingsChange::ThresholdPolicy(v) => {
                self.threshold_policy = v;
                if v == ThresholdPolicy::Fixed {
                    self.danger_threshold = DEFAULT_DANGER_THRESHOLD;
                }
            }
        }
        *self != before
    }

    /// Full URL of the scoring endpoint.
    pub fn score_endpoint(&self) -> String {
        endpoint_url(&self.api_base_url, SCORE_PATH)
    }

    pub fn cache_ttl_ms(&self) -> u64 {
        minutes_to_ms(self.cache_ttl_minutes)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Every persisted field as a storage change.
    pub fn to_changes(&self) -> Vec<SettingsChange> {
        vec![
            SettingsChange::BlockingEnabled(self.blocking_enabled),
            SettingsChange::DangerThreshold(self.danger_threshold),
            SettingsChange::CacheTtlMinutes(self.cache_ttl_minutes),
            SettingsChange::BypassDurationMinutes(self.bypass_duration_minutes),
            SettingsChange::ApiBaseUrl(self.api_base_url.clone()),
            SettingsChange::ApiKey(self.api_key.clone()),
            SettingsChange::RequestTimeoutSecs(self.request_timeout_secs),
            SettingsChange::CacheFailures(self.cache_failures),
            SettingsChange::ThresholdPolicy(self.threshold_policy),
        ]
    }
}

fn sanitize(value: f64, default: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        default
    }
}

// =============================================================================
// Changes
// =============================================================================

/// A change to one settings field.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsChange {
    BlockingEnabled(bool),
    DangerThreshold(f64),
    CacheTtlMinutes(f64),
    BypassDurationMinutes(f64),
    ApiBaseUrl(String),
    ApiKey(Option<String>),
    RequestTimeoutSecs(u64),
    CacheFailures(bool),
    ThresholdPolicy(ThresholdPolicy),
}

impl SettingsChange {
    /// Storage key of the changed field.
    pub fn key(&self) -> &'static str {
        match self {
            Self::BlockingEnabled(_) => "blockingEnabled",
            Self::DangerThreshold(_) => "dangerThreshold",
            Self::CacheTtlMinutes(_) => "cacheTtlMinutes",
            Self::BypassDurationMinutes(_) => "bypassDurationMinutes",
            Self::ApiBaseUrl(_) => "apiBaseUrl",
            Self::ApiKey(_) => "apiKey",
            Self::RequestTimeoutSecs(_) => "requestTimeoutSecs",
            Self::CacheFailures(_) => "cacheFailures",
            Self::ThresholdPolicy(_) => "thresholdPolicy",
        }
    }

    /// Stored representation of the new value.
    pub fn value(&self) -> Value {
        match self {
            Self::BlockingEnabled(v) | Self::CacheFailures(v) => Value::Bool(*v),
            Self::DangerThreshold(v) | Self::CacheTtlMinutes(v) | Self::BypassDurationMinutes(v) => {
                serde_json::Number::from_f64(*v)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
            Self::ApiBaseUrl(v) => Value::String(v.clone()),
            Self::ApiKey(v) => v.clone().map(Value::String).unwrap_or(Value::Null),
            Self::RequestTimeoutSecs(v) => Value::from(*v),
            Self::ThresholdPolicy(v) => serde_json::to_value(v).unwrap_or(Value::Null),
        }
    }

    /// Interpret a stored key/value pair. Unknown keys and ill-typed values
    /// yield `None`. Numbers may be stored as strings by older options pages.
    pub fn from_storage(key: &str, value: &Value) -> Option<Self> {
        let number = || match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        let change = match key {
            "blockingEnabled" => Self::BlockingEnabled(truthy(value)),
            "dangerThreshold" => Self::DangerThreshold(number()?),
            "cacheTtlMinutes" => Self::CacheTtlMinutes(number()?),
            "bypassDurationMinutes" => Self::BypassDurationMinutes(number()?),
            "apiBaseUrl" => Self::ApiBaseUrl(value.as_str()?.to_string()),
            "apiKey" => Self::ApiKey(value.as_str().map(str::to_string)),
            "requestTimeoutSecs" => {
                let secs = number()?;
                if !secs.is_finite() || secs < 0.0 {
                    return None;
                }
                Self::RequestTimeoutSecs(secs as u64)
            }
            "cacheFailures" => Self::CacheFailures(truthy(value)),
            "thresholdPolicy" => Self::ThresholdPolicy(serde_json::from_value(value.clone()).ok()?),
            _ => return None,
        };
        Some(change)
    }
}

/// JavaScript-style truthiness, as `!!value` would give.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
