//! Core type definitions for RiskLens
//!
//! These types are shared by the cache, the interceptor and the tab
//! projection, and they serialize to the same JSON shapes the extension keeps
//! in `storage.local`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "ts")]
use ts_rs::TS;

// =============================================================================
// Labels
// =============================================================================

/// Lower bound (inclusive) of the `danger` bucket.
pub const DANGER_SCORE: f64 = 70.0;

/// Lower bound (inclusive) of the `suspicious` bucket.
pub const SUSPICIOUS_SCORE: f64 = 40.0;

/// Categorical bucket derived from a risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Label {
    /// Score below 40, or no score at all (fail-open)
    #[default]
    Safe,
    /// 40 <= score < 70
    Suspicious,
    /// score >= 70
    Danger,
}

impl Label {
    /// Derive a label from an optional score.
    ///
    /// Missing and non-finite scores are `Safe`.
    pub fn from_score(score: Option<f64>) -> Self {
        match score {
            Some(s) if s.is_finite() => {
                if s >= DANGER_SCORE {
                    Self::Danger
                } else if s >= SUSPICIOUS_SCORE {
                    Self::Suspicious
                } else {
                    Self::Safe
                }
            }
            _ => Self::Safe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Suspicious => "suspicious",
            Self::Danger => "danger",
        }
    }

    /// Toolbar icon shown for this label.
    pub fn icon_path(&self) -> &'static str {
        match self {
            Self::Safe => "icons/safe.png",
            Self::Suspicious => "icons/sus.png",
            Self::Danger => "icons/danger.png",
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Score Result
// =============================================================================

/// Normalized outcome of one scoring call.
///
/// `score == None` always implies `label == Safe`; use [`ScoreResult::scored`]
/// and [`ScoreResult::unscored`] rather than building the struct by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    /// Risk score in 0..=100
    pub score: Option<f64>,
    pub label: Label,
    /// Free-text classification supplied by the provider
    #[serde(default)]
    pub verdict: Option<String>,
    /// Top reasons, at most five
    #[serde(default)]
    pub explanations: Vec<String>,
    /// Provider payload, kept for diagnostics
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "unknown"))]
    pub raw: Option<Value>,
    /// Human-readable explanation of how this result came about
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl ScoreResult {
    /// Build a result around a finite score. The score is clamped to 0..=100.
    pub fn scored(
        score: f64,
        verdict: Option<String>,
        explanations: Vec<String>,
        raw: Option<Value>,
    ) -> Self {
        let score = score.clamp(0.0, 100.0);
        let reason = match &verdict {
            Some(v) => format!("Model: {}", v),
            None => "Model result".to_string(),
        };
        Self {
            score: Some(score),
            label: Label::from_score(Some(score)),
            verdict,
            explanations,
            raw,
            reason,
            error: None,
        }
    }

    /// Build a fail-open result with no score.
    pub fn unscored(reason: impl Into<String>, error: Option<String>, raw: Option<Value>) -> Self {
        Self {
            score: None,
            label: Label::Safe,
            verdict: None,
            explanations: Vec::new(),
            raw,
            reason: reason.into(),
            error,
        }
    }

    pub fn is_scored(&self) -> bool {
        self.score.is_some()
    }
}

/// Render a score the way the UI shows it (`85`, `69.9`).
pub fn format_score(score: f64) -> String {
    format!("{}", score)
}

// =============================================================================
// Host Cache Entry
// =============================================================================

/// A cached scoring result for one hostname.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostCacheEntry {
    #[serde(flatten)]
    pub result: ScoreResult,
    pub updated_at_ms: u64,
}

impl HostCacheEntry {
    pub fn new(result: ScoreResult, updated_at_ms: u64) -> Self {
        Self { result, updated_at_ms }
    }

    /// Valid while `now - updated_at < ttl`.
    pub fn is_fresh(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.updated_at_ms) < ttl_ms
    }
}

// =============================================================================
// Tab State
// =============================================================================

/// Ephemeral per-tab projection of the latest score, for UI display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct TabState {
    pub tab_id: i32,
    pub url: String,
    pub score: Option<f64>,
    pub label: Label,
    pub verdict: Option<String>,
    pub explanations: Vec<String>,
    pub reason: String,
    pub error: Option<String>,
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub updated_at_ms: u64,
}

// =============================================================================
// Navigation
// =============================================================================

/// Kind of request being navigated. Only top-level documents are intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    MainFrame,
    SubFrame,
    Other,
}

impl RequestType {
    /// Parse from browser request type string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "main_frame" | "document" => Self::MainFrame,
            "sub_frame" | "subdocument" => Self::SubFrame,
            _ => Self::Other,
        }
    }
}

/// One navigation attempt as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct NavigationRequest<'a> {
    /// Full target URL
    pub url: &'a str,
    pub request_type: RequestType,
    /// Tab ID (for logging)
    pub tab_id: i32,
}

impl<'a> NavigationRequest<'a> {
    pub fn main_frame(url: &'a str, tab_id: i32) -> Self {
        Self {
            url,
            request_type: RequestType::MainFrame,
            tab_id,
        }
    }
}

/// Final decision for a navigation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationDecision {
    /// Let the navigation proceed
    Allow,
    /// Send the tab to the warning page instead
    Redirect,
}

impl NavigationDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Redirect => "redirect",
        }
    }
}

/// Which step of the interception policy settled the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    BlockingDisabled,
    NotMainFrame,
    UnsupportedScheme,
    WarningPage,
    Allowlisted,
    Unscored,
    BelowThreshold,
    Dangerous,
    /// Internal error, resolved fail-open
    Error,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockingDisabled => "blocking_disabled",
            Self::NotMainFrame => "not_main_frame",
            Self::UnsupportedScheme => "unsupported_scheme",
            Self::WarningPage => "warning_page",
            Self::Allowlisted => "allowlisted",
            Self::Unscored => "unscored",
            Self::BelowThreshold => "below_threshold",
            Self::Dangerous => "dangerous",
            Self::Error => "error",
        }
    }
}

/// Result of evaluating a navigation.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationResult {
    pub decision: NavigationDecision,
    pub reason: DecisionReason,
    /// Warning page URL if decision is Redirect
    pub redirect_url: Option<String>,
}

impl NavigationResult {
    pub fn allow(reason: DecisionReason) -> Self {
        Self {
            decision: NavigationDecision::Allow,
            reason,
            redirect_url: None,
        }
    }

    pub fn redirect(url: String) -> Self {
        Self {
            decision: NavigationDecision::Redirect,
            reason: DecisionReason::Dangerous,
            redirect_url: Some(url),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == NavigationDecision::Allow
    }
}

impl Default for NavigationResult {
    fn default() -> Self {
        Self::allow(DecisionReason::Error)
    }
}
