//! Provider response normalization
//!
//! The scoring provider has changed shape over time. Anything it returns is
//! folded into one [`ScoreResult`] here; nothing in this module fails.

use serde_json::{Map, Value};

use crate::error::ScoreError;
use crate::types::{Label, ScoreResult};

/// Maximum number of explanations kept per result.
pub const MAX_EXPLANATIONS: usize = 5;

/// Keys that may carry reasons, in lookup order.
const REASON_KEYS: [&str; 3] = ["why_flagged", "reasons", "explanations"];

/// Keys that may carry a 0..1 probability, in lookup order.
const PROBABILITY_KEYS: [&str; 2] = ["prob_phishing", "probability"];

// =============================================================================
// Labels and Scores
// =============================================================================

/// Derive a label with inclusive lower bounds (70 danger, 40 suspicious).
#[inline]
pub fn score_to_label(score: Option<f64>) -> Label {
    Label::from_score(score)
}

/// Read a finite number from a JSON value. Numeric strings are accepted.
fn finite_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Extract a 0..100 score from a provider payload.
///
/// An explicit `score` wins; otherwise a 0..1 probability is scaled by 100
/// and rounded. Either way the result is clamped to 0..100.
pub fn extract_score(data: &Value) -> Option<f64> {
    let score = data.get("score").and_then(finite_number).or_else(|| {
        PROBABILITY_KEYS
            .iter()
            .find_map(|key| data.get(*key).and_then(finite_number))
            .map(|p| (p * 100.0).round())
    })?;
    Some(score.clamp(0.0, 100.0))
}

// =============================================================================
// Explanations
// =============================================================================

/// Pick the top reasons from a provider payload.
///
/// Reasons come either as an ordered list of strings or as a map of feature
/// name to importance, which is sorted by descending magnitude and rendered
/// as `"name: value"`.
pub fn pick_top_reasons(data: &Value) -> Vec<String> {
    let reasons = REASON_KEYS
        .iter()
        .find_map(|key| data.get(*key).filter(|v| !v.is_null()));

    match reasons {
        Some(Value::Array(items)) => items
            .iter()
            .take(MAX_EXPLANATIONS)
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::Object(map)) => rank_importances(map),
        _ => Vec::new(),
    }
}

fn rank_importances(map: &Map<String, Value>) -> Vec<String> {
    let mut ranked: Vec<(&str, f64)> = map
        .iter()
        .filter_map(|(name, value)| finite_number(value).map(|v| (name.as_str(), v)))
        .collect();

    ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));

    ranked
        .into_iter()
        .take(MAX_EXPLANATIONS)
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect()
}

// =============================================================================
// Responses
// =============================================================================

/// Convert a failure into a fail-open result, keeping the raw payload.
pub fn from_error(err: &ScoreError, raw: Option<Value>) -> ScoreResult {
    ScoreResult::unscored(err.reason(), Some(err.to_string()), raw)
}

/// Normalize a successful (2xx) JSON payload.
pub fn normalize_payload(data: Value) -> ScoreResult {
    let Some(score) = extract_score(&data) else {
        let err = ScoreError::MalformedResponse("no finite score or probability".to_string());
        log::warn!("Scoring response without a usable score: {}", data);
        return from_error(&err, Some(data));
    };

    let verdict = data
        .get("verdict")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let explanations = pick_top_reasons(&data);

    ScoreResult::scored(score, verdict, explanations, Some(data))
}

/// Normalize a raw HTTP response (status + body text).
pub fn normalize_response(status: u16, body: &str) -> ScoreResult {
    let data: Option<Value> = serde_json::from_str(body).ok();

    if !(200..300).contains(&status) {
        let message = data
            .as_ref()
            .and_then(upstream_message)
            .unwrap_or_else(|| format!("API error ({})", status));
        let err = ScoreError::Upstream { status, message };
        log::warn!("Scoring provider returned {}", status);
        let raw = data.unwrap_or_else(|| Value::String(body.to_string()));
        return from_error(&err, Some(raw));
    }

    match data {
        Some(data) => normalize_payload(data),
        None => {
            let err = ScoreError::MalformedResponse("response body is not JSON".to_string());
            from_error(&err, Some(Value::String(body.to_string())))
        }
    }
}

/// `detail` or `error` from a failure body.
fn upstream_message(data: &Value) -> Option<String> {
    ["detail", "error"].iter().find_map(|key| match data.get(*key)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}
