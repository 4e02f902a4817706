//! Warning page (interstitial) contract
//!
//! The interceptor redirects to `<warning page>?target=..&score=..&verdict=..`.
//! When the user chooses to continue, the page sends an `ALLOW_ONCE` message
//! and then performs a replacing navigation to `target`, so the back button
//! does not land on the warning page again.

use url::Url;

use crate::error::InterceptError;
use crate::messages::Message;
use crate::types::format_score;
use crate::url::hostname_of;

/// Default warning page path inside the extension bundle.
pub const WARNING_PAGE: &str = "warning.html";

/// Parameters carried by a warning page URL.
#[derive(Debug, Clone, PartialEq)]
pub struct WarningParams {
    /// Originally requested URL
    pub target: String,
    pub score: Option<f64>,
    pub verdict: Option<String>,
}

impl WarningParams {
    pub fn new(target: impl Into<String>, score: Option<f64>, verdict: Option<String>) -> Self {
        Self {
            target: target.into(),
            score,
            verdict,
        }
    }

    /// Build the redirect URL onto `warning_page`.
    pub fn to_url(&self, warning_page: &str) -> Result<String, InterceptError> {
        let mut url = Url::parse(warning_page)
            .map_err(|e| InterceptError::WarningPage(format!("{}: {}", warning_page, e)))?;
        let score = self.score.map(format_score).unwrap_or_default();
        url.query_pairs_mut()
            .clear()
            .append_pair("target", &self.target)
            .append_pair("score", &score)
            .append_pair("verdict", self.verdict.as_deref().unwrap_or(""));
        Ok(url.into())
    }

    /// Read the parameters back from a warning page URL.
    pub fn parse(page_url: &str) -> Option<Self> {
        let url = Url::parse(page_url).ok()?;
        let mut params = Self::new("", None, None);
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "target" => params.target = value.into_owned(),
                "score" => params.score = value.trim().parse::<f64>().ok().filter(|s| s.is_finite()),
                "verdict" if !value.is_empty() => params.verdict = Some(value.into_owned()),
                _ => {}
            }
        }
        Some(params)
    }

    /// Summary line shown under the target URL.
    pub fn details(&self) -> String {
        let score = self
            .score
            .map(format_score)
            .unwrap_or_else(|| "?".to_string());
        match &self.verdict {
            Some(verdict) => format!("Score: {} / 100 \u{2022} Verdict: {}", score, verdict),
            None => format!("Score: {} / 100", score),
        }
    }

    /// Message to send when the user chooses to continue anyway.
    pub fn bypass_message(&self) -> Message {
        Message::AllowOnce {
            url: self.target.clone(),
            host: hostname_of(&self.target),
        }
    }

    /// Where the continue action should navigate (with history replacement).
    pub fn continue_target(&self) -> Option<&str> {
        hostname_of(&self.target).map(|_| self.target.as_str())
    }
}

/// Whether `url` is the warning page itself.
pub fn is_warning_page(url: &str, warning_page: &str) -> bool {
    let prefix = warning_page.split(|c: char| c == '?' || c == '#').next().unwrap_or(warning_page);
    !prefix.is_empty() && url.starts_with(prefix)
}
