//! Navigation Interceptor
//!
//! Every top-level navigation goes through here. The decision is stateless
//! and evaluated fresh each time, in strict order:
//!
//! 1. blocking disabled -> allow
//! 2. not a top-level document -> allow
//! 3. not http(s) -> allow
//! 4. the warning page itself -> allow
//! 5. host allowlisted -> allow
//! 6. no valid cache entry, or entry without a score -> allow
//! 7. cached score >= danger threshold -> redirect to the warning page
//! 8. otherwise -> allow
//!
//! Hosts never seen before are not blocked. Any internal error resolves to
//! allow.

use crate::allowlist::Allowlist;
use crate::cache::HostRiskCache;
use crate::error::InterceptError;
use crate::interstitial::{is_warning_page, WarningParams};
use crate::settings::Settings;
use crate::types::{DecisionReason, NavigationRequest, NavigationResult, RequestType};
use crate::url::{hostname_of, is_http_url};

/// Navigation decision engine over borrowed gatekeeper state.
pub struct Interceptor<'a> {
    settings: &'a Settings,
    warning_page: &'a str,
}

impl<'a> Interceptor<'a> {
    pub fn new(settings: &'a Settings, warning_page: &'a str) -> Self {
        Self {
            settings,
            warning_page,
        }
    }

    /// Decide whether a navigation proceeds. Never fails.
    pub fn evaluate(
        &self,
        req: &NavigationRequest<'_>,
        allowlist: &mut Allowlist,
        cache: &mut HostRiskCache,
        now_ms: u64,
    ) -> NavigationResult {
        match self.try_evaluate(req, allowlist, cache, now_ms) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Allowing navigation in tab {} after error: {}", req.tab_id, e);
                NavigationResult::allow(DecisionReason::Error)
            }
        }
    }

    fn try_evaluate(
        &self,
        req: &NavigationRequest<'_>,
        allowlist: &mut Allowlist,
        cache: &mut HostRiskCache,
        now_ms: u64,
    ) -> Result<NavigationResult, InterceptError> {
        if !self.settings.blocking_enabled {
            return Ok(NavigationResult::allow(DecisionReason::BlockingDisabled));
        }
        if req.request_type != RequestType::MainFrame {
            return Ok(NavigationResult::allow(DecisionReason::NotMainFrame));
        }
        if !is_http_url(req.url) {
            return Ok(NavigationResult::allow(DecisionReason::UnsupportedScheme));
        }
        if is_warning_page(req.url, self.warning_page) {
            return Ok(NavigationResult::allow(DecisionReason::WarningPage));
        }

        let host =
            hostname_of(req.url).ok_or_else(|| InterceptError::MissingHost(req.url.to_string()))?;

        if allowlist.is_allowed(&host, now_ms) {
            log::debug!("{} is allowlisted", host);
            return Ok(NavigationResult::allow(DecisionReason::Allowlisted));
        }

        let Some(entry) = cache.get(&host, now_ms) else {
            return Ok(NavigationResult::allow(DecisionReason::Unscored));
        };
        let Some(score) = entry.result.score else {
            return Ok(NavigationResult::allow(DecisionReason::Unscored));
        };

        if score < self.threshold() {
            return Ok(NavigationResult::allow(DecisionReason::BelowThreshold));
        }

        let params = WarningParams::new(req.url, Some(score), entry.result.verdict.clone());
        let redirect = params.to_url(self.warning_page)?;
        log::info!("Redirecting tab {} away from {} (score {})", req.tab_id, host, score);
        Ok(NavigationResult::redirect(redirect))
    }

    fn threshold(&self) -> f64 {
        let t = self.settings.danger_threshold;
        if t.is_finite() {
            t
        } else {
            crate::settings::DEFAULT_DANGER_THRESHOLD
        }
    }
}
