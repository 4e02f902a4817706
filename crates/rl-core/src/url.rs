//! URL helpers
//!
//! Scheme checks run on every navigation and work directly on string slices.
//! Hostnames are resolved with a full parse so that cache and allowlist keys
//! are normalized the same way a browser would.

use url::{Host, Url};

use crate::error::ScoreError;

// =============================================================================
// Scheme Extraction
// =============================================================================

/// Schemes the gatekeeper cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

/// Fast scheme extraction without URL parsing.
/// Returns None for anything that is not http(s).
#[inline]
pub fn extract_scheme(url: &str) -> Option<Scheme> {
    let bytes = url.as_bytes();
    if bytes.len() >= 8 && bytes[..8].eq_ignore_ascii_case(b"https://") {
        Some(Scheme::Https)
    } else if bytes.len() >= 7 && bytes[..7].eq_ignore_ascii_case(b"http://") {
        Some(Scheme::Http)
    } else {
        None
    }
}

#[inline]
pub fn is_http_url(url: &str) -> bool {
    extract_scheme(url).is_some()
}

// =============================================================================
// Host Extraction
// =============================================================================

/// Parse an absolute http(s) URL, rejecting everything else.
pub fn parse_http_url(url: &str) -> Result<Url, ScoreError> {
    let parsed = Url::parse(url).map_err(|e| ScoreError::InvalidInput(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ScoreError::InvalidInput(format!(
                "unsupported scheme '{}'",
                other
            )))
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(ScoreError::InvalidInput(format!("{}: missing host", url)));
    }
    Ok(parsed)
}

/// Cache and allowlist key of a URL, or None if it cannot be parsed.
///
/// Keys are lowercase ASCII (punycode for IDNs) without a trailing dot.
pub fn hostname_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    canonical_key(parsed.host_str()?)
}

/// Normalize a host given directly (e.g. from a bypass message) into the
/// same key `hostname_of` produces.
pub fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim();
    if host.is_empty() || host.contains(|c: char| c == '/' || c.is_whitespace()) {
        return None;
    }
    let host = Host::parse(host).ok()?;
    canonical_key(&host.to_string())
}

fn canonical_key(host: &str) -> Option<String> {
    let host = host.trim_end_matches('.');
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

/// Join an API base address and an endpoint path, dropping trailing slashes.
pub fn endpoint_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
