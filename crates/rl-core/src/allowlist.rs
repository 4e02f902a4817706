//! Bypass allowlist
//!
//! Maps hostname -> expiry in epoch milliseconds, where `0` means permanent.
//! Expired entries are pruned lazily when they are read.

use std::collections::HashMap;

use crate::clock::minutes_to_ms;
use crate::settings::DEFAULT_BYPASS_MINUTES;
use crate::url::hostname_of;

/// Expiry value of a permanent bypass.
pub const PERMANENT: u64 = 0;

/// Host-keyed bypass allowlist.
#[derive(Debug, Clone)]
pub struct Allowlist {
    entries: HashMap<String, u64>,
    default_minutes: f64,
    dirty: bool,
}

impl Default for Allowlist {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            default_minutes: DEFAULT_BYPASS_MINUTES,
            dirty: false,
        }
    }
}

impl Allowlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore an allowlist from its persisted map.
    pub fn from_entries(entries: HashMap<String, u64>) -> Self {
        Self {
            entries,
            ..Self::default()
        }
    }

    /// Duration used when a grant asks for a negative or non-finite one.
    /// Invalid values are ignored.
    pub fn set_default_minutes(&mut self, minutes: f64) {
        if minutes.is_finite() && minutes >= 0.0 {
            self.default_minutes = minutes;
        }
    }

    /// Whether navigation to `host` is currently bypassed.
    pub fn is_allowed(&mut self, host: &str, now_ms: u64) -> bool {
        let Some(&expires_at) = self.entries.get(host) else {
            return false;
        };
        if expires_at == PERMANENT || expires_at > now_ms {
            return true;
        }

        log::debug!("Bypass for {} expired at {}", host, expires_at);
        self.entries.remove(host);
        self.dirty = true;
        false
    }

    /// Grant a bypass for `host` and return its expiry.
    ///
    /// - negative or non-finite minutes use the configured default duration
    /// - `0` grants a permanent bypass
    /// - anything else expires `minutes` from now, saturating at `u64::MAX`
    pub fn grant(&mut self, host: &str, duration_minutes: f64, now_ms: u64) -> u64 {
        let minutes = if !duration_minutes.is_finite() || duration_minutes < 0.0 {
            self.default_minutes
        } else {
            duration_minutes
        };

        let expires_at = if minutes == 0.0 {
            PERMANENT
        } else {
            now_ms.saturating_add(minutes_to_ms(minutes).max(1))
        };

        log::info!(
            "Granting bypass for {} ({})",
            host,
            if expires_at == PERMANENT {
                "permanent".to_string()
            } else {
                format!("{} min", minutes)
            }
        );
        self.entries.insert(host.to_string(), expires_at);
        self.dirty = true;
        expires_at
    }

    /// Remove a bypass before it expires.
    pub fn revoke(&mut self, host: &str) -> bool {
        let removed = self.entries.remove(host).is_some();
        self.dirty |= removed;
        removed
    }

    /// Convert a legacy exact-URL allowlist into hostname entries.
    ///
    /// Only runs when the host allowlist is empty. Returns the number of
    /// hosts added.
    pub fn migrate_legacy(&mut self, legacy: &HashMap<String, u64>) -> usize {
        if !self.entries.is_empty() {
            return 0;
        }
        for (url, &expires_at) in legacy {
            if let Some(host) = hostname_of(url) {
                self.entries.insert(host, expires_at);
            }
        }
        if !self.entries.is_empty() {
            log::info!("Migrated {} legacy allowlist entries", self.entries.len());
            self.dirty = true;
        }
        self.entries.len()
    }

    /// Replace the in-memory mirror with a fresh copy from storage.
    pub fn replace_all(&mut self, entries: HashMap<String, u64>) {
        self.entries = entries;
        self.dirty = false;
    }

    pub fn expiry(&self, host: &str) -> Option<u64> {
        self.entries.get(host).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &HashMap<String, u64> {
        &self.entries
    }

    /// Returns true once after any mutation that should be persisted.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
