//! Host risk cache
//!
//! Maps hostname -> last scoring result. Entries are valid while
//! `now - updated_at < ttl` and are evicted lazily when a read finds them
//! stale; there is no background sweeper.
//!
//! Results without a score are not cached unless the `cache_failures` policy
//! is switched on, so a provider outage cannot pin a host as "safe".

use std::collections::HashMap;

use crate::clock::minutes_to_ms;
use crate::types::{HostCacheEntry, ScoreResult};

/// Host-keyed cache of scoring results.
#[derive(Debug, Clone, Default)]
pub struct HostRiskCache {
    entries: HashMap<String, HostCacheEntry>,
    ttl_ms: u64,
    cache_failures: bool,
    dirty: bool,
}

impl HostRiskCache {
    /// Create an empty cache with the given TTL in minutes.
    pub fn new(ttl_minutes: f64) -> Self {
        Self {
            entries: HashMap::new(),
            ttl_ms: minutes_to_ms(ttl_minutes),
            cache_failures: false,
            dirty: false,
        }
    }

    /// Restore a cache from its persisted map.
    pub fn from_entries(entries: HashMap<String, HostCacheEntry>, ttl_minutes: f64) -> Self {
        Self {
            entries,
            ..Self::new(ttl_minutes)
        }
    }

    pub fn set_ttl_minutes(&mut self, ttl_minutes: f64) {
        self.ttl_ms = minutes_to_ms(ttl_minutes);
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Whether unscored (failed) results are cached too.
    pub fn set_cache_failures(&mut self, enabled: bool) {
        self.cache_failures = enabled;
    }

    /// Look up a host. A stale entry is removed and `None` returned.
    pub fn get(&mut self, host: &str, now_ms: u64) -> Option<&HostCacheEntry> {
        let fresh = self.entries.get(host)?.is_fresh(now_ms, self.ttl_ms);
        if !fresh {
            log::debug!("Evicting stale cache entry for {}", host);
            self.entries.remove(host);
            self.dirty = true;
            return None;
        }
        self.entries.get(host)
    }

    /// Store a result for a host, overwriting any existing entry.
    ///
    /// Returns false when the result was not cached because it has no score
    /// and failures are not cached.
    pub fn put(&mut self, host: &str, result: ScoreResult, now_ms: u64) -> bool {
        if !result.is_scored() && !self.cache_failures {
            log::debug!("Not caching unscored result for {}: {}", host, result.reason);
            return false;
        }
        self.entries
            .insert(host.to_string(), HostCacheEntry::new(result, now_ms));
        self.dirty = true;
        true
    }

    pub fn remove(&mut self, host: &str) -> Option<HostCacheEntry> {
        let removed = self.entries.remove(host);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
    }

    /// Replace the in-memory mirror with a fresh copy from storage.
    pub fn replace_all(&mut self, entries: HashMap<String, HostCacheEntry>) {
        self.entries = entries;
        self.dirty = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, fresh or not, without evicting anything.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &HostCacheEntry)> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &HashMap<String, HostCacheEntry> {
        &self.entries
    }

    /// Returns true once after any mutation that should be persisted.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
