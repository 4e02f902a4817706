//! Gatekeeper
//!
//! The owned context object behind every browser event. It holds the
//! in-memory mirrors of settings, host cache, allowlist and tab state, keeps
//! them in step with [`Storage`], and drives the scoring client.
//!
//! Settings have a single writer (this struct) and are published on a
//! `watch` channel. Cache, allowlist and tab state sit behind short-lived
//! `Mutex` guards that are never held across an `.await`; when both are
//! needed the allowlist is locked before the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;

use rl_core::allowlist::Allowlist;
use rl_core::cache::HostRiskCache;
use rl_core::clock::{Clock, SystemClock};
use rl_core::interceptor::Interceptor;
use rl_core::messages::Message;
use rl_core::settings::{Settings, SettingsChange};
use rl_core::storage::{
    load_map, persist_best_effort, remove_best_effort, tab_key, Storage, StorageChange,
    ALLOWLIST_KEY, HOST_CACHE_KEY, LEGACY_ALLOWLIST_KEY,
};
use rl_core::tab_state::{project, MemorySurface, TabStatePublisher, TabSurface};
use rl_core::types::{HostCacheEntry, NavigationRequest, NavigationResult, ScoreResult, TabState};
use rl_core::url::{hostname_of, is_http_url, normalize_host};

use crate::scoring::{ScoringClient, ScoringConfig};
use crate::singleflight::SingleFlight;
use crate::transport::Transport;

/// Warning page used when the embedder does not supply one.
pub const DEFAULT_WARNING_PAGE: &str = "moz-extension://risklens/warning.html";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Builder
// =============================================================================

pub struct GatekeeperBuilder {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    surface: Option<Arc<dyn TabSurface>>,
    clock: Option<Arc<dyn Clock>>,
    warning_page: Option<String>,
}

impl GatekeeperBuilder {
    pub fn new(storage: Arc<dyn Storage>, transport: Arc<dyn Transport>) -> Self {
        Self {
            storage,
            transport,
            surface: None,
            clock: None,
            warning_page: None,
        }
    }

    pub fn surface(mut self, surface: Arc<dyn TabSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Full URL of the warning page (e.g. the extension's `warning.html`).
    pub fn warning_page(mut self, url: impl Into<String>) -> Self {
        self.warning_page = Some(url.into());
        self
    }

    /// Load persisted state and build the gatekeeper.
    pub fn build(self) -> Gatekeeper {
        let storage = self.storage;
        let settings = Settings::from_storage(storage.as_ref());

        let mut allowlist = Allowlist::from_entries(load_map::<u64>(storage.as_ref(), ALLOWLIST_KEY));
        allowlist.set_default_minutes(settings.bypass_duration_minutes);
        if allowlist.is_empty() {
            let legacy = load_map::<u64>(storage.as_ref(), LEGACY_ALLOWLIST_KEY);
            if !legacy.is_empty() {
                allowlist.migrate_legacy(&legacy);
            }
        }
        if allowlist.take_dirty() {
            persist_best_effort(storage.as_ref(), ALLOWLIST_KEY, allowlist.entries());
        }

        let mut cache = HostRiskCache::from_entries(
            load_map::<HostCacheEntry>(storage.as_ref(), HOST_CACHE_KEY),
            settings.cache_ttl_minutes,
        );
        cache.set_cache_failures(settings.cache_failures);

        log::info!(
            "Gatekeeper loaded: {} cached hosts, {} allowlisted hosts, blocking {}",
            cache.len(),
            allowlist.len(),
            if settings.blocking_enabled { "on" } else { "off" }
        );

        let (settings, _) = watch::channel(settings);
        Gatekeeper {
            settings,
            cache: Mutex::new(cache),
            allowlist: Mutex::new(allowlist),
            tabs: Mutex::new(TabStatePublisher::new()),
            storage,
            transport: self.transport,
            surface: self
                .surface
                .unwrap_or_else(|| Arc::new(MemorySurface::new())),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            inflight: SingleFlight::new(),
            warning_page: self
                .warning_page
                .unwrap_or_else(|| DEFAULT_WARNING_PAGE.to_string()),
        }
    }
}

// =============================================================================
// Gatekeeper
// =============================================================================

pub struct Gatekeeper {
    settings: watch::Sender<Settings>,
    cache: Mutex<HostRiskCache>,
    allowlist: Mutex<Allowlist>,
    tabs: Mutex<TabStatePublisher>,
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    surface: Arc<dyn TabSurface>,
    clock: Arc<dyn Clock>,
    inflight: SingleFlight,
    warning_page: String,
}

impl Gatekeeper {
    pub fn builder(storage: Arc<dyn Storage>, transport: Arc<dyn Transport>) -> GatekeeperBuilder {
        GatekeeperBuilder::new(storage, transport)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    pub fn settings(&self) -> Settings {
        self.settings.borrow().clone()
    }

    /// Receive every settings change from now on.
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.settings.subscribe()
    }

    /// Apply a change made by the user and persist the fields it touched.
    /// Returns false if the change was rejected or had no effect.
    pub fn update_settings(&self, change: SettingsChange) -> bool {
        let before = self.settings();
        if !self.apply_settings(change) {
            return false;
        }
        let after = self.settings();
        for (old, new) in before.to_changes().into_iter().zip(after.to_changes()) {
            if old != new {
                persist_best_effort(self.storage.as_ref(), new.key(), &new.value());
            }
        }
        true
    }

    fn apply_settings(&self, change: SettingsChange) -> bool {
        let key = change.key();
        let changed = self.settings.send_if_modified(|settings| settings.apply(change));
        if changed {
            log::debug!("Setting {} updated", key);
            let settings = self.settings();
            lock(&self.allowlist).set_default_minutes(settings.bypass_duration_minutes);
            let mut cache = lock(&self.cache);
            cache.set_ttl_minutes(settings.cache_ttl_minutes);
            cache.set_cache_failures(settings.cache_failures);
        }
        changed
    }

    /// React to a change notification from storage. Mirrors are replaced,
    /// never written back.
    pub fn apply_storage_change(&self, change: StorageChange) {
        let StorageChange { key, new_value } = change;
        match key.as_str() {
            HOST_CACHE_KEY => {
                let entries: HashMap<String, HostCacheEntry> = map_from_value(new_value);
                log::debug!("Host cache replaced from storage ({} entries)", entries.len());
                lock(&self.cache).replace_all(entries);
            }
            ALLOWLIST_KEY => {
                let entries: HashMap<String, u64> = map_from_value(new_value);
                log::debug!("Allowlist replaced from storage ({} entries)", entries.len());
                lock(&self.allowlist).replace_all(entries);
            }
            key if Settings::KEYS.contains(&key) => {
                let change = match new_value {
                    Some(value) => SettingsChange::from_storage(key, &value),
                    None => Settings::default()
                        .to_changes()
                        .into_iter()
                        .find(|c| c.key() == key),
                };
                match change {
                    Some(change) => {
                        self.apply_settings(change);
                    }
                    None => log::warn!("Ignoring invalid setting change for {}", key),
                }
            }
            _ => {}
        }
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Decide a navigation attempt. Never blocks on the network.
    pub fn on_before_navigate(&self, req: &NavigationRequest<'_>) -> NavigationResult {
        let settings = self.settings();
        let now = self.clock.now_ms();

        let mut allowlist = lock(&self.allowlist);
        let mut cache = lock(&self.cache);
        let result = Interceptor::new(&settings, &self.warning_page).evaluate(
            req,
            &mut allowlist,
            &mut cache,
            now,
        );
        self.persist_allowlist(&mut allowlist);
        self.persist_cache(&mut cache);
        result
    }

    // =========================================================================
    // Scoring
    // =========================================================================

    fn scoring_client(&self) -> ScoringClient {
        let config = ScoringConfig::from(&*self.settings.borrow());
        ScoringClient::new(self.transport.clone(), config)
    }

    /// Cache-first score for a URL. Concurrent lookups for the same host
    /// share one provider call.
    pub async fn lookup(&self, url: &str) -> ScoreResult {
        let client = self.scoring_client();
        let host = match hostname_of(url) {
            Some(host) if is_http_url(url) => host,
            _ => return client.score(url).await,
        };

        if let Some(entry) = self.cached_entry(&host) {
            log::debug!("Cache hit for {}", host);
            return entry.result;
        }

        let client = &client;
        let host_ref = host.as_str();
        self.inflight
            .run(&host, move || async move {
                let result = client.score(url).await;
                self.record(host_ref, &result);
                result
            })
            .await
    }

    fn record(&self, host: &str, result: &ScoreResult) {
        let now = self.clock.now_ms();
        let mut cache = lock(&self.cache);
        if !cache.put(host, result.clone(), now) {
            log::debug!("Not caching unscored result for {}: {}", host, result.reason);
        }
        self.persist_cache(&mut cache);
    }

    // =========================================================================
    // Tabs
    // =========================================================================

    /// Score a tab's URL and publish the result for it.
    pub async fn refresh_tab(&self, tab_id: i32, url: &str) -> Option<TabState> {
        if !is_http_url(url) {
            return None;
        }
        let result = self.lookup(url).await;
        let state = project(tab_id, url, &result, self.clock.now_ms());

        let indicator = lock(&self.tabs).publish(state.clone());
        persist_best_effort(self.storage.as_ref(), &tab_key(tab_id), &state);
        self.surface.set_indicator(tab_id, &indicator);
        Some(state)
    }

    pub async fn on_tab_load_complete(&self, tab_id: i32, url: &str) -> Option<TabState> {
        self.refresh_tab(tab_id, url).await
    }

    pub async fn on_tab_activated(&self, tab_id: i32) -> Option<TabState> {
        let url = self.surface.tab_url(tab_id)?;
        self.refresh_tab(tab_id, &url).await
    }

    pub fn on_tab_removed(&self, tab_id: i32) {
        lock(&self.tabs).remove(tab_id);
        remove_best_effort(self.storage.as_ref(), &tab_key(tab_id));
    }

    pub fn tab_state(&self, tab_id: i32) -> Option<TabState> {
        lock(&self.tabs).get(tab_id).cloned()
    }

    // =========================================================================
    // Messages and bypass
    // =========================================================================

    pub async fn handle_message(&self, message: Message) {
        match message {
            Message::ScoreTabNow { tab_id } => {
                if self.on_tab_activated(tab_id).await.is_none() {
                    log::debug!("Tab {} has nothing to score", tab_id);
                }
            }
            Message::AllowOnce { url, host } => {
                self.allow_once(&url, host.as_deref());
            }
        }
    }

    /// Bypass from the warning page. The host falls back to the one in
    /// `url` when not given.
    pub fn allow_once(&self, url: &str, host: Option<&str>) -> Option<u64> {
        let host = host.and_then(normalize_host).or_else(|| hostname_of(url));
        match host {
            Some(host) => self.grant_bypass(&host),
            None => {
                log::warn!("Ignoring bypass for {:?}: no host", url);
                None
            }
        }
    }

    /// Allowlist a host for the configured bypass duration. Returns the
    /// expiry (0 = permanent).
    pub fn grant_bypass(&self, host: &str) -> Option<u64> {
        let host = normalize_host(host)?;
        let minutes = self.settings.borrow().bypass_duration_minutes;
        let now = self.clock.now_ms();

        let mut allowlist = lock(&self.allowlist);
        let expires_at = allowlist.grant(&host, minutes, now);
        self.persist_allowlist(&mut allowlist);
        Some(expires_at)
    }

    pub fn revoke_bypass(&self, host: &str) -> bool {
        let Some(host) = normalize_host(host) else {
            return false;
        };
        let mut allowlist = lock(&self.allowlist);
        let removed = allowlist.revoke(&host);
        self.persist_allowlist(&mut allowlist);
        removed
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Fresh cache entry for a host; a stale one is evicted.
    pub fn cached_entry(&self, host: &str) -> Option<HostCacheEntry> {
        let now = self.clock.now_ms();
        let mut cache = lock(&self.cache);
        let entry = cache.get(host, now).cloned();
        self.persist_cache(&mut cache);
        entry
    }

    pub fn cache_snapshot(&self) -> HashMap<String, HostCacheEntry> {
        lock(&self.cache).entries().clone()
    }

    pub fn clear_cache(&self) {
        let mut cache = lock(&self.cache);
        cache.clear();
        self.persist_cache(&mut cache);
    }

    pub fn allowlist_snapshot(&self) -> HashMap<String, u64> {
        lock(&self.allowlist).entries().clone()
    }

    pub fn warning_page(&self) -> &str {
        &self.warning_page
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    fn persist_cache(&self, cache: &mut HostRiskCache) {
        if cache.take_dirty() {
            persist_best_effort(self.storage.as_ref(), HOST_CACHE_KEY, cache.entries());
        }
    }

    fn persist_allowlist(&self, allowlist: &mut Allowlist) {
        if allowlist.take_dirty() {
            persist_best_effort(self.storage.as_ref(), ALLOWLIST_KEY, allowlist.entries());
        }
    }
}

/// Map from a storage notification, dropping entries that do not parse.
fn map_from_value<T: DeserializeOwned>(value: Option<Value>) -> HashMap<String, T> {
    match value {
        Some(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(k, v)| serde_json::from_value(v).ok().map(|parsed| (k, parsed)))
            .collect(),
        _ => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;
    use rl_core::clock::ManualClock;
    use rl_core::settings::ThresholdPolicy;
    use rl_core::storage::MemoryStorage;
    use rl_core::types::{DecisionReason, Label};
    use serde_json::json;

    fn gatekeeper(storage: Arc<MemoryStorage>, transport: FakeTransport) -> (Gatekeeper, ManualClock) {
        let clock = ManualClock::new(1_000);
        let gk = Gatekeeper::builder(storage, Arc::new(transport))
            .clock(Arc::new(clock.clone()))
            .build();
        (gk, clock)
    }

    #[test]
    fn test_loads_persisted_state() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("blockingEnabled", json!(false)).unwrap();
        storage
            .set(ALLOWLIST_KEY, json!({ "trusted.test": 0 }))
            .unwrap();
        storage
            .set(
                HOST_CACHE_KEY,
                json!({ "evil.test": { "score": 90.0, "label": "danger", "verdict": "phishing",
                    "explanations": [], "reason": "Model: phishing", "updatedAtMs": 500 } }),
            )
            .unwrap();

        let (gk, _) = gatekeeper(storage, FakeTransport::default());
        assert!(!gk.settings().blocking_enabled);
        assert_eq!(gk.allowlist_snapshot().get("trusted.test"), Some(&0));
        assert_eq!(gk.cached_entry("evil.test").unwrap().result.score, Some(90.0));
    }

    #[test]
    fn test_migrates_legacy_allowlist() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(
                LEGACY_ALLOWLIST_KEY,
                json!({ "https://Old.Test/login?x=1": 0, "not a url": 5 }),
            )
            .unwrap();

        let (gk, _) = gatekeeper(storage.clone(), FakeTransport::default());
        assert_eq!(gk.allowlist_snapshot().len(), 1);
        assert_eq!(
            storage.get(ALLOWLIST_KEY).unwrap(),
            Some(json!({ "old.test": 0 }))
        );
    }

    #[test]
    fn test_update_settings_persists_and_publishes() {
        let storage = Arc::new(MemoryStorage::new());
        let (gk, _) = gatekeeper(storage.clone(), FakeTransport::default());
        let mut rx = gk.subscribe();

        assert!(!gk.update_settings(SettingsChange::CacheTtlMinutes(-3.0)));
        assert!(gk.update_settings(SettingsChange::CacheTtlMinutes(5.0)));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().cache_ttl_minutes, 5.0);
        assert_eq!(storage.get("cacheTtlMinutes").unwrap(), Some(json!(5.0)));
        assert_eq!(lock(&gk.cache).ttl_ms(), 5 * 60_000);
    }

    #[test]
    fn test_fixed_threshold_is_not_persisted() {
        let storage = Arc::new(MemoryStorage::new());
        let (gk, _) = gatekeeper(storage.clone(), FakeTransport::default());
        assert!(!gk.update_settings(SettingsChange::DangerThreshold(20.0)));
        assert_eq!(storage.get("dangerThreshold").unwrap(), None);

        assert!(gk.update_settings(SettingsChange::ThresholdPolicy(ThresholdPolicy::Configurable)));
        assert!(gk.update_settings(SettingsChange::DangerThreshold(20.0)));
        assert_eq!(gk.settings().danger_threshold, 20.0);
    }

    #[test]
    fn test_storage_change_replaces_mirrors() {
        let storage = Arc::new(MemoryStorage::new());
        let (gk, _) = gatekeeper(storage, FakeTransport::default());
        gk.grant_bypass("a.test");

        gk.apply_storage_change(StorageChange::new(
            ALLOWLIST_KEY,
            Some(json!({ "b.test": 0, "bad.test": "soon" })),
        ));
        let allowlist = gk.allowlist_snapshot();
        assert_eq!(allowlist.len(), 1);
        assert!(allowlist.contains_key("b.test"));

        gk.apply_storage_change(StorageChange::new("blockingEnabled", Some(json!(false))));
        assert!(!gk.settings().blocking_enabled);
        gk.apply_storage_change(StorageChange::new("blockingEnabled", None));
        assert!(gk.settings().blocking_enabled);

        gk.apply_storage_change(StorageChange::new("somethingElse", Some(json!(1))));
    }

    #[tokio::test]
    async fn test_lookup_caches_scored_results() {
        let storage = Arc::new(MemoryStorage::new());
        let transport = FakeTransport::default().with_score("evil.test", 88.0);
        let (gk, _) = gatekeeper(storage.clone(), transport);

        let first = gk.lookup("https://evil.test/a").await;
        let second = gk.lookup("https://evil.test/b").await;
        assert_eq!(first, second);
        assert_eq!(first.label, Label::Danger);
        assert!(storage.get(HOST_CACHE_KEY).unwrap().unwrap()["evil.test"].is_object());
    }

    #[tokio::test]
    async fn test_lookup_rejects_bad_url_without_caching() {
        let (gk, _) = gatekeeper(Arc::new(MemoryStorage::new()), FakeTransport::default());
        let result = gk.lookup("file:///etc/passwd").await;
        assert_eq!(result.score, None);
        assert!(gk.cache_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_tab_publishes_indicator() {
        let storage = Arc::new(MemoryStorage::new());
        let surface = Arc::new(MemorySurface::new());
        let gk = Gatekeeper::builder(
            storage.clone(),
            Arc::new(FakeTransport::default().with_score("shady.test", 55.0)),
        )
        .surface(surface.clone())
        .build();

        surface.open_tab(3, "https://shady.test/");
        let state = gk.on_tab_activated(3).await.unwrap();
        assert_eq!(state.label, Label::Suspicious);
        assert_eq!(
            surface.indicator(3).unwrap().title,
            "RiskLens: 55/100 (suspicious)"
        );
        assert!(storage.get("tab:3").unwrap().is_some());

        gk.on_tab_removed(3);
        assert!(gk.tab_state(3).is_none());
        assert!(storage.get("tab:3").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_tab_ignores_non_http() {
        let (gk, _) = gatekeeper(Arc::new(MemoryStorage::new()), FakeTransport::default());
        assert!(gk.refresh_tab(1, "about:blank").await.is_none());
        assert!(gk.tab_state(1).is_none());
    }

    #[test]
    fn test_allow_once_derives_host() {
        let (gk, clock) = gatekeeper(Arc::new(MemoryStorage::new()), FakeTransport::default());
        let expires = gk.allow_once("https://Evil.Test/login", None).unwrap();
        assert_eq!(expires, clock.now_ms() + 60 * 60_000);
        assert!(gk.allowlist_snapshot().contains_key("evil.test"));

        assert!(gk.allow_once("garbage", None).is_none());
        assert!(gk.revoke_bypass("EVIL.test"));
    }

    fn with_dangerous(host: &str) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(
                HOST_CACHE_KEY,
                json!({ host: { "score": 90.0, "label": "danger", "verdict": "phishing",
                    "explanations": [], "reason": "Model: phishing", "updatedAtMs": 1_000 } }),
            )
            .unwrap();
        storage
    }

    #[test]
    fn test_bypass_keys_match_navigation_keys() {
        let (gk, _) = gatekeeper(with_dangerous("evil.test"), FakeTransport::default());
        gk.allow_once("https://evil.test./login", Some("evil.test.")).unwrap();
        let result = gk.on_before_navigate(&NavigationRequest::main_frame("https://evil.test./login", 1));
        assert_eq!(result.reason, DecisionReason::Allowlisted);

        let (gk, _) = gatekeeper(with_dangerous("xn--bcher-kva.test"), FakeTransport::default());
        gk.grant_bypass("bücher.test").unwrap();
        assert!(gk.allowlist_snapshot().contains_key("xn--bcher-kva.test"));
        let result = gk.on_before_navigate(&NavigationRequest::main_frame("https://bücher.test/", 1));
        assert_eq!(result.reason, DecisionReason::Allowlisted);
    }

    #[test]
    fn test_huge_bypass_duration_does_not_overflow() {
        let (gk, clock) = gatekeeper(with_dangerous("evil.test"), FakeTransport::default());
        assert!(gk.update_settings(SettingsChange::BypassDurationMinutes(1e300)));
        assert_eq!(gk.grant_bypass("evil.test"), Some(u64::MAX));

        clock.advance_minutes(60 * 24 * 365);
        let result = gk.on_before_navigate(&NavigationRequest::main_frame("https://evil.test/", 1));
        assert_eq!(result.reason, DecisionReason::Allowlisted);
    }

    #[test]
    fn test_navigation_persists_pruned_allowlist() {
        let storage = Arc::new(MemoryStorage::new());
        let (gk, clock) = gatekeeper(storage.clone(), FakeTransport::default());
        gk.update_settings(SettingsChange::BypassDurationMinutes(1.0));
        gk.grant_bypass("brief.test");

        clock.advance_minutes(2);
        let result = gk.on_before_navigate(&NavigationRequest::main_frame("https://brief.test/", 1));
        assert_eq!(result.reason, DecisionReason::Unscored);
        assert_eq!(storage.get(ALLOWLIST_KEY).unwrap(), Some(json!({})));
    }
}
