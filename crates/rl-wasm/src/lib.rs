//! WebAssembly bindings for RiskLens
//!
//! The extension's background script owns the browser listeners, the
//! `fetch` to the scoring provider and `storage.local`. These bindings hold
//! the in-memory mirrors and make every decision. Mutations are collected
//! and handed back by `take_pending_writes` for the script to persist.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use wasm_bindgen::prelude::*;

use rl_core::{
    normalize::{from_error, normalize_response, score_to_label},
    settings::SettingsChange,
    storage::{load_map, ALLOWLIST_KEY, HOST_CACHE_KEY, LEGACY_ALLOWLIST_KEY, tab_key},
    tab_state::project,
    url::{hostname_of, is_http_url, normalize_host, parse_http_url},
    Allowlist, HostRiskCache, Interceptor, MemoryStorage, Message,
    NavigationRequest, NavigationResult, RequestType, ScoreError, ScoreResult, Settings, Storage,
    TabIndicator, WarningParams,
};

struct GateState {
    settings: Settings,
    cache: HostRiskCache,
    allowlist: Allowlist,
    warning_page: String,
}

static GATE_STATE: OnceLock<Mutex<GateState>> = OnceLock::new();

impl GateState {
    /// Build the mirrors from a `storage.local` snapshot.
    fn load(stored: &Map<String, Value>, warning_page: &str) -> Self {
        let storage = MemoryStorage::new();
        for (key, value) in stored {
            let _ = storage.set(key, value.clone());
        }

        let settings = Settings::from_storage(&storage);
        let mut allowlist = Allowlist::from_entries(load_map(&storage, ALLOWLIST_KEY));
        allowlist.set_default_minutes(settings.bypass_duration_minutes);
        if allowlist.is_empty() {
            allowlist.migrate_legacy(&load_map(&storage, LEGACY_ALLOWLIST_KEY));
        }
        let mut cache = HostRiskCache::from_entries(
            load_map(&storage, HOST_CACHE_KEY),
            settings.cache_ttl_minutes,
        );
        cache.set_cache_failures(settings.cache_failures);

        Self {
            settings,
            cache,
            allowlist,
            warning_page: warning_page.to_string(),
        }
    }

    fn evaluate(&mut self, req: &NavigationRequest<'_>, now_ms: u64) -> NavigationResult {
        Interceptor::new(&self.settings, &self.warning_page).evaluate(
            req,
            &mut self.allowlist,
            &mut self.cache,
            now_ms,
        )
    }

    fn cached(&mut self, url: &str, now_ms: u64) -> Option<ScoreResult> {
        let host = hostname_of(url)?;
        self.cache.get(&host, now_ms).map(|entry| entry.result.clone())
    }

    fn record(&mut self, url: &str, result: ScoreResult, now_ms: u64) -> bool {
        match hostname_of(url) {
            Some(host) if is_http_url(url) => self.cache.put(&host, result, now_ms),
            _ => false,
        }
    }

    fn allow_once(&mut self, url: &str, host: Option<&str>, now_ms: u64) -> Option<u64> {
        let host = host.and_then(normalize_host).or_else(|| hostname_of(url))?;
        Some(
            self.allowlist
                .grant(&host, self.settings.bypass_duration_minutes, now_ms),
        )
    }

    /// Apply one `storage.onChanged` entry.
    fn apply_change(&mut self, key: &str, new_value: Option<&Value>) {
        match key {
            HOST_CACHE_KEY => self.cache.replace_all(map_of(new_value)),
            ALLOWLIST_KEY => self.allowlist.replace_all(map_of(new_value)),
            _ if Settings::KEYS.contains(&key) => {
                let change = match new_value {
                    Some(value) => SettingsChange::from_storage(key, value),
                    None => Settings::default()
                        .to_changes()
                        .into_iter()
                        .find(|c| c.key() == key),
                };
                if let Some(change) = change {
                    self.settings.apply(change);
                    self.allowlist
                        .set_default_minutes(self.settings.bypass_duration_minutes);
                    self.cache.set_ttl_minutes(self.settings.cache_ttl_minutes);
                    self.cache.set_cache_failures(self.settings.cache_failures);
                }
            }
            _ => {}
        }
    }

    /// Keys whose mirrors changed since the last call, with their new values.
    fn pending_writes(&mut self) -> Map<String, Value> {
        let mut writes = Map::new();
        if self.cache.take_dirty() {
            writes.insert(HOST_CACHE_KEY.to_string(), json_of(self.cache.entries()));
        }
        if self.allowlist.take_dirty() {
            writes.insert(ALLOWLIST_KEY.to_string(), json_of(self.allowlist.entries()));
        }
        writes
    }
}

fn map_of<T: DeserializeOwned>(value: Option<&Value>) -> HashMap<String, T> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| serde_json::from_value(v.clone()).ok().map(|parsed| (k.clone(), parsed)))
            .collect(),
        _ => HashMap::new(),
    }
}

fn json_of<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn state() -> Option<MutexGuard<'static, GateState>> {
    GATE_STATE
        .get()
        .map(|state| state.lock().unwrap_or_else(|p| p.into_inner()))
}

fn now_ms() -> u64 {
    js_sys::Date::now().max(0.0) as u64
}

// =============================================================================
// JS conversion
// =============================================================================

fn to_js<T: Serialize + ?Sized>(value: &T) -> JsValue {
    serde_json::to_string(value)
        .ok()
        .and_then(|text| js_sys::JSON::parse(&text).ok())
        .unwrap_or(JsValue::NULL)
}

fn from_js(value: &JsValue) -> Option<Value> {
    if value.is_null() || value.is_undefined() {
        return None;
    }
    let text: String = js_sys::JSON::stringify(value).ok()?.into();
    serde_json::from_str(&text).ok()
}

fn warn(message: &str) {
    web_sys::console::warn_1(&JsValue::from_str(message));
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Load mirrors from a `storage.local.get()` snapshot.
#[wasm_bindgen]
pub fn init(warning_page: &str, stored: JsValue) -> Result<(), JsValue> {
    if GATE_STATE.get().is_some() {
        return Err(JsValue::from_str("Already initialized. Reload the extension to reinitialize."));
    }
    let stored = match from_js(&stored) {
        Some(Value::Object(map)) => map,
        Some(_) => return Err(JsValue::from_str("Stored state must be an object")),
        None => Map::new(),
    };

    GATE_STATE
        .set(Mutex::new(GateState::load(&stored, warning_page)))
        .map_err(|_| JsValue::from_str("Failed to set gatekeeper state"))?;
    Ok(())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    GATE_STATE.get().is_some()
}

/// Feed a `storage.onChanged` changes object into the mirrors.
#[wasm_bindgen]
pub fn apply_storage_changes(changes: JsValue) {
    let Some(mut state) = state() else {
        return;
    };
    let Some(Value::Object(changes)) = from_js(&changes) else {
        warn("RiskLens: ignoring malformed storage change");
        return;
    };
    for (key, change) in &changes {
        let new_value = change.get("newValue").filter(|v| !v.is_null());
        state.apply_change(key, new_value);
    }
}

/// Values the script should write to `storage.local`, keyed by storage key.
#[wasm_bindgen]
pub fn take_pending_writes() -> JsValue {
    match state() {
        Some(mut state) => to_js(&state.pending_writes()),
        None => js_sys::Object::new().into(),
    }
}

#[wasm_bindgen]
pub fn get_settings() -> JsValue {
    match state() {
        Some(state) => to_js(&state.settings),
        None => to_js(&Settings::default()),
    }
}

// =============================================================================
// Navigation
// =============================================================================

#[wasm_bindgen]
pub fn evaluate_navigation(url: &str, request_type: &str, tab_id: i32) -> JsValue {
    let result = match state() {
        Some(mut state) => {
            let req = NavigationRequest {
                url,
                request_type: RequestType::from_str(request_type),
                tab_id,
            };
            state.evaluate(&req, now_ms())
        }
        None => NavigationResult::default(),
    };

    let js_result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&js_result, &"decision".into(), &JsValue::from_str(result.decision.as_str()));
    let _ = js_sys::Reflect::set(&js_result, &"reason".into(), &JsValue::from_str(result.reason.as_str()));
    if let Some(redirect_url) = result.redirect_url {
        let _ = js_sys::Reflect::set(&js_result, &"redirectUrl".into(), &JsValue::from_str(&redirect_url));
    }
    js_result.into()
}

/// Grant a bypass from an `ALLOW_ONCE` message. Returns the expiry
/// (0 = permanent), or `undefined` if the message carried no host.
#[wasm_bindgen]
pub fn handle_allow_once(message: JsValue) -> Option<f64> {
    let mut state = state()?;
    match from_js(&message).as_ref().and_then(Message::parse) {
        Some(Message::AllowOnce { url, host }) => state
            .allow_once(&url, host.as_deref(), now_ms())
            .map(|expires_at| expires_at as f64),
        _ => {
            warn("RiskLens: not an ALLOW_ONCE message");
            None
        }
    }
}

// =============================================================================
// Scoring
// =============================================================================

/// Whether a URL should be sent to the scoring provider at all.
#[wasm_bindgen]
pub fn is_scorable_url(url: &str) -> bool {
    parse_http_url(url).is_ok()
}

#[wasm_bindgen]
pub fn score_endpoint() -> String {
    match state() {
        Some(state) => state.settings.score_endpoint(),
        None => Settings::default().score_endpoint(),
    }
}

#[wasm_bindgen]
pub fn request_timeout_ms() -> f64 {
    let timeout = match state() {
        Some(state) => state.settings.request_timeout(),
        None => Settings::default().request_timeout(),
    };
    timeout.as_millis() as f64
}

#[wasm_bindgen]
pub fn api_key() -> Option<String> {
    state()?.settings.api_key.clone()
}

/// Fresh cached result for the URL's host, or `null`.
#[wasm_bindgen]
pub fn cached_result(url: &str) -> JsValue {
    match state().and_then(|mut state| state.cached(url, now_ms())) {
        Some(result) => to_js(&result),
        None => JsValue::NULL,
    }
}

/// Normalize a provider response (status and raw body text).
#[wasm_bindgen]
pub fn normalize_score_response(status: u16, body: &str) -> JsValue {
    to_js(&normalize_response(status, body))
}

/// Fail-open result for a request that never got a response.
#[wasm_bindgen]
pub fn failed_score_result(timed_out: bool, message: &str) -> JsValue {
    let err = if timed_out {
        let secs = match state() {
            Some(state) => state.settings.request_timeout_secs,
            None => Settings::default().request_timeout_secs,
        };
        ScoreError::Timeout(Duration::from_secs(secs))
    } else {
        ScoreError::Transport(message.to_string())
    };
    to_js(&from_error(&err, None))
}

/// Store a result for the URL's host. Unscored results are skipped unless
/// failure caching is on.
#[wasm_bindgen]
pub fn record_score(url: &str, result: JsValue) -> bool {
    let Some(mut state) = state() else {
        return false;
    };
    match from_js(&result).and_then(|v| serde_json::from_value::<ScoreResult>(v).ok()) {
        Some(result) => state.record(url, result, now_ms()),
        None => {
            warn("RiskLens: ignoring malformed score result");
            false
        }
    }
}

#[wasm_bindgen]
pub fn label_for_score(score: Option<f64>) -> String {
    score_to_label(score).as_str().to_string()
}

// =============================================================================
// Tabs and warning page
// =============================================================================

/// Project a result onto a tab: `{ key, state, icon, title }`.
#[wasm_bindgen]
pub fn tab_update(tab_id: i32, url: &str, result: JsValue) -> JsValue {
    let result = from_js(&result)
        .and_then(|v| serde_json::from_value::<ScoreResult>(v).ok())
        .unwrap_or_else(|| ScoreResult::unscored("No score yet", None, None));
    let state = project(tab_id, url, &result, now_ms());
    let indicator = TabIndicator::for_state(&state);

    let js_result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&js_result, &"key".into(), &JsValue::from_str(&tab_key(tab_id)));
    let _ = js_sys::Reflect::set(&js_result, &"state".into(), &to_js(&state));
    let _ = js_sys::Reflect::set(&js_result, &"icon".into(), &JsValue::from_str(&indicator.icon));
    let _ = js_sys::Reflect::set(&js_result, &"title".into(), &JsValue::from_str(&indicator.title));
    js_result.into()
}

/// Everything the warning page needs from its own URL.
#[wasm_bindgen]
pub fn parse_warning_params(page_url: &str) -> JsValue {
    let Some(params) = WarningParams::parse(page_url) else {
        return JsValue::NULL;
    };
    let js_result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&js_result, &"target".into(), &JsValue::from_str(&params.target));
    let _ = js_sys::Reflect::set(&js_result, &"details".into(), &JsValue::from_str(&params.details()));
    let _ = js_sys::Reflect::set(&js_result, &"bypassMessage".into(), &to_js(&params.bypass_message()));
    if let Some(target) = params.continue_target() {
        let _ = js_sys::Reflect::set(&js_result, &"continueTo".into(), &JsValue::from_str(target));
    }
    js_result.into()
}

#[wasm_bindgen]
pub fn extract_hostname(url: &str) -> Option<String> {
    hostname_of(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rl_core::clock::MS_PER_MINUTE;
    use rl_core::types::{DecisionReason, NavigationDecision};
    use serde_json::json;

    const PAGE: &str = "moz-extension://abc/warning.html";

    fn load(stored: Value) -> GateState {
        match stored {
            Value::Object(map) => GateState::load(&map, PAGE),
            _ => GateState::load(&Map::new(), PAGE),
        }
    }

    fn navigate(state: &mut GateState, url: &str, now_ms: u64) -> NavigationResult {
        state.evaluate(&NavigationRequest::main_frame(url, 1), now_ms)
    }

    #[test]
    fn test_load_migrates_legacy_allowlist() {
        let mut state = load(json!({
            "allowlist": { "https://old.test/path": 0 },
            "bypassDurationMinutes": 15,
        }));
        assert_eq!(state.settings.bypass_duration_minutes, 15.0);
        assert_eq!(state.allowlist.expiry("old.test"), Some(0));

        let writes = state.pending_writes();
        assert_eq!(writes.get(ALLOWLIST_KEY), Some(&json!({ "old.test": 0 })));
        assert!(state.pending_writes().is_empty());
    }

    #[test]
    fn test_record_then_redirect() {
        let mut state = load(json!({}));
        let result = ScoreResult::scored(85.0, Some("phishing".into()), vec![], None);
        assert!(state.record("https://evil.test/a", result, 0));

        let decision = navigate(&mut state, "https://evil.test/b", 1);
        assert_eq!(decision.decision, NavigationDecision::Redirect);
        assert!(decision.redirect_url.unwrap().starts_with(PAGE));
        assert!(state.pending_writes().contains_key(HOST_CACHE_KEY));
    }

    #[test]
    fn test_unscored_results_are_not_recorded() {
        let mut state = load(json!({}));
        let failed = ScoreResult::unscored("Network error", Some("offline".into()), None);
        assert!(!state.record("https://down.test/", failed, 0));
        assert!(!state.record("chrome://settings", ScoreResult::scored(99.0, None, vec![], None), 0));
        assert!(state.cache.is_empty());
    }

    #[test]
    fn test_allow_once_and_expiry() {
        let mut state = load(json!({ "bypassDurationMinutes": 30, "cacheTtlMinutes": 120 }));
        state.record("https://evil.test/", ScoreResult::scored(90.0, None, vec![], None), 0);

        let expires = state.allow_once("https://evil.test/login", None, 0).unwrap();
        assert_eq!(expires, 30 * MS_PER_MINUTE);
        assert_eq!(navigate(&mut state, "https://evil.test/", MS_PER_MINUTE).reason, DecisionReason::Allowlisted);
        assert!(!navigate(&mut state, "https://evil.test/", 31 * MS_PER_MINUTE).is_allowed());
    }

    #[test]
    fn test_storage_changes_update_mirrors() {
        let mut state = load(json!({}));
        state.apply_change("blockingEnabled", Some(&json!(false)));
        assert!(!state.settings.blocking_enabled);

        state.apply_change("cacheTtlMinutes", Some(&json!(1)));
        assert_eq!(state.cache.ttl_ms(), MS_PER_MINUTE);

        state.apply_change(ALLOWLIST_KEY, Some(&json!({ "friend.test": 0 })));
        assert_eq!(state.allowlist.len(), 1);
        state.apply_change(ALLOWLIST_KEY, None);
        assert!(state.allowlist.is_empty());
    }

    #[test]
    fn test_cached_respects_ttl() {
        let mut state = load(json!({}));
        state.record("https://news.test/", ScoreResult::scored(10.0, None, vec![], None), 0);
        assert!(state.cached("https://news.test/other", MS_PER_MINUTE).is_some());
        assert!(state.cached("https://news.test/", 10 * MS_PER_MINUTE).is_none());
    }
}
