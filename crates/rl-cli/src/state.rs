use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use rl_client::{Gatekeeper, HttpTransport};
use rl_core::allowlist::PERMANENT;
use rl_core::clock::MS_PER_MINUTE;
use rl_core::{JsonFileStorage, Settings, SettingsChange};

pub const DEFAULT_STATE_FILE: &str = "risklens-state.json";

/// Build a gatekeeper over a JSON state file, talking to the real provider.
pub fn open_gatekeeper(path: &Path, warning_page: Option<&str>) -> Result<Gatekeeper, String> {
    let storage = JsonFileStorage::open(path)
        .map_err(|e| format!("Failed to open state file '{}': {}", path.display(), e))?;
    let transport =
        HttpTransport::new().map_err(|e| format!("Failed to set up HTTP client: {}", e))?;

    let mut builder = Gatekeeper::builder(Arc::new(storage), Arc::new(transport));
    if let Some(page) = warning_page {
        builder = builder.warning_page(page);
    }
    Ok(builder.build())
}

/// Parse `settings set KEY VALUE`. The value is read as JSON, falling back
/// to a plain string.
pub fn parse_setting(key: &str, raw: &str) -> Result<SettingsChange, String> {
    if !Settings::KEYS.contains(&key) {
        return Err(format!(
            "Unknown setting '{}' (expected one of: {})",
            key,
            Settings::KEYS.join(", ")
        ));
    }
    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    SettingsChange::from_storage(key, &value)
        .ok_or_else(|| format!("Invalid value '{}' for setting '{}'", raw, key))
}

pub fn describe_expiry(expires_at: u64, now_ms: u64) -> String {
    if expires_at == PERMANENT {
        "permanent".to_string()
    } else if expires_at <= now_ms {
        "expired".to_string()
    } else {
        let minutes = (expires_at - now_ms + MS_PER_MINUTE - 1) / MS_PER_MINUTE;
        format!("{} min left", minutes)
    }
}
