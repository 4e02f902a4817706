//! Runtime messages
//!
//! UI contexts (popup, warning page) talk to the background component with
//! small JSON messages tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "ts")]
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Re-evaluate a tab right away (sent by the popup)
    ScoreTabNow {
        #[serde(rename = "tabId")]
        tab_id: i32,
    },
    /// Grant a bypass for a host (sent by the warning page)
    AllowOnce {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
    },
}

impl Message {
    /// Parse an incoming message, ignoring anything unrecognized.
    pub fn parse(value: &Value) -> Option<Self> {
        match serde_json::from_value(value.clone()) {
            Ok(message) => Some(message),
            Err(e) => {
                log::debug!("Ignoring message {}: {}", value, e);
                None
            }
        }
    }
}
