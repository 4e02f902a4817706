//! Per-tab score projection
//!
//! Purely observational: the interceptor never reads tab state. Updates are
//! last-write-wins, so a slow scoring call for a tab that has since moved on
//! may overwrite a newer one; the next load or activation corrects it.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

use crate::normalize::pick_top_reasons;
use crate::types::{format_score, Label, ScoreResult, TabState};

/// Prefix of every indicator title.
pub const TITLE_PREFIX: &str = "RiskLens";

/// What the toolbar button shows for a tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct TabIndicator {
    pub label: Label,
    pub icon: String,
    pub title: String,
}

impl TabIndicator {
    pub fn for_state(state: &TabState) -> Self {
        // An unscored tab keeps the safe icon, so the title must say why.
        let title = match state.score {
            Some(score) => format!(
                "{}: {}/100 ({})",
                TITLE_PREFIX,
                format_score(score),
                state.label
            ),
            None if state.reason.is_empty() => format!("{}: no score yet", TITLE_PREFIX),
            None => format!("{}: no score ({})", TITLE_PREFIX, state.reason),
        };
        Self {
            label: state.label,
            icon: state.label.icon_path().to_string(),
            title,
        }
    }
}

/// Browser-side collaborator: tab lookup and toolbar indicator.
pub trait TabSurface: Send + Sync {
    /// Current URL of a tab, if it exists.
    fn tab_url(&self, tab_id: i32) -> Option<String>;
    fn set_indicator(&self, tab_id: i32, indicator: &TabIndicator);
}

/// Project a scoring result onto a tab.
///
/// Errored results are shown as unscored with their reason, never as a
/// confident "safe".
pub fn project(tab_id: i32, url: &str, result: &ScoreResult, now_ms: u64) -> TabState {
    if result.error.is_some() || !result.is_scored() {
        return TabState {
            tab_id,
            url: url.to_string(),
            score: None,
            label: Label::Safe,
            verdict: None,
            explanations: Vec::new(),
            reason: result.reason.clone(),
            error: result.error.clone(),
            updated_at_ms: now_ms,
        };
    }

    let explanations = if result.explanations.is_empty() {
        result.raw.as_ref().map(pick_top_reasons).unwrap_or_default()
    } else {
        result.explanations.clone()
    };

    TabState {
        tab_id,
        url: url.to_string(),
        score: result.score,
        label: result.label,
        verdict: result.verdict.clone(),
        explanations,
        reason: result.reason.clone(),
        error: None,
        updated_at_ms: now_ms,
    }
}

/// Latest [`TabState`] per open tab.
#[derive(Debug, Default)]
pub struct TabStatePublisher {
    tabs: HashMap<i32, TabState>,
}

impl TabStatePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new state for its tab and return the indicator to show.
    pub fn publish(&mut self, state: TabState) -> TabIndicator {
        let indicator = TabIndicator::for_state(&state);
        log::debug!("Tab {} -> {}", state.tab_id, indicator.title);
        self.tabs.insert(state.tab_id, state);
        indicator
    }

    pub fn remove(&mut self, tab_id: i32) -> Option<TabState> {
        self.tabs.remove(&tab_id)
    }

    pub fn get(&self, tab_id: i32) -> Option<&TabState> {
        self.tabs.get(&tab_id)
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }
}

// =============================================================================
// Memory Surface
// =============================================================================

/// A [`TabSurface`] that keeps tabs and indicators in memory.
#[derive(Debug, Default)]
pub struct MemorySurface {
    urls: Mutex<HashMap<i32, String>>,
    indicators: Mutex<HashMap<i32, TabIndicator>>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_tab(&self, tab_id: i32, url: impl Into<String>) {
        self.urls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(tab_id, url.into());
    }

    pub fn close_tab(&self, tab_id: i32) {
        self.urls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&tab_id);
        self.indicators
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&tab_id);
    }

    pub fn indicator(&self, tab_id: i32) -> Option<TabIndicator> {
        self.indicators
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&tab_id)
            .cloned()
    }
}

impl TabSurface for MemorySurface {
    fn tab_url(&self, tab_id: i32) -> Option<String> {
        self.urls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&tab_id)
            .cloned()
    }

    fn set_indicator(&self, tab_id: i32, indicator: &TabIndicator) {
        self.indicators
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(tab_id, indicator.clone());
    }
}
