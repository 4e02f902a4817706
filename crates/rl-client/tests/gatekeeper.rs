//! End-to-end behaviour of the gatekeeper against a scripted provider.

mod common;

use std::time::Duration;

use common::{Harness, Reply, WARNING_PAGE};
use rl_client::Dispatcher;
use rl_core::types::DecisionReason;
use rl_core::{
    Clock, Label, Message, NavigationDecision, NavigationRequest, RequestType, SettingsChange,
    ThresholdPolicy, WarningParams,
};

fn navigate(h: &Harness, url: &str) -> rl_core::NavigationResult {
    h.gatekeeper
        .on_before_navigate(&NavigationRequest::main_frame(url, 1))
}

#[tokio::test]
async fn test_fresh_entry_needs_no_remote_call() {
    let h = Harness::new();
    h.provider.reply("news.test", Reply::Score(12.0));

    let first = h.gatekeeper.lookup("https://news.test/a").await;
    h.clock.advance_minutes(9);
    let second = h.gatekeeper.lookup("https://news.test/b").await;

    assert_eq!(first, second);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn test_stale_entry_is_removed_and_rescored() {
    let h = Harness::new();
    h.gatekeeper.lookup("https://news.test/").await;

    h.clock.advance_minutes(10);
    assert!(h.gatekeeper.cached_entry("news.test").is_none());
    assert!(h.gatekeeper.cache_snapshot().is_empty());

    h.gatekeeper.lookup("https://news.test/").await;
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test]
async fn test_dangerous_host_redirects_with_score() {
    let h = Harness::new();
    h.provider.reply("evil.test", Reply::Score(85.0));
    h.gatekeeper.lookup("https://evil.test/").await;

    let result = navigate(&h, "https://evil.test/login?next=%2Fhome");
    assert_eq!(result.decision, NavigationDecision::Redirect);

    let redirect = result.redirect_url.unwrap();
    assert!(redirect.starts_with(WARNING_PAGE));
    let params = WarningParams::parse(&redirect).unwrap();
    assert_eq!(params.score, Some(85.0));
    assert_eq!(params.target, "https://evil.test/login?next=%2Fhome");
    assert_eq!(params.verdict.as_deref(), Some("phishing"));

    // Following the redirect does not loop.
    assert_eq!(navigate(&h, &redirect).reason, DecisionReason::UnsupportedScheme);
}

#[tokio::test]
async fn test_unknown_host_allowed_at_zero_threshold() {
    let h = Harness::new();
    h.gatekeeper
        .update_settings(SettingsChange::ThresholdPolicy(ThresholdPolicy::Configurable));
    assert!(h.gatekeeper.update_settings(SettingsChange::DangerThreshold(0.0)));

    let result = navigate(&h, "https://brand-new.test/");
    assert!(result.is_allowed());
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn test_permanent_bypass() {
    let h = Harness::new();
    h.gatekeeper
        .update_settings(SettingsChange::CacheTtlMinutes(60.0 * 24.0 * 365.0));
    h.gatekeeper
        .update_settings(SettingsChange::BypassDurationMinutes(0.0));
    h.provider.reply("evil.test", Reply::Score(95.0));
    h.gatekeeper.lookup("https://evil.test/").await;

    h.gatekeeper
        .handle_message(Message::AllowOnce {
            url: "https://evil.test/login".into(),
            host: Some("evil.test".into()),
        })
        .await;
    assert_eq!(navigate(&h, "https://evil.test/").reason, DecisionReason::Allowlisted);

    h.clock.advance(Duration::from_secs(60 * 60 * 24 * 200));
    assert_eq!(navigate(&h, "https://evil.test/").reason, DecisionReason::Allowlisted);
    assert_eq!(h.gatekeeper.allowlist_snapshot().get("evil.test"), Some(&0));
}

#[tokio::test]
async fn test_timed_bypass_expires() {
    let h = Harness::new();
    h.gatekeeper
        .update_settings(SettingsChange::CacheTtlMinutes(120.0));
    h.gatekeeper
        .update_settings(SettingsChange::BypassDurationMinutes(30.0));
    h.provider.reply("evil.test", Reply::Score(85.0));
    h.gatekeeper.lookup("https://evil.test/").await;

    h.gatekeeper.allow_once("https://evil.test/login", None).unwrap();
    h.clock.advance_minutes(1);
    assert!(navigate(&h, "https://evil.test/").is_allowed());

    h.clock.advance_minutes(30);
    let result = navigate(&h, "https://evil.test/");
    assert_eq!(result.decision, NavigationDecision::Redirect);
    assert!(h.gatekeeper.allowlist_snapshot().is_empty());
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_fails_open() {
    let h = Harness::new();
    h.provider.reply("slow.test", Reply::Hang);

    let result = h.gatekeeper.lookup("https://slow.test/").await;
    assert_eq!(result.score, None);
    assert_eq!(result.label, Label::Safe);
    assert!(result.error.is_some());

    assert!(h.gatekeeper.cache_snapshot().is_empty());
    assert_eq!(navigate(&h, "https://slow.test/").reason, DecisionReason::Unscored);
}

#[tokio::test]
async fn test_upstream_failure_never_blocks() {
    let h = Harness::new();
    h.provider
        .reply("down.test", Reply::Status(503, r#"{"detail":"warming up"}"#.into()));

    let result = h.gatekeeper.lookup("https://down.test/").await;
    assert_eq!(result.reason, "warming up");
    assert!(h.gatekeeper.cached_entry("down.test").is_none());

    h.gatekeeper
        .update_settings(SettingsChange::CacheFailures(true));
    h.gatekeeper.lookup("https://down.test/").await;
    assert!(h.gatekeeper.cached_entry("down.test").is_some());
    assert!(navigate(&h, "https://down.test/").is_allowed());

    // Served from cache now
    h.gatekeeper.lookup("https://down.test/").await;
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_lookups_share_one_call() {
    let h = Harness::new();
    h.provider.reply("popular.test", Reply::Score(30.0));
    h.provider.set_delay(Duration::from_secs(2));

    let (a, b) = tokio::join!(
        h.gatekeeper.lookup("https://popular.test/a"),
        h.gatekeeper.lookup("https://popular.test/b"),
    );
    assert_eq!(a, b);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn test_tab_state_lifecycle() {
    let h = Harness::new();
    h.provider.reply("shop.test", Reply::Score(45.0));

    let state = h
        .gatekeeper
        .on_tab_load_complete(9, "https://shop.test/cart")
        .await
        .unwrap();
    assert_eq!(state.label, Label::Suspicious);
    assert_eq!(state.explanations[0], "has_ip_address: 0.4");
    assert_eq!(h.gatekeeper.tab_state(9), Some(state));

    h.gatekeeper.on_tab_removed(9);
    assert!(h.gatekeeper.tab_state(9).is_none());
}

#[tokio::test]
async fn test_state_survives_restart() {
    let h = Harness::new();
    h.provider.reply("evil.test", Reply::Score(99.0));
    h.gatekeeper.lookup("https://evil.test/").await;
    h.gatekeeper.grant_bypass("friend.test");

    let restarted = Harness::with_storage(h.storage.clone());
    restarted.clock.set(h.clock.now_ms());
    assert!(restarted.gatekeeper.cached_entry("evil.test").is_some());
    assert!(restarted
        .gatekeeper
        .allowlist_snapshot()
        .contains_key("friend.test"));
}

#[tokio::test(start_paused = true)]
async fn test_dispatcher_end_to_end() {
    let h = Harness::new();
    h.provider.reply("evil.test", Reply::Score(90.0));
    let (dispatcher, handle) = Dispatcher::new(h.gatekeeper.clone(), 8);
    let task = tokio::spawn(dispatcher.run());

    h.gatekeeper.lookup("https://evil.test/").await;
    let blocked = handle
        .navigate("https://evil.test/", RequestType::MainFrame, 2)
        .await;
    assert_eq!(blocked.decision, NavigationDecision::Redirect);

    let frame = handle
        .navigate("https://evil.test/ad", RequestType::SubFrame, 2)
        .await;
    assert!(frame.is_allowed());

    drop(handle);
    task.await.unwrap();
}
