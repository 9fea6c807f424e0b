//! Integration tests for the session lifecycle.
//!
//! Covers idle logout after the page was hidden, unload clearing, reloads
//! in the same tab and in a new tab, and expiry. Unload and visibility are
//! only hints: every scenario is also checked with the hint never firing,
//! where startup validation decides.

use std::time::Duration;

use chrono::TimeDelta;

use aztec_core::SessionToken;
use aztec_integration_tests::{
    Browser, PASSWORD, keys, pid, product, register, start_clock,
};
use aztec_storefront::clock::Clock;
use aztec_storefront::models::{DeviceInfo, Session};
use aztec_storefront::remote::{MemoryRemote, RemoteService, SessionTarget};
use aztec_storefront::services::auth::Visibility;
use aztec_storefront::storage::KeyValueStore;

async fn signed_in(remember: bool) -> Browser {
    let remote = MemoryRemote::new();
    register(&remote, "ravi@aztec.farm", "ravi");
    let browser = Browser::new(&remote, &start_clock()).boot().await;
    browser.sign_in("ravi@aztec.farm", remember).await;
    browser
}

async fn hide_for(browser: &Browser, minutes: i64) {
    browser.app.auth().on_visibility_change(Visibility::Hidden).await;
    browser.clock.advance(TimeDelta::minutes(minutes));
    browser.app.auth().on_visibility_change(Visibility::Visible).await;
}

// =============================================================================
// Idle timeout
// =============================================================================

#[tokio::test]
async fn test_plain_session_hidden_twenty_minutes_is_ended() {
    let browser = signed_in(false).await;
    browser
        .app
        .ledger()
        .add_to_cart(&product("basil", "Basil", 40), 2)
        .unwrap();

    hide_for(&browser, 20).await;

    assert!(!browser.app.auth().is_authenticated());
    assert!(!browser.has_any_session_key());
    assert_eq!(browser.remote.session_count(), 0);
    assert!(browser.app.ledger().cart_lines().is_empty());
    assert!(browser.app.ledger().owner().is_none());
}

#[tokio::test]
async fn test_remembered_session_hidden_twenty_minutes_survives() {
    let browser = signed_in(true).await;
    browser
        .app
        .ledger()
        .add_to_cart(&product("basil", "Basil", 40), 2)
        .unwrap();

    hide_for(&browser, 20).await;

    assert!(browser.app.auth().is_authenticated());
    assert_eq!(browser.remote.session_count(), 1);
    assert!(browser.durable.get(keys::SESSION_TOKEN).is_some());
    let cart = browser.durable.get(keys::CART).unwrap();
    assert!(cart.contains("basil"));
    assert!(browser.durable.get(keys::LISTINGS).is_some());
    assert_eq!(browser.app.ledger().item_count(), 2);
}

#[tokio::test]
async fn test_short_absence_keeps_plain_session() {
    let browser = signed_in(false).await;

    hide_for(&browser, 10).await;

    assert!(browser.app.auth().is_authenticated());
    assert!(browser.durable.get(keys::HIDDEN_AT).is_none());
    assert!(browser.tab.get(keys::SESSION_TOKEN).is_some());
}

#[tokio::test]
async fn test_session_expiring_while_hidden_is_ended_even_when_remembered() {
    let browser = signed_in(true).await;

    hide_for(&browser, 31 * 24 * 60).await;

    assert!(!browser.app.auth().is_authenticated());
    assert!(!browser.has_any_session_key());
}

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test]
async fn test_validate_rejects_expired_token_under_latency() {
    let browser = signed_in(false).await;
    let token = browser.app.sessions().stored_token().unwrap();

    browser.clock.advance(TimeDelta::hours(25));
    browser.remote.set_latency(Duration::from_millis(30));

    assert!(browser.app.sessions().validate(&token).await.is_none());
    assert!(browser.app.sessions().stored_token().is_none());
    assert!(browser.remote.session(&token).is_none());
}

#[tokio::test]
async fn test_unknown_token_never_yields_a_user() {
    let browser = signed_in(false).await;

    let forged = SessionToken::from_raw("00000000-0000-4000-8000-000000000000-lx0");
    assert!(browser.app.sessions().validate(&forged).await.is_none());
}

#[tokio::test]
async fn test_reload_after_expiry_is_unauthenticated() {
    let browser = signed_in(true).await;
    browser.clock.advance(TimeDelta::days(31));

    let browser = browser.reload().await;

    assert!(!browser.app.auth().is_authenticated());
    assert!(!browser.app.auth().is_loading());
    assert!(!browser.has_any_session_key());
}

#[tokio::test]
async fn test_session_revoked_elsewhere_ends_on_reload() {
    let browser = signed_in(true).await;
    let user = browser.app.auth().current_user().unwrap();
    browser
        .remote
        .delete_session_record(&SessionTarget::User(user.id))
        .await
        .unwrap();

    let browser = browser.reload().await;

    assert!(!browser.app.auth().is_authenticated());
    assert!(!browser.has_any_session_key());
}

#[tokio::test]
async fn test_startup_sweeps_expired_sessions() {
    let remote = MemoryRemote::new();
    let clock = start_clock();
    let stale = register(&remote, "old@aztec.farm", "old");
    let issued_at = clock.now() - TimeDelta::days(40);
    remote.seed_session(Session {
        token: SessionToken::generate(issued_at),
        user_id: stale.id,
        issued_at,
        expires_at: issued_at + TimeDelta::days(30),
        remember: true,
        device: DeviceInfo::detect(issued_at),
        last_activity_at: issued_at,
    });

    let _browser = Browser::new(&remote, &clock).boot().await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while remote.session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

// =============================================================================
// Reloads
// =============================================================================

#[tokio::test]
async fn test_cold_reload_after_unload_hint_is_unauthenticated() {
    let remote = MemoryRemote::new();
    let browser = Browser::new(&remote, &start_clock()).boot().await;
    browser
        .app
        .auth()
        .sign_up("nila@aztec.farm", PASSWORD, "nila", "+91 90000 11111", false)
        .await
        .unwrap();

    browser.app.auth().on_page_unload().await;
    assert!(browser.tab.get(keys::SESSION_TOKEN).is_none());

    let browser = browser.reload().await;

    assert!(!browser.app.auth().is_authenticated());
    assert!(browser.app.auth().current_user().is_none());
}

#[tokio::test]
async fn test_cold_reload_in_new_tab_without_hint_is_unauthenticated() {
    let remote = MemoryRemote::new();
    let browser = Browser::new(&remote, &start_clock()).boot().await;
    browser
        .app
        .auth()
        .sign_up("nila@aztec.farm", PASSWORD, "nila", "", false)
        .await
        .unwrap();

    // The unload hint never fired; only the tab scope is gone.
    let browser = browser.open_new_tab().await;

    assert!(!browser.app.auth().is_authenticated());
    assert!(browser.durable.get(keys::SESSION_TOKEN).is_none());
}

#[tokio::test]
async fn test_same_tab_reload_without_hint_is_decided_by_validation() {
    let browser = signed_in(false).await;
    let user = browser.app.auth().current_user().unwrap();

    let browser = browser.reload().await;

    assert_eq!(browser.app.auth().current_user().map(|u| u.id), Some(user.id));
}

#[tokio::test]
async fn test_remembered_session_restores_cart_and_inventory_in_new_tab() {
    let browser = signed_in(true).await;
    let user = browser.app.auth().current_user().unwrap();
    browser.remote.seed_inventory(&user.id, &pid("kale"), 8);
    browser
        .app
        .ledger()
        .add_to_cart(&product("mint", "Mint", 25), 3)
        .unwrap();

    let browser = browser.open_new_tab().await;

    assert!(browser.app.auth().is_authenticated());
    let lines = browser.app.ledger().cart_lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].product_id, pid("mint"));
    assert_eq!(lines[0].quantity, 3);
    assert_eq!(browser.app.ledger().get_inventory_quantity(&pid("kale")), 8);
}

#[tokio::test]
async fn test_service_down_at_startup_keeps_token_for_next_load() {
    let browser = signed_in(true).await;
    browser.remote.set_offline(true);

    let browser = browser.reload().await;
    assert!(!browser.app.auth().is_authenticated());
    assert!(!browser.app.auth().is_loading());
    assert!(browser.durable.get(keys::SESSION_TOKEN).is_some());

    browser.remote.set_offline(false);
    let browser = browser.reload().await;
    assert!(browser.app.auth().is_authenticated());
}
