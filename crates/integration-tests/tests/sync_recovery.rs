//! Integration tests for remote reconciliation.
//!
//! Local ledger changes commit immediately; these tests take the remote
//! service down and check that failures are reported, local totals stay
//! intact, and queued writes land in order once the service is back.

use std::time::Duration;

use aztec_core::Price;
use aztec_integration_tests::{Browser, pid, product, register, start_clock};
use aztec_storefront::remote::MemoryRemote;
use aztec_storefront::remote::memory::RemoteOp;
use aztec_storefront::services::ledger::LedgerError;
use aztec_storefront::services::sync::SyncOp;

async fn seller() -> Browser {
    let remote = MemoryRemote::new();
    let user = register(&remote, "arun@aztec.farm", "arun");
    remote.seed_inventory(&user.id, &pid("p1"), 10);
    let browser = Browser::new(&remote, &start_clock()).boot().await;
    browser.sign_in("arun@aztec.farm", false).await;
    browser
}

#[tokio::test]
async fn test_offline_writes_are_kept_and_replayed_in_order() {
    let browser = seller().await;
    let owner = browser.app.ledger().owner().unwrap();
    let ledger = browser.app.ledger();
    let tomatoes = product("p1", "Cherry Tomatoes", 50);
    let mut failures = browser.app.sync().subscribe();

    browser.remote.set_offline(true);
    ledger.list_for_sale(&tomatoes, 4, Price::from_units(50)).unwrap();
    ledger.list_for_sale(&tomatoes, 2, Price::from_units(45)).unwrap();

    let drained = browser.app.sync().drain().await;
    assert_eq!(drained.len(), 1);
    assert!(drained[0].error.is_transient());
    let reported = tokio::time::timeout(Duration::from_secs(1), failures.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(reported.op, SyncOp::UpsertInventory { .. }));

    // Local state is not rolled back.
    assert_eq!(ledger.get_inventory_quantity(&pid("p1")), 4);
    assert_eq!(ledger.get_listing_quantity(&pid("p1")), 6);
    assert_eq!(browser.app.sync().pending_len(), 4);

    browser.remote.set_offline(false);
    browser.settle().await;

    assert_eq!(browser.app.sync().pending_len(), 0);
    assert_eq!(browser.remote.inventory_quantity(&owner, &pid("p1")), 4);
    let listing = browser.remote.listing(&owner, &pid("p1")).unwrap();
    assert_eq!(listing.quantity, 6);
    assert_eq!(listing.price, Price::from_units(45));
}

#[tokio::test]
async fn test_transient_blip_is_retried_by_the_worker() {
    let browser = seller().await;
    let owner = browser.app.ledger().owner().unwrap();
    browser.remote.fail_next(RemoteOp::UpsertInventory, 1);

    browser
        .app
        .ledger()
        .reserve_stock(&pid("p1"), 3)
        .unwrap();

    // The worker gives up on the first attempt (no retries configured);
    // the next drain replays it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    browser.settle().await;

    assert_eq!(browser.remote.inventory_quantity(&owner, &pid("p1")), 7);
}

#[tokio::test]
async fn test_refresh_failure_keeps_local_state() {
    let browser = seller().await;
    let ledger = browser.app.ledger();
    ledger.reserve_stock(&pid("p1"), 2).unwrap();
    browser.settle().await;

    browser.remote.set_offline(true);
    let err = ledger.refresh().await.unwrap_err();

    assert!(matches!(err, LedgerError::Remote(_)));
    assert_eq!(ledger.get_inventory_quantity(&pid("p1")), 8);
}

#[tokio::test]
async fn test_refresh_resyncs_after_outage() {
    let browser = seller().await;
    let owner = browser.app.ledger().owner().unwrap();
    let ledger = browser.app.ledger();

    browser.remote.set_offline(true);
    ledger
        .list_for_sale(&product("p1", "Cherry Tomatoes", 50), 5, Price::from_units(50))
        .unwrap();
    browser.remote.set_offline(false);

    ledger.refresh().await.unwrap();

    assert_eq!(ledger.get_inventory_quantity(&pid("p1")), 5);
    assert_eq!(ledger.get_listing_quantity(&pid("p1")), 5);
    assert_eq!(browser.remote.inventory_quantity(&owner, &pid("p1")), 5);
}

#[tokio::test]
async fn test_sign_out_drops_unsynced_writes() {
    let browser = seller().await;
    let owner = browser.app.ledger().owner().unwrap();

    browser.remote.set_offline(true);
    browser
        .app
        .ledger()
        .reserve_stock(&pid("p1"), 4)
        .unwrap();
    browser.app.auth().sign_out().await;
    browser.remote.set_offline(false);
    browser.settle().await;

    assert_eq!(browser.app.sync().pending_len(), 0);
    assert_eq!(browser.remote.inventory_quantity(&owner, &pid("p1")), 10);
}
