//! Trait contract tests for ReleaseStore and PreferenceStore.
//!
//! These tests verify the behavioral contracts of the storage traits
//! using in-memory fakes. Any conforming implementation must pass these.

use release_state::fakes::{MemoryPreferenceStore, MemoryReleaseStore};
use release_state::storage_traits::*;
use release_state::StorageError;

fn product() -> Product {
    Product::new("Test App", AccountId::from("acct-1"))
}

fn release_for(product: &Product, file: &str) -> Release {
    Release::new(
        product.id.clone(),
        product.owner.clone(),
        "1.0.0",
        format!("/uploads/{file}"),
    )
}

// ===========================================================================
// ReleaseStore contract tests
// ===========================================================================

#[tokio::test]
async fn release_insert_load_round_trip() {
    let store = MemoryReleaseStore::new();
    let p = store.insert_product(product()).await.unwrap();
    let r = store.insert_release(release_for(&p, "app.apk")).await.unwrap();

    let loaded = store.load_release(&r.id).await.unwrap();
    assert_eq!(loaded, r);
}

#[tokio::test]
async fn release_insert_duplicate_rejected() {
    let store = MemoryReleaseStore::new();
    let p = store.insert_product(product()).await.unwrap();
    let r = store.insert_release(release_for(&p, "app.apk")).await.unwrap();

    let err = store.insert_release(r.clone()).await.unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists { .. }));
}

#[tokio::test]
async fn release_load_not_found() {
    let store = MemoryReleaseStore::new();
    let err = store
        .load_release(&ReleaseId::from("missing"))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::ReleaseNotFound { .. }));
}

#[tokio::test]
async fn release_save_bumps_revision() {
    let store = MemoryReleaseStore::new();
    let p = store.insert_product(product()).await.unwrap();
    let mut r = store.insert_release(release_for(&p, "app.apk")).await.unwrap();

    r.progress = 1;
    let outcome = store.save_release(&r).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Saved { revision: 1 });

    let loaded = store.load_release(&r.id).await.unwrap();
    assert_eq!(loaded.revision, 1);
    assert_eq!(loaded.progress, 1);
}

#[tokio::test]
async fn release_save_with_stale_revision_is_rejected_without_writing() {
    let store = MemoryReleaseStore::new();
    let p = store.insert_product(product()).await.unwrap();
    let r = store.insert_release(release_for(&p, "app.apk")).await.unwrap();

    // Two writers load the same revision.
    let mut first = store.load_release(&r.id).await.unwrap();
    let mut second = store.load_release(&r.id).await.unwrap();

    first.status = CheckStatus::Running;
    assert!(store.save_release(&first).await.unwrap().is_saved());

    second.log.push("interleaved".to_string());
    let outcome = store.save_release(&second).await.unwrap();
    assert_eq!(outcome, SaveOutcome::StaleWrite { current_revision: 1 });

    let loaded = store.load_release(&r.id).await.unwrap();
    assert_eq!(loaded.status, CheckStatus::Running);
    assert!(loaded.log.is_empty());
}

#[tokio::test]
async fn release_current_requires_approved_and_flag() {
    let store = MemoryReleaseStore::new();
    let p = store.insert_product(product()).await.unwrap();
    let mut r = store.insert_release(release_for(&p, "app.apk")).await.unwrap();

    assert!(store.current_release(&p.id).await.unwrap().is_none());

    // Flag without approval does not count.
    r.is_current = true;
    store.save_release(&r).await.unwrap();
    assert!(store.current_release(&p.id).await.unwrap().is_none());

    let mut r = store.load_release(&r.id).await.unwrap();
    r.approved = true;
    r.status = CheckStatus::Passed;
    store.save_release(&r).await.unwrap();

    let current = store.current_release(&p.id).await.unwrap().unwrap();
    assert_eq!(current.id, r.id);
}

#[tokio::test]
async fn release_list_is_scoped_to_product_in_insertion_order() {
    let store = MemoryReleaseStore::new();
    let p1 = store.insert_product(product()).await.unwrap();
    let p2 = store.insert_product(product()).await.unwrap();

    let a = store.insert_release(release_for(&p1, "a.apk")).await.unwrap();
    store.insert_release(release_for(&p2, "x.apk")).await.unwrap();
    let b = store.insert_release(release_for(&p1, "b.apk")).await.unwrap();

    let listed = store.list_releases(&p1.id).await.unwrap();
    let ids: Vec<_> = listed.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![a.id, b.id]);
}

#[tokio::test]
async fn release_status_projection() {
    let store = MemoryReleaseStore::new();
    let p = store.insert_product(product()).await.unwrap();
    let mut r = store.insert_release(release_for(&p, "app.apk")).await.unwrap();
    r.status = CheckStatus::Running;
    r.progress = 2;
    r.log.push("line".to_string());
    store.save_release(&r).await.unwrap();

    let view = store.status(&r.id).await.unwrap();
    assert_eq!(view.status, CheckStatus::Running);
    assert_eq!(view.progress, 2);
    assert_eq!(view.log, vec!["line".to_string()]);
}

#[tokio::test]
async fn product_save_is_compare_and_swap() {
    let store = MemoryReleaseStore::new();
    let p = store.insert_product(product()).await.unwrap();

    let mut first = store.load_product(&p.id).await.unwrap();
    let mut second = store.load_product(&p.id).await.unwrap();

    first.published = true;
    assert!(store.save_product(&first).await.unwrap().is_saved());

    second.name = "Renamed".to_string();
    let outcome = store.save_product(&second).await.unwrap();
    assert!(matches!(outcome, SaveOutcome::StaleWrite { .. }));

    let loaded = store.load_product(&p.id).await.unwrap();
    assert!(loaded.published);
    assert_eq!(loaded.name, "Test App");
}

#[tokio::test]
async fn product_load_not_found() {
    let store = MemoryReleaseStore::new();
    let err = store
        .load_product(&ProductId::from("missing"))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::ProductNotFound { .. }));
}

// ===========================================================================
// PreferenceStore contract tests
// ===========================================================================

#[tokio::test]
async fn preferences_absent_for_unknown_account() {
    let store = MemoryPreferenceStore::new();
    let prefs = store.preferences(&AccountId::from("nobody")).await.unwrap();

    assert!(prefs.is_none());
}

#[tokio::test]
async fn preferences_round_trip() {
    let store = MemoryPreferenceStore::new();
    let account = AccountId::from("acct-1");
    let prefs = NotificationPreferences {
        email: false,
        push: true,
    };
    store.set(&account, prefs).unwrap();

    assert_eq!(store.preferences(&account).await.unwrap(), Some(prefs));
}
