mod common;

use common::*;
use embodied_sync::adapters::SourceAdapter;
use embodied_sync::credentials::{summarize, CredentialHealth, MAX_CREDENTIAL_ERRORS};
use embodied_sync::db;
use embodied_sync::error::{SyncError, UpstreamError};
use embodied_sync::model::{SyncOverrides, SyncStatus};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_checkout_rotates_least_recently_used() {
    let pool = setup_pool().await;
    let a = db::insert_credential(&pool, "bilibili", "a", "SESSDATA=a").await.unwrap();
    let b = db::insert_credential(&pool, "bilibili", "b", "SESSDATA=b").await.unwrap();
    db::insert_credential(&pool, "other", "c", "x").await.unwrap();

    let first = db::checkout_credential(&pool, "bilibili", MAX_CREDENTIAL_ERRORS)
        .await
        .unwrap()
        .unwrap();
    let second = db::checkout_credential(&pool, "bilibili", MAX_CREDENTIAL_ERRORS)
        .await
        .unwrap()
        .unwrap();
    let third = db::checkout_credential(&pool, "bilibili", MAX_CREDENTIAL_ERRORS)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, a.id);
    assert_eq!(second.id, b.id);
    assert_eq!(third.id, a.id);
    assert!(first.last_used.is_some());
}

#[tokio::test]
async fn test_credential_excluded_at_threshold_until_reset() {
    let pool = setup_pool().await;
    let a = db::insert_credential(&pool, "bilibili", "a", "SESSDATA=a").await.unwrap();
    let b = db::insert_credential(&pool, "bilibili", "b", "SESSDATA=b").await.unwrap();

    for expected in 1..=MAX_CREDENTIAL_ERRORS {
        assert_eq!(db::increment_credential_errors(&pool, a.id).await.unwrap(), expected);
    }
    for _ in 0..3 {
        let picked = db::checkout_credential(&pool, "bilibili", MAX_CREDENTIAL_ERRORS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, b.id);
    }

    let all = db::list_credentials(&pool, Some("bilibili")).await.unwrap();
    let report = summarize(&all);
    assert_eq!(report.status, CredentialHealth::Degraded);
    assert_eq!(report.failed, 1);
    assert_eq!(report.usable, 1);

    let reset = db::reset_credential_errors(&pool, a.id).await.unwrap();
    assert_eq!(reset.error_count, 0);
    let all = db::list_credentials(&pool, Some("bilibili")).await.unwrap();
    assert_eq!(summarize(&all).status, CredentialHealth::Healthy);
}

#[tokio::test]
async fn test_disabled_credentials_are_never_selected() {
    let pool = setup_pool().await;
    let a = db::insert_credential(&pool, "bilibili", "a", "SESSDATA=a").await.unwrap();
    db::set_credential_active(&pool, a.id, false).await.unwrap();

    let picked = db::checkout_credential(&pool, "bilibili", MAX_CREDENTIAL_ERRORS)
        .await
        .unwrap();
    assert!(picked.is_none());
    let all = db::list_credentials(&pool, Some("bilibili")).await.unwrap();
    assert_eq!(summarize(&all).status, CredentialHealth::AllFailed);
    assert_eq!(summarize(&[]).status, CredentialHealth::Unconfigured);

    db::delete_credential(&pool, a.id).await.unwrap();
    let err = db::delete_credential(&pool, a.id).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
}

#[tokio::test]
async fn test_failed_calls_charge_the_credential_used() {
    let pool = setup_pool().await;
    let source = add_source(&pool, "bilibili", true).await;
    let cred = db::insert_credential(&pool, "bilibili", "main", "SESSDATA=main").await.unwrap();
    let adapter = Arc::new(
        RecordingAdapter::new("bilibili")
            .requiring_credential()
            .reply("*", Reply::Fail(UpstreamError::auth("-101 not logged in"))),
    );
    let engine = engine_with(&pool, vec![adapter.clone() as Arc<dyn SourceAdapter>]);

    for _ in 0..MAX_CREDENTIAL_ERRORS {
        let err = engine
            .sync_source(source.id, SyncOverrides::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Upstream { .. }));
    }
    assert_eq!(
        adapter.credentials_seen.lock().unwrap()[0].as_deref(),
        Some("SESSDATA=main")
    );
    let stored = db::get_credential(&pool, cred.id).await.unwrap();
    assert_eq!(stored.error_count, MAX_CREDENTIAL_ERRORS);

    // Nothing left to select: the run fails before calling the provider.
    let calls_before = adapter.call_count();
    let err = engine
        .sync_source(source.id, SyncOverrides::default(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Credential(ref p) if p == "bilibili"));
    assert_eq!(adapter.call_count(), calls_before);

    let source = db::get_source(&pool, source.id).await.unwrap();
    assert_eq!(source.last_sync_status, SyncStatus::Error);
}

#[tokio::test]
async fn test_successful_call_leaves_error_count_alone() {
    let pool = setup_pool().await;
    let source = add_source(&pool, "bilibili", true).await;
    let cred = db::insert_credential(&pool, "bilibili", "main", "SESSDATA=main").await.unwrap();
    db::increment_credential_errors(&pool, cred.id).await.unwrap();
    let adapter = Arc::new(
        RecordingAdapter::new("bilibili")
            .requiring_credential()
            .reply("*", Reply::Items(vec![item("bilibili", "BV1", "robot arm")])),
    );
    let engine = engine_with(&pool, vec![adapter.clone() as Arc<dyn SourceAdapter>]);

    engine
        .sync_source(source.id, SyncOverrides::default(), CancellationToken::new())
        .await
        .unwrap();
    let stored = db::get_credential(&pool, cred.id).await.unwrap();
    assert_eq!(stored.error_count, 1);
    assert!(stored.last_used.is_some());
}
