mod common;

use common::*;
use embodied_sync::adapters::SourceAdapter;
use embodied_sync::config::SyncSettings;
use embodied_sync::db;
use embodied_sync::error::UpstreamError;
use embodied_sync::health::HealthChecker;
use embodied_sync::model::{HealthStatus, SyncLogStatus, SyncLogType};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_empty_result_is_healthy() {
    let pool = setup_pool().await;
    let source = add_source(&pool, "hot_news", true).await;
    let adapter = Arc::new(RecordingAdapter::new("hot_news"));
    let checker = HealthChecker::new(engine_with(&pool, vec![adapter.clone() as Arc<dyn SourceAdapter>]));

    let report = checker.check_health(source.id).await.unwrap();
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.error.is_none());
    let probe = adapter.calls.lock().unwrap()[0].clone();
    assert_eq!(probe.limit, 1);

    let stored = db::get_source(&pool, source.id).await.unwrap();
    assert_eq!(stored.health_status, HealthStatus::Healthy);
    assert!(stored.last_health_check_at.is_some());
    let logs = db::list_sync_logs(&pool, source.id, 1, 20).await.unwrap();
    assert_eq!(logs.items[0].log_type, SyncLogType::HealthCheck);
    assert_eq!(logs.items[0].status, SyncLogStatus::Success);
}

#[tokio::test]
async fn test_timeout_is_unhealthy_and_source_stays_enabled() {
    let pool = setup_pool().await;
    let source = add_source(&pool, "huggingface", true).await;
    let adapter = Arc::new(
        RecordingAdapter::new("huggingface").reply("*", Reply::Stall(Duration::from_secs(10))),
    );
    let settings = SyncSettings {
        default_timeout_secs: 1,
        max_retries: 0,
        ..fast_settings()
    };
    let checker = HealthChecker::new(engine_with_settings(
        &pool,
        vec![adapter.clone() as Arc<dyn SourceAdapter>],
        settings,
    ));

    let report = checker.check_health(source.id).await.unwrap();
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(report.error.unwrap().contains("timeout"));

    let stored = db::get_source(&pool, source.id).await.unwrap();
    assert_eq!(stored.health_status, HealthStatus::Unhealthy);
    assert!(stored.enabled);
    let logs = db::list_sync_logs(&pool, source.id, 1, 20).await.unwrap();
    assert_eq!(logs.items[0].status, SyncLogStatus::Error);
}

#[tokio::test]
async fn test_success_after_retry_carries_a_warning() {
    let pool = setup_pool().await;
    let source = add_source(&pool, "github", true).await;
    let adapter = Arc::new(
        RecordingAdapter::new("github")
            .reply("*", Reply::Fail(UpstreamError::from_status(502, "bad gateway")))
            .reply("*", Reply::Items(vec![item("github", "r1", "robot")])),
    );
    let checker = HealthChecker::new(engine_with(&pool, vec![adapter.clone() as Arc<dyn SourceAdapter>]));

    let report = checker.check_health(source.id).await.unwrap();
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.error.unwrap().contains("after 2 attempts"));
    let logs = db::list_sync_logs(&pool, source.id, 1, 20).await.unwrap();
    assert_eq!(logs.items[0].status, SyncLogStatus::Warning);
}

#[tokio::test]
async fn test_source_without_adapter_is_unknown() {
    let pool = setup_pool().await;
    let source = add_source(&pool, "mystery", true).await;
    let checker = HealthChecker::new(engine_with(&pool, vec![]));

    let report = checker.check_health(source.id).await.unwrap();
    assert_eq!(report.status, HealthStatus::Unknown);
    assert!(report.error.unwrap().contains("no adapter"));
}

#[tokio::test]
async fn test_credential_probe_without_credentials_is_unhealthy() {
    let pool = setup_pool().await;
    let source = add_source(&pool, "bilibili", true).await;
    let adapter = Arc::new(RecordingAdapter::new("bilibili").requiring_credential());
    let checker = HealthChecker::new(engine_with(&pool, vec![adapter.clone() as Arc<dyn SourceAdapter>]));

    let report = checker.check_health(source.id).await.unwrap();
    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert_eq!(adapter.call_count(), 0);
}

#[tokio::test]
async fn test_check_all_covers_enabled_sources_only() {
    let pool = setup_pool().await;
    add_source(&pool, "arxiv", true).await;
    add_source(&pool, "github", true).await;
    add_source(&pool, "youtube", false).await;
    let arxiv = Arc::new(RecordingAdapter::new("arxiv"));
    let github = Arc::new(
        RecordingAdapter::new("github")
            .reply("*", Reply::Fail(UpstreamError::auth("401 bad credentials"))),
    );
    let youtube = Arc::new(RecordingAdapter::new("youtube"));
    let checker = HealthChecker::new(engine_with(
        &pool,
        vec![
            arxiv as Arc<dyn SourceAdapter>,
            github as Arc<dyn SourceAdapter>,
            youtube.clone() as Arc<dyn SourceAdapter>,
        ],
    ));

    let summary = checker.check_all_health().await.unwrap();
    assert_eq!(summary.results.len(), 2);
    assert_eq!(summary.healthy, 1);
    assert_eq!(summary.unhealthy, 1);
    let names: Vec<_> = summary.results.iter().map(|r| r.source_name.as_str()).collect();
    assert_eq!(names, vec!["arxiv", "github"]);
    assert_eq!(youtube.call_count(), 0);
}
