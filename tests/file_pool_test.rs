//! Store behaviour on a file-backed, multi-connection pool.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use common::*;
use embodied_sync::adapters::SourceAdapter;
use embodied_sync::api::{router, AppState};
use embodied_sync::credentials::MAX_CREDENTIAL_ERRORS;
use embodied_sync::db;
use embodied_sync::health::HealthChecker;
use embodied_sync::model::{DataSourceUpdate, NewKeyword, SyncOverrides};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_created_rows_are_readable_immediately() {
    let (_dir, pool) = setup_file_pool().await;

    for i in 0..20 {
        let cred = db::insert_credential(&pool, "bilibili", &format!("c{i}"), "SESSDATA=x")
            .await
            .unwrap();
        assert_eq!(cred.name, format!("c{i}"));

        let kw = db::insert_keyword(&pool, &NewKeyword::new(&format!("keyword {i}"), 50))
            .await
            .unwrap();
        assert_eq!(kw.keyword, format!("keyword {i}"));
    }

    let batch: Vec<NewKeyword> = (0..10)
        .map(|i| NewKeyword::new(&format!("batch {i}"), 10))
        .collect();
    let outcome = db::insert_keywords_batch(&pool, &batch).await.unwrap();
    assert_eq!(outcome.created.len(), 10);
    assert!(outcome.skipped.is_empty());

    let source = add_source(&pool, "arxiv", true).await;
    assert_eq!(db::get_source(&pool, source.id).await.unwrap().name, "arxiv");
    let update = DataSourceUpdate {
        display_name: Some("arXiv".into()),
        ..Default::default()
    };
    let updated = db::update_source(&pool, source.id, &update).await.unwrap();
    assert_eq!(updated.display_name, "arXiv");

    assert_eq!(db::list_credentials(&pool, Some("bilibili")).await.unwrap().len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_upserts_all_land() {
    let (_dir, pool) = setup_file_pool().await;

    let mut tasks = Vec::new();
    for t in 0..4 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let source = format!("source-{t}");
            let keyword = format!("kw-{t}");
            for i in 0..100 {
                db::upsert_content_item(&pool, &item(&source, &format!("id-{i}"), "robot"), &[])
                    .await
                    .unwrap();
                if i % 10 == 0 {
                    db::upsert_content_item(&pool, &item("shared", "same", "robot"), &[keyword.clone()])
                        .await
                        .unwrap();
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(db::count_content_items(&pool, None).await.unwrap(), 401);
    for t in 0..4 {
        let source = format!("source-{t}");
        assert_eq!(db::count_content_items(&pool, Some(&source)).await.unwrap(), 100);
    }
    assert_eq!(
        db::matched_keywords_for(&pool, "shared", "same").await.unwrap(),
        vec!["kw-0", "kw-1", "kw-2", "kw-3"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkouts_all_succeed() {
    let (_dir, pool) = setup_file_pool().await;
    for name in ["a", "b", "c"] {
        db::insert_credential(&pool, "bilibili", name, "SESSDATA=x").await.unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let mut picked = Vec::new();
            for _ in 0..10 {
                let cred = db::checkout_credential(&pool, "bilibili", MAX_CREDENTIAL_ERRORS)
                    .await
                    .unwrap()
                    .unwrap();
                picked.push(cred.id);
            }
            picked
        }));
    }
    let mut used = HashSet::new();
    let mut total = 0;
    for task in tasks {
        let picked = task.await.unwrap();
        total += picked.len();
        used.extend(picked);
    }
    assert_eq!(total, 40);
    assert_eq!(used.len(), 3);
    let all = db::list_credentials(&pool, Some("bilibili")).await.unwrap();
    assert!(all.iter().all(|c| c.last_used.is_some()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fan_out_sync_and_health_on_shared_pool() {
    let (_dir, pool) = setup_file_pool().await;
    let names = ["arxiv", "github", "youtube", "huggingface"];
    let mut adapters = Vec::new();
    for name in names {
        add_source(&pool, name, true).await;
        let items = (0..25).map(|i| item(name, &format!("{name}-{i}"), "robot")).collect();
        adapters.push(Arc::new(RecordingAdapter::new(name).reply("*", Reply::Items(items))) as Arc<dyn SourceAdapter>);
    }
    let engine = engine_with(&pool, adapters);

    let runner = engine.clone();
    let results = tokio::spawn(async move { runner.sync_all_enabled(CancellationToken::new()).await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(results.len(), 4);
    for (name, res) in &results {
        let res = res.as_ref().unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(res.synced, 25);
        assert_eq!(res.errors, 0);
    }
    assert_eq!(db::count_content_items(&pool, None).await.unwrap(), 100);

    let checker = HealthChecker::new(engine.clone());
    let summary = tokio::spawn(async move { checker.check_all_health().await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.healthy, 4);

    let source = db::find_source_by_name(&pool, "arxiv").await.unwrap().unwrap();
    let single = tokio::spawn(async move {
        engine
            .sync_source(source.id, SyncOverrides::default(), CancellationToken::new())
            .await
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(single.synced, 25);
}

async fn post(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admin_create_endpoints_return_the_new_row() {
    let (_dir, pool) = setup_file_pool().await;
    let app = router(AppState::new(engine_with(&pool, vec![]), CancellationToken::new()));

    let (status, body) = post(
        &app,
        "/admin/credentials",
        json!({"provider": "bilibili", "name": "main", "secretValue": "SESSDATA=abcdef"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "main");

    let (status, body) = post(&app, "/admin/keywords", json!({"keyword": "humanoid"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["keyword"], "humanoid");

    let (status, body) = post(
        &app,
        "/admin/keywords/batch",
        json!({"keywords": [{"keyword": "quadruped"}, {"keyword": "dexterous hand"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["created"].as_array().unwrap().len(), 2);
}
