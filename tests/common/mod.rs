#![allow(dead_code)]

use async_trait::async_trait;
use embodied_sync::adapters::{AdapterContext, AdapterRegistry, SourceAdapter};
use embodied_sync::config::SyncSettings;
use embodied_sync::db::{self, Pool};
use embodied_sync::error::UpstreamError;
use embodied_sync::fetch::{FetchClient, RetryPolicy};
use embodied_sync::model::{ContentItem, ContentKind, DataSource, NewDataSource, SearchRequest};
use embodied_sync::sync::SyncEngine;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

/// File-backed pool built like production: WAL and several connections.
/// Keep the returned directory alive for as long as the pool is used.
pub async fn setup_file_pool() -> (tempfile::TempDir, Pool) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("sync.db").display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    (dir, pool)
}

pub async fn add_source(pool: &Pool, name: &str, enabled: bool) -> DataSource {
    add_source_with_config(pool, name, enabled, Map::new()).await
}

pub async fn add_source_with_config(
    pool: &Pool,
    name: &str,
    enabled: bool,
    config: Map<String, Value>,
) -> DataSource {
    db::insert_source(
        pool,
        &NewDataSource {
            name: name.into(),
            display_name: name.to_uppercase(),
            enabled,
            api_base_url: "http://localhost".into(),
            api_key: None,
            tags: vec![],
            config,
        },
    )
    .await
    .unwrap()
}

pub fn item(source: &str, id: &str, title: &str) -> ContentItem {
    ContentItem {
        external_id: id.into(),
        source_name: source.into(),
        kind: ContentKind::Paper,
        title: title.into(),
        body: String::new(),
        url: Some(format!("https://example.org/{id}")),
        published_at: None,
        raw: Value::Null,
    }
}

/// Short backoff so retry paths finish quickly against a real pool.
pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        default_timeout_secs: 5,
        retry_base_delay_ms: 10,
        ..SyncSettings::default()
    }
}

pub fn engine_with(pool: &Pool, adapters: Vec<Arc<dyn SourceAdapter>>) -> SyncEngine {
    engine_with_settings(pool, adapters, fast_settings())
}

pub fn engine_with_settings(
    pool: &Pool,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    settings: SyncSettings,
) -> SyncEngine {
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }
    let policy = RetryPolicy::from_settings(&settings);
    SyncEngine::new(pool.clone(), Arc::new(registry), settings)
        .with_fetch_client(FetchClient::new(policy))
}

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Items(Vec<ContentItem>),
    Fail(UpstreamError),
    /// Sleep, then return no items. Used to trip timeouts and cancellation.
    Stall(Duration),
}

/// Scripted adapter that records every call.
///
/// Replies are looked up by query, falling back to `"*"`. The last reply in a
/// queue repeats forever.
pub struct RecordingAdapter {
    name: &'static str,
    needs_credential: bool,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    pub calls: Mutex<Vec<SearchRequest>>,
    pub credentials_seen: Mutex<Vec<Option<String>>>,
    pub overrides_seen: Mutex<Vec<Map<String, Value>>>,
}

impl RecordingAdapter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            needs_credential: false,
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            credentials_seen: Mutex::new(Vec::new()),
            overrides_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requiring_credential(mut self) -> Self {
        self.needs_credential = true;
        self
    }

    pub fn reply(self, query: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(query.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn queries(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|r| r.query.clone()).collect()
    }

    fn next_reply(&self, query: &str) -> Reply {
        let mut replies = self.replies.lock().unwrap();
        let queue = match replies.get_mut(query) {
            Some(q) => q,
            None => match replies.get_mut("*") {
                Some(q) => q,
                None => return Reply::Items(Vec::new()),
            },
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap_or(Reply::Items(Vec::new()))
        }
    }
}

#[async_trait]
impl SourceAdapter for RecordingAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn requires_credential(&self) -> bool {
        self.needs_credential
    }

    fn request_url(&self, req: &SearchRequest, ctx: &AdapterContext) -> String {
        format!("{}/search?q={}", ctx.api_base_url, req.query)
    }

    async fn search(
        &self,
        req: &SearchRequest,
        ctx: &AdapterContext,
    ) -> Result<Vec<ContentItem>, UpstreamError> {
        self.calls.lock().unwrap().push(req.clone());
        self.credentials_seen.lock().unwrap().push(ctx.credential.clone());
        self.overrides_seen.lock().unwrap().push(ctx.config.clone());
        match self.next_reply(&req.query) {
            Reply::Items(items) => Ok(items),
            Reply::Fail(err) => Err(err),
            Reply::Stall(d) => {
                tokio::time::sleep(d).await;
                Ok(Vec::new())
            }
        }
    }
}
