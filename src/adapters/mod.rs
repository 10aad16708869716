//! Provider adapters and the name → adapter registry.
//!
//! Each adapter turns a [`SearchRequest`] into one provider call and returns
//! canonical [`ContentItem`]s. Adapters hold no state beyond their HTTP client;
//! everything source-specific arrives through [`AdapterContext`].

pub mod arxiv;
pub mod bilibili;
pub mod github;
pub mod hot_news;
pub mod http;
pub mod huggingface;
pub mod semantic_scholar;
pub mod youtube;

use crate::error::UpstreamError;
use crate::model::{ContentItem, DataSource, SearchRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-call inputs derived from a data source row.
#[derive(Debug, Clone, Default)]
pub struct AdapterContext {
    pub source_name: String,
    pub api_base_url: String,
    pub api_key: Option<String>,
    pub config: Map<String, Value>,
    /// Session secret checked out from the credential pool.
    pub credential: Option<String>,
}

impl AdapterContext {
    pub fn from_source(source: &DataSource) -> Self {
        Self {
            source_name: source.name.clone(),
            api_base_url: source.api_base_url.clone(),
            api_key: source.api_key.clone().filter(|k| !k.is_empty()),
            config: source.config.clone(),
            credential: None,
        }
    }

    /// Overlay run-only keys on top of the stored config.
    pub fn with_overrides(mut self, extra: &Map<String, Value>) -> Self {
        for (k, v) in extra {
            self.config.insert(k.clone(), v.clone());
        }
        self
    }

    pub fn with_credential(mut self, secret: Option<String>) -> Self {
        self.credential = secret;
        self
    }

    /// String view of a config key; numbers are stringified, arrays comma-joined.
    pub fn config_str(&self, key: &str) -> Option<String> {
        match self.config.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect();
                (!parts.is_empty()).then(|| parts.join(","))
            }
            _ => None,
        }
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        match self.config.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry key; matches `DataSource.name` unless the source sets `config.adapter`.
    fn name(&self) -> &'static str;

    /// Whether calls need a session secret from the credential pool.
    fn requires_credential(&self) -> bool {
        false
    }

    /// Provider-specific per-attempt timeout.
    fn default_timeout(&self) -> Option<Duration> {
        None
    }

    /// URL the call would hit, for sync logs. Secrets are redacted.
    fn request_url(&self, req: &SearchRequest, ctx: &AdapterContext) -> String;

    async fn search(
        &self,
        req: &SearchRequest,
        ctx: &AdapterContext,
    ) -> Result<Vec<ContentItem>, UpstreamError>;

    fn probe_query(&self) -> &str {
        "robot"
    }

    fn probe_request(&self) -> SearchRequest {
        SearchRequest {
            query: self.probe_query().to_string(),
            limit: 1,
            since_days: None,
        }
    }

    /// Minimal call used by the health checker; returns how many items came back.
    async fn probe(&self, ctx: &AdapterContext) -> Result<usize, UpstreamError> {
        let items = self.search(&self.probe_request(), ctx).await?;
        Ok(items.len())
    }
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(http: Client) -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(arxiv::ArxivAdapter::new(http.clone())));
        reg.register(Arc::new(github::GithubAdapter::new(http.clone())));
        reg.register(Arc::new(huggingface::HuggingFaceAdapter::new(http.clone())));
        reg.register(Arc::new(semantic_scholar::SemanticScholarAdapter::new(http.clone())));
        reg.register(Arc::new(bilibili::BilibiliAdapter::new(http.clone())));
        reg.register(Arc::new(youtube::YoutubeAdapter::new(http.clone())));
        reg.register(Arc::new(hot_news::HotNewsAdapter::new(http)));
        reg
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Adapter for a data source: `config.adapter` when set, else the source name.
    pub fn resolve(&self, source: &DataSource) -> Option<Arc<dyn SourceAdapter>> {
        let key = source
            .config
            .get("adapter")
            .and_then(Value::as_str)
            .unwrap_or(&source.name);
        self.get(key)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}
