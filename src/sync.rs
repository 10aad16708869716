//! Sync orchestration: one run per source, plain or keyword-driven.
//!
//! A run resolves its source and adapter, fetches through the retrying client,
//! upserts every item into the content store and then records the summary and
//! the audit entry in one transaction. At most one run per source is in flight;
//! a second request is rejected rather than queued.

use crate::adapters::{AdapterContext, AdapterRegistry, SourceAdapter};
use crate::config::SyncSettings;
use crate::credentials::{CredentialStore, SqliteCredentialStore};
use crate::db::{self, Pool};
use crate::error::{Result, SyncError};
use crate::fetch::{FetchClient, FetchError, Fetched, RetryPolicy};
use crate::keywords;
use crate::model::{
    ContentItem, DataSource, KeywordScope, NewSyncLog, SearchRequest, SyncCounts, SyncLogStatus,
    SyncLogType, SyncOverrides, SyncResult, SyncStatus,
};
use crate::store::{ContentStore, SqliteContentStore};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Query used when neither the run nor the source config names one.
pub const DEFAULT_QUERY: &str = "embodied AI";

/// Run-scoped lock: the source id stays claimed until this is dropped.
struct RunGuard {
    running: Arc<Mutex<HashSet<i64>>>,
    source_id: i64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut set = self.running.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.source_id);
    }
}

/// Counters gathered while a run executes.
#[derive(Debug, Default)]
struct RunOutcome {
    synced: u32,
    errors: u32,
    keywords: Option<u32>,
    attempts: u32,
    request_url: Option<String>,
    error_message: Option<String>,
    cancelled: bool,
    /// Every keyword failed: the run counts as failed even though it completed.
    failed: bool,
}

#[derive(Clone)]
pub struct SyncEngine {
    pool: Pool,
    registry: Arc<AdapterRegistry>,
    fetch: FetchClient,
    credentials: Arc<dyn CredentialStore>,
    store: Arc<dyn ContentStore>,
    settings: SyncSettings,
    running: Arc<Mutex<HashSet<i64>>>,
}

impl SyncEngine {
    pub fn new(pool: Pool, registry: Arc<AdapterRegistry>, settings: SyncSettings) -> Self {
        Self {
            fetch: FetchClient::new(RetryPolicy::from_settings(&settings)),
            credentials: Arc::new(SqliteCredentialStore::new(pool.clone())),
            store: Arc::new(SqliteContentStore::new(pool.clone())),
            pool,
            registry,
            settings,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = store;
        self
    }

    pub fn with_content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_fetch_client(mut self, fetch: FetchClient) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub(crate) fn fetch(&self) -> &FetchClient {
        &self.fetch
    }

    pub fn is_running(&self, source_id: i64) -> bool {
        let set = self.running.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(&source_id)
    }

    fn try_acquire(&self, source_id: i64) -> Option<RunGuard> {
        let mut set = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(source_id) {
            return None;
        }
        Some(RunGuard {
            running: self.running.clone(),
            source_id,
        })
    }

    /// Per-attempt deadline: `config.timeout_secs`, then the adapter default, then the global one.
    pub(crate) fn timeout_for(&self, source: &DataSource, adapter: &dyn SourceAdapter) -> Duration {
        source
            .config
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .or_else(|| adapter.default_timeout())
            .unwrap_or_else(|| self.settings.default_timeout())
    }

    /// Attach a pooled credential when the adapter needs one.
    pub(crate) async fn prepare_context(
        &self,
        adapter: &dyn SourceAdapter,
        ctx: AdapterContext,
    ) -> Result<(AdapterContext, Option<i64>)> {
        if !adapter.requires_credential() {
            return Ok((ctx, None));
        }
        let cred = self.credentials.checkout(adapter.name()).await?;
        let id = cred.id;
        Ok((ctx.with_credential(Some(cred.secret_value)), Some(id)))
    }

    pub(crate) async fn report_credential_failure(&self, credential_id: Option<i64>, err: &FetchError) {
        let (Some(id), FetchError::Failed { error, .. }) = (credential_id, err) else {
            return;
        };
        match self.credentials.report_failure(id).await {
            Ok(count) => warn!(credential_id = id, count, kind = %error.kind, "credential call failed"),
            Err(e) => error!(credential_id = id, error = %e, "failed to record credential failure"),
        }
    }

    async fn search(
        &self,
        adapter: &dyn SourceAdapter,
        ctx: AdapterContext,
        req: &SearchRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Fetched<Vec<ContentItem>>> {
        let (ctx, credential_id) = self.prepare_context(adapter, ctx).await?;
        let res = self
            .fetch
            .run(timeout, cancel, |_| adapter.search(req, &ctx))
            .await;
        match res {
            Ok(fetched) => Ok(fetched),
            Err(err) => {
                self.report_credential_failure(credential_id, &err).await;
                Err(err.into())
            }
        }
    }

    /// Upsert every item; failures are counted, never fatal. Not cancellable.
    async fn upsert_all(&self, items: &[(&ContentItem, &[String])]) -> (u32, u32, Option<String>) {
        let mut synced = 0u32;
        let mut errors = 0u32;
        let mut first_error = None;
        for &(item, found_via) in items {
            match self.store.upsert(item, found_via).await {
                Ok(_) => synced += 1,
                Err(err) => {
                    errors += 1;
                    warn!(external_id = %item.external_id, error = %err, "upsert failed");
                    first_error.get_or_insert_with(|| format!("upsert {}: {}", item.external_id, err));
                }
            }
        }
        (synced, errors, first_error)
    }

    async fn reject_concurrent(&self, source_id: i64) -> SyncError {
        let mut log = NewSyncLog::new(source_id, SyncLogType::Sync, SyncLogStatus::Warning);
        log.error_message = Some("rejected: a sync run is already in progress".to_string());
        if let Err(e) = db::append_sync_log(&self.pool, &log).await {
            error!(source_id, error = %e, "failed to log rejected run");
        }
        SyncError::RunInProgress(source_id)
    }

    /// Record a run that failed entirely and hand the error back to the caller.
    async fn record_failure(
        &self,
        source: &DataSource,
        err: SyncError,
        started: Instant,
        request_url: Option<String>,
    ) -> SyncError {
        let message = err.to_string();
        let mut log = NewSyncLog::new(source.id, SyncLogType::Sync, SyncLogStatus::Error);
        log.request_url = err.request_url().map(str::to_string).or(request_url);
        log.duration_ms = started.elapsed().as_millis() as i64;
        log.synced_count = Some(0);
        log.error_count = Some(1);
        log.error_message = Some(message.clone());
        let counts = SyncCounts { synced: 0, errors: 1 };
        if let Err(e) = db::finish_sync(&self.pool, source.id, SyncStatus::Error, counts, Some(&message), &log).await {
            error!(source = %source.name, error = %e, "failed to record sync failure");
        }
        error!(source = %source.name, error = %message, "sync failed");
        err
    }

    async fn complete(&self, source: &DataSource, started: Instant, outcome: RunOutcome) -> Result<SyncResult> {
        let duration_ms = started.elapsed().as_millis() as i64;
        let (log_status, summary_status, summary_error) = if outcome.cancelled {
            (SyncLogStatus::Warning, SyncStatus::Error, Some("cancelled".to_string()))
        } else if outcome.failed {
            (SyncLogStatus::Error, SyncStatus::Error, outcome.error_message.clone())
        } else if outcome.errors > 0 {
            (SyncLogStatus::Warning, SyncStatus::Success, outcome.error_message.clone())
        } else {
            (SyncLogStatus::Success, SyncStatus::Success, None)
        };

        let mut log = NewSyncLog::new(source.id, SyncLogType::Sync, log_status);
        log.request_url = outcome.request_url.clone();
        log.duration_ms = duration_ms;
        log.synced_count = Some(i64::from(outcome.synced));
        log.error_count = Some(i64::from(outcome.errors));
        log.error_message = summary_error.clone();
        let counts = SyncCounts {
            synced: outcome.synced,
            errors: outcome.errors,
        };
        db::finish_sync(&self.pool, source.id, summary_status, counts, summary_error.as_deref(), &log).await?;

        info!(
            source = %source.name,
            synced = outcome.synced,
            errors = outcome.errors,
            keywords = ?outcome.keywords,
            cancelled = outcome.cancelled,
            duration_ms,
            "sync finished"
        );
        Ok(SyncResult {
            source_id: source.id,
            source_name: source.name.clone(),
            status: log_status,
            synced: outcome.synced,
            errors: outcome.errors,
            keywords: outcome.keywords,
            duration_ms,
            attempts: outcome.attempts,
            error_message: summary_error,
            cancelled: outcome.cancelled,
        })
    }

    fn plain_request(&self, ctx: &AdapterContext, overrides: &SyncOverrides) -> SearchRequest {
        let query = overrides
            .query
            .clone()
            .or_else(|| ctx.config_str("query"))
            .unwrap_or_else(|| DEFAULT_QUERY.to_string());
        let limit = overrides
            .max_results
            .or_else(|| ctx.config_u64("max_results").and_then(|v| u32::try_from(v).ok()))
            .unwrap_or(self.settings.default_max_results);
        let since_days = overrides
            .since_days
            .or_else(|| ctx.config_u64("since_days").and_then(|v| u32::try_from(v).ok()))
            .or(Some(self.settings.default_since_days));
        SearchRequest {
            query,
            limit,
            since_days,
        }
    }

    /// Sync one source with optional run-only overrides.
    ///
    /// Disabled sources are rejected unless `overrides.force` is set.
    #[instrument(skip_all, fields(source_id = id))]
    pub async fn sync_source(
        &self,
        id: i64,
        overrides: SyncOverrides,
        cancel: CancellationToken,
    ) -> Result<SyncResult> {
        let source = db::get_source(&self.pool, id).await?;
        let Some(_guard) = self.try_acquire(id) else {
            return Err(self.reject_concurrent(id).await);
        };
        let started = Instant::now();

        if !source.enabled && !overrides.force {
            let err = SyncError::SourceDisabled(source.name.clone());
            return Err(self.record_failure(&source, err, started, None).await);
        }
        let Some(adapter) = self.registry.resolve(&source) else {
            let err = SyncError::NoAdapter(source.name.clone());
            return Err(self.record_failure(&source, err, started, None).await);
        };

        db::mark_sync_running(&self.pool, id).await?;
        let ctx = AdapterContext::from_source(&source).with_overrides(&overrides.extra);
        let req = self.plain_request(&ctx, &overrides);
        let request_url = adapter.request_url(&req, &ctx);
        let timeout = self.timeout_for(&source, adapter.as_ref());
        info!(source = %source.name, query = %req.query, limit = req.limit, "sync started");

        match self.search(adapter.as_ref(), ctx, &req, timeout, &cancel).await {
            Ok(fetched) => {
                let items = dedupe(fetched.value);
                let pairs: Vec<(&ContentItem, &[String])> = items.iter().map(|i| (i, &[][..])).collect();
                let (synced, errors, first_error) = self.upsert_all(&pairs).await;
                let outcome = RunOutcome {
                    synced,
                    errors,
                    attempts: fetched.attempts,
                    request_url: Some(request_url),
                    error_message: first_error,
                    ..Default::default()
                };
                self.complete(&source, started, outcome).await
            }
            Err(SyncError::Cancelled) => {
                let outcome = RunOutcome {
                    request_url: Some(request_url),
                    cancelled: true,
                    ..Default::default()
                };
                self.complete(&source, started, outcome).await
            }
            Err(err) => Err(self.record_failure(&source, err, started, Some(request_url)).await),
        }
    }

    /// Keyword-driven sync against the source named `source_name`.
    ///
    /// `errors` counts keywords whose search failed plus items that failed to upsert.
    /// A credential-backed source with nothing usable fails the whole run up front.
    #[instrument(skip_all, fields(source = %source_name))]
    pub async fn sync_by_keywords(
        &self,
        source_name: &str,
        scope: KeywordScope,
        days: u32,
        max_per_keyword: u32,
        cancel: CancellationToken,
    ) -> Result<SyncResult> {
        if max_per_keyword == 0 {
            return Err(SyncError::validation("maxResultsPerKeyword must be > 0"));
        }
        let source = db::find_source_by_name(&self.pool, source_name)
            .await?
            .ok_or_else(|| SyncError::not_found("data source", source_name))?;
        let Some(_guard) = self.try_acquire(source.id) else {
            return Err(self.reject_concurrent(source.id).await);
        };
        let started = Instant::now();

        if !source.enabled {
            let err = SyncError::SourceDisabled(source.name.clone());
            return Err(self.record_failure(&source, err, started, None).await);
        }
        let Some(adapter) = self.registry.resolve(&source) else {
            let err = SyncError::NoAdapter(source.name.clone());
            return Err(self.record_failure(&source, err, started, None).await);
        };

        if adapter.requires_credential() && !self.credentials.has_usable(adapter.name()).await? {
            let err = SyncError::Credential(adapter.name().to_string());
            return Err(self.record_failure(&source, err, started, None).await);
        }

        let active = db::active_keywords(&self.pool, scope).await?;
        db::mark_sync_running(&self.pool, source.id).await?;
        let base_ctx = AdapterContext::from_source(&source);
        let timeout = self.timeout_for(&source, adapter.as_ref());
        let attempts = AtomicU32::new(0);
        info!(keywords = active.len(), days, max_per_keyword, "keyword sync started");

        let adapter_ref = adapter.as_ref();
        let ctx_ref = &base_ctx;
        let cancel_ref = &cancel;
        let attempts_ref = &attempts;
        let run = keywords::dispatch(&active, &cancel, move |kw| {
            let req = SearchRequest {
                query: kw.keyword.clone(),
                limit: max_per_keyword,
                since_days: Some(days),
            };
            async move {
                let res = self
                    .search(adapter_ref, ctx_ref.clone(), &req, timeout, cancel_ref)
                    .await;
                let used = match &res {
                    Ok(f) => f.attempts,
                    Err(SyncError::Upstream { attempts, .. }) => *attempts,
                    Err(_) => 0,
                };
                attempts_ref.fetch_add(used, Ordering::Relaxed);
                res.map(|f| f.value)
            }
        })
        .await;

        let pairs: Vec<(&ContentItem, &[String])> = run
            .items
            .iter()
            .map(|m| (&m.item, m.found_via.as_slice()))
            .collect();
        let (synced, upsert_errors, upsert_error) = self.upsert_all(&pairs).await;
        let keyword_error = run
            .failures
            .first()
            .map(|f| format!("keyword '{}': {}", f.keyword, f.message));
        let outcome = RunOutcome {
            synced,
            errors: run.errors + upsert_errors,
            keywords: Some(run.processed),
            attempts: attempts.load(Ordering::Relaxed),
            request_url: None,
            error_message: keyword_error.or(upsert_error),
            cancelled: run.cancelled,
            failed: !run.cancelled && run.processed > 0 && run.errors == run.processed,
        };
        self.complete(&source, started, outcome).await
    }

    /// Sync every enabled source; at most `health_parallelism` run at once.
    #[instrument(skip_all)]
    pub async fn sync_all_enabled(&self, cancel: CancellationToken) -> Result<Vec<(String, Result<SyncResult>)>> {
        let sources = db::list_enabled_sources(&self.pool).await?;
        let parallelism = self.settings.health_parallelism.max(1);
        let results = stream::iter(sources)
            .map(|source| {
                let cancel = cancel.clone();
                async move {
                    let res = self
                        .sync_source(source.id, SyncOverrides::default(), cancel)
                        .await;
                    (source.name, res)
                }
            })
            .buffer_unordered(parallelism)
            .collect::<Vec<_>>()
            .await;
        Ok(results)
    }
}

/// Best-effort in-batch dedupe by fingerprint; the store upsert is the real gate.
fn dedupe(items: Vec<ContentItem>) -> Vec<ContentItem> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|i| seen.insert(i.fingerprint()))
        .collect()
}
