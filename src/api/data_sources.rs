use super::{ok, run_cancellable, ApiError, ApiResult, AppState};
use crate::db;
use crate::error::SyncError;
use crate::model::{
    DataSource, DataSourceUpdate, HealthReport, HealthSummary, Page, SyncLog, SyncOverrides,
    SyncResult,
};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

/// Source as shown to operators: the key itself never leaves the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceView {
    #[serde(flatten)]
    pub source: DataSource,
    pub has_api_key: bool,
}

impl From<DataSource> for DataSourceView {
    fn from(source: DataSource) -> Self {
        Self {
            has_api_key: source.has_api_key(),
            source,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsQuery {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<DataSourceView>> {
    let sources = db::list_sources(state.engine.pool()).await?;
    ok(sources.into_iter().map(DataSourceView::from).collect())
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<DataSourceView> {
    let source = db::get_source(state.engine.pool(), id).await?;
    ok(source.into())
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> ApiResult<DataSourceView> {
    let update: DataSourceUpdate = parse_body(&body)?;
    if update.is_empty() {
        return Err(SyncError::validation("update carries no fields").into());
    }
    if let Some(url) = &update.api_base_url {
        if url.trim().is_empty() {
            return Err(SyncError::validation("apiBaseUrl must be non-empty").into());
        }
    }
    let source = db::update_source(state.engine.pool(), id, &update).await?;
    tracing::info!(source = %source.name, fields = ?update.changed_fields(), "data source updated");
    ok(source.into())
}

/// An empty body means "no overrides".
pub async fn sync(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> ApiResult<SyncResult> {
    let overrides: SyncOverrides = if body.iter().all(u8::is_ascii_whitespace) {
        SyncOverrides::default()
    } else {
        parse_body(&body)?
    };
    let engine = state.engine.clone();
    let result = run_cancellable(&state, move |cancel| async move {
        engine.sync_source(id, overrides, cancel).await
    })
    .await?;
    ok(result)
}

pub async fn check_health(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<HealthReport> {
    let report = state.health.check_health(id).await?;
    ok(report)
}

pub async fn check_all_health(State(state): State<AppState>) -> ApiResult<HealthSummary> {
    let summary = state.health.check_all_health().await?;
    ok(summary)
}

pub async fn logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<LogsQuery>,
) -> ApiResult<Page<SyncLog>> {
    // 404 for unknown sources rather than an empty page.
    db::get_source(state.engine.pool(), id).await?;
    let page = db::list_sync_logs(state.engine.pool(), id, q.page, q.page_size).await?;
    ok(page)
}

/// Decode a JSON body, reporting malformed input as a validation error.
pub(crate) fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::from(SyncError::validation(format!("invalid request body: {e}"))))
}
