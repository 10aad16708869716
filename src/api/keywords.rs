use super::data_sources::parse_body;
use super::{ok, ApiResult, AppState};
use crate::db::{self, KeywordBatchOutcome};
use crate::keywords::{validate_new, validate_update};
use crate::model::{Keyword, KeywordFilter, KeywordUpdate, NewKeyword};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    keywords: Vec<NewKeyword>,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    id: i64,
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<KeywordFilter>,
) -> ApiResult<Vec<Keyword>> {
    ok(db::list_keywords(state.engine.pool(), &filter).await?)
}

pub async fn create(State(state): State<AppState>, body: Bytes) -> ApiResult<Keyword> {
    let kw: NewKeyword = parse_body(&body)?;
    validate_new(&kw)?;
    ok(db::insert_keyword(state.engine.pool(), &kw).await?)
}

/// Existing and repeated keywords are reported under `skipped`, not as errors.
pub async fn batch_create(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<KeywordBatchOutcome> {
    let req: BatchRequest = parse_body(&body)?;
    for kw in &req.keywords {
        validate_new(kw)?;
    }
    let outcome = db::insert_keywords_batch(state.engine.pool(), &req.keywords).await?;
    tracing::info!(
        created = outcome.created.len(),
        skipped = outcome.skipped.len(),
        "keyword batch imported"
    );
    ok(outcome)
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Bytes,
) -> ApiResult<Keyword> {
    let update: KeywordUpdate = parse_body(&body)?;
    validate_update(&update)?;
    ok(db::update_keyword(state.engine.pool(), id, &update).await?)
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Deleted> {
    db::delete_keyword(state.engine.pool(), id).await?;
    ok(Deleted { id })
}
