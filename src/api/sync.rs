use super::data_sources::parse_body;
use super::{ok, run_cancellable, ApiResult, AppState};
use crate::error::SyncError;
use crate::model::{KeywordScope, SyncResult};
use axum::body::Bytes;
use axum::extract::State;
use serde::Deserialize;

const VIDEO_SOURCE: &str = "bilibili";
const PAPER_SOURCE: &str = "arxiv";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordSyncRequest {
    days: Option<u32>,
    max_results_per_keyword: Option<u32>,
    source_type: Option<String>,
    source: Option<String>,
}

fn parse_scope(raw: Option<&str>) -> Result<KeywordScope, SyncError> {
    let raw = raw.unwrap_or("all");
    KeywordScope::parse(raw)
        .ok_or_else(|| SyncError::validation(format!("unknown sourceType '{raw}'")))
}

async fn run(
    state: AppState,
    source: String,
    scope: KeywordScope,
    req: KeywordSyncRequest,
) -> ApiResult<SyncResult> {
    let settings = state.engine.settings();
    let days = req.days.unwrap_or(settings.default_since_days);
    let max = req
        .max_results_per_keyword
        .unwrap_or(settings.default_max_results);
    let engine = state.engine.clone();
    let result = run_cancellable(&state, move |cancel| async move {
        engine
            .sync_by_keywords(&source, scope, days, max, cancel)
            .await
    })
    .await?;
    ok(result)
}

/// Keyword-driven video sync; `sourceType` defaults to every subscription.
pub async fn videos_by_keywords(State(state): State<AppState>, body: Bytes) -> ApiResult<SyncResult> {
    let req: KeywordSyncRequest = if body.is_empty() {
        KeywordSyncRequest::default()
    } else {
        parse_body(&body)?
    };
    let scope = parse_scope(req.source_type.as_deref())?;
    let source = req.source.clone().unwrap_or_else(|| VIDEO_SOURCE.to_string());
    run(state, source, scope, req).await
}

/// Keyword-driven paper sync; `sourceType` is required here.
pub async fn papers_by_keywords(State(state): State<AppState>, body: Bytes) -> ApiResult<SyncResult> {
    let req: KeywordSyncRequest = parse_body(&body)?;
    let Some(raw_scope) = req.source_type.as_deref() else {
        return Err(SyncError::validation("sourceType is required").into());
    };
    let scope = parse_scope(Some(raw_scope))?;
    let source = req.source.clone().unwrap_or_else(|| PAPER_SOURCE.to_string());
    run(state, source, scope, req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::KeywordSourceType;

    #[test]
    fn scope_defaults_to_all_and_rejects_unknown() {
        assert_eq!(parse_scope(None).unwrap(), KeywordScope::All);
        assert_eq!(
            parse_scope(Some("admin")).unwrap(),
            KeywordScope::Only(KeywordSourceType::Admin)
        );
        assert!(matches!(parse_scope(Some("bots")), Err(SyncError::Validation(_))));
    }
}
