use super::data_sources::parse_body;
use super::{ok, ApiResult, AppState};
use crate::credentials::{summarize, CredentialHealthReport};
use crate::db;
use crate::error::SyncError;
use crate::model::Credential;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct ProviderQuery {
    provider: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCredentialRequest {
    provider: String,
    name: String,
    secret_value: String,
}

/// Credential with its secret replaced by a short preview.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialView {
    #[serde(flatten)]
    credential: Credential,
    masked_secret: String,
}

impl From<Credential> for CredentialView {
    fn from(credential: Credential) -> Self {
        Self {
            masked_secret: credential.masked_secret(),
            credential,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    id: i64,
}

pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ProviderQuery>,
) -> ApiResult<Vec<CredentialView>> {
    let creds = db::list_credentials(state.engine.pool(), q.provider.as_deref()).await?;
    ok(creds.into_iter().map(CredentialView::from).collect())
}

pub async fn create(State(state): State<AppState>, body: Bytes) -> ApiResult<CredentialView> {
    let req: NewCredentialRequest = parse_body(&body)?;
    for (field, value) in [
        ("provider", &req.provider),
        ("name", &req.name),
        ("secretValue", &req.secret_value),
    ] {
        if value.trim().is_empty() {
            return Err(SyncError::validation(format!("{field} must be non-empty")).into());
        }
    }
    let cred = db::insert_credential(
        state.engine.pool(),
        req.provider.trim(),
        req.name.trim(),
        &req.secret_value,
    )
    .await?;
    tracing::info!(provider = %cred.provider, id = cred.id, "credential added");
    ok(cred.into())
}

pub async fn disable(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<CredentialView> {
    let cred = db::set_credential_active(state.engine.pool(), id, false).await?;
    ok(cred.into())
}

/// Clears the error counter and re-activates the credential.
pub async fn reset(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<CredentialView> {
    let cred = db::reset_credential_errors(state.engine.pool(), id).await?;
    ok(cred.into())
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Deleted> {
    db::delete_credential(state.engine.pool(), id).await?;
    ok(Deleted { id })
}

pub async fn health(
    State(state): State<AppState>,
    Query(q): Query<ProviderQuery>,
) -> ApiResult<CredentialHealthReport> {
    let creds = db::list_credentials(state.engine.pool(), q.provider.as_deref()).await?;
    ok(summarize(&creds))
}
