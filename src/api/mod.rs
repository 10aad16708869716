//! Admin HTTP surface.
//!
//! Every response (except `GET /health`) is wrapped in `{code, message, data}`
//! with `code = 0` on success.
//!
//! # Routes
//!
//! - `GET /health` - liveness
//! - `GET /admin/data-sources`, `GET|PUT /admin/data-sources/{id}`
//! - `POST /admin/data-sources/{id}/sync`, `POST /admin/data-sources/{id}/health`
//! - `POST /admin/data-sources/health/check-all`
//! - `GET /admin/data-sources/{id}/logs`
//! - `POST /admin/sync/videos-by-keywords`, `POST /admin/sync/papers-by-keywords`
//! - `/admin/credentials` and `/admin/keywords` management

mod credentials;
mod data_sources;
mod error;
mod keywords;
mod sync;

pub use error::ApiError;

use crate::health::HealthChecker;
use crate::sync::SyncEngine;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: SyncEngine,
    pub health: HealthChecker,
    /// Cancelled on shutdown; every spawned run hangs off a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(engine: SyncEngine, shutdown: CancellationToken) -> Self {
        Self {
            health: HealthChecker::new(engine.clone()),
            engine,
            shutdown,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub(crate) fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse {
        code: 0,
        message: "ok".to_string(),
        data: Some(data),
    }))
}

/// Run `job` on its own task with a child token of the shutdown token.
///
/// If the request future is dropped (client disconnect) the drop guard cancels
/// the token: the run stops issuing adapter calls but finishes its upserts.
pub(crate) async fn run_cancellable<T, F, Fut>(state: &AppState, job: F) -> Result<T, ApiError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = crate::error::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let token = state.shutdown.child_token();
    let guard = token.clone().drop_guard();
    let handle = tokio::spawn(job(token));
    let joined = handle.await;
    guard.disarm();
    match joined {
        Ok(res) => res.map_err(ApiError::from),
        Err(err) => Err(ApiError::Internal(format!("sync task failed: {err}"))),
    }
}

#[derive(Debug, Clone, Serialize)]
struct Liveness {
    status: &'static str,
    version: &'static str,
}

async fn liveness() -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/data-sources", get(data_sources::list))
        .route(
            "/data-sources/health/check-all",
            post(data_sources::check_all_health),
        )
        .route(
            "/data-sources/{id}",
            get(data_sources::get_one).put(data_sources::update),
        )
        .route("/data-sources/{id}/sync", post(data_sources::sync))
        .route("/data-sources/{id}/health", post(data_sources::check_health))
        .route("/data-sources/{id}/logs", get(data_sources::logs))
        .route("/sync/videos-by-keywords", post(sync::videos_by_keywords))
        .route("/sync/papers-by-keywords", post(sync::papers_by_keywords))
        .route(
            "/credentials",
            get(credentials::list).post(credentials::create),
        )
        .route("/credentials/health", get(credentials::health))
        .route("/credentials/{id}", axum::routing::delete(credentials::remove))
        .route("/credentials/{id}/disable", post(credentials::disable))
        .route("/credentials/{id}/reset", post(credentials::reset))
        .route("/keywords", get(keywords::list).post(keywords::create))
        .route("/keywords/batch", post(keywords::batch_create))
        .route(
            "/keywords/{id}",
            put(keywords::update).delete(keywords::remove),
        );

    Router::new()
        .route("/health", get(liveness))
        .nest("/admin", admin)
        .with_state(state)
}
