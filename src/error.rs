//! Error taxonomy shared by the sync engine, the health checker and the HTTP layer.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Broad classification of an adapter failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    Timeout,
    RateLimited,
    Auth,
    Client,
    Server,
    Network,
    Decode,
}

impl UpstreamErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamErrorKind::Timeout => "timeout",
            UpstreamErrorKind::RateLimited => "rate_limited",
            UpstreamErrorKind::Auth => "auth",
            UpstreamErrorKind::Client => "client",
            UpstreamErrorKind::Server => "server",
            UpstreamErrorKind::Network => "network",
            UpstreamErrorKind::Decode => "decode",
        }
    }
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a source adapter.
///
/// `retryable` is decided at construction: throttling, timeouts, transport
/// failures and 5xx are retryable; auth failures, other 4xx and decode errors
/// are not.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
    pub retryable: bool,
    pub request_url: Option<String>,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            UpstreamErrorKind::Timeout
                | UpstreamErrorKind::RateLimited
                | UpstreamErrorKind::Network
                | UpstreamErrorKind::Server
        );
        Self {
            kind,
            message: message.into(),
            retryable,
            request_url: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::RateLimited, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Auth, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Network, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Decode, message)
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(300).collect();
        let message = format!("HTTP {}: {}", status, snippet.trim());
        match status {
            429 => Self::rate_limited(message),
            401 | 403 => Self::auth(message),
            408 => Self::timeout(message),
            400..=499 => Self::new(UpstreamErrorKind::Client, message),
            _ => Self::new(UpstreamErrorKind::Server, message),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.request_url = Some(url.into());
        self
    }
}

/// Domain error taxonomy surfaced by the engine and mapped onto API codes.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("duplicate {entity}: {value}")]
    Duplicate { entity: &'static str, value: String },

    #[error("data source '{0}' is disabled")]
    SourceDisabled(String),

    #[error("no usable credential for provider '{0}'")]
    Credential(String),

    #[error("{source} (after {attempts} attempt(s))")]
    Upstream {
        #[source]
        source: UpstreamError,
        attempts: u32,
    },

    #[error("a sync run is already in progress for source {0}")]
    RunInProgress(i64),

    #[error("no adapter registered for source '{0}'")]
    NoAdapter(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn duplicate(entity: &'static str, value: impl Into<String>) -> Self {
        Self::Duplicate {
            entity,
            value: value.into(),
        }
    }

    /// Request URL attached to the underlying upstream failure, if any.
    pub fn request_url(&self) -> Option<&str> {
        match self {
            SyncError::Upstream { source, .. } => source.request_url.as_deref(),
            _ => None,
        }
    }

    /// Map a unique-constraint violation onto `Duplicate`; pass anything else through.
    pub(crate) fn from_insert(err: sqlx::Error, entity: &'static str, value: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return Self::duplicate(entity, value);
            }
        }
        Self::Storage(err)
    }
}
