//! Rotating session credentials for providers that need a logged-in caller.

use crate::db::{self, Pool};
use crate::error::{Result, SyncError};
use crate::model::Credential;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument, warn};

/// Credentials at or above this many failures are skipped until reset.
pub const MAX_CREDENTIAL_ERRORS: i64 = 3;

/// Selection and failure accounting used by the sync engine.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Pick a usable credential for `provider` or fail with `SyncError::Credential`.
    async fn checkout(&self, provider: &str) -> Result<Credential>;

    /// Record one failed call made with `credential_id`; returns the new error count.
    async fn report_failure(&self, credential_id: i64) -> Result<i64>;

    /// Whether a checkout for `provider` could succeed right now. Does not stamp `last_used`.
    async fn has_usable(&self, provider: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    pool: Pool,
}

impl SqliteCredentialStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    #[instrument(skip(self))]
    async fn checkout(&self, provider: &str) -> Result<Credential> {
        match db::checkout_credential(&self.pool, provider, MAX_CREDENTIAL_ERRORS).await? {
            Some(cred) => Ok(cred),
            None => {
                warn!(provider, "no selectable credential");
                Err(SyncError::Credential(provider.to_string()))
            }
        }
    }

    #[instrument(skip(self))]
    async fn report_failure(&self, credential_id: i64) -> Result<i64> {
        let count = db::increment_credential_errors(&self.pool, credential_id).await?;
        if count >= MAX_CREDENTIAL_ERRORS {
            info!(credential_id, count, "credential excluded from rotation until reset");
        }
        Ok(count)
    }

    async fn has_usable(&self, provider: &str) -> Result<bool> {
        db::has_usable_credential(&self.pool, provider, MAX_CREDENTIAL_ERRORS).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialHealth {
    Unconfigured,
    AllFailed,
    Degraded,
    Unstable,
    Healthy,
}

impl CredentialHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialHealth::Unconfigured => "unconfigured",
            CredentialHealth::AllFailed => "all_failed",
            CredentialHealth::Degraded => "degraded",
            CredentialHealth::Unstable => "unstable",
            CredentialHealth::Healthy => "healthy",
        }
    }

    /// Label shown in the admin console.
    pub fn label(&self) -> &'static str {
        match self {
            CredentialHealth::Unconfigured => "未配置",
            CredentialHealth::AllFailed => "全部失效",
            CredentialHealth::Degraded => "部分失效",
            CredentialHealth::Unstable => "不稳定",
            CredentialHealth::Healthy => "正常",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialHealthReport {
    pub status: CredentialHealth,
    pub label: &'static str,
    pub total: u32,
    pub active: u32,
    pub usable: u32,
    pub failed: u32,
}

/// Aggregate health of a credential list.
pub fn summarize(credentials: &[Credential]) -> CredentialHealthReport {
    let active: Vec<&Credential> = credentials.iter().filter(|c| c.is_active).collect();
    let failed = active
        .iter()
        .filter(|c| c.error_count >= MAX_CREDENTIAL_ERRORS)
        .count();
    let flaky = active
        .iter()
        .filter(|c| c.error_count > 0 && c.error_count < MAX_CREDENTIAL_ERRORS)
        .count();

    let status = if credentials.is_empty() {
        CredentialHealth::Unconfigured
    } else if active.is_empty() {
        CredentialHealth::AllFailed
    } else if failed > 0 {
        CredentialHealth::Degraded
    } else if flaky > 0 {
        CredentialHealth::Unstable
    } else {
        CredentialHealth::Healthy
    };

    CredentialHealthReport {
        status,
        label: status.label(),
        total: credentials.len() as u32,
        active: active.len() as u32,
        usable: (active.len() - failed) as u32,
        failed: failed as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cred(id: i64, error_count: i64, is_active: bool) -> Credential {
        Credential {
            id,
            provider: "bilibili".into(),
            name: format!("c{id}"),
            secret_value: "SESSDATA=x".into(),
            error_count,
            last_used: None,
            is_active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn classification_follows_precedence() {
        assert_eq!(summarize(&[]).status, CredentialHealth::Unconfigured);
        assert_eq!(
            summarize(&[cred(1, 0, false)]).status,
            CredentialHealth::AllFailed
        );
        let degraded = summarize(&[cred(1, 3, true), cred(2, 1, true)]);
        assert_eq!(degraded.status, CredentialHealth::Degraded);
        assert_eq!(degraded.label, "部分失效");
        assert_eq!(degraded.usable, 1);
        assert_eq!(
            summarize(&[cred(1, 2, true), cred(2, 0, true)]).status,
            CredentialHealth::Unstable
        );
        assert_eq!(
            summarize(&[cred(1, 0, true), cred(2, 5, false)]).status,
            CredentialHealth::Healthy
        );
    }
}
