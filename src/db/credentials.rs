use super::model::credential_from_row;
use super::Pool;
use crate::error::{Result, SyncError};
use crate::model::Credential;
use chrono::Utc;
use sqlx::Row;
use tracing::{debug, instrument};

const CREDENTIAL_COLUMNS: &str =
    "id, provider, name, secret_value, error_count, last_used, is_active, created_at";

/// Compare-and-set rounds before a contended checkout gives up.
const CHECKOUT_ATTEMPTS: usize = 32;

#[instrument(skip_all)]
pub async fn insert_credential(
    pool: &Pool,
    provider: &str,
    name: &str,
    secret_value: &str,
) -> Result<Credential> {
    let id = sqlx::query(
        "INSERT INTO credentials (provider, name, secret_value, error_count, is_active, created_at) \
         VALUES (?, ?, ?, 0, 1, ?)",
    )
    .bind(provider)
    .bind(name)
    .bind(secret_value)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .last_insert_rowid();
    get_credential(pool, id).await
}

#[instrument(skip_all)]
pub async fn get_credential(pool: &Pool, id: i64) -> Result<Credential> {
    let row = sqlx::query(&format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => credential_from_row(&row),
        None => Err(SyncError::not_found("credential", id)),
    }
}

#[instrument(skip_all)]
pub async fn list_credentials(pool: &Pool, provider: Option<&str>) -> Result<Vec<Credential>> {
    let rows = sqlx::query(&format!(
        "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE (? IS NULL OR provider = ?) ORDER BY id ASC"
    ))
    .bind(provider)
    .bind(provider)
    .fetch_all(pool)
    .await?;
    rows.iter().map(credential_from_row).collect()
}

/// Pick the healthiest active credential below `max_errors` and stamp `last_used`.
///
/// Lowest `error_count` wins; among equals the least recently used one is taken,
/// so healthy credentials rotate. The stamp is a compare-and-set on the previous
/// `last_used`; when a concurrent checkout wins the race the pick is repeated.
#[instrument(skip_all)]
pub async fn checkout_credential(
    pool: &Pool,
    provider: &str,
    max_errors: i64,
) -> Result<Option<Credential>> {
    for _ in 0..CHECKOUT_ATTEMPTS {
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS}, last_used AS stamp FROM credentials \
             WHERE provider = ? AND is_active = 1 AND error_count < ? \
             ORDER BY error_count ASC, COALESCE(last_used, '') ASC, id ASC LIMIT 1"
        ))
        .bind(provider)
        .bind(max_errors)
        .fetch_optional(pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut credential = credential_from_row(&row)?;
        let stamp: Option<String> = row.try_get("stamp")?;
        let now = Utc::now();
        let claimed = sqlx::query(
            "UPDATE credentials SET last_used = ? \
             WHERE id = ? AND is_active = 1 AND error_count < ? AND last_used IS ?",
        )
        .bind(now)
        .bind(credential.id)
        .bind(max_errors)
        .bind(stamp)
        .execute(pool)
        .await?
        .rows_affected();
        if claimed == 1 {
            credential.last_used = Some(now);
            return Ok(Some(credential));
        }
        debug!(credential_id = credential.id, "credential checkout raced, retrying");
    }
    Err(SyncError::Credential(provider.to_string()))
}

/// Whether `provider` has at least one active credential below `max_errors`.
#[instrument(skip_all)]
pub async fn has_usable_credential(pool: &Pool, provider: &str, max_errors: i64) -> Result<bool> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM credentials WHERE provider = ? AND is_active = 1 AND error_count < ?",
    )
    .bind(provider)
    .bind(max_errors)
    .fetch_one(pool)
    .await?;
    Ok(n > 0)
}

/// Bump the failure counter; returns the new count.
///
/// The increment runs first so the transaction holds the write lock before it reads back.
#[instrument(skip_all, fields(credential_id = id))]
pub async fn increment_credential_errors(pool: &Pool, id: i64) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let res = sqlx::query("UPDATE credentials SET error_count = error_count + 1 WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if res.rows_affected() == 0 {
        return Err(SyncError::not_found("credential", id));
    }
    let count: i64 = sqlx::query_scalar("SELECT error_count FROM credentials WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(count)
}

/// Zero the failure counter and put the credential back in rotation.
#[instrument(skip_all, fields(credential_id = id))]
pub async fn reset_credential_errors(pool: &Pool, id: i64) -> Result<Credential> {
    let res = sqlx::query("UPDATE credentials SET error_count = 0, is_active = 1 WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(SyncError::not_found("credential", id));
    }
    get_credential(pool, id).await
}

#[instrument(skip_all, fields(credential_id = id))]
pub async fn set_credential_active(pool: &Pool, id: i64, active: bool) -> Result<Credential> {
    let res = sqlx::query("UPDATE credentials SET is_active = ? WHERE id = ?")
        .bind(active)
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(SyncError::not_found("credential", id));
    }
    get_credential(pool, id).await
}

/// Operator removal; nothing in the engine deletes credentials on its own.
#[instrument(skip_all, fields(credential_id = id))]
pub async fn delete_credential(pool: &Pool, id: i64) -> Result<()> {
    let res = sqlx::query("DELETE FROM credentials WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(SyncError::not_found("credential", id));
    }
    Ok(())
}
