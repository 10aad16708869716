use super::model::{source_from_row, sync_log_from_row};
use super::Pool;
use crate::error::{Result, SyncError};
use crate::model::{
    DataSource, DataSourceUpdate, HealthStatus, NewDataSource, NewSyncLog, Page, SyncCounts,
    SyncLog, SyncLogStatus, SyncLogType, SyncStatus,
};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tracing::instrument;

const SOURCE_COLUMNS: &str = "id, name, display_name, enabled, api_base_url, api_key, tags, config, \
     health_status, health_error, health_latency_ms, last_health_check_at, last_sync_at, \
     last_sync_status, last_sync_synced, last_sync_errors, last_sync_error, created_at, updated_at";

/// Insert configured sources that do not exist yet. Existing rows keep operator edits.
#[instrument(skip_all)]
pub async fn seed_sources(pool: &Pool, sources: &[NewDataSource]) -> Result<usize> {
    let mut inserted = 0;
    for src in sources {
        let res = sqlx::query(
            "INSERT INTO data_sources (name, display_name, enabled, api_base_url, api_key, tags, config, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(&src.name)
        .bind(&src.display_name)
        .bind(src.enabled)
        .bind(&src.api_base_url)
        .bind(src.api_key.as_deref())
        .bind(serde_json::to_string(&src.tags)?)
        .bind(serde_json::to_string(&src.config)?)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(pool)
        .await?;
        inserted += res.rows_affected() as usize;
    }
    Ok(inserted)
}

#[instrument(skip_all)]
pub async fn insert_source(pool: &Pool, src: &NewDataSource) -> Result<DataSource> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO data_sources (name, display_name, enabled, api_base_url, api_key, tags, config, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&src.name)
    .bind(&src.display_name)
    .bind(src.enabled)
    .bind(&src.api_base_url)
    .bind(src.api_key.as_deref())
    .bind(serde_json::to_string(&src.tags)?)
    .bind(serde_json::to_string(&src.config)?)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| SyncError::from_insert(e, "data source", &src.name))?
    .last_insert_rowid();
    get_source(pool, id).await
}

#[instrument(skip_all)]
pub async fn get_source(pool: &Pool, id: i64) -> Result<DataSource> {
    let row = sqlx::query(&format!("SELECT {SOURCE_COLUMNS} FROM data_sources WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => source_from_row(&row),
        None => Err(SyncError::not_found("data source", id)),
    }
}

#[instrument(skip_all)]
pub async fn find_source_by_name(pool: &Pool, name: &str) -> Result<Option<DataSource>> {
    let row = sqlx::query(&format!("SELECT {SOURCE_COLUMNS} FROM data_sources WHERE name = ?"))
        .bind(name)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(source_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn list_sources(pool: &Pool) -> Result<Vec<DataSource>> {
    let rows = sqlx::query(&format!("SELECT {SOURCE_COLUMNS} FROM data_sources ORDER BY id ASC"))
        .fetch_all(pool)
        .await?;
    rows.iter().map(source_from_row).collect()
}

#[instrument(skip_all)]
pub async fn list_enabled_sources(pool: &Pool) -> Result<Vec<DataSource>> {
    let rows = sqlx::query(&format!(
        "SELECT {SOURCE_COLUMNS} FROM data_sources WHERE enabled = 1 ORDER BY id ASC"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(source_from_row).collect()
}

/// Apply an operator edit and append a `config_update` entry in the same transaction.
#[instrument(skip_all, fields(source_id = id))]
pub async fn update_source(pool: &Pool, id: i64, update: &DataSourceUpdate) -> Result<DataSource> {
    if update.is_empty() {
        return Err(SyncError::validation("update carries no fields"));
    }
    let tags = update.tags.as_ref().map(serde_json::to_string).transpose()?;
    let config = update.config.as_ref().map(serde_json::to_string).transpose()?;

    let mut tx = pool.begin().await?;
    let res = sqlx::query(
        "UPDATE data_sources SET \
            display_name = COALESCE(?, display_name), \
            enabled = COALESCE(?, enabled), \
            api_base_url = COALESCE(?, api_base_url), \
            api_key = COALESCE(?, api_key), \
            tags = COALESCE(?, tags), \
            config = COALESCE(?, config), \
            updated_at = ? \
         WHERE id = ?",
    )
    .bind(update.display_name.as_deref())
    .bind(update.enabled)
    .bind(update.api_base_url.as_deref())
    .bind(update.api_key.as_deref())
    .bind(tags)
    .bind(config)
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() == 0 {
        return Err(SyncError::not_found("data source", id));
    }

    let mut log = NewSyncLog::new(id, SyncLogType::ConfigUpdate, SyncLogStatus::Success);
    log.error_message = Some(format!("updated: {}", update.changed_fields().join(", ")));
    append_sync_log_tx(&mut tx, &log).await?;
    tx.commit().await?;

    get_source(pool, id).await
}

#[instrument(skip_all, fields(source_id = id))]
pub async fn mark_sync_running(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("UPDATE data_sources SET last_sync_status = ?, updated_at = ? WHERE id = ?")
        .bind(SyncStatus::Running.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record the outcome of a run: summary fields and the audit entry commit together.
#[instrument(skip_all, fields(source_id = id))]
pub async fn finish_sync(
    pool: &Pool,
    id: i64,
    status: SyncStatus,
    counts: SyncCounts,
    error: Option<&str>,
    log: &NewSyncLog,
) -> Result<i64> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE data_sources SET last_sync_at = ?, last_sync_status = ?, last_sync_synced = ?, \
         last_sync_errors = ?, last_sync_error = ?, updated_at = ? WHERE id = ?",
    )
    .bind(now)
    .bind(status.as_str())
    .bind(i64::from(counts.synced))
    .bind(i64::from(counts.errors))
    .bind(error)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    let log_id = append_sync_log_tx(&mut tx, log).await?;
    tx.commit().await?;
    Ok(log_id)
}

/// Persist a health probe outcome together with its `health_check` log entry.
#[instrument(skip_all, fields(source_id = id))]
pub async fn record_health(
    pool: &Pool,
    id: i64,
    status: HealthStatus,
    error: Option<&str>,
    latency_ms: i64,
    log: &NewSyncLog,
) -> Result<()> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE data_sources SET health_status = ?, health_error = ?, health_latency_ms = ?, \
         last_health_check_at = ? WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(error)
    .bind(latency_ms)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    append_sync_log_tx(&mut tx, log).await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn append_sync_log(pool: &Pool, log: &NewSyncLog) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = append_sync_log_tx(&mut tx, log).await?;
    tx.commit().await?;
    Ok(id)
}

async fn append_sync_log_tx(tx: &mut Transaction<'_, Sqlite>, log: &NewSyncLog) -> Result<i64> {
    let id = sqlx::query(
        "INSERT INTO sync_logs (source_id, log_type, status, request_url, duration_ms, synced_count, error_count, error_message, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(log.source_id)
    .bind(log.log_type.as_str())
    .bind(log.status.as_str())
    .bind(log.request_url.as_deref())
    .bind(log.duration_ms)
    .bind(log.synced_count)
    .bind(log.error_count)
    .bind(log.error_message.as_deref())
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Newest-first page of a source's audit log. `page` is 1-based.
#[instrument(skip_all, fields(source_id = source_id))]
pub async fn list_sync_logs(
    pool: &Pool,
    source_id: i64,
    page: u32,
    page_size: u32,
) -> Result<Page<SyncLog>> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, 200);
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_logs WHERE source_id = ?")
        .bind(source_id)
        .fetch_one(pool)
        .await?;
    let rows = sqlx::query(
        "SELECT id, source_id, log_type, status, request_url, duration_ms, synced_count, error_count, error_message, created_at \
         FROM sync_logs WHERE source_id = ? ORDER BY id DESC LIMIT ? OFFSET ?",
    )
    .bind(source_id)
    .bind(i64::from(page_size))
    .bind(i64::from(page - 1) * i64::from(page_size))
    .fetch_all(pool)
    .await?;
    let items = rows.iter().map(sync_log_from_row).collect::<Result<Vec<_>>>()?;
    Ok(Page {
        items,
        total,
        page,
        page_size,
    })
}

/// Retention: drop entries created before `cutoff`. Entries are otherwise never touched.
#[instrument(skip_all)]
pub async fn prune_sync_logs(pool: &Pool, cutoff: DateTime<Utc>) -> Result<u64> {
    let res = sqlx::query("DELETE FROM sync_logs WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
