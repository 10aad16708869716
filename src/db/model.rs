//! Row → entity mapping used by the repositories.
//!
//! JSON columns (`tags`, `config`, `raw`) are stored as TEXT and decoded here;
//! enum columns fall back to their neutral variant when the stored text is unknown.

use crate::error::Result;
use crate::model::{
    Credential, DataSource, HealthStatus, Keyword, KeywordSourceType, SyncCounts, SyncLog,
    SyncLogStatus, SyncLogType, SyncStatus,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub(crate) fn source_from_row(row: &SqliteRow) -> Result<DataSource> {
    let tags: String = row.try_get("tags")?;
    let config: String = row.try_get("config")?;
    let health: String = row.try_get("health_status")?;
    let last_status: String = row.try_get("last_sync_status")?;
    Ok(DataSource {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        enabled: row.try_get("enabled")?,
        api_base_url: row.try_get("api_base_url")?,
        api_key: row.try_get("api_key")?,
        tags: serde_json::from_str(&tags)?,
        config: serde_json::from_str::<Map<String, Value>>(&config)?,
        health_status: HealthStatus::parse(&health).unwrap_or(HealthStatus::Unknown),
        health_error: row.try_get("health_error")?,
        health_latency_ms: row.try_get("health_latency_ms")?,
        last_health_check_at: row.try_get::<Option<DateTime<Utc>>, _>("last_health_check_at")?,
        last_sync_at: row.try_get::<Option<DateTime<Utc>>, _>("last_sync_at")?,
        last_sync_status: SyncStatus::parse(&last_status).unwrap_or(SyncStatus::Never),
        last_sync_result: SyncCounts {
            synced: count_to_u32(row.try_get("last_sync_synced")?),
            errors: count_to_u32(row.try_get("last_sync_errors")?),
        },
        last_sync_error: row.try_get("last_sync_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn keyword_from_row(row: &SqliteRow) -> Result<Keyword> {
    let tags: String = row.try_get("tags")?;
    let source_type: String = row.try_get("source_type")?;
    Ok(Keyword {
        id: row.try_get("id")?,
        keyword: row.try_get("keyword")?,
        category: row.try_get("category")?,
        source_type: KeywordSourceType::parse(&source_type).unwrap_or(KeywordSourceType::Admin),
        is_active: row.try_get("is_active")?,
        priority: row.try_get("priority")?,
        description: row.try_get("description")?,
        tags: serde_json::from_str(&tags)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn sync_log_from_row(row: &SqliteRow) -> Result<SyncLog> {
    let log_type: String = row.try_get("log_type")?;
    let status: String = row.try_get("status")?;
    Ok(SyncLog {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        log_type: SyncLogType::parse(&log_type).unwrap_or(SyncLogType::Sync),
        status: SyncLogStatus::parse(&status).unwrap_or(SyncLogStatus::Warning),
        request_url: row.try_get("request_url")?,
        duration_ms: row.try_get("duration_ms")?,
        synced_count: row.try_get("synced_count")?,
        error_count: row.try_get("error_count")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn credential_from_row(row: &SqliteRow) -> Result<Credential> {
    Ok(Credential {
        id: row.try_get("id")?,
        provider: row.try_get("provider")?,
        name: row.try_get("name")?,
        secret_value: row.try_get("secret_value")?,
        error_count: row.try_get("error_count")?,
        last_used: row.try_get::<Option<DateTime<Utc>>, _>("last_used")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

fn count_to_u32(v: i64) -> u32 {
    u32::try_from(v.max(0)).unwrap_or(u32::MAX)
}
