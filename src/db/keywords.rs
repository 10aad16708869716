use super::model::keyword_from_row;
use super::Pool;
use crate::error::{Result, SyncError};
use crate::model::{Keyword, KeywordFilter, KeywordScope, KeywordUpdate, NewKeyword};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use tracing::instrument;

const KEYWORD_COLUMNS: &str =
    "id, keyword, category, source_type, is_active, priority, description, tags, created_at, updated_at";

/// Outcome of a batch create: duplicates are skipped rather than failing the batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordBatchOutcome {
    pub created: Vec<Keyword>,
    pub skipped: Vec<String>,
}

#[instrument(skip_all)]
pub async fn insert_keyword(pool: &Pool, kw: &NewKeyword) -> Result<Keyword> {
    let now = Utc::now();
    let id = sqlx::query(
        "INSERT INTO keywords (keyword, category, source_type, is_active, priority, description, tags, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&kw.keyword)
    .bind(kw.category.as_deref())
    .bind(kw.source_type.as_str())
    .bind(kw.is_active)
    .bind(kw.priority)
    .bind(kw.description.as_deref())
    .bind(serde_json::to_string(&kw.tags)?)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| SyncError::from_insert(e, "keyword", &kw.keyword))?
    .last_insert_rowid();
    get_keyword(pool, id).await
}

#[instrument(skip_all)]
pub async fn insert_keywords_batch(pool: &Pool, items: &[NewKeyword]) -> Result<KeywordBatchOutcome> {
    let mut seen = HashSet::new();
    let mut outcome = KeywordBatchOutcome {
        created: Vec::new(),
        skipped: Vec::new(),
    };
    for kw in items {
        if !seen.insert(kw.keyword.clone()) {
            outcome.skipped.push(kw.keyword.clone());
            continue;
        }
        match insert_keyword(pool, kw).await {
            Ok(created) => outcome.created.push(created),
            Err(SyncError::Duplicate { value, .. }) => outcome.skipped.push(value),
            Err(err) => return Err(err),
        }
    }
    Ok(outcome)
}

#[instrument(skip_all)]
pub async fn get_keyword(pool: &Pool, id: i64) -> Result<Keyword> {
    let row = sqlx::query(&format!("SELECT {KEYWORD_COLUMNS} FROM keywords WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => keyword_from_row(&row),
        None => Err(SyncError::not_found("keyword", id)),
    }
}

/// List keywords, highest priority first, newest first within a priority.
#[instrument(skip_all)]
pub async fn list_keywords(pool: &Pool, filter: &KeywordFilter) -> Result<Vec<Keyword>> {
    let rows = sqlx::query(&format!(
        "SELECT {KEYWORD_COLUMNS} FROM keywords \
         WHERE (? IS NULL OR source_type = ?) \
           AND (? IS NULL OR is_active = ?) \
           AND (? IS NULL OR category = ?) \
         ORDER BY priority DESC, created_at DESC, id DESC"
    ))
    .bind(filter.source_type.map(|t| t.as_str()))
    .bind(filter.source_type.map(|t| t.as_str()))
    .bind(filter.is_active)
    .bind(filter.is_active)
    .bind(filter.category.as_deref())
    .bind(filter.category.as_deref())
    .fetch_all(pool)
    .await?;
    rows.iter().map(keyword_from_row).collect()
}

/// Active keywords within `scope`, unordered; dispatch order is decided by the matcher.
#[instrument(skip_all)]
pub async fn active_keywords(pool: &Pool, scope: KeywordScope) -> Result<Vec<Keyword>> {
    let filter = KeywordFilter {
        source_type: match scope {
            KeywordScope::All => None,
            KeywordScope::Only(t) => Some(t),
        },
        is_active: Some(true),
        category: None,
    };
    list_keywords(pool, &filter).await
}

#[instrument(skip_all, fields(keyword_id = id))]
pub async fn update_keyword(pool: &Pool, id: i64, update: &KeywordUpdate) -> Result<Keyword> {
    let tags = update.tags.as_ref().map(serde_json::to_string).transpose()?;
    let res = sqlx::query(
        "UPDATE keywords SET \
            keyword = COALESCE(?, keyword), \
            category = COALESCE(?, category), \
            source_type = COALESCE(?, source_type), \
            is_active = COALESCE(?, is_active), \
            priority = COALESCE(?, priority), \
            description = COALESCE(?, description), \
            tags = COALESCE(?, tags), \
            updated_at = ? \
         WHERE id = ?",
    )
    .bind(update.keyword.as_deref())
    .bind(update.category.as_deref())
    .bind(update.source_type.map(|t| t.as_str()))
    .bind(update.is_active)
    .bind(update.priority)
    .bind(update.description.as_deref())
    .bind(tags)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| SyncError::from_insert(e, "keyword", update.keyword.as_deref().unwrap_or("")))?;
    if res.rows_affected() == 0 {
        return Err(SyncError::not_found("keyword", id));
    }
    get_keyword(pool, id).await
}

#[instrument(skip_all, fields(keyword_id = id))]
pub async fn delete_keyword(pool: &Pool, id: i64) -> Result<()> {
    let res = sqlx::query("DELETE FROM keywords WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(SyncError::not_found("keyword", id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_pool, run_migrations};
    use crate::model::KeywordSourceType;

    async fn setup_pool() -> Pool {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn keyword_is_unique_case_sensitive() {
        let pool = setup_pool().await;
        insert_keyword(&pool, &NewKeyword::new("VLA", 100)).await.unwrap();
        let err = insert_keyword(&pool, &NewKeyword::new("VLA", 10)).await.unwrap_err();
        assert!(matches!(err, SyncError::Duplicate { .. }));
        // Different case is a different stored keyword.
        insert_keyword(&pool, &NewKeyword::new("vla", 10)).await.unwrap();
    }

    #[tokio::test]
    async fn batch_skips_duplicates() {
        let pool = setup_pool().await;
        insert_keyword(&pool, &NewKeyword::new("LLM", 50)).await.unwrap();
        let out = insert_keywords_batch(
            &pool,
            &[
                NewKeyword::new("LLM", 50),
                NewKeyword::new("humanoid", 40),
                NewKeyword::new("humanoid", 40),
            ],
        )
        .await
        .unwrap();
        assert_eq!(out.created.len(), 1);
        assert_eq!(out.skipped, vec!["LLM".to_string(), "humanoid".to_string()]);
    }

    #[tokio::test]
    async fn filters_and_updates() {
        let pool = setup_pool().await;
        let a = insert_keyword(&pool, &NewKeyword::new("dexterous", 30)).await.unwrap();
        let mut user_kw = NewKeyword::new("sim2real", 60);
        user_kw.source_type = KeywordSourceType::User;
        insert_keyword(&pool, &user_kw).await.unwrap();

        let users = list_keywords(
            &pool,
            &KeywordFilter {
                source_type: Some(KeywordSourceType::User),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].keyword, "sim2real");

        let updated = update_keyword(
            &pool,
            a.id,
            &KeywordUpdate {
                is_active: Some(false),
                priority: Some(90),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.priority, 90);

        let active = active_keywords(&pool, KeywordScope::All).await.unwrap();
        assert_eq!(active.len(), 1);

        delete_keyword(&pool, a.id).await.unwrap();
        assert!(matches!(
            delete_keyword(&pool, a.id).await,
            Err(SyncError::NotFound { .. })
        ));
    }
}
