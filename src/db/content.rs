use super::Pool;
use crate::error::Result;
use crate::model::ContentItem;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Insert or refresh one item keyed by `(source_name, external_id)`.
///
/// `matched_keywords` are unioned with the ones already stored, so an item found
/// by several keyword runs keeps every attribution. The transaction must open
/// with a write: a leading read pins a WAL snapshot that any concurrent commit
/// turns into `SQLITE_BUSY_SNAPSHOT`.
#[instrument(skip_all, fields(source = %item.source_name, external_id = %item.external_id))]
pub async fn upsert_content_item(
    pool: &Pool,
    item: &ContentItem,
    matched_keywords: &[String],
) -> Result<UpsertOutcome> {
    let keywords: BTreeSet<&String> = matched_keywords.iter().collect();
    let keywords = serde_json::to_string(&keywords)?;
    let raw = serde_json::to_string(&item.raw)?;
    let now = Utc::now();

    let mut tx = pool.begin().await?;
    let updated = sqlx::query(
        "UPDATE content_items SET \
            kind = ?, title = ?, body = ?, url = ?, published_at = ?, raw = ?, \
            matched_keywords = ( \
                SELECT json_group_array(value) FROM ( \
                    SELECT value FROM json_each(content_items.matched_keywords) \
                    UNION SELECT value FROM json_each(?) \
                    ORDER BY value)), \
            updated_at = ? \
         WHERE source_name = ? AND external_id = ?",
    )
    .bind(item.kind.as_str())
    .bind(&item.title)
    .bind(&item.body)
    .bind(item.url.as_deref())
    .bind(item.published_at)
    .bind(&raw)
    .bind(&keywords)
    .bind(now)
    .bind(&item.source_name)
    .bind(&item.external_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let outcome = if updated > 0 {
        UpsertOutcome::Updated
    } else {
        sqlx::query(
            "INSERT INTO content_items \
                (source_name, external_id, kind, title, body, url, published_at, raw, matched_keywords, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.source_name)
        .bind(&item.external_id)
        .bind(item.kind.as_str())
        .bind(&item.title)
        .bind(&item.body)
        .bind(item.url.as_deref())
        .bind(item.published_at)
        .bind(&raw)
        .bind(&keywords)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        UpsertOutcome::Inserted
    };
    tx.commit().await?;
    Ok(outcome)
}

#[instrument(skip_all)]
pub async fn count_content_items(pool: &Pool, source_name: Option<&str>) -> Result<i64> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM content_items WHERE (? IS NULL OR source_name = ?)",
    )
    .bind(source_name)
    .bind(source_name)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

/// Keywords recorded against a stored item, sorted. Empty when the item is unknown.
#[instrument(skip_all)]
pub async fn matched_keywords_for(
    pool: &Pool,
    source_name: &str,
    external_id: &str,
) -> Result<Vec<String>> {
    let stored: Option<String> = sqlx::query_scalar(
        "SELECT matched_keywords FROM content_items WHERE source_name = ? AND external_id = ?",
    )
    .bind(source_name)
    .bind(external_id)
    .fetch_optional(pool)
    .await?;
    match stored {
        Some(s) => Ok(serde_json::from_str(&s)?),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_pool, run_migrations};
    use crate::model::ContentKind;
    use serde_json::json;

    fn paper(id: &str, title: &str) -> ContentItem {
        ContentItem {
            external_id: id.to_string(),
            source_name: "arxiv".to_string(),
            kind: ContentKind::Paper,
            title: title.to_string(),
            body: String::new(),
            url: None,
            published_at: None,
            raw: json!({ "id": id }),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_merges_keywords() {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let first = upsert_content_item(&pool, &paper("2401.1", "A"), &["VLA".into()])
            .await
            .unwrap();
        assert_eq!(first, UpsertOutcome::Inserted);

        let second = upsert_content_item(&pool, &paper("2401.1", "A v2"), &["LLM".into()])
            .await
            .unwrap();
        assert_eq!(second, UpsertOutcome::Updated);

        assert_eq!(count_content_items(&pool, Some("arxiv")).await.unwrap(), 1);
        assert_eq!(
            matched_keywords_for(&pool, "arxiv", "2401.1").await.unwrap(),
            vec!["LLM".to_string(), "VLA".to_string()]
        );
        let title: String = sqlx::query_scalar("SELECT title FROM content_items")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(title, "A v2");
    }

    #[tokio::test]
    async fn plain_refresh_keeps_recorded_keywords() {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        upsert_content_item(&pool, &paper("2401.2", "B"), &["VLA".into(), "VLA".into()])
            .await
            .unwrap();
        let again = upsert_content_item(&pool, &paper("2401.2", "B"), &[]).await.unwrap();
        assert_eq!(again, UpsertOutcome::Updated);
        assert_eq!(
            matched_keywords_for(&pool, "arxiv", "2401.2").await.unwrap(),
            vec!["VLA".to_string()]
        );
        assert!(matched_keywords_for(&pool, "arxiv", "missing").await.unwrap().is_empty());
    }
}
