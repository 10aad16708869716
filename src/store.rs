//! Content store seam. The upsert keyed by `(source_name, external_id)` is the
//! only dedupe the engine relies on.

use crate::db::{self, Pool};
use crate::error::Result;
use crate::model::ContentItem;
use async_trait::async_trait;

pub use crate::db::UpsertOutcome;

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn upsert(&self, item: &ContentItem, matched_keywords: &[String]) -> Result<UpsertOutcome>;
}

#[derive(Debug, Clone)]
pub struct SqliteContentStore {
    pool: Pool,
}

impl SqliteContentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn upsert(&self, item: &ContentItem, matched_keywords: &[String]) -> Result<UpsertOutcome> {
        db::upsert_content_item(&self.pool, item, matched_keywords).await
    }
}
