//! Keyword subscriptions: validation, dispatch order and per-keyword fan-out.

use crate::error::{Result, SyncError};
use crate::model::{ContentItem, Fingerprint, Keyword, KeywordUpdate, NewKeyword};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const MAX_PRIORITY: i64 = 100;

pub fn validate_new(kw: &NewKeyword) -> Result<()> {
    validate_text(&kw.keyword)?;
    validate_priority(kw.priority)
}

pub fn validate_update(update: &KeywordUpdate) -> Result<()> {
    if let Some(text) = &update.keyword {
        validate_text(text)?;
    }
    if let Some(p) = update.priority {
        validate_priority(p)?;
    }
    Ok(())
}

fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(SyncError::validation("keyword must not be empty"));
    }
    Ok(())
}

fn validate_priority(priority: i64) -> Result<()> {
    if !(0..=MAX_PRIORITY).contains(&priority) {
        return Err(SyncError::validation(format!(
            "priority must be within 0..={MAX_PRIORITY}, got {priority}"
        )));
    }
    Ok(())
}

/// Active keywords, highest priority first; newer ones win ties.
pub fn order_for_dispatch(keywords: &[Keyword]) -> Vec<Keyword> {
    let mut active: Vec<Keyword> = keywords.iter().filter(|k| k.is_active).cloned().collect();
    active.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| b.id.cmp(&a.id))
    });
    active
}

/// Case-insensitive substring match on title or body.
pub fn matches_text(keyword: &str, item: &ContentItem) -> bool {
    let needle = keyword.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    item.title.to_lowercase().contains(&needle) || item.body.to_lowercase().contains(&needle)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedItem {
    pub item: ContentItem,
    /// Every keyword whose search returned this item, in dispatch order.
    pub found_via: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeywordFailure {
    pub keyword: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRun {
    pub items: Vec<MatchedItem>,
    /// Keywords whose search ran to completion or failure.
    pub processed: u32,
    /// Keywords whose search ultimately failed.
    pub errors: u32,
    pub failures: Vec<KeywordFailure>,
    /// Keywords never searched because the run was cancelled.
    pub skipped: u32,
    pub cancelled: bool,
}

/// Search every active keyword in dispatch order and merge results by fingerprint.
///
/// A failed keyword is counted and the run moves on. Cancellation stops before
/// the next keyword; whatever was already fetched is kept.
pub async fn dispatch<F, Fut>(
    keywords: &[Keyword],
    cancel: &CancellationToken,
    mut search: F,
) -> KeywordRun
where
    F: FnMut(&Keyword) -> Fut,
    Fut: Future<Output = Result<Vec<ContentItem>>>,
{
    let ordered = order_for_dispatch(keywords);
    let mut run = KeywordRun::default();
    let mut index: HashMap<Fingerprint, usize> = HashMap::new();

    for (pos, kw) in ordered.iter().enumerate() {
        if cancel.is_cancelled() {
            run.cancelled = true;
            run.skipped = (ordered.len() - pos) as u32;
            break;
        }
        match search(kw).await {
            Ok(items) => {
                run.processed += 1;
                debug!(keyword = %kw.keyword, found = items.len(), "keyword search done");
                for item in items {
                    let fp = item.fingerprint();
                    match index.get(&fp) {
                        Some(&i) => {
                            let via = &mut run.items[i].found_via;
                            if !via.contains(&kw.keyword) {
                                via.push(kw.keyword.clone());
                            }
                        }
                        None => {
                            index.insert(fp, run.items.len());
                            run.items.push(MatchedItem {
                                item,
                                found_via: vec![kw.keyword.clone()],
                            });
                        }
                    }
                }
            }
            Err(SyncError::Cancelled) => {
                run.cancelled = true;
                run.skipped = (ordered.len() - pos) as u32;
                break;
            }
            Err(err) => {
                run.processed += 1;
                run.errors += 1;
                warn!(keyword = %kw.keyword, error = %err, "keyword search failed");
                run.failures.push(KeywordFailure {
                    keyword: kw.keyword.clone(),
                    message: err.to_string(),
                });
            }
        }
    }
    run
}
