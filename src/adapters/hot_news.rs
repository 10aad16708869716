//! Generic hot-list aggregator. The endpoint returns a whole board; the query
//! is applied locally as a case-insensitive substring filter.

use super::http::{build_url, decode_json, get_text};
use super::{AdapterContext, SourceAdapter};
use crate::error::UpstreamError;
use crate::keywords::matches_text;
use crate::model::{ContentItem, ContentKind, SearchRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;

pub struct HotNewsAdapter {
    http: Client,
}

impl HotNewsAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// `config.board` selects the list path under the base URL.
    fn url(ctx: &AdapterContext) -> Result<reqwest::Url, UpstreamError> {
        let board = ctx.config_str("board").unwrap_or_default();
        build_url(&ctx.api_base_url, &board, &[])
    }
}

fn text_field(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match entry.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn timestamp(entry: &Value) -> Option<DateTime<Utc>> {
    match entry.get("timestamp").or_else(|| entry.get("time"))? {
        Value::Number(n) => {
            let v = n.as_i64()?;
            // Millisecond timestamps are common on these boards.
            let secs = if v > 10_000_000_000 { v / 1000 } else { v };
            DateTime::<Utc>::from_timestamp(secs, 0)
        }
        Value::String(s) => super::http::parse_rfc3339(s),
        _ => None,
    }
}

pub(crate) fn parse_board(
    body: &str,
    source_name: &str,
    req: &SearchRequest,
    url: &str,
) -> Result<Vec<ContentItem>, UpstreamError> {
    let payload: Value = decode_json(body, url)?;
    let entries = match &payload {
        Value::Array(list) => list.clone(),
        Value::Object(map) => match map.get("data").or_else(|| map.get("items")) {
            Some(Value::Array(list)) => list.clone(),
            _ => {
                return Err(UpstreamError::decode("hot list payload has no data array").with_url(url))
            }
        },
        _ => return Err(UpstreamError::decode("hot list payload is not JSON object or array").with_url(url)),
    };

    let mut out = Vec::new();
    for raw in entries {
        let Some(title) = text_field(&raw, &["title", "name"]) else {
            continue;
        };
        let link = text_field(&raw, &["url", "mobileUrl", "link"]);
        let Some(external_id) = text_field(&raw, &["id"]).or_else(|| link.clone()) else {
            continue;
        };
        let item = ContentItem {
            external_id,
            source_name: source_name.to_string(),
            kind: ContentKind::News,
            title,
            body: text_field(&raw, &["desc", "description"]).unwrap_or_default(),
            url: link,
            published_at: timestamp(&raw),
            raw,
        };
        if !matches_text(&req.query, &item) {
            continue;
        }
        out.push(item);
        if out.len() >= req.limit as usize {
            break;
        }
    }
    Ok(out)
}

#[async_trait]
impl SourceAdapter for HotNewsAdapter {
    fn name(&self) -> &'static str {
        "hot_news"
    }

    fn request_url(&self, _req: &SearchRequest, ctx: &AdapterContext) -> String {
        Self::url(ctx).map(|u| u.to_string()).unwrap_or_default()
    }

    fn probe_query(&self) -> &str {
        ""
    }

    async fn search(
        &self,
        req: &SearchRequest,
        ctx: &AdapterContext,
    ) -> Result<Vec<ContentItem>, UpstreamError> {
        let url = Self::url(ctx)?;
        let url_str = url.to_string();
        let body = get_text(self.http.get(url), &url_str).await?;
        parse_board(&body, &ctx.source_name, req, &url_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOARD: &str = r#"{"code":200,"data":[
        {"id":1,"title":"Humanoid robot runs a marathon","desc":"","url":"https://n/1","timestamp":1714521600000},
        {"id":2,"title":"Stock market update","desc":"nothing about robots","url":"https://n/2"},
        {"title":"No id but link","url":"https://n/3","desc":"HUMANOID teaser"},
        {"desc":"no title"}
    ]}"#;

    fn req(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.into(),
            limit: 10,
            since_days: None,
        }
    }

    #[test]
    fn filters_by_case_insensitive_substring() {
        let items = parse_board(BOARD, "hot_news", &req("humanoid"), "u").unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "https://n/3"]);
        assert_eq!(
            items[0].published_at.map(|d| d.timestamp()),
            Some(1_714_521_600)
        );
    }

    #[test]
    fn empty_query_returns_the_board() {
        let items = parse_board(BOARD, "hot_news", &req(""), "u").unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn bare_array_payload_is_accepted() {
        let items = parse_board(r#"[{"id":"a","title":"Robot"}]"#, "hot_news", &req("robot"), "u").unwrap();
        assert_eq!(items.len(), 1);
    }
}
