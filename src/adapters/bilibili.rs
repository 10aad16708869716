//! Bilibili video search. The search API rejects anonymous callers, so every
//! request carries a session cookie from the credential pool.

use super::http::{build_url, decode_json, get_text, since_cutoff, within};
use super::{AdapterContext, SourceAdapter};
use crate::error::{UpstreamError, UpstreamErrorKind};
use crate::model::{ContentItem, ContentKind, SearchRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{COOKIE, REFERER};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_BASE: &str = "https://api.bilibili.com";

/// Provider code for request throttling ("请求被拦截").
const CODE_THROTTLED: i64 = -412;
/// Provider code for a missing or expired login.
const CODE_NOT_LOGGED_IN: i64 = -101;

static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    result: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Video {
    bvid: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    arcurl: Option<String>,
    #[serde(default)]
    pubdate: Option<i64>,
}

pub struct BilibiliAdapter {
    http: Client,
}

impl BilibiliAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn url(req: &SearchRequest, ctx: &AdapterContext) -> Result<reqwest::Url, UpstreamError> {
        let base = if ctx.api_base_url.is_empty() {
            DEFAULT_BASE
        } else {
            ctx.api_base_url.as_str()
        };
        build_url(
            base,
            "x/web-interface/search/type",
            &[
                ("search_type", "video".to_string()),
                ("keyword", req.query.clone()),
                ("order", ctx.config_str("order").unwrap_or_else(|| "pubdate".to_string())),
                ("page", "1".to_string()),
                ("page_size", req.limit.min(50).to_string()),
            ],
        )
    }
}

fn strip_tags(s: &str) -> String {
    TAGS.replace_all(s, "").trim().to_string()
}

fn envelope_error(code: i64, message: &str) -> UpstreamError {
    let text = format!("bilibili code {code}: {message}");
    match code {
        CODE_THROTTLED => UpstreamError::rate_limited(text),
        CODE_NOT_LOGGED_IN => UpstreamError::auth(text),
        _ => UpstreamError::new(UpstreamErrorKind::Client, text),
    }
}

pub(crate) fn parse_videos(
    body: &str,
    source_name: &str,
    req: &SearchRequest,
    url: &str,
) -> Result<Vec<ContentItem>, UpstreamError> {
    let env: Envelope = decode_json(body, url)?;
    if env.code != 0 {
        return Err(envelope_error(env.code, &env.message).with_url(url));
    }
    let cutoff = since_cutoff(req.since_days);
    let results = env.data.map(|d| d.result).unwrap_or_default();
    let mut out = Vec::with_capacity(results.len());
    for raw in results {
        let video: Video = serde_json::from_value(raw.clone())
            .map_err(|e| UpstreamError::decode(format!("bilibili video: {e}")).with_url(url))?;
        let published = video
            .pubdate
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
        if !within(cutoff, published) {
            continue;
        }
        let link = video
            .arcurl
            .unwrap_or_else(|| format!("https://www.bilibili.com/video/{}", video.bvid));
        out.push(ContentItem {
            external_id: video.bvid,
            source_name: source_name.to_string(),
            kind: ContentKind::Video,
            title: strip_tags(&video.title),
            body: strip_tags(&video.description),
            url: Some(link),
            published_at: published,
            raw,
        });
    }
    Ok(out)
}

#[async_trait]
impl SourceAdapter for BilibiliAdapter {
    fn name(&self) -> &'static str {
        "bilibili"
    }

    fn requires_credential(&self) -> bool {
        true
    }

    fn request_url(&self, req: &SearchRequest, ctx: &AdapterContext) -> String {
        Self::url(req, ctx).map(|u| u.to_string()).unwrap_or_default()
    }

    fn probe_query(&self) -> &str {
        "机器人"
    }

    async fn search(
        &self,
        req: &SearchRequest,
        ctx: &AdapterContext,
    ) -> Result<Vec<ContentItem>, UpstreamError> {
        let url = Self::url(req, ctx)?;
        let url_str = url.to_string();
        let Some(cookie) = ctx.credential.as_deref() else {
            return Err(UpstreamError::auth("bilibili search needs a session cookie").with_url(url_str));
        };
        let rb = self
            .http
            .get(url)
            .header(COOKIE, cookie)
            .header(REFERER, "https://www.bilibili.com");
        let body = get_text(rb, &url_str).await?;
        parse_videos(&body, &ctx.source_name, req, &url_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> SearchRequest {
        SearchRequest {
            query: "具身智能".into(),
            limit: 10,
            since_days: None,
        }
    }

    #[test]
    fn parses_results_and_strips_highlight_tags() {
        let body = r#"{"code":0,"message":"0","data":{"result":[
            {"bvid":"BV1xx","title":"<em class=\"keyword\">具身智能</em>入门","description":"demo",
             "arcurl":"http://www.bilibili.com/video/BV1xx","pubdate":1714521600,"play":100}]}}"#;
        let items = parse_videos(body, "bilibili", &req(), "u").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].external_id, "BV1xx");
        assert_eq!(items[0].title, "具身智能入门");
        assert_eq!(items[0].raw["play"], 100);
    }

    #[test]
    fn provider_codes_are_classified() {
        let throttled = parse_videos(r#"{"code":-412,"message":"请求被拦截"}"#, "bilibili", &req(), "u").unwrap_err();
        assert_eq!(throttled.kind, UpstreamErrorKind::RateLimited);
        assert!(throttled.retryable);

        let logged_out = parse_videos(r#"{"code":-101,"message":"账号未登录"}"#, "bilibili", &req(), "u").unwrap_err();
        assert_eq!(logged_out.kind, UpstreamErrorKind::Auth);
        assert!(!logged_out.retryable);
    }

    #[tokio::test]
    async fn missing_cookie_fails_without_network() {
        let adapter = BilibiliAdapter::new(Client::new());
        let err = adapter.search(&req(), &AdapterContext::default()).await.unwrap_err();
        assert_eq!(err.kind, UpstreamErrorKind::Auth);
    }
}
