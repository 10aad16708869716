use super::http::{build_url, check_status, decode_json, execute, parse_rfc3339, read_text, since_cutoff};
use super::{AdapterContext, SourceAdapter};
use crate::error::UpstreamError;
use crate::model::{ContentItem, ContentKind, SearchRequest};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_BASE: &str = "https://www.googleapis.com";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    id: ResultId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    #[serde(default)]
    description: String,
    published_at: Option<String>,
}

pub struct YoutubeAdapter {
    http: Client,
}

impl YoutubeAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn url(req: &SearchRequest, ctx: &AdapterContext, key: &str) -> Result<reqwest::Url, UpstreamError> {
        let base = if ctx.api_base_url.is_empty() {
            DEFAULT_BASE
        } else {
            ctx.api_base_url.as_str()
        };
        let mut params = vec![
            ("part", "snippet".to_string()),
            ("type", "video".to_string()),
            ("q", req.query.clone()),
            ("maxResults", req.limit.min(50).to_string()),
            ("order", "date".to_string()),
        ];
        if let Some(cutoff) = since_cutoff(req.since_days) {
            params.push((
                "publishedAfter",
                cutoff.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }
        if let Some(lang) = ctx.config_str("relevanceLanguage") {
            params.push(("relevanceLanguage", lang));
        }
        params.push(("key", key.to_string()));
        build_url(base, "youtube/v3/search", &params)
    }
}

/// Quota exhaustion comes back as 403; treat it as throttling.
fn classify(status: u16, body: &str) -> UpstreamError {
    if status == 403 && (body.contains("quotaExceeded") || body.contains("rateLimitExceeded")) {
        UpstreamError::rate_limited(format!("youtube quota exhausted (HTTP {status})"))
    } else {
        UpstreamError::from_status(status, body)
    }
}

pub(crate) fn parse_videos(body: &str, source_name: &str, url: &str) -> Result<Vec<ContentItem>, UpstreamError> {
    let resp: SearchResponse = decode_json(body, url)?;
    let mut out = Vec::with_capacity(resp.items.len());
    for raw in resp.items {
        let result: SearchResult = serde_json::from_value(raw.clone())
            .map_err(|e| UpstreamError::decode(format!("youtube result: {e}")).with_url(url))?;
        let Some(video_id) = result.id.video_id else {
            continue;
        };
        out.push(ContentItem {
            url: Some(format!("https://www.youtube.com/watch?v={video_id}")),
            external_id: video_id,
            source_name: source_name.to_string(),
            kind: ContentKind::Video,
            title: result.snippet.title,
            body: result.snippet.description,
            published_at: result.snippet.published_at.as_deref().and_then(parse_rfc3339),
            raw,
        });
    }
    Ok(out)
}

#[async_trait]
impl SourceAdapter for YoutubeAdapter {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn request_url(&self, req: &SearchRequest, ctx: &AdapterContext) -> String {
        Self::url(req, ctx, "***").map(|u| u.to_string()).unwrap_or_default()
    }

    async fn search(
        &self,
        req: &SearchRequest,
        ctx: &AdapterContext,
    ) -> Result<Vec<ContentItem>, UpstreamError> {
        let redacted = self.request_url(req, ctx);
        let Some(key) = ctx.api_key.as_deref() else {
            return Err(UpstreamError::auth("youtube api key is not configured").with_url(redacted));
        };
        let url = Self::url(req, ctx, key)?;
        let resp = execute(self.http.get(url), &redacted).await?;
        let status = resp.status().as_u16();
        if status == 403 {
            let body = read_text(resp, &redacted).await?;
            return Err(classify(status, &body).with_url(redacted));
        }
        let resp = check_status(resp, &redacted).await?;
        let body = read_text(resp, &redacted).await?;
        parse_videos(&body, &ctx.source_name, &redacted)
    }
}
