use super::http::{build_url, check_status, decode_json, execute, parse_rfc3339, read_text, since_cutoff};
use super::{AdapterContext, SourceAdapter};
use crate::error::UpstreamError;
use crate::model::{ContentItem, ContentKind, SearchRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Repo {
    id: u64,
    full_name: String,
    html_url: String,
    description: Option<String>,
    pushed_at: Option<String>,
}

pub struct GithubAdapter {
    http: Client,
}

impl GithubAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn url(req: &SearchRequest, ctx: &AdapterContext) -> Result<reqwest::Url, UpstreamError> {
        let base = if ctx.api_base_url.is_empty() {
            DEFAULT_BASE
        } else {
            ctx.api_base_url.as_str()
        };
        let mut q = req.query.clone();
        if let Some(cutoff) = since_cutoff(req.since_days) {
            q.push_str(&format!(" pushed:>={}", cutoff.format("%Y-%m-%d")));
        }
        if let Some(lang) = ctx.config_str("language") {
            q.push_str(&format!(" language:{lang}"));
        }
        let sort = ctx.config_str("sort").unwrap_or_else(|| "stars".to_string());
        build_url(
            base,
            "search/repositories",
            &[
                ("q", q.trim().to_string()),
                ("sort", sort),
                ("order", "desc".to_string()),
                ("per_page", req.limit.min(100).to_string()),
            ],
        )
    }
}

/// A 403 with an exhausted quota is throttling, not an auth failure.
fn rate_limit_error(status: StatusCode, headers: &HeaderMap) -> Option<UpstreamError> {
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())?;
    if remaining != "0" {
        return None;
    }
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    let message = match reset {
        Some(at) => format!("GitHub rate limit exhausted; resets at {}", at.to_rfc3339()),
        None => "GitHub rate limit exhausted".to_string(),
    };
    Some(UpstreamError::rate_limited(message))
}

pub(crate) fn parse_repos(body: &str, source_name: &str, url: &str) -> Result<Vec<ContentItem>, UpstreamError> {
    let resp: SearchResponse = decode_json(body, url)?;
    let mut out = Vec::with_capacity(resp.items.len());
    for raw in resp.items {
        let repo: Repo = serde_json::from_value(raw.clone())
            .map_err(|e| UpstreamError::decode(format!("github repo: {e}")).with_url(url))?;
        out.push(ContentItem {
            external_id: repo.id.to_string(),
            source_name: source_name.to_string(),
            kind: ContentKind::Repo,
            title: repo.full_name,
            body: repo.description.unwrap_or_default(),
            url: Some(repo.html_url),
            published_at: repo.pushed_at.as_deref().and_then(parse_rfc3339),
            raw,
        });
    }
    Ok(out)
}

#[async_trait]
impl SourceAdapter for GithubAdapter {
    fn name(&self) -> &'static str {
        "github"
    }

    fn request_url(&self, req: &SearchRequest, ctx: &AdapterContext) -> String {
        Self::url(req, ctx).map(|u| u.to_string()).unwrap_or_default()
    }

    fn probe_query(&self) -> &str {
        "robotics"
    }

    async fn search(
        &self,
        req: &SearchRequest,
        ctx: &AdapterContext,
    ) -> Result<Vec<ContentItem>, UpstreamError> {
        let url = Self::url(req, ctx)?;
        let url_str = url.to_string();
        let mut rb = self
            .http
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &ctx.api_key {
            rb = rb.bearer_auth(token);
        }
        let resp = execute(rb, &url_str).await?;
        if let Some(err) = rate_limit_error(resp.status(), resp.headers()) {
            return Err(err.with_url(url_str));
        }
        let resp = check_status(resp, &url_str).await?;
        let body = read_text(resp, &url_str).await?;
        parse_repos(&body, &ctx.source_name, &url_str)
    }
}
