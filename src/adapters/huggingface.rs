use super::http::{build_url, decode_json, get_text, parse_rfc3339, since_cutoff, within};
use super::{AdapterContext, SourceAdapter};
use crate::error::UpstreamError;
use crate::model::{ContentItem, ContentKind, SearchRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_BASE: &str = "https://huggingface.co";

/// Model search is slow; it gets the long timeout.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    id: String,
    #[serde(default)]
    pipeline_tag: Option<String>,
    #[serde(default)]
    last_modified: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct HuggingFaceAdapter {
    http: Client,
}

impl HuggingFaceAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn base(ctx: &AdapterContext) -> &str {
        if ctx.api_base_url.is_empty() {
            DEFAULT_BASE
        } else {
            ctx.api_base_url.as_str()
        }
    }

    fn url(req: &SearchRequest, ctx: &AdapterContext) -> Result<reqwest::Url, UpstreamError> {
        let mut params = vec![
            ("search", req.query.clone()),
            ("limit", req.limit.to_string()),
            ("sort", ctx.config_str("sort").unwrap_or_else(|| "lastModified".to_string())),
            ("direction", "-1".to_string()),
            ("full", "true".to_string()),
        ];
        if let Some(filter) = ctx.config_str("pipeline_tag") {
            params.push(("pipeline_tag", filter));
        }
        build_url(Self::base(ctx), "api/models", &params)
    }
}

pub(crate) fn parse_models(
    body: &str,
    base: &str,
    source_name: &str,
    req: &SearchRequest,
    url: &str,
) -> Result<Vec<ContentItem>, UpstreamError> {
    let raw_models: Vec<Value> = decode_json(body, url)?;
    let cutoff = since_cutoff(req.since_days);
    let mut out = Vec::with_capacity(raw_models.len());
    for raw in raw_models {
        let model: ModelInfo = serde_json::from_value(raw.clone())
            .map_err(|e| UpstreamError::decode(format!("huggingface model: {e}")).with_url(url))?;
        let published = model
            .last_modified
            .as_deref()
            .or(model.created_at.as_deref())
            .and_then(parse_rfc3339);
        if !within(cutoff, published) {
            continue;
        }
        let body = match &model.pipeline_tag {
            Some(tag) => format!("{tag} · {}", model.tags.join(", ")),
            None => model.tags.join(", "),
        };
        out.push(ContentItem {
            url: Some(format!("{}/{}", base.trim_end_matches('/'), model.id)),
            external_id: model.id.clone(),
            source_name: source_name.to_string(),
            kind: ContentKind::Model,
            title: model.id,
            body,
            published_at: published,
            raw,
        });
    }
    Ok(out)
}

#[async_trait]
impl SourceAdapter for HuggingFaceAdapter {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    fn default_timeout(&self) -> Option<Duration> {
        Some(SEARCH_TIMEOUT)
    }

    fn request_url(&self, req: &SearchRequest, ctx: &AdapterContext) -> String {
        Self::url(req, ctx).map(|u| u.to_string()).unwrap_or_default()
    }

    async fn search(
        &self,
        req: &SearchRequest,
        ctx: &AdapterContext,
    ) -> Result<Vec<ContentItem>, UpstreamError> {
        let url = Self::url(req, ctx)?;
        let url_str = url.to_string();
        let mut rb = self.http.get(url);
        if let Some(token) = &ctx.api_key {
            rb = rb.bearer_auth(token);
        }
        let body = get_text(rb, &url_str).await?;
        parse_models(&body, Self::base(ctx), &ctx.source_name, req, &url_str)
    }
}
