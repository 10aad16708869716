use super::http::{build_url, decode_json, get_text, since_cutoff};
use super::{AdapterContext, SourceAdapter};
use crate::error::UpstreamError;
use crate::model::{ContentItem, ContentKind, SearchRequest};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_BASE: &str = "https://api.semanticscholar.org";
const FIELDS: &str = "title,abstract,url,year,publicationDate,authors,externalIds,venue,citationCount";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paper {
    paper_id: String,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    url: Option<String>,
    publication_date: Option<String>,
}

pub struct SemanticScholarAdapter {
    http: Client,
}

impl SemanticScholarAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// `year` and `fieldsOfStudy` come from the source config or run overrides.
    /// Without an explicit year, `sinceDays` becomes an open-ended date range.
    fn url(req: &SearchRequest, ctx: &AdapterContext) -> Result<reqwest::Url, UpstreamError> {
        let base = if ctx.api_base_url.is_empty() {
            DEFAULT_BASE
        } else {
            ctx.api_base_url.as_str()
        };
        let mut params = vec![
            ("query", req.query.clone()),
            ("limit", req.limit.min(100).to_string()),
            ("fields", FIELDS.to_string()),
        ];
        match ctx.config_str("year") {
            Some(year) => params.push(("year", year)),
            None => {
                if let Some(cutoff) = since_cutoff(req.since_days) {
                    params.push((
                        "publicationDateOrYear",
                        format!("{}:", cutoff.format("%Y-%m-%d")),
                    ));
                }
            }
        }
        if let Some(fields) = ctx.config_str("fieldsOfStudy") {
            params.push(("fieldsOfStudy", fields));
        }
        build_url(base, "graph/v1/paper/search", &params)
    }
}

pub(crate) fn parse_papers(body: &str, source_name: &str, url: &str) -> Result<Vec<ContentItem>, UpstreamError> {
    let resp: SearchResponse = decode_json(body, url)?;
    let mut out = Vec::with_capacity(resp.data.len());
    for raw in resp.data {
        let paper: Paper = serde_json::from_value(raw.clone())
            .map_err(|e| UpstreamError::decode(format!("semantic scholar paper: {e}")).with_url(url))?;
        let Some(title) = paper.title.filter(|t| !t.trim().is_empty()) else {
            continue;
        };
        let published_at = paper
            .publication_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| Utc.from_utc_datetime(&d));
        out.push(ContentItem {
            external_id: paper.paper_id,
            source_name: source_name.to_string(),
            kind: ContentKind::Paper,
            title,
            body: paper.abstract_text.unwrap_or_default(),
            url: paper.url,
            published_at,
            raw,
        });
    }
    Ok(out)
}

#[async_trait]
impl SourceAdapter for SemanticScholarAdapter {
    fn name(&self) -> &'static str {
        "semantic_scholar"
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
        if let Some(key) = &ctx.api_key {
            rb = rb.header("x-api-key", key);
        }
        let body = get_text(rb, &url_str).await?;
        parse_papers(&body, &ctx.source_name, &url_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overrides_reach_the_query_string() {
        let mut ctx = AdapterContext::default();
        ctx.config.insert("year".into(), json!(2024));
        ctx.config.insert("fieldsOfStudy".into(), json!(["Computer Science", "Engineering"]));
        let req = SearchRequest {
            query: "embodied agents".into(),
            limit: 5,
            since_days: Some(7),
        };
        let url = SemanticScholarAdapter::new(Client::new()).request_url(&req, &ctx);
        assert!(url.contains("year=2024"));
        assert!(url.contains("fieldsOfStudy=Computer+Science%2CEngineering"));
        assert!(!url.contains("publicationDateOrYear"));
    }

    #[test]
    fn papers_without_title_are_dropped() {
        let body = r#"{"total":2,"offset":0,"data":[
            {"paperId":"p1","title":"Embodied Agents","abstract":"Abs","url":"https://s2/p1","publicationDate":"2024-03-02"},
            {"paperId":"p2","title":null}
        ]}"#;
        let items = parse_papers(body, "semantic_scholar", "u").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].external_id, "p1");
        assert_eq!(items[0].body, "Abs");
        assert_eq!(
            items[0].published_at.map(|d| d.format("%Y-%m-%d").to_string()).as_deref(),
            Some("2024-03-02")
        );
    }
}
