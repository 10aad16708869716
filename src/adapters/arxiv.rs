use super::http::{build_url, get_text, parse_rfc3339, since_cutoff, squash_whitespace, within};
use super::{AdapterContext, SourceAdapter};
use crate::error::UpstreamError;
use crate::model::{ContentItem, ContentKind, SearchRequest};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const DEFAULT_BASE: &str = "http://export.arxiv.org";

static VERSION_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").expect("valid version regex"));

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    title: String,
    #[serde(default)]
    summary: String,
    published: Option<String>,
    updated: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<Author>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Author {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@title")]
    title: Option<String>,
}

pub struct ArxivAdapter {
    http: Client,
}

impl ArxivAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn url(req: &SearchRequest, ctx: &AdapterContext) -> Result<reqwest::Url, UpstreamError> {
        let base = if ctx.api_base_url.is_empty() {
            DEFAULT_BASE
        } else {
            ctx.api_base_url.as_str()
        };
        let category = ctx.config_str("category");
        let query = match category {
            Some(cat) if !req.query.is_empty() => format!("all:\"{}\" AND cat:{}", req.query, cat),
            Some(cat) => format!("cat:{cat}"),
            None => format!("all:\"{}\"", req.query),
        };
        build_url(
            base,
            "api/query",
            &[
                ("search_query", query),
                ("start", "0".to_string()),
                ("max_results", req.limit.to_string()),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
            ],
        )
    }
}

/// Bare arXiv id: `http://arxiv.org/abs/2401.01234v2` → `2401.01234`.
fn arxiv_id(entry_id: &str) -> String {
    let tail = entry_id.rsplit("/abs/").next().unwrap_or(entry_id);
    VERSION_SUFFIX.replace(tail, "").into_owned()
}

pub(crate) fn parse_feed(
    xml: &str,
    source_name: &str,
    req: &SearchRequest,
) -> Result<Vec<ContentItem>, UpstreamError> {
    let feed: Feed = quick_xml::de::from_str(xml)
        .map_err(|e| UpstreamError::decode(format!("arxiv atom feed: {e}")))?;
    let cutoff = since_cutoff(req.since_days);
    let mut out = Vec::with_capacity(feed.entries.len());
    for entry in feed.entries {
        let published = entry.published.as_deref().and_then(parse_rfc3339);
        if !within(cutoff, published) {
            continue;
        }
        let pdf = entry
            .links
            .iter()
            .find(|l| l.title.as_deref() == Some("pdf"))
            .map(|l| l.href.clone());
        let authors: Vec<String> = entry.authors.into_iter().map(|a| a.name).collect();
        out.push(ContentItem {
            external_id: arxiv_id(&entry.id),
            source_name: source_name.to_string(),
            kind: ContentKind::Paper,
            title: squash_whitespace(&entry.title),
            body: squash_whitespace(&entry.summary),
            url: Some(entry.id.clone()),
            published_at: published,
            raw: json!({
                "id": entry.id,
                "authors": authors,
                "pdfUrl": pdf,
                "updated": entry.updated,
            }),
        });
        if out.len() >= req.limit as usize {
            break;
        }
    }
    Ok(out)
}

#[async_trait]
impl SourceAdapter for ArxivAdapter {
    fn name(&self) -> &'static str {
        "arxiv"
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
        let body = get_text(self.http.get(url), &url_str).await?;
        parse_feed(&body, &ctx.source_name, req).map_err(|e| e.with_url(url_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query</title>
  <id>http://arxiv.org/api/abc</id>
  <entry>
    <id>http://arxiv.org/abs/2401.01234v2</id>
    <updated>2099-01-03T00:00:00Z</updated>
    <published>2099-01-02T00:00:00Z</published>
    <title>Vision-Language-Action
      Models for Manipulation</title>
    <summary>  We study VLA policies.  </summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <link href="http://arxiv.org/abs/2401.01234v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2401.01234v2" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.RO" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/1901.00001v1</id>
    <published>2019-01-01T00:00:00Z</published>
    <title>Old paper</title>
    <summary>old</summary>
  </entry>
</feed>"#;

    fn req(since_days: Option<u32>) -> SearchRequest {
        SearchRequest {
            query: "VLA".into(),
            limit: 10,
            since_days,
        }
    }

    #[test]
    fn parses_entries_and_strips_version() {
        let items = parse_feed(FEED, "arxiv", &req(None)).unwrap();
        assert_eq!(items.len(), 2);
        let first = &items[0];
        assert_eq!(first.external_id, "2401.01234");
        assert_eq!(first.title, "Vision-Language-Action Models for Manipulation");
        assert_eq!(first.body, "We study VLA policies.");
        assert_eq!(first.raw["authors"][1], "Alan Turing");
        assert_eq!(first.raw["pdfUrl"], "http://arxiv.org/pdf/2401.01234v2");
    }

    #[test]
    fn since_days_filters_old_entries() {
        let items = parse_feed(FEED, "arxiv", &req(Some(30))).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].external_id, "2401.01234");
    }

    #[test]
    fn url_sorts_by_submission_date() {
        let ctx = AdapterContext {
            source_name: "arxiv".into(),
            ..Default::default()
        };
        let url = ArxivAdapter::new(Client::new()).request_url(&req(None), &ctx);
        assert!(url.starts_with("http://export.arxiv.org/api/query?"));
        assert!(url.contains("sortBy=submittedDate"));
        assert!(url.contains("max_results=10"));
    }

    #[test]
    fn malformed_feed_is_a_decode_error() {
        let err = parse_feed("<feed><entry><title>x</title></entry>", "arxiv", &req(None)).unwrap_err();
        assert_eq!(err.kind, crate::error::UpstreamErrorKind::Decode);
        assert!(!err.retryable);
    }
}
