//! Transport helpers shared by the HTTP adapters.

use crate::error::{UpstreamError, UpstreamErrorKind};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

const USER_AGENT: &str = concat!("embodied-sync/", env!("CARGO_PKG_VERSION"));

/// Shared client. Per-attempt deadlines are enforced by the fetch client, so
/// the transport timeout here is only a backstop.
pub fn build_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(180))
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
}

/// Join `path` onto `base` and append query pairs.
pub fn build_url(base: &str, path: &str, params: &[(&str, String)]) -> Result<Url, UpstreamError> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    let joined = joined.trim_end_matches('/');
    let parsed = if params.is_empty() {
        Url::parse(joined)
    } else {
        Url::parse_with_params(joined, params)
    };
    parsed.map_err(|e| UpstreamError::new(UpstreamErrorKind::Client, format!("invalid url {joined}: {e}")))
}

pub fn map_transport(err: reqwest::Error, url: &str) -> UpstreamError {
    let e = if err.is_timeout() {
        UpstreamError::timeout(err.to_string())
    } else if err.is_decode() {
        UpstreamError::decode(err.to_string())
    } else {
        UpstreamError::network(err.to_string())
    };
    e.with_url(url)
}

/// Send and return the response regardless of status.
pub async fn execute(rb: RequestBuilder, url: &str) -> Result<Response, UpstreamError> {
    rb.send().await.map_err(|e| map_transport(e, url))
}

/// Fail on non-2xx with a status-classified error.
pub async fn check_status(resp: Response, url: &str) -> Result<Response, UpstreamError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(UpstreamError::from_status(status.as_u16(), &body).with_url(url))
}

pub async fn read_text(resp: Response, url: &str) -> Result<String, UpstreamError> {
    resp.text().await.map_err(|e| map_transport(e, url))
}

pub async fn get_text(rb: RequestBuilder, url: &str) -> Result<String, UpstreamError> {
    let resp = check_status(execute(rb, url).await?, url).await?;
    read_text(resp, url).await
}

pub async fn get_json<T: DeserializeOwned>(rb: RequestBuilder, url: &str) -> Result<T, UpstreamError> {
    let body = get_text(rb, url).await?;
    decode_json(&body, url)
}

pub fn decode_json<T: DeserializeOwned>(body: &str, url: &str) -> Result<T, UpstreamError> {
    serde_json::from_str(body)
        .map_err(|e| UpstreamError::decode(format!("unexpected response shape: {e}")).with_url(url))
}

pub fn since_cutoff(since_days: Option<u32>) -> Option<DateTime<Utc>> {
    since_days.map(|d| Utc::now() - ChronoDuration::days(i64::from(d)))
}

/// Items without a date are kept.
pub fn within(cutoff: Option<DateTime<Utc>>, published: Option<DateTime<Utc>>) -> bool {
    match (cutoff, published) {
        (Some(c), Some(p)) => p >= c,
        _ => true,
    }
}

pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Collapse runs of whitespace (feeds wrap titles across lines).
pub fn squash_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_building_encodes_params() {
        let url = build_url(
            "https://api.example.com/",
            "/search",
            &[("q", "robot arm".to_string())],
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/search?q=robot+arm");
    }

    #[test]
    fn cutoff_keeps_undated_items() {
        let cutoff = since_cutoff(Some(7));
        assert!(within(cutoff, None));
        assert!(within(cutoff, Some(Utc::now())));
        assert!(!within(cutoff, Some(Utc::now() - ChronoDuration::days(30))));
        assert!(within(None, Some(Utc::now() - ChronoDuration::days(30))));
    }
}
