//! Search Client (spec.md §4.3) — queries a single external search endpoint
//! and returns ranked result records. Per spec.md, the engine-zoo concern
//! (multiple SERP providers, HTML scraping, anti-bot fallbacks) belongs to a
//! different product surface; this is an abstraction over one JSON search API.
use crate::core::types::SearchResult;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const DEFAULT_RESULT_CAP: usize = 10;
const SEARCH_TIMEOUT: Duration = Duration::from_secs(20);

#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Execute a single search query. Per spec.md §4.3, failures are
    /// swallowed into an empty list — never propagated as an error — and
    /// duplicate URLs within one call are preserved (the orchestrator's
    /// curation step dedups).
    async fn search_web(&self, query: &str) -> Vec<SearchResult>;
}

#[derive(Debug, Deserialize)]
struct SearchApiResponse {
    #[serde(default)]
    results: Vec<SearchApiResult>,
    #[serde(default)]
    #[allow(dead_code)]
    answers: Vec<String>,
    #[serde(default)]
    #[allow(dead_code)]
    suggestions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchApiResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default, rename = "publishedDate")]
    published_date: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

pub struct HttpSearchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSearchClient {
    pub fn new(http: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn search_web_fallible(&self, query: &str) -> Result<Vec<SearchResult>> {
        let mut req = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("limit", &DEFAULT_RESULT_CAP.to_string())]);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = tokio::time::timeout(SEARCH_TIMEOUT, req.send())
            .await
            .context("search request timed out")?
            .context("search request transport error")?;

        if !resp.status().is_success() {
            anyhow::bail!("search endpoint returned {}", resp.status());
        }

        let parsed: SearchApiResponse = resp.json().await.context("search response not JSON")?;

        Ok(parsed
            .results
            .into_iter()
            .take(DEFAULT_RESULT_CAP)
            .map(|r| SearchResult {
                url: r.url,
                title: r.title,
                snippet: r.content,
                published_date: r.published_date,
                source: None,
                relevance: r.score,
            })
            .collect())
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search_web(&self, query: &str) -> Vec<SearchResult> {
        match self.search_web_fallible(query).await {
            Ok(results) => results,
            Err(e) => {
                warn!("search_web('{}') failed: {}", query, e);
                Vec::new()
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// URL normalization & curation (spec.md §3, §4.9)
// ─────────────────────────────────────────────────────────────────────────────

/// Normalize a URL to its dedup key: lowercase host+path, strip trailing
/// slash and UTM params. Idempotent by construction (spec.md §8).
pub fn normalize_url(raw: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw) else {
        return raw.trim().trim_end_matches('/').to_ascii_lowercase();
    };

    // Strip UTM and other common tracking params, stable order.
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.to_ascii_lowercase().starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        let qs = kept
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&qs));
    }

    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    let path = url.path().trim_end_matches('/').to_ascii_lowercase();
    let query = url.query().unwrap_or("");

    if query.is_empty() {
        format!("{host}{path}")
    } else {
        format!("{host}{path}?{query}")
    }
}

/// Dedup by normalized URL (preserving first-seen order) and cap to `limit`,
/// preserving ranking (spec.md §4.9 step 2).
pub fn curate(results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(limit.min(results.len()));
    for r in results {
        let key = normalize_url(&r.url);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        out.push(r);
        if out.len() >= limit {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_trailing_slash_and_lowercases_host() {
        assert_eq!(
            normalize_url("https://Example.COM/Path/"),
            normalize_url("https://example.com/Path")
        );
    }

    #[test]
    fn normalize_strips_utm_params() {
        let a = normalize_url("https://example.com/a?utm_source=x&ref=1");
        let b = normalize_url("https://example.com/a?ref=1");
        assert_eq!(a, b);
    }

    #[test]
    fn normalize_is_idempotent() {
        let u = "https://Example.com/Foo/?utm_campaign=y&x=1";
        let once = normalize_url(u);
        let twice = normalize_url(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn curate_dedups_and_caps() {
        let results = vec![
            SearchResult {
                url: "https://a.com/x".into(),
                ..Default::default()
            },
            SearchResult {
                url: "https://a.com/x/".into(),
                ..Default::default()
            },
            SearchResult {
                url: "https://b.com/y".into(),
                ..Default::default()
            },
        ];
        let curated = curate(results, 1);
        assert_eq!(curated.len(), 1);
        assert_eq!(curated[0].url, "https://a.com/x");
    }
}
