//! Scraper (spec.md §4.4) — fetches and extracts readable text per URL,
//! detects document type, and routes to the appropriate external endpoint.
//! Concurrency is grounded on the teacher's `batch_scrape.rs`
//! (`stream::iter(...).buffer_unordered(n)`); per-URL timeouts are grounded on
//! `tools/search/mod.rs`'s `tokio::time::timeout` wrapping pattern; URL-type
//! detection reuses the host/path matching idiom from
//! `scraping/rust_scraper/mod.rs::is_tutorial_url`.
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::warn;
use url::Url;

use crate::core::types::ScrapeResult;

const DEFAULT_URL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UrlType {
    Web,
    Pdf,
    Docx,
}

/// Detect the document type from extension/path heuristics (spec.md §4.4:
/// "unknown types default to `web`").
fn detect_url_type(raw: &str) -> UrlType {
    let Ok(url) = Url::parse(raw) else {
        return UrlType::Web;
    };
    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".pdf") {
        UrlType::Pdf
    } else if path.ends_with(".docx") || path.ends_with(".doc") {
        UrlType::Docx
    } else {
        UrlType::Web
    }
}

#[async_trait]
pub trait Scraper: Send + Sync {
    /// Scrape every URL in `urls`, ranking chunks against `query` for
    /// relevance. Never fails for an individual URL — failures are
    /// surfaced as `ScrapeResult { success: false, .. }` records (spec.md
    /// §4.4: "the scraper never throws for a single-URL failure").
    async fn scrape_many(&self, urls: &[String], query: &str) -> Vec<ScrapeResult>;
}

#[derive(Debug, Deserialize, Default)]
struct ConvertResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct WebScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

pub struct HttpScraper {
    http: reqwest::Client,
    scrape_base_url: String,
    convert_base_url: String,
    concurrency_limit: usize,
    url_timeout: Duration,
    extract_top_k_chunks: usize,
}

impl HttpScraper {
    pub fn new(
        http: reqwest::Client,
        scrape_base_url: String,
        convert_base_url: String,
        concurrency_limit: usize,
        extract_top_k_chunks: usize,
    ) -> Self {
        Self {
            http,
            scrape_base_url: scrape_base_url.trim_end_matches('/').to_string(),
            convert_base_url: convert_base_url.trim_end_matches('/').to_string(),
            concurrency_limit: concurrency_limit.max(1),
            url_timeout: DEFAULT_URL_TIMEOUT,
            extract_top_k_chunks,
        }
    }

    async fn scrape_one(&self, url: &str, query: &str) -> ScrapeResult {
        let fetch = async {
            match detect_url_type(url) {
                UrlType::Web => self.scrape_web(url).await,
                UrlType::Pdf | UrlType::Docx => self.scrape_via_convert(url).await,
            }
        };

        match tokio::time::timeout(self.url_timeout, fetch).await {
            Ok(Ok((title, content))) => {
                let relevant_chunks = rank_relevant_chunks(&content, query, self.extract_top_k_chunks);
                ScrapeResult {
                    url: url.to_string(),
                    success: true,
                    title,
                    published_date: None,
                    processed_content: content,
                    relevant_chunks,
                    error: None,
                }
            }
            Ok(Err(e)) => {
                warn!("scrape failed for {url}: {e}");
                ScrapeResult::failed(url, e.to_string())
            }
            Err(_) => {
                warn!("scrape timed out for {url}");
                ScrapeResult::failed(url, "timeout")
            }
        }
    }

    async fn scrape_web(&self, url: &str) -> anyhow::Result<(Option<String>, String)> {
        let resp = self
            .http
            .get(format!("{}/scrape", self.scrape_base_url))
            .query(&[("url", url)])
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("scrape endpoint returned {}", resp.status());
        }
        let parsed: WebScrapeResponse = resp.json().await?;
        if !parsed.success {
            anyhow::bail!("scrape endpoint reported failure for {url}");
        }
        let content = parsed.markdown.or(parsed.text).unwrap_or_default();
        Ok((parsed.title, content))
    }

    async fn scrape_via_convert(&self, url: &str) -> anyhow::Result<(Option<String>, String)> {
        let resp = self
            .http
            .get(format!("{}/convert", self.convert_base_url))
            .query(&[("url", url)])
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("convert endpoint returned {}", resp.status());
        }
        let parsed: ConvertResponse = resp.json().await?;
        Ok((parsed.title, parsed.text))
    }
}

#[async_trait]
impl Scraper for HttpScraper {
    async fn scrape_many(&self, urls: &[String], query: &str) -> Vec<ScrapeResult> {
        // Bounded by a semaphore per spec.md §4.4 rather than relying solely
        // on `buffer_unordered`'s own cap, so the limit is explicit and
        // independent of stream adapter internals.
        let semaphore = std::sync::Arc::new(Semaphore::new(self.concurrency_limit));

        stream::iter(urls.to_vec())
            .map(|url| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                    self.scrape_one(&url, query).await
                }
            })
            .buffer_unordered(urls.len().max(1))
            .collect()
            .await
    }
}

/// Rank the most query-relevant chunks of `content` by naive lexical overlap
/// (spec.md §4.4: "optionally ranking the most query-relevant chunks via a
/// document-conversion/ranking endpoint" — implemented in-process here since
/// this spec's scrape endpoint does not itself return ranked chunks).
fn rank_relevant_chunks(content: &str, query: &str, top_k: usize) -> Vec<String> {
    if content.trim().is_empty() || top_k == 0 {
        return Vec::new();
    }

    let query_terms: Vec<String> = query
        .to_ascii_lowercase()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect();
    if query_terms.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &str)> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| p.len() >= 10)
        .map(|p| {
            let lower = p.to_ascii_lowercase();
            let score = query_terms.iter().filter(|t| lower.contains(t.as_str())).count();
            (score, p)
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .filter(|(score, _)| *score > 0)
        .take(top_k)
        .map(|(_, p)| p.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pdf_by_extension() {
        assert_eq!(detect_url_type("https://example.com/paper.pdf"), UrlType::Pdf);
    }

    #[test]
    fn detects_docx_by_extension() {
        assert_eq!(detect_url_type("https://example.com/report.docx"), UrlType::Docx);
    }

    #[test]
    fn unknown_defaults_to_web() {
        assert_eq!(detect_url_type("https://example.com/article"), UrlType::Web);
        assert_eq!(detect_url_type("not a url at all"), UrlType::Web);
    }

    #[test]
    fn ranks_chunks_containing_query_terms() {
        let content = "Irrelevant opener paragraph here.\n\nRaft is a consensus protocol.\n\nAnother unrelated paragraph.";
        let chunks = rank_relevant_chunks(content, "raft consensus", 5);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("Raft"));
    }

    #[test]
    fn empty_content_yields_no_chunks() {
        assert!(rank_relevant_chunks("", "query", 5).is_empty());
    }
}
