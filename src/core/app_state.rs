use std::sync::Arc;

use super::config::ResearchConfig;
use crate::llm::LlmClient;
use crate::scraper::{HttpScraper, Scraper};
use crate::search::{HttpSearchClient, SearchClient};
use crate::vectorstore::{Embedder, HttpEmbedder};

/// Shared clients handed to every component of a run. Unlike the teacher's
/// `AppState`, this holds no run-scoped mutable state (no caches, no queues) —
/// each research run owns its own `ResearchState` and `VectorStore` instance
/// (spec.md §5: "no globally shared mutable state between concurrent runs").
#[derive(Clone)]
pub struct AppState {
    pub http_client: reqwest::Client,
    pub config: Arc<ResearchConfig>,
    pub search: Arc<dyn SearchClient>,
    pub scraper: Arc<dyn Scraper>,
    pub embedder: Arc<dyn Embedder>,
}

impl AppState {
    pub fn new(http_client: reqwest::Client, config: ResearchConfig) -> Self {
        let config = Arc::new(config);
        let search: Arc<dyn SearchClient> = Arc::new(HttpSearchClient::new(
            http_client.clone(),
            config.search_base_url.clone(),
            config.search_api_key.clone(),
        ));
        let scraper: Arc<dyn Scraper> = Arc::new(HttpScraper::new(
            http_client.clone(),
            config.scrape_base_url.clone(),
            config.convert_base_url.clone(),
            config.concurrency_limit,
            config.extract_top_k_chunks,
        ));
        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            http_client.clone(),
            config.embedding_base_url.clone(),
        ));

        Self {
            http_client,
            config,
            search,
            scraper,
            embedder,
        }
    }

    /// Build a fresh LLM client for a run. Cheap: it only wraps the shared
    /// `reqwest::Client` and the resolved base URL/key.
    pub fn llm_client(&self) -> LlmClient {
        LlmClient::new(self.http_client.clone(), &self.config)
    }
}
