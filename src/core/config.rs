use std::time::Duration;

// ---------------------------------------------------------------------------
// ResearchConfig — file-based config loader (meridian-research.json) with
// env-var fallback, following the same resolution order the rest of this
// crate's ambient stack uses: explicit field -> env var -> hard default.
// ---------------------------------------------------------------------------

/// Which LLM tier a call belongs to (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTier {
    /// Planning, gap analysis, targeted queries, final report.
    Reasoning,
    /// Insight generation.
    Default,
    /// Sanity/verification checks where applicable.
    Light,
}

/// File-based overrides (all optional; every field falls back to an env var
/// and then a hard default via the `resolve_*` methods below).
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ResearchConfigFile {
    pub max_depth: Option<u32>,
    pub max_tokens: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub concurrency_limit: Option<usize>,
    pub extract_top_k_chunks: Option<usize>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub reasoning_model: Option<String>,
    pub default_model: Option<String>,
    pub light_model: Option<String>,
    pub search_base_url: Option<String>,
    pub search_api_key: Option<String>,
    pub scrape_base_url: Option<String>,
    pub convert_base_url: Option<String>,
    pub embedding_base_url: Option<String>,
}

/// Fully-resolved configuration for a single research run (spec.md §6).
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub max_depth: u32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub concurrency_limit: usize,
    pub extract_top_k_chunks: usize,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub reasoning_model: String,
    pub default_model: String,
    pub light_model: String,
    pub search_base_url: String,
    pub search_api_key: Option<String>,
    pub scrape_base_url: String,
    pub convert_base_url: String,
    pub embedding_base_url: String,
}

impl ResearchConfig {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Reasoning => &self.reasoning_model,
            ModelTier::Default => &self.default_model,
            ModelTier::Light => &self.light_model,
        }
    }

    pub fn from_file(file: ResearchConfigFile) -> Self {
        Self {
            max_depth: resolve_u32(file.max_depth, "RESEARCH_MAX_DEPTH", 7),
            max_tokens: resolve_u32(file.max_tokens, "RESEARCH_MAX_TOKENS", 25_000),
            timeout: Duration::from_millis(resolve_u64(
                file.timeout_ms,
                "RESEARCH_TIMEOUT_MS",
                270_000,
            )),
            concurrency_limit: resolve_usize(file.concurrency_limit, "RESEARCH_CONCURRENCY", 3),
            extract_top_k_chunks: resolve_usize(
                file.extract_top_k_chunks,
                "RESEARCH_TOP_K_CHUNKS",
                5,
            ),
            llm_base_url: resolve_string(
                file.llm_base_url,
                "OPENAI_BASE_URL",
                "https://api.openai.com/v1",
            ),
            llm_api_key: file
                .llm_api_key
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .filter(|v| !v.trim().is_empty()),
            reasoning_model: resolve_string(
                file.reasoning_model,
                "RESEARCH_REASONING_MODEL",
                "gpt-4o",
            ),
            default_model: resolve_string(
                file.default_model,
                "RESEARCH_DEFAULT_MODEL",
                "gpt-4o-mini",
            ),
            light_model: resolve_string(file.light_model, "RESEARCH_LIGHT_MODEL", "gpt-4o-mini"),
            search_base_url: resolve_string(
                file.search_base_url,
                "SEARCH_BASE_URL",
                "https://api.search.example.com",
            ),
            search_api_key: file
                .search_api_key
                .or_else(|| std::env::var("SEARCH_API_KEY").ok())
                .filter(|v| !v.trim().is_empty()),
            scrape_base_url: resolve_string(
                file.scrape_base_url,
                "SCRAPE_BASE_URL",
                "https://api.scrape.example.com",
            ),
            convert_base_url: resolve_string(
                file.convert_base_url,
                "CONVERT_BASE_URL",
                "https://api.convert.example.com",
            ),
            embedding_base_url: resolve_string(
                file.embedding_base_url,
                "EMBEDDING_BASE_URL",
                "https://api.embeddings.example.com",
            ),
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self::from_file(ResearchConfigFile::default())
    }
}

fn resolve_string(field: Option<String>, env_key: &str, default: &str) -> String {
    if let Some(v) = field {
        if !v.trim().is_empty() {
            return v;
        }
    }
    std::env::var(env_key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn resolve_u32(field: Option<u32>, env_key: &str, default: u32) -> u32 {
    field
        .or_else(|| std::env::var(env_key).ok().and_then(|v| v.parse().ok()))
        .unwrap_or(default)
}

fn resolve_u64(field: Option<u64>, env_key: &str, default: u64) -> u64 {
    field
        .or_else(|| std::env::var(env_key).ok().and_then(|v| v.parse().ok()))
        .unwrap_or(default)
}

fn resolve_usize(field: Option<usize>, env_key: &str, default: usize) -> usize {
    field
        .or_else(|| std::env::var(env_key).ok().and_then(|v| v.parse().ok()))
        .unwrap_or(default)
}

/// Load `meridian-research.json` from standard locations.
///
/// Search order (first found wins): `./meridian-research.json`,
/// `MERIDIAN_RESEARCH_CONFIG` env var path. Missing file or parse error falls
/// back to `ResearchConfig::default()` (all env-var fallbacks still apply).
pub fn load_research_config() -> ResearchConfig {
    let mut candidates = vec![std::path::PathBuf::from("meridian-research.json")];
    if let Ok(env_path) = std::env::var("MERIDIAN_RESEARCH_CONFIG") {
        candidates.insert(0, std::path::PathBuf::from(env_path));
    }

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<ResearchConfigFile>(&contents) {
                Ok(file) => {
                    tracing::info!("meridian-research.json loaded from {}", path.display());
                    return ResearchConfig::from_file(file);
                }
                Err(e) => {
                    tracing::warn!(
                        "meridian-research.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return ResearchConfig::default();
                }
            },
            Err(_) => continue,
        }
    }

    ResearchConfig::default()
}
