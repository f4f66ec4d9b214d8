/// Typed error kinds crossing module boundaries (spec.md §7). Internal glue
/// still uses `anyhow::Result`; this is the shape callers are expected to
/// match on.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("planning failed: {0}")]
    Planning(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("scrape failed: {0}")]
    Scrape(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("insight generation failed: {0}")]
    Insight(String),
    #[error("gap analysis failed: {0}")]
    GapAnalysis(String),
    #[error("report generation failed: {0}")]
    Report(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("run timed out")]
    Timeout,
    #[error("unrecoverable failure: {0}")]
    Unrecoverable(String),
}
