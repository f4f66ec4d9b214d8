use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─────────────────────────────────────────────────────────────────────────────
// Report plan
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    pub key_question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPlan {
    pub report_title: String,
    pub report_outline: Vec<ReportSection>,
}

impl ReportPlan {
    /// The fallback plan used when planning fails outright (spec.md §4.2 step 4).
    pub fn fallback(query: &str) -> Self {
        Self {
            report_title: query.to_string(),
            report_outline: vec![ReportSection {
                title: "Main Research".to_string(),
                key_question: query.to_string(),
            }],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub snippet: String,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub relevance: Option<f64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scrape
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub url: String,
    pub success: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub published_date: Option<String>,
    #[serde(default)]
    pub processed_content: String,
    #[serde(default)]
    pub relevant_chunks: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ScrapeResult {
    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: false,
            title: None,
            published_date: None,
            processed_content: String::new(),
            relevant_chunks: Vec::new(),
            error: Some(error.into()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vector store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

pub type Embedding = Vec<f32>;

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub values: Embedding,
    pub metadata: ChunkMetadata,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub record_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Learnings & gaps
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Learning {
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapSeverity {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl GapSeverity {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => GapSeverity::Low,
            2 => GapSeverity::Medium,
            _ => GapSeverity::High,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gap {
    pub text: String,
    pub severity: GapSeverity,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapAnalysisResult {
    pub is_complete: bool,
    pub remaining_gaps: Vec<Gap>,
}

impl GapAnalysisResult {
    pub fn needs_initial_information() -> Self {
        Self {
            is_complete: false,
            remaining_gaps: vec![Gap {
                text: "Need initial information".to_string(),
                severity: GapSeverity::High,
                confidence: 0.5,
            }],
        }
    }

    pub fn conservative_fallback(key_question: &str) -> Self {
        Self {
            is_complete: false,
            remaining_gaps: vec![Gap {
                text: format!("Re-evaluate findings for {key_question}"),
                severity: GapSeverity::High,
                confidence: 0.5,
            }],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Progress log
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEntryType {
    Plan,
    Search,
    Scrape,
    Vectorize,
    Synthesis,
    Analyze,
    Reasoning,
    Thought,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Complete,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchLogEntry {
    #[serde(rename = "type")]
    pub entry_type: LogEntryType,
    pub status: LogStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub depth: Option<u32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Progress events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressEventType {
    ProgressInit,
    Activity,
    ActivityDelta,
    DepthDelta,
    Warning,
    Error,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub current_depth: u32,
    pub max_depth: u32,
    pub completed_steps: u32,
    pub total_steps: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    pub id: uuid::Uuid,
    pub content: ProgressEventContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressEventContent {
    Init {
        max_depth: u32,
        total_steps: u32,
    },
    Snapshot {
        #[serde(flatten)]
        snapshot: ProgressSnapshot,
        message: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Research state & result
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable run state, exclusively owned by the orchestrator for the duration of
/// a run (spec.md §3).
#[derive(Debug, Clone)]
pub struct ResearchState {
    pub original_query: String,
    pub report_plan: Option<ReportPlan>,
    pub all_sources: HashMap<String, String>,
    pub all_learnings: Vec<Learning>,
    pub research_queue: std::collections::VecDeque<String>,
    pub current_depth: u32,
    pub max_depth: u32,
    pub completed_steps: u32,
    pub total_steps: u32,
    pub should_continue: bool,
}

impl ResearchState {
    pub fn new(original_query: String, max_depth: u32) -> Self {
        Self {
            original_query,
            report_plan: None,
            all_sources: HashMap::new(),
            all_learnings: Vec::new(),
            research_queue: std::collections::VecDeque::new(),
            current_depth: 0,
            max_depth,
            completed_steps: 0,
            total_steps: 0,
            should_continue: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchMetrics {
    pub time_elapsed_ms: u64,
    pub iterations_completed: u32,
    pub sources_examined: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    pub query: String,
    pub insights: Vec<String>,
    pub final_report: String,
    pub sources: HashMap<String, String>,
    pub metrics: ResearchMetrics,
    pub completed_steps: u32,
    pub total_steps: u32,
    pub logs: Vec<ResearchLogEntry>,
}
