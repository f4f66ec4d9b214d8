//! Vector Store Manager (spec.md §4.5) — chunks text, embeds chunks via a
//! batch HTTP call, and serves top-k cosine-similarity retrieval over an
//! in-memory index. Chunking generalizes the teacher's
//! `nlp/semantic_shave.rs::chunk_text` (word-window + stride) from a
//! word-count budget to the spec's character budget, keeping the same
//! window/stride shape; `cosine_similarity` is reused verbatim since it is
//! already vector-agnostic over `&[f32]`.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::types::{ChunkMetadata, Embedding, ScoredChunk, TextChunk, VectorRecord};

const CHUNK_SIZE_CHARS: usize = 1000;
const CHUNK_OVERLAP_CHARS: usize = 200;
const MIN_CHUNK_LEN: usize = 10;

/// Cosine similarity between two equal-length vectors. Returns 0.0 for
/// mismatched lengths or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

/// Split `text` into paragraph-aware chunks of roughly `CHUNK_SIZE_CHARS`
/// with `CHUNK_OVERLAP_CHARS` overlap (spec.md §4.5). Paragraphs are packed
/// greedily; a paragraph longer than the budget is hard-split. Chunks below
/// `MIN_CHUNK_LEN` trimmed length are dropped.
pub fn chunk_text(text: &str, url: &str, title: Option<&str>) -> Vec<TextChunk> {
    let trimmed = text.trim();
    if trimmed.len() < CHUNK_SIZE_CHARS {
        if trimmed.len() < MIN_CHUNK_LEN {
            return Vec::new();
        }
        return vec![TextChunk {
            text: trimmed.to_string(),
            metadata: ChunkMetadata {
                url: url.to_string(),
                title: title.map(str::to_string),
                position: 0,
            },
        }];
    }

    let paragraphs: Vec<&str> = trimmed
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut raw_chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in paragraphs {
        if para.len() > CHUNK_SIZE_CHARS {
            if !current.is_empty() {
                raw_chunks.push(std::mem::take(&mut current));
            }
            raw_chunks.extend(hard_split(para));
            continue;
        }

        if !current.is_empty() && current.len() + 2 + para.len() > CHUNK_SIZE_CHARS {
            raw_chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(para);
    }
    if !current.is_empty() {
        raw_chunks.push(current);
    }

    // Apply overlap by prefixing each chunk (after the first) with the tail
    // of the previous one.
    let mut chunks = Vec::with_capacity(raw_chunks.len());
    let mut position = 0usize;
    for (i, chunk) in raw_chunks.iter().enumerate() {
        let text = if i == 0 {
            chunk.clone()
        } else {
            let prev = &raw_chunks[i - 1];
            let mut tail_start = prev.len().saturating_sub(CHUNK_OVERLAP_CHARS);
            while tail_start < prev.len() && !prev.is_char_boundary(tail_start) {
                tail_start += 1;
            }
            format!("{}{}", &prev[tail_start..], chunk)
        };
        let trimmed_len = text.trim().len();
        if trimmed_len < MIN_CHUNK_LEN {
            continue;
        }
        chunks.push(TextChunk {
            text,
            metadata: ChunkMetadata {
                url: url.to_string(),
                title: title.map(str::to_string),
                position,
            },
        });
        position += 1;
    }
    chunks
}

/// Splits a paragraph into pieces of roughly `CHUNK_SIZE_CHARS` bytes,
/// always breaking on a char boundary so multi-byte codepoints (curly
/// quotes, em-dashes, accented names) are never corrupted or panic the
/// slicer.
fn hard_split(paragraph: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0usize;
    while start < paragraph.len() {
        let mut end = (start + CHUNK_SIZE_CHARS).min(paragraph.len());
        while end < paragraph.len() && !paragraph.is_char_boundary(end) {
            end += 1;
        }
        pieces.push(paragraph[start..end].to_string());
        start = end;
    }
    pieces
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedder
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. Empty/whitespace-only texts must already be
    /// filtered by the caller (spec.md §4.5). Errors surface to the caller
    /// (spec.md §4.5: "an embedding-service error surfaces as an exception").
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Embedding>>;
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct HttpEmbedder {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEmbedder {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self
            .http
            .post(format!("{}/embed", self.base_url))
            .json(&EmbedRequest { texts })
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("embedding endpoint returned {}", resp.status());
        }

        let parsed: EmbedResponse = resp.json().await?;
        if parsed.embeddings.len() != texts.len() {
            anyhow::bail!(
                "embedding endpoint returned {} embeddings for {} texts",
                parsed.embeddings.len(),
                texts.len()
            );
        }
        Ok(parsed.embeddings)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vector store
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory vector index, exclusively owned by the orchestrator for a run's
/// duration (spec.md §3). Not `Send`-shared across runs — each run builds a
/// fresh `VectorStore` and `clear()`s it before use.
#[derive(Default)]
pub struct VectorStore {
    records: Vec<VectorRecord>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Chunk, embed and index a single document. Filters empty/whitespace
    /// chunks before the embed request (spec.md §4.5). On embedding failure
    /// the batch is dropped and the error propagated; the caller decides
    /// whether to log-and-skip.
    pub async fn add_document(
        &mut self,
        embedder: &dyn Embedder,
        url: &str,
        text: &str,
        title: Option<&str>,
    ) -> anyhow::Result<usize> {
        let chunks = chunk_text(text, url, title);
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;

        if embeddings.len() != chunks.len() {
            warn!(
                "embedding count mismatch for {url}: requested {} got {}; dropping batch",
                chunks.len(),
                embeddings.len()
            );
            anyhow::bail!("embedding count mismatch");
        }

        let added = chunks.len();
        for (chunk, values) in chunks.into_iter().zip(embeddings.into_iter()) {
            let id = format!("{}-{}", chunk.metadata.url, chunk.metadata.position);
            self.records.push(VectorRecord {
                id,
                values,
                metadata: chunk.metadata,
                text: chunk.text,
            });
        }
        Ok(added)
    }

    /// Top-k cosine-similarity search against `query_embedding`.
    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .records
            .iter()
            .map(|r| ScoredChunk {
                record_id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                score: cosine_similarity(query_embedding, &r.values),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}
