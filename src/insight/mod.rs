//! Insight Generator (spec.md §4.6) — retrieves relevant chunks for a
//! question, asks the LLM for cited learnings and follow-up questions, then
//! clusters and synthesizes near-duplicate learnings. Clustering reuses
//! `vectorstore::cosine_similarity` plus a greedy single-linkage grouping
//! pass written in the teacher's plain-iterator style (compare
//! `tools/search/mod.rs`'s accumulate-into-a-`Vec` dedup idiom).
use serde::Deserialize;
use tracing::warn;

use crate::core::config::{ModelTier, ResearchConfig};
use crate::core::types::Learning;
use crate::llm::{extract_json, LlmClient};
use crate::vectorstore::{cosine_similarity, Embedder, VectorStore};

const TOP_K_CHUNKS: usize = 10;
const CLUSTER_THRESHOLD: f32 = 0.85;

const SYSTEM_PROMPT: &str = "You are a research analyst. Given a set of source excerpts \
and a specific question, extract cited learnings that answer the question. Respond with a \
single JSON object: {\"answer\": string, \"learnings\": [{\"text\": string, \"source\": \
string}], \"analysis\": string, \"followUpQuestions\": [string]}. Every learning's \"source\" \
must be one of the URLs given in the excerpts, or omitted if the learning is a synthesis \
across several sources. Each follow-up question must end in a question mark.";

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct InsightResponse {
    #[serde(default)]
    #[allow(dead_code)]
    answer: String,
    #[serde(default)]
    learnings: Vec<LearningResponse>,
    #[serde(default)]
    #[allow(dead_code)]
    analysis: String,
    #[serde(default)]
    follow_up_questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LearningResponse {
    text: String,
    #[serde(default)]
    source: Option<String>,
}

pub struct InsightResult {
    pub learnings: Vec<Learning>,
    pub follow_up_questions: Vec<String>,
}

/// Run the insight pipeline for `question` within the broader `original_query`.
pub async fn generate_insights(
    llm: &LlmClient,
    config: &ResearchConfig,
    embedder: &dyn Embedder,
    store: &VectorStore,
    original_query: &str,
    question: &str,
) -> InsightResult {
    let chunks = match embedder.embed_batch(&[question.to_string()]).await {
        Ok(mut v) if !v.is_empty() => v.remove(0),
        Ok(_) => {
            warn!("embedder returned no vector for question '{question}'");
            return InsightResult {
                learnings: Vec::new(),
                follow_up_questions: Vec::new(),
            };
        }
        Err(e) => {
            warn!("failed to embed question '{question}': {e}");
            return InsightResult {
                learnings: Vec::new(),
                follow_up_questions: Vec::new(),
            };
        }
    };

    let retrieved = store.search(&chunks, TOP_K_CHUNKS);
    if retrieved.is_empty() {
        return InsightResult {
            learnings: Vec::new(),
            follow_up_questions: Vec::new(),
        };
    }

    let user_prompt = build_prompt(original_query, question, &retrieved);

    let raw_response = llm
        .complete(config.model_for(ModelTier::Default), SYSTEM_PROMPT, &user_prompt)
        .await;

    let parsed = match raw_response {
        Ok(text) => parse_insight_response(&text),
        Err(e) => {
            warn!("insight LLM call failed for '{question}': {e}");
            InsightResponse::default()
        }
    };

    let learnings: Vec<Learning> = parsed
        .learnings
        .into_iter()
        .filter(|l| !l.text.trim().is_empty())
        .map(|l| Learning {
            text: l.text,
            source: l.source,
            title: None,
        })
        .collect();

    let follow_up_questions = parsed
        .follow_up_questions
        .into_iter()
        .map(|q| if q.trim().ends_with('?') { q } else { format!("{q}?") })
        .collect();

    let synthesized = synthesize_learnings_with_embedder(llm, config, embedder, learnings).await;

    InsightResult {
        learnings: synthesized,
        follow_up_questions,
    }
}

fn build_prompt(
    original_query: &str,
    question: &str,
    chunks: &[crate::core::types::ScoredChunk],
) -> String {
    let mut prompt = format!(
        "Overall research query: {original_query}\nSpecific question to answer: {question}\n\nSource excerpts:\n"
    );
    for (i, c) in chunks.iter().enumerate() {
        let title = c.metadata.title.clone().unwrap_or_else(|| "untitled".to_string());
        prompt.push_str(&format!(
            "[{}] {} ({})\n{}\n\n",
            i + 1,
            title,
            c.metadata.url,
            c.text
        ));
    }
    prompt.push_str(
        "Respond with the JSON object described in the system prompt. Cite the source URL \
for each learning when it comes from a single excerpt.",
    );
    prompt
}

/// Parse the LLM's JSON response, falling back to heuristic section
/// extraction on failure (spec.md §4.6 step 3).
fn parse_insight_response(text: &str) -> InsightResponse {
    match extract_json(text).and_then(|v| serde_json::from_value(v).map_err(|e| anyhow::anyhow!(e))) {
        Ok(parsed) => parsed,
        Err(_) => heuristic_extract(text),
    }
}

/// Best-effort extraction when JSON parsing fails entirely: look for
/// "Learnings:"/"Follow-up" section markers and take one bullet per line.
fn heuristic_extract(text: &str) -> InsightResponse {
    let mut learnings = Vec::new();
    let mut follow_up_questions = Vec::new();
    let mut section = "";

    for line in text.lines() {
        let lower = line.to_ascii_lowercase();
        if lower.contains("learning") && line.trim_end().ends_with(':') {
            section = "learnings";
            continue;
        }
        if lower.contains("follow-up") || lower.contains("followup") {
            section = "followups";
            continue;
        }
        let item = line.trim().trim_start_matches(['-', '*', '•']).trim();
        if item.is_empty() {
            continue;
        }
        match section {
            "learnings" => learnings.push(LearningResponse {
                text: item.to_string(),
                source: None,
            }),
            "followups" => follow_up_questions.push(item.to_string()),
            _ => {}
        }
    }

    InsightResponse {
        answer: String::new(),
        learnings,
        analysis: String::new(),
        follow_up_questions,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesis: greedy single-linkage clustering + LLM consolidation
// ─────────────────────────────────────────────────────────────────────────────

/// Cluster near-duplicate learnings by embedding cosine similarity and
/// consolidate each multi-member cluster into one learning via a single LLM
/// call per cluster (spec.md §4.6 step 4). Falls back to exact-text
/// deduplication if embedding the learnings themselves fails.
pub async fn synthesize_learnings_with_embedder(
    llm: &LlmClient,
    config: &ResearchConfig,
    embedder: &dyn Embedder,
    learnings: Vec<Learning>,
) -> Vec<Learning> {
    if learnings.len() < 2 {
        return learnings;
    }

    let texts: Vec<String> = learnings.iter().map(|l| l.text.clone()).collect();
    let embeddings = match embedder.embed_batch(&texts).await {
        Ok(e) if e.len() == texts.len() => e,
        _ => {
            warn!("embedding learnings for synthesis failed; falling back to lexical clustering");
            let clusters = cluster_by_lexical_similarity(&texts);
            return consolidate_clusters(llm, config, learnings, clusters).await;
        }
    };

    let clusters = cluster_by_embedding_similarity(&embeddings);
    consolidate_clusters(llm, config, learnings, clusters).await
}

/// Greedy single-linkage clustering over embeddings: each unassigned item
/// starts a new cluster and pulls in every remaining item whose similarity
/// to it exceeds `CLUSTER_THRESHOLD` (spec.md §4.6, §9: "deterministic
/// greedy threshold single-linkage pass").
fn cluster_by_embedding_similarity(embeddings: &[Vec<f32>]) -> Vec<Vec<usize>> {
    let n = embeddings.len();
    let mut assigned = vec![false; n];
    let mut clusters = Vec::new();

    for i in 0..n {
        if assigned[i] {
            continue;
        }
        let mut cluster = vec![i];
        assigned[i] = true;
        for j in (i + 1)..n {
            if assigned[j] {
                continue;
            }
            if cosine_similarity(&embeddings[i], &embeddings[j]) >= CLUSTER_THRESHOLD {
                cluster.push(j);
                assigned[j] = true;
            }
        }
        clusters.push(cluster);
    }
    clusters
}

/// Fallback clustering for when no embedder is available: exact-text
/// equality only (a conservative stand-in — it never merges genuinely
/// distinct learnings, it only dedupes verbatim repeats).
fn cluster_by_lexical_similarity(texts: &[String]) -> Vec<Vec<usize>> {
    let mut assigned = vec![false; texts.len()];
    let mut clusters = Vec::new();
    for i in 0..texts.len() {
        if assigned[i] {
            continue;
        }
        let mut cluster = vec![i];
        assigned[i] = true;
        for j in (i + 1)..texts.len() {
            if !assigned[j] && texts[j].trim() == texts[i].trim() {
                cluster.push(j);
                assigned[j] = true;
            }
        }
        clusters.push(cluster);
    }
    clusters
}

#[derive(Debug, Deserialize)]
struct ConsolidationResponse {
    text: String,
}

const CONSOLIDATE_SYSTEM_PROMPT: &str = "You merge several near-duplicate research learnings \
into one consolidated learning that preserves every distinct fact. Respond with a single JSON \
object: {\"text\": string}.";

async fn consolidate_clusters(
    llm: &LlmClient,
    config: &ResearchConfig,
    learnings: Vec<Learning>,
    clusters: Vec<Vec<usize>>,
) -> Vec<Learning> {
    let mut out = Vec::with_capacity(clusters.len());
    for cluster in clusters {
        if cluster.len() == 1 {
            out.push(learnings[cluster[0]].clone());
            continue;
        }

        let representative_source = cluster.iter().find_map(|&i| learnings[i].source.clone());
        let members: Vec<&Learning> = cluster.iter().map(|&i| &learnings[i]).collect();
        let prompt = format!(
            "Learnings to merge:\n{}",
            members
                .iter()
                .enumerate()
                .map(|(i, l)| format!("{}. {}", i + 1, l.text))
                .collect::<Vec<_>>()
                .join("\n")
        );

        let consolidated_text = match llm
            .complete(
                config.model_for(ModelTier::Default),
                CONSOLIDATE_SYSTEM_PROMPT,
                &prompt,
            )
            .await
        {
            Ok(raw) => extract_json(&raw)
                .and_then(|v| serde_json::from_value::<ConsolidationResponse>(v).map_err(|e| anyhow::anyhow!(e)))
                .map(|r| r.text)
                .unwrap_or_else(|_| members[0].text.clone()),
            Err(e) => {
                warn!("consolidation LLM call failed: {e}; keeping first member verbatim");
                members[0].text.clone()
            }
        };

        out.push(Learning {
            text: consolidated_text,
            source: representative_source,
            title: members[0].title.clone(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_extract_pulls_bullets_from_sections() {
        let text = "Learnings:\n- Raft elects a leader via randomized timeouts\n- Paxos has no leader by default\n\nFollow-up questions:\n- How does Raft handle network partitions?";
        let parsed = heuristic_extract(text);
        assert_eq!(parsed.learnings.len(), 2);
        assert_eq!(parsed.follow_up_questions.len(), 1);
        assert!(parsed.follow_up_questions[0].ends_with('?'));
    }

    #[test]
    fn lexical_clustering_groups_exact_duplicates() {
        let texts = vec![
            "Raft uses leader election.".to_string(),
            "Raft uses leader election.".to_string(),
            "Paxos has no single leader.".to_string(),
        ];
        let clusters = cluster_by_lexical_similarity(&texts);
        assert_eq!(clusters.len(), 2);
    }

    #[test]
    fn embedding_clustering_groups_similar_vectors() {
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.99, 0.01],
            vec![0.0, 1.0],
        ];
        let clusters = cluster_by_embedding_similarity(&embeddings);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 2);
    }
}
