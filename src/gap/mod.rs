//! Gap Analyzer (spec.md §4.7) — decides whether a key question is answered
//! by the latest learnings and, if not, proposes ranked gaps and targeted
//! follow-up queries. Same fallback-on-parse-failure shape as the Planner.
use serde::Deserialize;
use tracing::warn;

use crate::core::config::{ModelTier, ResearchConfig};
use crate::core::types::{Gap, GapAnalysisResult, GapSeverity, Learning};
use crate::llm::{extract_json, LlmClient};

const GAP_SYSTEM_PROMPT: &str = "You are a research completeness reviewer. Given a key \
question and the learnings gathered so far, decide whether the question is sufficiently \
answered. Respond with a single JSON object: {\"is_complete\": bool, \"remaining_gaps\": \
[{\"text\": string, \"severity\": 1|2|3, \"confidence\": number between 0 and 1}]} with at \
most 3 gaps, ordered most severe first. severity 3 is critical, 1 is minor.";

const QUERY_SYSTEM_PROMPT: &str = "You write short, targeted web search queries. Given a \
specific knowledge gap within a broader research question, produce 1 to 2 search queries \
of 3 to 7 words each that would find information to close that gap. You may suggest a \
site: filter if an authoritative source is likely. Respond with a single JSON array of \
strings, nothing else.";

#[derive(Debug, Deserialize)]
struct GapResponse {
    is_complete: bool,
    #[serde(default)]
    remaining_gaps: Vec<GapResponseItem>,
}

#[derive(Debug, Deserialize)]
struct GapResponseItem {
    text: String,
    severity: u8,
    confidence: f64,
}

/// Decide completeness for `key_question` given only the latest iteration's
/// learnings (spec.md §4.7).
pub async fn analyze_knowledge_gaps(
    llm: &LlmClient,
    config: &ResearchConfig,
    key_question: &str,
    latest_learnings: &[Learning],
) -> GapAnalysisResult {
    if latest_learnings.is_empty() {
        return GapAnalysisResult::needs_initial_information();
    }

    let user_prompt = format!(
        "Key question: {key_question}\n\nLearnings gathered this round:\n{}",
        latest_learnings
            .iter()
            .enumerate()
            .map(|(i, l)| format!("{}. {}", i + 1, l.text))
            .collect::<Vec<_>>()
            .join("\n")
    );

    let response = llm
        .complete(
            config.model_for(ModelTier::Reasoning),
            GAP_SYSTEM_PROMPT,
            &user_prompt,
        )
        .await;

    let parsed = match response {
        Ok(text) => extract_json(&text)
            .and_then(|v| serde_json::from_value::<GapResponse>(v).map_err(|e| anyhow::anyhow!(e))),
        Err(e) => Err(e),
    };

    match parsed {
        Ok(parsed) => {
            let remaining_gaps = parsed
                .remaining_gaps
                .into_iter()
                .take(3)
                .map(|g| Gap {
                    text: g.text,
                    severity: GapSeverity::from_u8(g.severity),
                    confidence: g.confidence.clamp(0.0, 1.0),
                })
                .collect::<Vec<_>>();

            if parsed.is_complete {
                GapAnalysisResult {
                    is_complete: true,
                    remaining_gaps: Vec::new(),
                }
            } else if remaining_gaps.is_empty() {
                GapAnalysisResult::conservative_fallback(key_question)
            } else {
                GapAnalysisResult {
                    is_complete: false,
                    remaining_gaps,
                }
            }
        }
        Err(e) => {
            warn!("gap analysis failed for '{key_question}': {e}; using conservative fallback");
            GapAnalysisResult::conservative_fallback(key_question)
        }
    }
}

/// Generate 1-2 targeted search queries addressing `gap` (spec.md §4.7).
pub async fn generate_targeted_queries(
    llm: &LlmClient,
    config: &ResearchConfig,
    gap: &Gap,
    original_query: &str,
    key_question: &str,
) -> Vec<String> {
    let user_prompt = format!(
        "Overall research query: {original_query}\nKey question: {key_question}\nGap to \
address: {} (severity {}, confidence {:.2})",
        gap.text,
        gap.severity.as_u8(),
        gap.confidence
    );

    let response = llm
        .complete(
            config.model_for(ModelTier::Reasoning),
            QUERY_SYSTEM_PROMPT,
            &user_prompt,
        )
        .await;

    let parsed = match response {
        Ok(text) => extract_json(&text)
            .and_then(|v| serde_json::from_value::<Vec<String>>(v).map_err(|e| anyhow::anyhow!(e))),
        Err(e) => Err(e),
    };

    match parsed {
        Ok(queries) if !queries.is_empty() => queries.into_iter().take(2).collect(),
        _ => {
            warn!("targeted query generation failed for gap '{}'; using first-6-words fallback", gap.text);
            vec![first_n_words(&gap.text, 6)]
        }
    }
}

fn first_n_words(text: &str, n: usize) -> String {
    text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_n_words_truncates() {
        assert_eq!(
            first_n_words("quantitative latency comparisons between raft and paxos under partition", 6),
            "quantitative latency comparisons between raft and"
        );
    }

    #[test]
    fn first_n_words_handles_short_text() {
        assert_eq!(first_n_words("short gap", 6), "short gap");
    }

    #[tokio::test]
    async fn empty_learnings_short_circuits_without_an_llm_call() {
        let config = ResearchConfig::default();
        let llm = LlmClient::new(reqwest::Client::new(), &config);
        let result = analyze_knowledge_gaps(&llm, &config, "what is raft?", &[]).await;
        assert!(!result.is_complete);
        assert_eq!(result.remaining_gaps.len(), 1);
        assert_eq!(result.remaining_gaps[0].text, "Need initial information");
    }
}
