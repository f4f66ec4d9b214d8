//! Planner (spec.md §4.2) — translates the user query into a `ReportPlan`
//! via a single structured-output LLM call, preceded by a best-effort
//! exploratory search for preliminary context. Grounded on the teacher's
//! `tools/deep_research.rs`, which performs the analogous "gather context
//! before the main pipeline" step (there, query rewriting; here, a
//! preliminary search) and swallows its own failures rather than aborting.
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::config::{ModelTier, ResearchConfig};
use crate::core::types::{ReportPlan, ReportSection};
use crate::llm::LlmClient;
use crate::progress::ProgressUpdater;
use crate::search::SearchClient;

const SYSTEM_PROMPT: &str = "You are a research planning assistant. Given a research \
query, produce a structured report outline of 3 to 5 sections. Each section must have \
a concise title and a specific key question that, if answered, would cover that \
section. Respond with a single JSON object matching this schema exactly: \
{\"report_title\": string, \"report_outline\": [{\"title\": string, \"key_question\": \
string}, ...]}. Do not include any prose outside the JSON object.";

/// User-supplied planning hints (spec.md §4.2 step 2).
#[derive(Debug, Clone, Default)]
pub struct PlanningHints {
    pub objectives: Vec<String>,
    pub deliverables: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlanResponse {
    report_title: String,
    report_outline: Vec<PlanSectionResponse>,
}

#[derive(Debug, Deserialize, Serialize)]
struct PlanSectionResponse {
    title: String,
    key_question: String,
}

/// Produce a `ReportPlan` for `query`, falling back to a single-section plan
/// on any failure (spec.md §4.2 step 4).
pub async fn plan_report(
    llm: &LlmClient,
    config: &ResearchConfig,
    search: &dyn SearchClient,
    progress: &ProgressUpdater,
    query: &str,
    hints: &PlanningHints,
) -> ReportPlan {
    let preliminary_context = gather_preliminary_context(search, query).await;

    let user_prompt = build_user_prompt(query, hints, &preliminary_context);

    let response = llm
        .complete_structured::<PlanResponse>(ModelTier::Reasoning, config, SYSTEM_PROMPT, &user_prompt)
        .await;

    match response {
        Ok(parsed) if !parsed.report_outline.is_empty() => {
            progress
                .add_log_entry(
                    crate::core::types::LogEntryType::Plan,
                    crate::core::types::LogStatus::Complete,
                    format!(
                        "planned {} sections: {}",
                        parsed.report_outline.len(),
                        parsed.report_title
                    ),
                    None,
                )
                .await;
            ReportPlan {
                report_title: parsed.report_title,
                report_outline: parsed
                    .report_outline
                    .into_iter()
                    .map(|s| ReportSection {
                        title: s.title,
                        key_question: s.key_question,
                    })
                    .collect(),
            }
        }
        Ok(_) => {
            warn!("planner returned an empty outline; using fallback plan");
            fallback(progress, query, "empty outline").await
        }
        Err(e) => {
            warn!("planner LLM call failed: {e}; using fallback plan");
            fallback(progress, query, &e.to_string()).await
        }
    }
}

async fn fallback(progress: &ProgressUpdater, query: &str, reason: &str) -> ReportPlan {
    progress
        .add_log_entry(
            crate::core::types::LogEntryType::Plan,
            crate::core::types::LogStatus::Warning,
            format!("planning fallback: {reason}"),
            None,
        )
        .await;
    ReportPlan::fallback(query)
}

/// Best-effort exploratory search (spec.md §4.2 step 1): up to 3 short
/// snippets, never fails the run.
async fn gather_preliminary_context(search: &dyn SearchClient, query: &str) -> Vec<String> {
    let results = search.search_web(query).await;
    results
        .into_iter()
        .take(3)
        .filter(|r| !r.snippet.trim().is_empty())
        .map(|r| format!("- {}: {}", r.title, r.snippet))
        .collect()
}

fn build_user_prompt(query: &str, hints: &PlanningHints, context: &[String]) -> String {
    let mut prompt = format!("Research query: {query}\n");

    if !hints.objectives.is_empty() {
        prompt.push_str(&format!("Objectives:\n{}\n", hints.objectives.join("\n- ")));
    }
    if !hints.deliverables.is_empty() {
        prompt.push_str(&format!(
            "Deliverables:\n{}\n",
            hints.deliverables.join("\n- ")
        ));
    }
    if !context.is_empty() {
        prompt.push_str("Preliminary context from a quick web search:\n");
        prompt.push_str(&context.join("\n"));
        prompt.push('\n');
    }

    prompt.push_str(
        "Produce the report_title and report_outline (3 to 5 sections) as the JSON schema describes.",
    );
    prompt
}
