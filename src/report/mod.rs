//! Report Generator (spec.md §4.8) — produces the final Markdown report from
//! the plan and accumulated learnings, then post-processes inline `[K]`
//! citations into `[K](URL)` links and appends a References section.
//! Citation rewriting is a small `regex` pass, grounded on the teacher's use
//! of `regex` for text post-processing (compare `core/content_quality.rs`'s
//! regex-based cleanup passes).
use std::collections::BTreeMap;

use chrono::Utc;
use regex::Regex;
use tracing::warn;
use url::Url;

use crate::core::config::{ModelTier, ResearchConfig};
use crate::core::types::{Learning, ReportPlan};
use crate::llm::LlmClient;

const SYSTEM_PROMPT: &str = "You are a research report writer. Write a thorough Markdown \
report of at least 1500 words using the given title and section outline as a skeleton. \
Cite claims inline using [K] where K is the source index given with each learning — use \
ONLY indices that were given to you, never invent a source. Do not include a References or \
Sources section yourself; that is appended separately. Do not wrap your output in a code \
fence.";

/// `index -> url` and the reverse, built from learnings' unique http(s)
/// sources in stable sorted order (spec.md §4.8 step 1).
pub struct SourceIndex {
    pub url_by_index: BTreeMap<u32, String>,
}

impl SourceIndex {
    pub fn build(learnings: &[Learning]) -> Self {
        let mut urls: Vec<String> = learnings
            .iter()
            .filter_map(|l| l.source.clone())
            .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
            .collect();
        urls.sort();
        urls.dedup();

        let url_by_index = urls
            .into_iter()
            .enumerate()
            .map(|(i, u)| (i as u32 + 1, u))
            .collect();

        Self { url_by_index }
    }

    fn index_of(&self, url: &str) -> Option<u32> {
        self.url_by_index
            .iter()
            .find(|(_, u)| u.as_str() == url)
            .map(|(i, _)| *i)
    }
}

/// Generate the final Markdown report, falling back to an emergency report
/// on any LLM failure (spec.md §4.8 failure semantics).
pub async fn generate_report(llm: &LlmClient, config: &ResearchConfig, plan: &ReportPlan, learnings: &[Learning]) -> String {
    let index = SourceIndex::build(learnings);

    let user_prompt = build_prompt(plan, learnings, &index);

    match llm
        .complete(config.model_for(ModelTier::Reasoning), SYSTEM_PROMPT, &user_prompt)
        .await
    {
        Ok(raw) => {
            let cleaned = strip_llm_artifacts(&raw);
            let body = rewrite_citations(&cleaned, &index);
            finalize(plan, body, &index)
        }
        Err(e) => {
            warn!("report generation LLM call failed: {e}; using emergency report");
            emergency_report(plan, learnings, &index)
        }
    }
}

fn build_prompt(plan: &ReportPlan, learnings: &[Learning], index: &SourceIndex) -> String {
    let mut prompt = format!("Report title: {}\n\nSections:\n", plan.report_title);
    for section in &plan.report_outline {
        prompt.push_str(&format!("- {} — key question: {}\n", section.title, section.key_question));
    }

    prompt.push_str("\nLearnings (cite with the given index):\n");
    for learning in learnings {
        let idx = learning
            .source
            .as_deref()
            .and_then(|u| index.index_of(u))
            .map(|i| format!("[{i}]"))
            .unwrap_or_else(|| "[uncited]".to_string());
        prompt.push_str(&format!("- {idx} {}\n", learning.text));
    }

    prompt.push_str(&format!(
        "\nValid citation indices: {}\n",
        index
            .url_by_index
            .keys()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    prompt
}

/// Strip fenced-code-block wrapping and stray "References"/"Sources" labels
/// the LLM may emit despite instructions (spec.md §4.8 step 4).
fn strip_llm_artifacts(text: &str) -> String {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```markdown") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    let s = s.strip_suffix("```").unwrap_or(s).trim();

    // Drop a trailing self-authored References/Sources section if present.
    let lower = s.to_ascii_lowercase();
    for marker in ["\n## references", "\n# references", "\n## sources", "\n# sources"] {
        if let Some(pos) = lower.find(marker) {
            return s[..pos].trim_end().to_string();
        }
    }
    s.to_string()
}

/// Rewrite every `[K]` occurrence into `[K](URL)` when `K` is a valid index
/// (spec.md §4.8 step 4, §8: "every `[K](URL)` link has `K` in the map").
fn rewrite_citations(body: &str, index: &SourceIndex) -> String {
    let re = Regex::new(r"\[(\d+)\]").expect("static regex");
    re.replace_all(body, |caps: &regex::Captures| {
        let k: u32 = caps[1].parse().unwrap_or(0);
        match index.url_by_index.get(&k) {
            Some(url) => format!("[{k}]({url})"),
            None => caps[0].to_string(),
        }
    })
    .into_owned()
}

fn finalize(plan: &ReportPlan, body: String, index: &SourceIndex) -> String {
    let mut out = body;
    out.push_str("\n\n");
    out.push_str(&references_section(plan, index));
    out.push_str(&format!("\n\n*Generated {}*\n", Utc::now().to_rfc3339()));
    out
}

fn references_section(_plan: &ReportPlan, index: &SourceIndex) -> String {
    if index.url_by_index.is_empty() {
        return "## References\n\nNo valid source URLs were cited.".to_string();
    }
    let mut s = String::from("## References\n\n");
    for (k, url) in &index.url_by_index {
        let label = host_of(url);
        s.push_str(&format!("{k}. [{label}]({url})\n"));
    }
    s
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// Emergency report used when the LLM call itself fails (spec.md §4.8):
/// group learnings by source into a minimal Markdown document, still
/// appending the References section.
fn emergency_report(plan: &ReportPlan, learnings: &[Learning], index: &SourceIndex) -> String {
    let mut out = format!("# {}\n\n", plan.report_title);
    out.push_str("_This report could not be generated by the language model and was \
assembled automatically from raw findings._\n\n");

    if learnings.is_empty() {
        out.push_str("No learnings were gathered during this research run.\n\n");
    } else {
        let mut by_source: BTreeMap<String, Vec<&Learning>> = BTreeMap::new();
        for l in learnings {
            by_source
                .entry(l.source.clone().unwrap_or_else(|| "unsourced".to_string()))
                .or_default()
                .push(l);
        }
        for (source, group) in by_source {
            out.push_str(&format!("## {}\n\n", host_of(&source)));
            for l in group {
                let cited = l
                    .source
                    .as_deref()
                    .and_then(|u| index.index_of(u))
                    .map(|k| format!(" [{k}]"))
                    .unwrap_or_default();
                out.push_str(&format!("- {}{}\n", l.text, cited));
            }
            out.push('\n');
        }
    }

    out.push_str(&references_section(plan, index));
    out.push_str(&format!("\n\n*Generated {}*\n", Utc::now().to_rfc3339()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learning(text: &str, source: Option<&str>) -> Learning {
        Learning {
            text: text.to_string(),
            source: source.map(str::to_string),
            title: None,
        }
    }

    #[test]
    fn source_index_is_sorted_and_deduped() {
        let learnings = vec![
            learning("a", Some("https://b.com/x")),
            learning("b", Some("https://a.com/y")),
            learning("c", Some("https://a.com/y")),
        ];
        let index = SourceIndex::build(&learnings);
        assert_eq!(index.url_by_index.len(), 2);
        assert_eq!(index.url_by_index[&1], "https://a.com/y");
        assert_eq!(index.url_by_index[&2], "https://b.com/x");
    }

    #[test]
    fn rewrite_citations_only_touches_valid_indices() {
        let learnings = vec![learning("a", Some("https://a.com/y"))];
        let index = SourceIndex::build(&learnings);
        let body = "Claim one [1]. Fabricated claim [7].";
        let rewritten = rewrite_citations(body, &index);
        assert!(rewritten.contains("[1](https://a.com/y)"));
        assert!(rewritten.contains("[7]"));
        assert!(!rewritten.contains("[7](")); // untouched, no URL attached
    }

    #[test]
    fn strip_llm_artifacts_removes_fence_and_self_authored_references() {
        let raw = "```markdown\n# Title\n\nBody text.\n\n## References\n\n1. [x](https://x.com)\n```";
        let cleaned = strip_llm_artifacts(raw);
        assert!(!cleaned.contains("```"));
        assert!(!cleaned.to_ascii_lowercase().contains("references"));
        assert!(cleaned.contains("Body text."));
    }

    #[test]
    fn emergency_report_has_no_cited_sources_message_when_empty() {
        let plan = ReportPlan::fallback("q");
        let report = emergency_report(&plan, &[], &SourceIndex::build(&[]));
        assert!(report.contains("No learnings were gathered"));
        assert!(report.contains("No valid source URLs were cited"));
    }

    #[test]
    fn references_section_lists_each_index_once_in_order() {
        let learnings = vec![
            learning("a", Some("https://b.com/x")),
            learning("b", Some("https://a.com/y")),
        ];
        let index = SourceIndex::build(&learnings);
        let section = references_section(&ReportPlan::fallback("q"), &index);
        let first = section.find("1.").unwrap();
        let second = section.find("2.").unwrap();
        assert!(first < second);
    }
}
