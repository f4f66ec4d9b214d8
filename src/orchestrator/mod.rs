//! Research Orchestrator (spec.md §4.9) — owns the workflow state, work
//! queue, depth/time budget, step accounting, and invokes every other
//! module in the prescribed order. Implemented as a plain `enum` state
//! machine driven by a loop in `run`, matching the teacher's preference for
//! explicit control flow over a framework — the same restraint the teacher
//! shows by hand-rolling its MCP dispatch instead of pulling in a generic
//! RPC or actor framework.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::config::ResearchConfig;
use crate::core::error::ResearchError;
use crate::core::types::{
    Gap, Learning, LogEntryType, LogStatus, ProgressEventType, ResearchMetrics, ResearchResult,
    ResearchState,
};
use crate::gap;
use crate::insight;
use crate::llm::LlmClient;
use crate::planner::{self, PlanningHints};
use crate::progress::ProgressUpdater;
use crate::report;
use crate::scraper::Scraper;
use crate::search::{curate, SearchClient};
use crate::vectorstore::{Embedder, VectorStore};

/// Steps counted per iteration before any targeted-query bonus: search,
/// scrape, vectorize, insight, gap-driven query generation (spec.md §4.1,
/// §4.9: `baseStepsPerIteration` = 5).
const BASE_STEPS_PER_ITERATION: u32 = 5;
const PLANNING_STEP: u32 = 1;
const FINAL_REPORT_STEPS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Planning,
    Iterating,
    Reporting,
    Complete,
    Failed,
}

pub struct Orchestrator {
    search: Arc<dyn SearchClient>,
    scraper: Arc<dyn Scraper>,
    embedder: Arc<dyn Embedder>,
    llm: LlmClient,
    config: Arc<ResearchConfig>,
    progress: Arc<ProgressUpdater>,
}

impl Orchestrator {
    pub fn new(
        search: Arc<dyn SearchClient>,
        scraper: Arc<dyn Scraper>,
        embedder: Arc<dyn Embedder>,
        llm: LlmClient,
        config: Arc<ResearchConfig>,
        progress: Arc<ProgressUpdater>,
    ) -> Self {
        Self {
            search,
            scraper,
            embedder,
            llm,
            config,
            progress,
        }
    }

    /// Run one complete research session for `query`, honoring `cancel` as
    /// the cooperative cancellation signal propagated to every suspension
    /// point (spec.md §5).
    pub async fn run(
        &self,
        query: String,
        hints: PlanningHints,
        cancel: CancellationToken,
    ) -> ResearchResult {
        let start = Instant::now();
        let mut state = ResearchState::new(query.clone(), self.config.max_depth);
        let mut vector_store = VectorStore::new();
        vector_store.clear();

        let mut run_state = RunState::Planning;
        let mut failure: Option<ResearchError> = None;

        // ── PLANNING ────────────────────────────────────────────────────
        let plan = planner::plan_report(
            &self.llm,
            &self.config,
            self.search.as_ref(),
            &self.progress,
            &query,
            &hints,
        )
        .await;
        state.research_queue = plan.report_outline.iter().map(|s| s.key_question.clone()).collect();
        state.report_plan = Some(plan.clone());
        state.completed_steps += PLANNING_STEP;

        self.progress
            .update_progress_init(&mut state, &plan, BASE_STEPS_PER_ITERATION, PLANNING_STEP, FINAL_REPORT_STEPS)
            .await;
        self.progress
            .update_progress(&mut state, ProgressEventType::Activity, "planning complete")
            .await;

        if cancel.is_cancelled() {
            run_state = RunState::Failed;
            failure = Some(ResearchError::Cancelled);
        } else {
            run_state = RunState::Iterating;
        }

        // ── ITERATING ───────────────────────────────────────────────────
        let mut completed_questions: HashSet<String> = HashSet::new();
        let mut current_query = state.research_queue.pop_front();

        if run_state == RunState::Iterating {
            while let Some(q) = current_query.take() {
                if cancel.is_cancelled() {
                    failure = Some(ResearchError::Cancelled);
                    if state.all_learnings.is_empty() {
                        run_state = RunState::Failed;
                    }
                    break;
                }
                if start.elapsed() >= self.config.timeout {
                    state.should_continue = false;
                    failure.get_or_insert(ResearchError::Timeout);
                    self.progress
                        .add_log_entry(
                            LogEntryType::Reasoning,
                            LogStatus::Warning,
                            "wall-clock timeout reached; ending iteration loop",
                            Some(state.current_depth),
                        )
                        .await;
                    break;
                }
                if state.current_depth >= state.max_depth {
                    break;
                }

                state.current_depth += 1;
                self.progress
                    .update_progress(&mut state, ProgressEventType::DepthDelta, format!("depth {} / {}", state.current_depth, state.max_depth))
                    .await;

                self.run_iteration(&mut state, &mut vector_store, &q, &mut completed_questions, &cancel)
                    .await;

                current_query = state.research_queue.pop_front();
                if current_query.is_none() {
                    state.should_continue = false;
                }
                if state.current_depth >= state.max_depth || start.elapsed() >= self.config.timeout {
                    state.should_continue = false;
                }
                if !state.should_continue {
                    break;
                }
            }
        }

        // ── REPORTING ───────────────────────────────────────────────────
        if run_state != RunState::Failed {
            run_state = RunState::Reporting;
        }

        let final_report = match run_state {
            RunState::Reporting => {
                let report_text = report::generate_report(&self.llm, &self.config, &plan, &state.all_learnings).await;
                state.completed_steps += FINAL_REPORT_STEPS;
                run_state = RunState::Complete;
                report_text
            }
            _ => {
                let msg = failure
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| ResearchError::Unrecoverable("no plan could be produced".to_string()).to_string());
                warn!("research run ended without completing reporting: {msg}");
                if state.all_learnings.is_empty() {
                    format!("# Research run did not complete\n\nReason: {msg}\n")
                } else {
                    report::generate_report(&self.llm, &self.config, &plan, &state.all_learnings).await
                }
            }
        };

        state.total_steps = state.completed_steps;
        let event_type = if run_state == RunState::Complete {
            ProgressEventType::Complete
        } else {
            ProgressEventType::Error
        };
        self.progress
            .update_progress(
                &mut state,
                event_type,
                if run_state == RunState::Complete {
                    "research complete".to_string()
                } else {
                    failure
                        .as_ref()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| ResearchError::Unrecoverable("research failed".to_string()).to_string())
                },
            )
            .await;

        ResearchResult {
            query,
            insights: state.all_learnings.iter().map(|l| l.text.clone()).collect(),
            final_report,
            sources: state.all_sources.clone(),
            metrics: ResearchMetrics {
                time_elapsed_ms: start.elapsed().as_millis() as u64,
                iterations_completed: state.current_depth,
                sources_examined: state.all_sources.len(),
            },
            completed_steps: state.completed_steps,
            total_steps: state.total_steps,
            logs: self.progress.logs().await,
        }
    }

    /// One iteration of Search -> Scrape -> Vectorize -> Insight -> Gap for
    /// a single query `q` at the current depth (spec.md §4.9).
    async fn run_iteration(
        &self,
        state: &mut ResearchState,
        vector_store: &mut VectorStore,
        q: &str,
        completed_questions: &mut HashSet<String>,
        cancel: &CancellationToken,
    ) {
        if completed_questions.contains(q) {
            self.progress
                .add_log_entry(
                    LogEntryType::Analyze,
                    LogStatus::Complete,
                    format!("skipping '{q}', already sufficiently answered"),
                    Some(state.current_depth),
                )
                .await;
            return;
        }

        // ── Search & curate ─────────────────────────────────────────────
        let raw_results = self.search.search_web(q).await;
        for r in &raw_results {
            state.all_sources.entry(r.url.clone()).or_insert_with(|| r.title.clone());
        }
        let cap = (15u32.saturating_sub(state.current_depth)).max(5) as usize;
        let curated = curate(raw_results, cap);

        if curated.is_empty() {
            self.progress
                .add_log_entry(LogEntryType::Search, LogStatus::Warning, format!("no results for '{q}'"), Some(state.current_depth))
                .await;
        } else {
            state.completed_steps += 1;
            self.progress
                .add_log_entry(
                    LogEntryType::Search,
                    LogStatus::Complete,
                    format!("found {} sources for '{q}'", curated.len()),
                    Some(state.current_depth),
                )
                .await;
        }

        if cancel.is_cancelled() || curated.is_empty() {
            return;
        }

        // ── Scrape ───────────────────────────────────────────────────────
        let urls: Vec<String> = curated.iter().map(|r| r.url.clone()).collect();
        let scrapes = self.scraper.scrape_many(&urls, &state.original_query).await;
        let successes: Vec<_> = scrapes.iter().filter(|s| s.success).collect();

        for s in &scrapes {
            if !s.success {
                self.progress
                    .add_log_entry(
                        LogEntryType::Scrape,
                        LogStatus::Warning,
                        format!("scrape failed for {}: {}", s.url, s.error.clone().unwrap_or_default()),
                        Some(state.current_depth),
                    )
                    .await;
            }
        }

        if !successes.is_empty() {
            state.completed_steps += 1;
            self.progress
                .add_log_entry(
                    LogEntryType::Scrape,
                    LogStatus::Complete,
                    format!("scraped {}/{} sources", successes.len(), scrapes.len()),
                    Some(state.current_depth),
                )
                .await;
        }

        if cancel.is_cancelled() {
            return;
        }

        // ── Vectorize ────────────────────────────────────────────────────
        let mut vectorized_any = false;
        for s in &successes {
            if s.processed_content.trim().is_empty() {
                continue;
            }
            match vector_store
                .add_document(self.embedder.as_ref(), &s.url, &s.processed_content, s.title.as_deref())
                .await
            {
                Ok(n) if n > 0 => vectorized_any = true,
                Ok(_) => {}
                Err(e) => {
                    warn!("vectorizing {} failed: {e}", s.url);
                    self.progress
                        .add_log_entry(
                            LogEntryType::Vectorize,
                            LogStatus::Error,
                            format!("embedding failed for {}: {e}", s.url),
                            Some(state.current_depth),
                        )
                        .await;
                }
            }
        }
        if vectorized_any {
            state.completed_steps += 1;
            self.progress
                .add_log_entry(LogEntryType::Vectorize, LogStatus::Complete, "indexed new content", Some(state.current_depth))
                .await;
        }

        if cancel.is_cancelled() {
            return;
        }

        // ── Insight ──────────────────────────────────────────────────────
        let mut iteration_learnings: Vec<Learning> = Vec::new();
        if !vector_store.is_empty() || !state.all_learnings.is_empty() {
            let result = insight::generate_insights(
                &self.llm,
                &self.config,
                self.embedder.as_ref(),
                vector_store,
                &state.original_query,
                q,
            )
            .await;

            if !result.learnings.is_empty() {
                state.completed_steps += 1;
                self.progress
                    .add_log_entry(
                        LogEntryType::Synthesis,
                        LogStatus::Complete,
                        format!("{} new learnings for '{q}'", result.learnings.len()),
                        Some(state.current_depth),
                    )
                    .await;
            }
            iteration_learnings = result.learnings.clone();
            state.all_learnings.extend(result.learnings);
        }

        if cancel.is_cancelled() {
            return;
        }

        // ── Gap analysis ────────────────────────────────────────────────
        let gap_result = gap::analyze_knowledge_gaps(&self.llm, &self.config, q, &iteration_learnings).await;

        if gap_result.is_complete {
            completed_questions.insert(q.to_string());
            self.progress
                .add_log_entry(LogEntryType::Analyze, LogStatus::Complete, format!("'{q}' is sufficiently answered"), Some(state.current_depth))
                .await;
            return;
        }

        let top_gap = highest_severity_gap(&gap_result.remaining_gaps);
        let Some(top_gap) = top_gap else {
            // No gaps at all despite is_complete=false (should not happen per
            // invariant, but the loop must not stall): re-enqueue Q as-is.
            state.research_queue.push_front(q.to_string());
            return;
        };

        if state.current_depth < state.max_depth {
            let targeted = gap::generate_targeted_queries(&self.llm, &self.config, top_gap, &state.original_query, q).await;
            if !targeted.is_empty() {
                state.completed_steps += 1;
                self.progress
                    .add_log_entry(
                        LogEntryType::Analyze,
                        LogStatus::Complete,
                        format!("generated {} targeted queries for gap: {}", targeted.len(), top_gap.text),
                        Some(state.current_depth),
                    )
                    .await;

                // Targeted queries are FIFO among themselves but LIFO versus
                // Q and the rest of the queue: front becomes
                // [targeted..., Q, ...old_queue] (spec.md §4.9).
                state.research_queue.push_front(q.to_string());
                for tq in targeted.into_iter().rev() {
                    state.research_queue.push_front(tq);
                }
                return;
            }
        }

        // Depth exhausted or no targeted queries produced: still re-enqueue
        // Q so it can be re-evaluated if the queue has other entries ahead
        // of the depth limit check.
        state.research_queue.push_front(q.to_string());
    }
}

fn highest_severity_gap(gaps: &[Gap]) -> Option<&Gap> {
    gaps.iter().max_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then(a.confidence.partial_cmp(&b.confidence).unwrap_or(std::cmp::Ordering::Equal))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Gap, GapSeverity};

    #[test]
    fn highest_severity_gap_prefers_severity_then_confidence() {
        let gaps = vec![
            Gap { text: "a".into(), severity: GapSeverity::Low, confidence: 0.9 },
            Gap { text: "b".into(), severity: GapSeverity::High, confidence: 0.4 },
            Gap { text: "c".into(), severity: GapSeverity::High, confidence: 0.6 },
        ];
        let top = highest_severity_gap(&gaps).unwrap();
        assert_eq!(top.text, "c");
    }

    #[test]
    fn highest_severity_gap_empty_is_none() {
        assert!(highest_severity_gap(&[]).is_none());
    }
}
