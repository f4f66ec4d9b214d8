//! Progress Updater (spec.md §4.1) — structured logging plus a push stream of
//! progress events. Grounded on the teacher's `features/history.rs` append-only
//! store and on `core/app_state.rs`'s pattern of handing shared infrastructure
//! to every stage as a cheap `Clone`.
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::core::types::{
    LogEntryType, LogStatus, ProgressEvent, ProgressEventContent, ProgressEventType,
    ProgressSnapshot, ReportPlan, ResearchLogEntry, ResearchState,
};

/// Write-only sink for progress events (spec.md §9: "model the sink as a
/// write-only interface `emit(event)`"). The HTTP layer implements this over
/// an SSE channel; tests substitute an in-memory collector.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: ProgressEvent);
}

/// Collects emitted events in memory, guarded by a mutex (spec.md §5: "the
/// consumer must tolerate growing-length snapshots").
#[derive(Default)]
pub struct InMemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl ProgressSink for InMemorySink {
    async fn emit(&self, event: ProgressEvent) {
        self.events.lock().await.push(event);
    }
}

/// Feeds an unbounded mpsc channel, the shape an axum SSE handler consumes
/// directly as a `Stream` (teacher's `main.rs` uses the same channel-to-stream
/// bridge for `/mcp` HTTP responses).
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&self, event: ProgressEvent) {
        // A closed receiver (consumer disconnected) is not our problem to
        // report; the orchestrator keeps running regardless (spec.md §4.1:
        // "non-blocking... all methods become no-ops").
        let _ = self.tx.send(event);
    }
}

/// Accumulates `ResearchLogEntry` records and emits `ProgressEvent`s to an
/// optional sink (spec.md §4.1: "if the sink is absent, all methods become
/// no-ops except in-memory logging").
pub struct ProgressUpdater {
    sink: Option<std::sync::Arc<dyn ProgressSink>>,
    log: Mutex<Vec<ResearchLogEntry>>,
}

impl ProgressUpdater {
    pub fn new(sink: Option<std::sync::Arc<dyn ProgressSink>>) -> Self {
        Self {
            sink,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn without_sink() -> Self {
        Self::new(None)
    }

    /// Append a log entry. Entries are never dropped (spec.md §4.1).
    pub async fn add_log_entry(
        &self,
        entry_type: LogEntryType,
        status: LogStatus,
        message: impl Into<String>,
        depth: Option<u32>,
    ) {
        let message = message.into();
        debug!(?entry_type, ?status, %message, ?depth, "research log entry");
        let entry = ResearchLogEntry {
            entry_type,
            status,
            message,
            timestamp: Utc::now(),
            depth,
        };
        self.log.lock().await.push(entry);
    }

    pub async fn logs(&self) -> Vec<ResearchLogEntry> {
        self.log.lock().await.clone()
    }

    /// Emit a single `progress-init` event and write `total_steps` into
    /// `state` (spec.md §4.1). `total_steps = planning_step + |outline| *
    /// base_steps_per_iteration + final_report_steps`.
    pub async fn update_progress_init(
        &self,
        state: &mut ResearchState,
        plan: &ReportPlan,
        base_steps_per_iteration: u32,
        planning_step: u32,
        final_report_steps: u32,
    ) {
        let total_steps = planning_step
            + (plan.report_outline.len() as u32) * base_steps_per_iteration
            + final_report_steps;
        state.total_steps = total_steps;

        if let Some(sink) = &self.sink {
            sink.emit(ProgressEvent {
                event_type: ProgressEventType::ProgressInit,
                id: Uuid::new_v4(),
                content: ProgressEventContent::Init {
                    max_depth: state.max_depth,
                    total_steps,
                },
            })
            .await;
        }
    }

    /// Emit an event carrying the current snapshot of `state` (spec.md
    /// §4.1). On `Complete`, the caller is expected to have already snapped
    /// `total_steps == completed_steps`; every other event recomputes
    /// `total_steps` as a best-effort estimate from the queue length before
    /// the snapshot is taken.
    pub async fn update_progress(
        &self,
        state: &mut ResearchState,
        event_type: ProgressEventType,
        message: impl Into<String>,
    ) {
        if event_type != ProgressEventType::Complete {
            state.total_steps = Self::estimate_total_steps(state);
        }

        let Some(sink) = &self.sink else { return };

        let snapshot = ProgressSnapshot {
            current_depth: state.current_depth,
            max_depth: state.max_depth,
            completed_steps: state.completed_steps,
            total_steps: state.total_steps,
            timestamp: Utc::now(),
        };

        sink.emit(ProgressEvent {
            event_type,
            id: Uuid::new_v4(),
            content: ProgressEventContent::Snapshot {
                snapshot,
                message: message.into(),
            },
        })
        .await;
    }

    /// Best-effort `total_steps` re-estimate used between init and the
    /// terminal `complete` event: `completed_steps + queue_length + 1` (the
    /// final report step) per spec.md §4.1.
    pub fn estimate_total_steps(state: &ResearchState) -> u32 {
        state.completed_steps + state.research_queue.len() as u32 + 1
    }
}
