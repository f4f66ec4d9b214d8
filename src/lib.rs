pub mod core;
pub mod gap;
pub mod insight;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod report;
pub mod scraper;
pub mod search;
pub mod vectorstore;

pub use core::config::{self, ResearchConfig};
pub use core::types;
pub use core::types::*;
pub use core::AppState;
pub use core::ResearchError;
pub use orchestrator::Orchestrator;
pub use planner::PlanningHints;
pub use progress::{ChannelSink, InMemorySink, ProgressSink, ProgressUpdater};
