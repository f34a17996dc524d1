//! Deep research engine
//!
//! Iterative multi-round research: a planner turns the topic into search
//! sub-queries, web and academic adapters retrieve sources, a processor
//! extracts cited learnings under a global reference registry, and a
//! synthesizer writes the final cited report. Sessions are admitted through
//! a credit controller and refunded on failure.

pub mod adapters;
pub mod credits;
pub mod orchestrator;
pub mod planner;
pub mod processor;
pub mod registry;
pub mod store;
pub mod synthesizer;
pub mod types;

pub use adapters::{AcademicSearchAdapter, WebSearchAdapter};
pub use credits::{compute_cost, CreditController, CreditLedger, InMemoryCreditLedger, LedgerEntry};
pub use orchestrator::{AutoApprove, ProgressCallback, QuestionHandler, ResearchOrchestrator};
pub use planner::QueryPlanner;
pub use processor::ResultProcessor;
pub use registry::ReferenceRegistry;
pub use store::{FileReportStore, ReportRecord, ReportStore};
pub use synthesizer::{Report, ReportSynthesizer};
pub use types::{
    ProcessedResult, ResearchOutcome, ResearchParams, ResearchProgress, ResearchSnapshot,
    SearchResult, SerpQuery, SessionStatus,
};
