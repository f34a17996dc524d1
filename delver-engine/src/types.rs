//! Types for the deep research pipeline

use chrono::{DateTime, Utc};
use delver_search::Citation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A planned search sub-query, recreated every depth level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerpQuery {
    /// Generated search string
    pub query: String,
    /// Free-text rationale guiding subsequent refinement (LLM context only)
    pub research_goal: String,
}

/// One search result flowing from the adapters into the processor.
///
/// Citation metadata travels as a structured field here rather than being
/// encoded into the URL string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    /// Page or abstract content, truncated to the configured budget
    pub content: String,
    /// Structured citation data for academic sources
    pub citation: Option<Citation>,
    /// Set on results contributed by the forced-translation second pass
    pub translation_sourced: bool,
}

impl SearchResult {
    pub fn new(url: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            content: content.into(),
            citation: None,
            translation_sourced: false,
        }
    }
}

/// Output of processing one sub-query's combined results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessedResult {
    /// Extracted, citation-annotated learnings
    pub learnings: Vec<String>,
    /// Follow-up questions (collected but not used for re-planning)
    pub follow_up_questions: Vec<String>,
    /// Deduplicated URLs seen in this sub-query's results
    pub visited_urls: Vec<String>,
    /// Subset of the global reference mapping touched by this sub-query
    pub reference_indexes: HashMap<String, u32>,
    /// Structured citations keyed by URL for this batch
    pub citations: HashMap<String, Citation>,
}

/// Progress update emitted through the caller-supplied callback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchProgress {
    pub current_depth: u32,
    pub total_depth: u32,
    pub current_breadth: u32,
    pub total_breadth: u32,
    /// Sub-query currently being researched
    pub current_query: Option<String>,
    pub total_queries: usize,
    pub completed_queries: usize,
    pub credits_used: u32,
    pub is_generating_report: bool,
}

/// Parameters for one research request
#[derive(Debug, Clone)]
pub struct ResearchParams {
    /// Original topic
    pub query: String,
    /// Number of sequential research rounds
    pub depth: u32,
    /// Number of parallel sub-queries per round
    pub breadth: u32,
    pub user_id: String,
    /// Target report language
    pub language: String,
    /// Whether to gate each sub-query behind an interactive confirmation
    pub interactive: bool,
}

/// Accumulated output of a completed research session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchOutcome {
    pub session_id: String,
    pub learnings: Vec<String>,
    /// Visited URLs in first-appearance order
    pub visited_urls: Vec<String>,
    /// Session-wide URL to citation-number mapping
    pub reference_mapping: HashMap<String, u32>,
    pub citations: HashMap<String, Citation>,
    pub credits_used: u32,
}

/// Session lifecycle status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed(String),
}

/// Read-only snapshot of accumulated session state, published after every
/// depth level so external callers can run the partial-results path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSnapshot {
    pub session_id: String,
    pub query: String,
    pub language: String,
    pub learnings: Vec<String>,
    pub visited_urls: Vec<String>,
    pub reference_mapping: HashMap<String, u32>,
    pub citations: HashMap<String, Citation>,
    /// Depth levels fully settled so far
    pub completed_depth: u32,
    pub total_depth: u32,
    pub status: SessionStatus,
    pub updated_at: DateTime<Utc>,
}
