//! Research orchestrator
//!
//! Drives the depth/breadth control loop: plans sub-queries, fans them out
//! under bounded concurrency, funnels results through the processor into
//! shared session state, and re-plans each level from all learnings so far.
//! Credits are debited before the first level and refunded in full when the
//! loop fails.

use crate::adapters::{AcademicSearchAdapter, WebSearchAdapter};
use crate::credits::CreditController;
use crate::planner::QueryPlanner;
use crate::processor::ResultProcessor;
use crate::registry::ReferenceRegistry;
use crate::types::{
    ProcessedResult, ResearchOutcome, ResearchParams, ResearchProgress, ResearchSnapshot,
    SerpQuery, SessionStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use delver_core::{
    process_concurrently, with_timeout, DelverError, DelverResult, ErrorContext, ResearchConfig,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Caller-supplied progress channel
pub type ProgressCallback = Arc<dyn Fn(ResearchProgress) + Send + Sync>;

/// Interactive yes/no gate asked before researching a sub-query.
/// May suspend until externally resolved; the orchestrator bounds the wait.
#[async_trait]
pub trait QuestionHandler: Send + Sync {
    async fn ask(&self, question: &str) -> DelverResult<bool>;
}

/// Question handler that approves every sub-query without waiting
pub struct AutoApprove;

#[async_trait]
impl QuestionHandler for AutoApprove {
    async fn ask(&self, _question: &str) -> DelverResult<bool> {
        Ok(true)
    }
}

pub struct ResearchOrchestrator {
    planner: QueryPlanner,
    processor: Arc<ResultProcessor>,
    web: Arc<WebSearchAdapter>,
    academic: Arc<AcademicSearchAdapter>,
    credits: CreditController,
    question_handler: Arc<dyn QuestionHandler>,
    config: ResearchConfig,
    /// Per-depth snapshots observable by external callers mid-flight
    snapshots: Arc<RwLock<HashMap<String, ResearchSnapshot>>>,
}

impl ResearchOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planner: QueryPlanner,
        processor: ResultProcessor,
        web: WebSearchAdapter,
        academic: AcademicSearchAdapter,
        credits: CreditController,
        question_handler: Arc<dyn QuestionHandler>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            planner,
            processor: Arc::new(processor),
            web: Arc::new(web),
            academic: Arc::new(academic),
            credits,
            question_handler,
            config,
            snapshots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Run a full research session: admission, the depth/breadth loop, and
    /// the compensating refund on failure. Returns the accumulated
    /// learnings/URLs/reference-mapping tuple for synthesis.
    pub async fn run_research(
        &self,
        params: ResearchParams,
        on_progress: ProgressCallback,
    ) -> DelverResult<ResearchOutcome> {
        validate_params(&params)?;

        let cost = self
            .credits
            .check_and_reserve(&params.user_id, &params.query, params.depth, params.breadth)
            .await?;

        let session_id = Uuid::new_v4().to_string();
        info!(
            session_id = %session_id,
            query = %params.query,
            depth = params.depth,
            breadth = params.breadth,
            cost = cost,
            "Research session admitted"
        );

        match self.run_loop(&session_id, &params, cost, on_progress).await {
            Ok(outcome) => {
                self.update_status(&session_id, SessionStatus::Completed).await;
                Ok(outcome)
            }
            Err(e) => {
                self.credits
                    .refund(
                        &params.user_id,
                        &params.query,
                        params.depth,
                        params.breadth,
                        cost,
                        &e.to_string(),
                    )
                    .await;
                self.update_status(&session_id, SessionStatus::Failed(e.to_string()))
                    .await;
                Err(e)
            }
        }
    }

    /// Latest published snapshot for a session, if any
    pub async fn latest_snapshot(&self, session_id: &str) -> Option<ResearchSnapshot> {
        self.snapshots.read().await.get(session_id).cloned()
    }

    async fn run_loop(
        &self,
        session_id: &str,
        params: &ResearchParams,
        cost: u32,
        on_progress: ProgressCallback,
    ) -> DelverResult<ResearchOutcome> {
        let registry = Arc::new(ReferenceRegistry::new());
        let mut learnings: Vec<String> = Vec::new();
        let mut visited_urls: Vec<String> = Vec::new();
        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut citations = HashMap::new();
        let completed = Arc::new(AtomicUsize::new(0));

        for depth_level in 1..=params.depth {
            // Planner failure is fatal to the session
            let queries = self
                .planner
                .plan(&params.query, params.breadth, &learnings)
                .await?;

            let remaining_levels = (params.depth - depth_level) as usize;
            let total_queries = completed.load(Ordering::SeqCst)
                + queries.len()
                + remaining_levels * params.breadth as usize;

            info!(
                session_id = session_id,
                depth = depth_level,
                queries = queries.len(),
                "Executing depth level"
            );

            let level_results = {
                let processor = Arc::clone(&self.processor);
                let web = Arc::clone(&self.web);
                let academic = Arc::clone(&self.academic);
                let question_handler = Arc::clone(&self.question_handler);
                let registry = Arc::clone(&registry);
                let completed = Arc::clone(&completed);
                let on_progress = Arc::clone(&on_progress);
                let language = params.language.clone();
                let interactive = params.interactive;
                let timeout_ms = self.config.question_timeout_ms;
                let total_depth = params.depth;
                let breadth = params.breadth;

                process_concurrently(
                    queries,
                    self.config.concurrency,
                    move |sub_query: SerpQuery| {
                        let processor = Arc::clone(&processor);
                        let web = Arc::clone(&web);
                        let academic = Arc::clone(&academic);
                        let question_handler = Arc::clone(&question_handler);
                        let registry = Arc::clone(&registry);
                        let completed = Arc::clone(&completed);
                        let on_progress = Arc::clone(&on_progress);
                        let language = language.clone();

                        async move {
                            let processed = run_sub_query(
                                &sub_query,
                                &language,
                                interactive,
                                timeout_ms,
                                question_handler.as_ref(),
                                web.as_ref(),
                                academic.as_ref(),
                                processor.as_ref(),
                                registry.as_ref(),
                            )
                            .await;

                            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            on_progress(ResearchProgress {
                                current_depth: depth_level,
                                total_depth,
                                current_breadth: breadth,
                                total_breadth: breadth,
                                current_query: Some(sub_query.query.clone()),
                                total_queries,
                                completed_queries: done,
                                credits_used: cost,
                                is_generating_report: false,
                            });

                            Ok(processed)
                        }
                    },
                )
                .await
            };

            for result in level_results {
                match result {
                    Ok(processed) => {
                        learnings.extend(processed.learnings);
                        for url in processed.visited_urls {
                            if seen_urls.insert(url.clone()) {
                                visited_urls.push(url);
                            }
                        }
                        citations.extend(processed.citations);
                    }
                    Err(e) => {
                        // Task panic boundary; the sub-query's own failures
                        // are already absorbed inside run_sub_query
                        warn!(session_id = session_id, error = %e, "Sub-query task failed");
                    }
                }
            }

            self.publish_snapshot(ResearchSnapshot {
                session_id: session_id.to_string(),
                query: params.query.clone(),
                language: params.language.clone(),
                learnings: learnings.clone(),
                visited_urls: visited_urls.clone(),
                reference_mapping: registry.snapshot(),
                citations: citations.clone(),
                completed_depth: depth_level,
                total_depth: params.depth,
                status: SessionStatus::InProgress,
                updated_at: Utc::now(),
            })
            .await;
        }

        // The loop is done; signal that synthesis is next so callers can
        // switch their progress display over
        let done = completed.load(Ordering::SeqCst);
        on_progress(ResearchProgress {
            current_depth: params.depth,
            total_depth: params.depth,
            current_breadth: params.breadth,
            total_breadth: params.breadth,
            current_query: None,
            total_queries: done,
            completed_queries: done,
            credits_used: cost,
            is_generating_report: true,
        });

        Ok(ResearchOutcome {
            session_id: session_id.to_string(),
            learnings,
            visited_urls,
            reference_mapping: registry.snapshot(),
            citations,
            credits_used: cost,
        })
    }

    async fn publish_snapshot(&self, snapshot: ResearchSnapshot) {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.session_id.clone(), snapshot);
    }

    async fn update_status(&self, session_id: &str, status: SessionStatus) {
        let mut snapshots = self.snapshots.write().await;
        if let Some(snapshot) = snapshots.get_mut(session_id) {
            snapshot.status = status;
            snapshot.updated_at = Utc::now();
        }
    }
}

/// Run one sub-query end to end: interactive gate, both adapters, then the
/// processor. Every failure is absorbed here so the depth level always
/// settles.
#[allow(clippy::too_many_arguments)]
async fn run_sub_query(
    sub_query: &SerpQuery,
    language: &str,
    interactive: bool,
    timeout_ms: u64,
    question_handler: &dyn QuestionHandler,
    web: &WebSearchAdapter,
    academic: &AcademicSearchAdapter,
    processor: &ResultProcessor,
    registry: &ReferenceRegistry,
) -> ProcessedResult {
    if interactive {
        let question = format!(
            "Research \"{}\"? Goal: {}",
            sub_query.query, sub_query.research_goal
        );
        let approved = match with_timeout(
            question_handler.ask(&question),
            timeout_ms,
            "interactive_question",
        )
        .await
        {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!(query = %sub_query.query, error = %e, "Question handler failed, proceeding");
                true
            }
            // Timeout defaults to "yes"
            Err(_) => {
                info!(query = %sub_query.query, "Question timed out, proceeding");
                true
            }
        };

        if !approved {
            info!(query = %sub_query.query, "Sub-query declined, marked completed without research");
            return ProcessedResult::default();
        }
    }

    let mut combined = web.search(&sub_query.query).await;
    combined.extend(academic.search(&sub_query.query, language).await);

    match processor.process(&sub_query.query, combined, registry).await {
        Ok(processed) => processed,
        Err(e) => {
            warn!(query = %sub_query.query, error = %e, "Extraction failed, sub-query contributes zero learnings");
            ProcessedResult::default()
        }
    }
}

fn validate_params(params: &ResearchParams) -> DelverResult<()> {
    if params.depth == 0 || params.breadth == 0 {
        return Err(DelverError::Validation {
            message: "depth and breadth must be positive".to_string(),
            field: Some(if params.depth == 0 { "depth" } else { "breadth" }.to_string()),
            context: ErrorContext::new("orchestrator")
                .with_operation("validate_params")
                .with_suggestion("Use depth >= 1 and breadth >= 1"),
        });
    }
    if params.query.trim().is_empty() {
        return Err(DelverError::Validation {
            message: "query must not be empty".to_string(),
            field: Some("query".to_string()),
            context: ErrorContext::new("orchestrator").with_operation("validate_params"),
        });
    }
    Ok(())
}
