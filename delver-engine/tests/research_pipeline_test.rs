//! End-to-end tests for the research pipeline over mocked model and
//! search providers.

use async_trait::async_trait;
use delver_core::{DelverError, DelverResult, PricingConfig, ResearchConfig};
use delver_engine::{
    AcademicSearchAdapter, CreditController, CreditLedger, InMemoryCreditLedger, ProgressCallback,
    QueryPlanner, QuestionHandler, ReferenceRegistry, ReportSynthesizer, ResearchOrchestrator,
    ResearchParams, ResearchProgress, ResultProcessor, WebSearchAdapter,
};
use delver_llm::LanguageModel;
use delver_search::{Citation, RawSearchResult, ScholarProvider, ScholarResult, WebSearchProvider};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Mock model that answers each pipeline stage with canned JSON, keyed on
/// distinctive prompt fragments.
struct MockModel;

#[async_trait]
impl LanguageModel for MockModel {
    async fn generate(&self, _system_prompt: &str, user_prompt: &str) -> DelverResult<String> {
        if user_prompt.contains("Research topic:") {
            return Ok(r#"{"queries": [
                {"query": "alpha subtopic", "research_goal": "cover the alpha angle"},
                {"query": "beta subtopic", "research_goal": "cover the beta angle"}
            ]}"#
                .to_string());
        }
        if user_prompt.contains("Research sub-query:") {
            return Ok(
                r#"{"learnings": ["Detailed finding [1]."], "follow_up_questions": ["What remains open?"]}"#
                    .to_string(),
            );
        }
        if user_prompt.contains("Translate this search query") {
            return Ok(r#"{"translation": "", "is_already_english": true}"#.to_string());
        }
        if user_prompt.contains("Rewrite this query for academic paper search") {
            return Ok(r#"{"refined": "refined academic query"}"#.to_string());
        }
        if user_prompt.contains("Classify this query into exactly one") {
            return Ok(r#"{"domain": "computer science"}"#.to_string());
        }
        if user_prompt.contains("Name its most specific subdomain") {
            return Ok(r#"{"subdomain": "machine learning"}"#.to_string());
        }
        if user_prompt.contains("List 3-5 abbreviations") {
            return Ok(r#"{"venues": ["VENUE"]}"#.to_string());
        }
        if user_prompt.contains("Write a comprehensive research report") {
            return Ok("# Findings\n\nAnalysis shows a clear trend [1].".to_string());
        }
        Err(DelverError::llm("unexpected prompt in mock", "mock_model"))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// Model whose planning call always fails, for refund-path tests
struct BrokenPlannerModel;

#[async_trait]
impl LanguageModel for BrokenPlannerModel {
    async fn generate(&self, _system_prompt: &str, user_prompt: &str) -> DelverResult<String> {
        if user_prompt.contains("Research topic:") {
            return Err(DelverError::llm("model unavailable", "mock_model"));
        }
        MockModel.generate(_system_prompt, user_prompt).await
    }

    fn model_name(&self) -> &str {
        "broken"
    }
}

struct StaticWeb;

#[async_trait]
impl WebSearchProvider for StaticWeb {
    async fn search(&self, _query: &str, _limit: usize) -> DelverResult<Vec<RawSearchResult>> {
        Ok(vec![
            RawSearchResult {
                url: "https://a.example".to_string(),
                title: "Source A".to_string(),
                snippet: "Content from source A.".to_string(),
            },
            RawSearchResult {
                url: "https://b.example".to_string(),
                title: "Source B".to_string(),
                snippet: "Content from source B.".to_string(),
            },
        ])
    }
}

struct FailingWeb;

#[async_trait]
impl WebSearchProvider for FailingWeb {
    async fn search(&self, _query: &str, _limit: usize) -> DelverResult<Vec<RawSearchResult>> {
        Err(DelverError::search("web provider down", "mock_web"))
    }
}

struct EmptyScholar;

#[async_trait]
impl ScholarProvider for EmptyScholar {
    async fn search(&self, _query: &str, _limit: usize) -> DelverResult<Vec<ScholarResult>> {
        Ok(Vec::new())
    }

    async fn fetch_citation(&self, _paper_id: &str) -> DelverResult<Option<Citation>> {
        Ok(None)
    }
}

struct FailingScholar;

#[async_trait]
impl ScholarProvider for FailingScholar {
    async fn search(&self, _query: &str, _limit: usize) -> DelverResult<Vec<ScholarResult>> {
        Err(DelverError::search("scholar provider down", "mock_scholar"))
    }

    async fn fetch_citation(&self, _paper_id: &str) -> DelverResult<Option<Citation>> {
        Err(DelverError::search("scholar provider down", "mock_scholar"))
    }
}

struct HangingHandler;

#[async_trait]
impl QuestionHandler for HangingHandler {
    async fn ask(&self, _question: &str) -> DelverResult<bool> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(false)
    }
}

struct DecliningHandler;

#[async_trait]
impl QuestionHandler for DecliningHandler {
    async fn ask(&self, _question: &str) -> DelverResult<bool> {
        Ok(false)
    }
}

fn build_orchestrator(
    model: Arc<dyn LanguageModel>,
    web: Arc<dyn WebSearchProvider>,
    scholar: Arc<dyn ScholarProvider>,
    ledger: Arc<InMemoryCreditLedger>,
    question_handler: Arc<dyn QuestionHandler>,
    config: ResearchConfig,
) -> ResearchOrchestrator {
    let credits = CreditController::new(
        ledger as Arc<dyn CreditLedger>,
        Arc::new(RwLock::new(PricingConfig::default())),
    );
    ResearchOrchestrator::new(
        QueryPlanner::new(Arc::clone(&model)),
        ResultProcessor::new(Arc::clone(&model), 3, 3),
        WebSearchAdapter::new(web, 5, 25_000),
        AcademicSearchAdapter::new(scholar, Arc::clone(&model), 5, 25_000),
        credits,
        question_handler,
        config,
    )
}

fn params(depth: u32, breadth: u32, interactive: bool) -> ResearchParams {
    ResearchParams {
        query: "test topic".to_string(),
        depth,
        breadth,
        user_id: "u1".to_string(),
        language: "English".to_string(),
        interactive,
    }
}

fn noop_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

#[tokio::test]
async fn full_session_numbers_references_globally() {
    let ledger = Arc::new(InMemoryCreditLedger::with_balance("u1", 10));
    let orchestrator = build_orchestrator(
        Arc::new(MockModel),
        Arc::new(StaticWeb),
        Arc::new(EmptyScholar),
        Arc::clone(&ledger),
        Arc::new(delver_engine::AutoApprove),
        ResearchConfig::default(),
    );

    let progress: Arc<Mutex<Vec<ResearchProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    let on_progress: ProgressCallback = Arc::new(move |p| sink.lock().unwrap().push(p));

    let outcome = orchestrator
        .run_research(params(2, 2, false), on_progress)
        .await
        .unwrap();

    // Two depth levels over the same two URLs collapse to one mapping
    assert_eq!(outcome.visited_urls.len(), 2);
    assert_eq!(outcome.reference_mapping.len(), 2);
    let mut numbers: Vec<u32> = outcome.reference_mapping.values().copied().collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2]);

    // One learning per sub-query, two sub-queries per level, two levels
    assert_eq!(outcome.learnings.len(), 4);

    // ceil(2 + 2*1 + 2*0.5) = 5
    assert_eq!(outcome.credits_used, 5);
    assert_eq!(ledger.get_balance("u1").await.unwrap(), 5);

    // Four sub-query updates, then the report-generation handoff
    let updates = progress.lock().unwrap();
    assert_eq!(updates.len(), 5);
    assert!(updates.iter().all(|p| p.credits_used == 5));
    assert_eq!(updates.iter().map(|p| p.completed_queries).max(), Some(4));
    assert_eq!(
        updates.iter().filter(|p| p.is_generating_report).count(),
        1
    );
    let last = updates.last().unwrap();
    assert!(last.is_generating_report);
    assert!(last.current_query.is_none());
}

#[tokio::test]
async fn failing_adapters_degrade_to_fallback_learnings() {
    let ledger = Arc::new(InMemoryCreditLedger::with_balance("u1", 10));
    let model: Arc<dyn LanguageModel> = Arc::new(MockModel);
    let orchestrator = build_orchestrator(
        Arc::clone(&model),
        Arc::new(FailingWeb),
        Arc::new(FailingScholar),
        Arc::clone(&ledger),
        Arc::new(delver_engine::AutoApprove),
        ResearchConfig::default(),
    );

    let outcome = orchestrator
        .run_research(params(1, 2, false), noop_progress())
        .await
        .unwrap();

    // Each sub-query contributes its fallback pseudo-result, but
    // placeholders never mint reference numbers
    assert_eq!(outcome.learnings.len(), 2);
    assert_eq!(outcome.visited_urls.len(), 2);
    assert!(outcome
        .visited_urls
        .iter()
        .all(|url| url.starts_with("https://example.com/fallback?query=")));
    assert!(outcome.reference_mapping.is_empty());

    // The degraded session still synthesizes a report with exactly one
    // topic-level reference
    let synthesizer = ReportSynthesizer::new(model);
    let report = synthesizer
        .synthesize(
            "test topic",
            &outcome.learnings,
            &outcome.visited_urls,
            &outcome.reference_mapping,
            &outcome.citations,
            "English",
        )
        .await
        .unwrap();
    assert!(report.markdown.contains("## References"));
    assert_eq!(report.references_total, 1);
    assert!(report.markdown.contains("test topic"));
    assert!(report.markdown.contains("no sources retrieved"));
}

#[tokio::test]
async fn insufficient_credits_reject_before_any_work() {
    let ledger = Arc::new(InMemoryCreditLedger::with_balance("u1", 1));
    let orchestrator = build_orchestrator(
        Arc::new(MockModel),
        Arc::new(StaticWeb),
        Arc::new(EmptyScholar),
        Arc::clone(&ledger),
        Arc::new(delver_engine::AutoApprove),
        ResearchConfig::default(),
    );

    // ceil(2 + 2*1 + 4*0.5) = 6 > 1
    let result = orchestrator
        .run_research(params(2, 4, false), noop_progress())
        .await;

    assert!(matches!(
        result,
        Err(DelverError::InsufficientCredits { required: 6, available: 1, .. })
    ));
    assert_eq!(ledger.get_balance("u1").await.unwrap(), 1);
    assert!(ledger.entries().is_empty());
}

#[tokio::test]
async fn planner_failure_refunds_the_debit() {
    let ledger = Arc::new(InMemoryCreditLedger::with_balance("u1", 10));
    let orchestrator = build_orchestrator(
        Arc::new(BrokenPlannerModel),
        Arc::new(StaticWeb),
        Arc::new(EmptyScholar),
        Arc::clone(&ledger),
        Arc::new(delver_engine::AutoApprove),
        ResearchConfig::default(),
    );

    let result = orchestrator
        .run_research(params(2, 2, false), noop_progress())
        .await;

    assert!(matches!(result, Err(DelverError::Planning { .. })));
    assert_eq!(ledger.get_balance("u1").await.unwrap(), 10);

    let entries = ledger.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].credits_used, 5);
    assert_eq!(entries[1].credits_used, -5);
}

#[tokio::test]
async fn hanging_question_handler_defaults_to_approval() {
    let ledger = Arc::new(InMemoryCreditLedger::with_balance("u1", 10));
    let config = ResearchConfig {
        question_timeout_ms: 50,
        ..ResearchConfig::default()
    };
    let orchestrator = build_orchestrator(
        Arc::new(MockModel),
        Arc::new(StaticWeb),
        Arc::new(EmptyScholar),
        ledger,
        Arc::new(HangingHandler),
        config,
    );

    let outcome = orchestrator
        .run_research(params(1, 2, true), noop_progress())
        .await
        .unwrap();

    // Timeout counts as "yes", so research proceeded
    assert!(!outcome.learnings.is_empty());
    assert!(!outcome.visited_urls.is_empty());
}

#[tokio::test]
async fn declined_sub_queries_complete_without_research() {
    let ledger = Arc::new(InMemoryCreditLedger::with_balance("u1", 10));
    let orchestrator = build_orchestrator(
        Arc::new(MockModel),
        Arc::new(StaticWeb),
        Arc::new(EmptyScholar),
        Arc::clone(&ledger),
        Arc::new(DecliningHandler),
        ResearchConfig::default(),
    );

    let outcome = orchestrator
        .run_research(params(1, 2, true), noop_progress())
        .await
        .unwrap();

    // Declines are not failures: no learnings, but the session completes
    // and the debit stands
    assert!(outcome.learnings.is_empty());
    assert!(outcome.visited_urls.is_empty());
    assert_eq!(ledger.get_balance("u1").await.unwrap(), 6);
}

#[tokio::test]
async fn snapshots_accumulate_per_depth_level() {
    let ledger = Arc::new(InMemoryCreditLedger::with_balance("u1", 10));
    let orchestrator = build_orchestrator(
        Arc::new(MockModel),
        Arc::new(StaticWeb),
        Arc::new(EmptyScholar),
        ledger,
        Arc::new(delver_engine::AutoApprove),
        ResearchConfig::default(),
    );

    let outcome = orchestrator
        .run_research(params(2, 2, false), noop_progress())
        .await
        .unwrap();

    let snapshot = orchestrator
        .latest_snapshot(&outcome.session_id)
        .await
        .expect("a snapshot per completed depth level");
    assert_eq!(snapshot.completed_depth, 2);
    assert_eq!(snapshot.learnings, outcome.learnings);
    assert_eq!(snapshot.status, delver_engine::SessionStatus::Completed);
}

#[tokio::test]
async fn snapshot_synthesizes_a_partial_report() {
    let ledger = Arc::new(InMemoryCreditLedger::with_balance("u1", 10));
    let model: Arc<dyn LanguageModel> = Arc::new(MockModel);
    let orchestrator = build_orchestrator(
        Arc::clone(&model),
        Arc::new(StaticWeb),
        Arc::new(EmptyScholar),
        ledger,
        Arc::new(delver_engine::AutoApprove),
        ResearchConfig::default(),
    );

    let outcome = orchestrator
        .run_research(params(1, 2, false), noop_progress())
        .await
        .unwrap();

    let snapshot = orchestrator
        .latest_snapshot(&outcome.session_id)
        .await
        .expect("completed session leaves a snapshot");

    // A snapshot carries everything synthesis needs, so a caller can
    // recover a report from a session that stopped short
    let report = ReportSynthesizer::new(model)
        .synthesize_snapshot(&snapshot)
        .await
        .unwrap();
    assert!(report.markdown.contains("## References"));
    assert_eq!(report.references_total, snapshot.reference_mapping.len());
    assert!(report.cited_in_body >= 1);
}

#[test]
fn registry_assigns_stable_numbers_across_batches() {
    let registry = ReferenceRegistry::new();
    assert_eq!(registry.get_or_assign("https://a.example"), 1);
    assert_eq!(registry.get_or_assign("https://b.example"), 2);
    // Re-encountering a URL in a later round keeps its number
    assert_eq!(registry.get_or_assign("https://a.example"), 1);
    assert_eq!(registry.get_or_assign("https://c.example"), 3);
}
