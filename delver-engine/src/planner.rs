//! Query planner
//!
//! One LLM call per depth level turns the original topic plus all learnings
//! accumulated so far into the next round's search sub-queries. A failure
//! here is fatal to the session and propagates to the orchestrator.

use crate::types::SerpQuery;
use delver_core::{DelverError, DelverResult, ErrorContext};
use delver_llm::{generate_structured, LanguageModel};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

#[derive(Deserialize)]
struct PlanReply {
    #[serde(default)]
    queries: Vec<PlannedQuery>,
}

#[derive(Deserialize)]
struct PlannedQuery {
    query: String,
    #[serde(default)]
    research_goal: String,
}

pub struct QueryPlanner {
    model: Arc<dyn LanguageModel>,
}

impl QueryPlanner {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Generate up to `breadth` distinct sub-queries for the next round.
    /// Returns fewer when the model judges fewer to be meaningful; the list
    /// is never padded.
    pub async fn plan(
        &self,
        topic: &str,
        breadth: u32,
        learnings: &[String],
    ) -> DelverResult<Vec<SerpQuery>> {
        let learnings_block = if learnings.is_empty() {
            String::new()
        } else {
            format!(
                "\n\nLearnings accumulated so far:\n{}\n\nSharpen the new queries toward gaps \
                 these learnings imply; do not re-ask what is already answered.",
                learnings
                    .iter()
                    .map(|l| format!("- {}", l))
                    .collect::<Vec<_>>()
                    .join("\n")
            )
        };

        let user_prompt = format!(
            "Research topic: \"{}\"\n\n\
             Generate up to {} distinct web search queries to research this topic. \
             Avoid near-duplicate queries. Pair each query with a short research goal \
             explaining what it should uncover. Return fewer queries if fewer are \
             meaningful.{}",
            topic, breadth, learnings_block
        );

        let reply: PlanReply = generate_structured(
            self.model.as_ref(),
            "You are an expert research strategist planning search queries.",
            &user_prompt,
            r#"Schema: {"queries": [{"query": string, "research_goal": string}]}"#,
        )
        .await
        .map_err(|e| DelverError::Planning {
            message: format!("Query planning failed: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("query_planner")
                .with_operation("plan")
                .with_metadata("topic", topic),
        })?;

        let mut queries: Vec<SerpQuery> = reply
            .queries
            .into_iter()
            .filter(|q| !q.query.trim().is_empty())
            .map(|q| SerpQuery {
                query: q.query,
                research_goal: q.research_goal,
            })
            .collect();
        queries.truncate(breadth as usize);

        if queries.is_empty() {
            return Err(DelverError::Planning {
                message: "Planner returned no usable queries".to_string(),
                source: None,
                context: ErrorContext::new("query_planner")
                    .with_operation("plan")
                    .with_metadata("topic", topic),
            });
        }

        info!(topic = topic, count = queries.len(), "Planned sub-queries");
        Ok(queries)
    }
}
