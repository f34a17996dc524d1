//! Result processor
//!
//! Takes the combined adapter results for one sub-query, assigns global
//! reference numbers through the registry, and extracts cited learnings and
//! follow-up questions with one LLM call.

use crate::registry::ReferenceRegistry;
use crate::types::{ProcessedResult, SearchResult};
use delver_core::DelverResult;
use delver_llm::{generate_structured, LanguageModel};
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Deserialize)]
struct ExtractionReply {
    #[serde(default)]
    learnings: Vec<String>,
    #[serde(default)]
    follow_up_questions: Vec<String>,
}

/// Remap bracketed citations in an extracted learning.
///
/// The model is given global numbers directly, so this is a safety net: a
/// number matching no global reference but falling inside the batch's
/// position range is treated as a local index and mapped to the global
/// number at that position. Anything else is left untouched, never dropped.
fn remap_citations(learning: &str, batch_numbers: &[u32]) -> String {
    let known: HashSet<u32> = batch_numbers.iter().copied().collect();
    let pattern = Regex::new(r"\[(\d+)\]").expect("static regex");

    pattern
        .replace_all(learning, |caps: &regex::Captures| {
            let text = &caps[0];
            let number: usize = match caps[1].parse() {
                Ok(n) => n,
                Err(_) => return text.to_string(),
            };
            if known.contains(&(number as u32)) {
                return text.to_string();
            }
            if number >= 1 && number <= batch_numbers.len() {
                return format!("[{}]", batch_numbers[number - 1]);
            }
            text.to_string()
        })
        .to_string()
}

/// Synthesize the fallback pseudo-result used when both adapters came back
/// empty, so every sub-query still yields at least one learning and URL.
fn fallback_result(query: &str) -> SearchResult {
    SearchResult::new(
        format!(
            "https://example.com/fallback?query={}",
            urlencoding::encode(query)
        ),
        format!("No sources found for: {}", query),
        format!(
            "No search results could be retrieved for the query \"{}\". \
             This placeholder records the attempted query so the research \
             trail stays complete. Treat any conclusion drawn from it as \
             unverified.",
            query
        ),
    )
}

/// Extracts learnings and follow-up questions from one sub-query's results
pub struct ResultProcessor {
    model: Arc<dyn LanguageModel>,
    max_learnings: usize,
    max_follow_up: usize,
}

impl ResultProcessor {
    pub fn new(model: Arc<dyn LanguageModel>, max_learnings: usize, max_follow_up: usize) -> Self {
        Self {
            model,
            max_learnings,
            max_follow_up,
        }
    }

    /// Process the combined result list for one sub-query.
    ///
    /// Deduplicates by URL preserving first appearance, assigns global
    /// numbers through the registry, and runs one extraction call. An empty
    /// input is replaced by the fallback pseudo-result.
    pub async fn process(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        registry: &ReferenceRegistry,
    ) -> DelverResult<ProcessedResult> {
        let mut unique: Vec<SearchResult> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for result in results {
            if seen.insert(result.url.clone()) {
                unique.push(result);
            }
        }

        let fallback_only = unique.is_empty();
        if fallback_only {
            info!(query = query, "No results from either adapter, using fallback pseudo-result");
            unique.push(fallback_result(query));
        }

        // Fallback pseudo-results stay unmapped: they are placeholders, not
        // citable sources, so an all-fallback session resolves to the
        // report's single topic-level reference instead of minting numbers.
        let mut reference_indexes: HashMap<String, u32> = HashMap::new();
        let mut batch_numbers: Vec<u32> = Vec::with_capacity(unique.len());
        let mut citations = HashMap::new();
        if !fallback_only {
            for result in &unique {
                let number = registry.get_or_assign(&result.url);
                reference_indexes.insert(result.url.clone(), number);
                batch_numbers.push(number);
                if let Some(citation) = &result.citation {
                    citations.insert(result.url.clone(), citation.clone());
                }
            }
        }

        let mut blocks = String::new();
        for result in &unique {
            match reference_indexes.get(&result.url) {
                Some(number) => blocks.push_str(&format!(
                    "<result reference=\"{}\">\nURL: {}\nTitle: {}\nContent: {}\n</result>\n\n",
                    number, result.url, result.title, result.content
                )),
                None => blocks.push_str(&format!(
                    "<result>\nURL: {}\nTitle: {}\nContent: {}\n</result>\n\n",
                    result.url, result.title, result.content
                )),
            }
        }

        let user_prompt = format!(
            "Research sub-query: \"{}\"\n\n\
             Below are {} search results, each tagged with its global reference number.\n\n\
             {}\
             Extract up to {} learnings: each a detailed, information-dense paragraph. \
             Every factual claim must cite its source using the exact bracketed reference \
             number given above, e.g. [3]. Never invent or renumber references. Results \
             without a reference number are placeholders and must not be cited.\n\
             Also produce up to {} follow-up questions that would deepen this research.",
            query,
            unique.len(),
            blocks,
            self.max_learnings,
            self.max_follow_up,
        );

        let reply: ExtractionReply = generate_structured(
            self.model.as_ref(),
            "You are a meticulous research analyst extracting cited learnings from search results.",
            &user_prompt,
            r#"Schema: {"learnings": [string], "follow_up_questions": [string]}"#,
        )
        .await?;

        let mut learnings: Vec<String> = reply
            .learnings
            .into_iter()
            .map(|learning| remap_citations(&learning, &batch_numbers))
            .collect();
        learnings.truncate(self.max_learnings);

        let mut follow_up_questions = reply.follow_up_questions;
        follow_up_questions.truncate(self.max_follow_up);

        debug!(
            query = query,
            learnings = learnings.len(),
            urls = unique.len(),
            "Processed sub-query results"
        );

        Ok(ProcessedResult {
            learnings,
            follow_up_questions,
            visited_urls: unique.iter().map(|r| r.url.clone()).collect(),
            reference_indexes,
            citations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_numbers_pass_through_unchanged() {
        let text = "Solar capacity grew 20% [7] while prices fell [9].";
        assert_eq!(remap_citations(text, &[7, 9]), text);
    }

    #[test]
    fn local_indexes_remap_to_global_numbers() {
        // Batch holds globals 7 and 9; "[1]" and "[2]" look like local echoes
        let text = "Capacity grew [1] and prices fell [2].";
        assert_eq!(
            remap_citations(text, &[7, 9]),
            "Capacity grew [7] and prices fell [9]."
        );
    }

    #[test]
    fn unmatched_numbers_are_left_untouched() {
        let text = "An odd citation [42] appears here.";
        assert_eq!(remap_citations(text, &[7, 9]), text);
    }

    #[test]
    fn fallback_result_encodes_the_query() {
        let result = fallback_result("solar panel efficiency");
        assert!(result
            .url
            .starts_with("https://example.com/fallback?query=solar%20panel%20efficiency"));
        assert!(result.content.contains("solar panel efficiency"));
    }

    struct FixedModel(&'static str);

    #[async_trait::async_trait]
    impl LanguageModel for FixedModel {
        async fn generate(&self, _system: &str, _user: &str) -> delver_core::DelverResult<String> {
            Ok(self.0.to_string())
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn empty_input_yields_an_unmapped_fallback() {
        let registry = ReferenceRegistry::new();
        let processor = ResultProcessor::new(
            Arc::new(FixedModel(
                r#"{"learnings": ["No verifiable sources were found."], "follow_up_questions": []}"#,
            )),
            3,
            3,
        );

        let processed = processor
            .process("obscure topic", Vec::new(), &registry)
            .await
            .unwrap();

        assert_eq!(processed.learnings.len(), 1);
        assert_eq!(processed.visited_urls.len(), 1);
        assert!(processed.visited_urls[0].starts_with("https://example.com/fallback?query="));
        // Placeholders never mint citation numbers
        assert!(processed.reference_indexes.is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn real_results_still_get_global_numbers() {
        let registry = ReferenceRegistry::new();
        let processor = ResultProcessor::new(
            Arc::new(FixedModel(
                r#"{"learnings": ["Fact [1]."], "follow_up_questions": []}"#,
            )),
            3,
            3,
        );

        let results = vec![SearchResult::new("https://a.example", "A", "content")];
        let processed = processor.process("q", results, &registry).await.unwrap();

        assert_eq!(processed.reference_indexes.get("https://a.example"), Some(&1));
        assert_eq!(registry.len(), 1);
    }
}
