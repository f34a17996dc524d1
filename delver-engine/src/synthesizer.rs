//! Report synthesizer
//!
//! Produces the final long-form Markdown report from accumulated session
//! state. The references block is built deterministically from the global
//! mapping; the model is instructed to cite those numbers but is never
//! trusted to own the References section.

use crate::types::ResearchSnapshot;
use delver_core::{DelverError, DelverResult, ErrorContext};
use delver_llm::LanguageModel;
use delver_search::Citation;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Synthesized report plus observability statistics
#[derive(Debug, Clone)]
pub struct Report {
    /// Final Markdown (body + references)
    pub markdown: String,
    /// Entries in the rendered references block
    pub references_total: usize,
    /// Unique reference numbers actually cited in the body
    pub cited_in_body: usize,
}

pub struct ReportSynthesizer {
    model: Arc<dyn LanguageModel>,
}

impl ReportSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Produce the full cited report. Fatal on failure; the caller decides
    /// whether to retry over a partial snapshot instead.
    pub async fn synthesize(
        &self,
        topic: &str,
        learnings: &[String],
        visited_urls: &[String],
        reference_mapping: &HashMap<String, u32>,
        citations: &HashMap<String, Citation>,
        language: &str,
    ) -> DelverResult<Report> {
        let references = build_references(topic, visited_urls, reference_mapping, citations);
        let references_block = render_references_block(&references);

        let learnings_block = if learnings.is_empty() {
            "(no learnings were extracted)".to_string()
        } else {
            learnings
                .iter()
                .map(|l| format!("- {}", l))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let user_prompt = format!(
            "Write a comprehensive research report in {} on the topic:\n\"{}\"\n\n\
             Learnings gathered during research (with bracketed citation numbers):\n{}\n\n\
             Available references:\n{}\n\n\
             Requirements:\n\
             - Markdown with these sections: Executive Abstract, Introduction/Background, \
             Key Findings, Detailed Discussion, Implications, Recommendations, Conclusion.\n\
             - Cite claims using the exact bracketed reference numbers listed above, \
             e.g. [2]. Never renumber references or invent new numbers.\n\
             - Be thorough and analytical; several paragraphs per section.",
            language, topic, learnings_block, references_block
        );

        let body = self
            .model
            .generate(
                "You are an expert research writer producing long-form cited reports.",
                &user_prompt,
            )
            .await
            .map_err(|e| DelverError::Synthesis {
                message: format!("Report generation failed: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("report_synthesizer")
                    .with_operation("synthesize")
                    .with_metadata("topic", topic),
            })?;

        // The model is never the sole source of the references section
        let markdown = if body.contains("## References") {
            body
        } else {
            format!("{}\n\n## References\n\n{}", body.trim_end(), references_block)
        };

        let valid_numbers: HashSet<u32> = references.iter().map(|(n, _)| *n).collect();
        let cited_in_body = count_cited(&markdown, &valid_numbers);

        info!(
            topic = topic,
            references = references.len(),
            cited = cited_in_body,
            "Report synthesized"
        );

        Ok(Report {
            markdown,
            references_total: references.len(),
            cited_in_body,
        })
    }

    /// Partial-results path: synthesize over whatever a session accumulated
    /// so far.
    pub async fn synthesize_snapshot(&self, snapshot: &ResearchSnapshot) -> DelverResult<Report> {
        self.synthesize(
            &snapshot.query,
            &snapshot.learnings,
            &snapshot.visited_urls,
            &snapshot.reference_mapping,
            &snapshot.citations,
            &snapshot.language,
        )
        .await
    }
}

/// Build the (number, rendered line) reference list, sorted by number.
/// URLs without a valid (>0) mapping are skipped; an empty list degrades to
/// exactly one fallback reference so the report is never uncited.
fn build_references(
    topic: &str,
    visited_urls: &[String],
    reference_mapping: &HashMap<String, u32>,
    citations: &HashMap<String, Citation>,
) -> Vec<(u32, String)> {
    let mut seen = HashSet::new();
    let mut references: Vec<(u32, String)> = Vec::new();

    for url in visited_urls {
        if !seen.insert(url.as_str()) {
            continue;
        }
        let number = match reference_mapping.get(url) {
            Some(&n) if n > 0 => n,
            _ => continue,
        };
        let rendered = citations
            .get(url)
            .and_then(|c| c.preferred())
            .map(|c| c.to_string())
            .unwrap_or_else(|| url.clone());
        references.push((number, rendered));
    }

    references.sort_by_key(|(n, _)| *n);

    if references.is_empty() {
        references.push((1, format!("Research topic: \"{}\" (no sources retrieved)", topic)));
    }

    references
}

fn render_references_block(references: &[(u32, String)]) -> String {
    references
        .iter()
        .map(|(number, line)| format!("[{}] {}", number, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Count unique valid reference numbers cited anywhere in the text
fn count_cited(markdown: &str, valid_numbers: &HashSet<u32>) -> usize {
    let pattern = Regex::new(r"\[(\d+)\]").expect("static regex");
    let mut cited = HashSet::new();
    for caps in pattern.captures_iter(markdown) {
        if let Ok(number) = caps[1].parse::<u32>() {
            if valid_numbers.contains(&number) {
                cited.insert(number);
            }
        }
    }
    cited.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_sort_by_number_and_prefer_citations() {
        let urls = vec![
            "https://b.example".to_string(),
            "https://a.example".to_string(),
        ];
        let mut mapping = HashMap::new();
        mapping.insert("https://a.example".to_string(), 1);
        mapping.insert("https://b.example".to_string(), 2);
        let mut citations = HashMap::new();
        citations.insert(
            "https://a.example".to_string(),
            Citation {
                apa: Some("Doe, J. (2024). A paper.".to_string()),
                bibtex: None,
            },
        );

        let references = build_references("t", &urls, &mapping, &citations);
        assert_eq!(references.len(), 2);
        assert_eq!(references[0], (1, "Doe, J. (2024). A paper.".to_string()));
        assert_eq!(references[1], (2, "https://b.example".to_string()));
    }

    #[test]
    fn empty_mapping_yields_one_fallback_reference() {
        let references = build_references("solar panels", &[], &HashMap::new(), &HashMap::new());
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].0, 1);
        assert!(references[0].1.contains("solar panels"));
    }

    #[test]
    fn unmapped_urls_are_skipped_not_crashed_on() {
        let urls = vec![
            "https://mapped.example".to_string(),
            "https://unmapped.example".to_string(),
        ];
        let mut mapping = HashMap::new();
        mapping.insert("https://mapped.example".to_string(), 3);

        let references = build_references("t", &urls, &mapping, &HashMap::new());
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].0, 3);
    }

    #[test]
    fn cited_count_ignores_unknown_numbers() {
        let valid: HashSet<u32> = [1, 2, 3].into_iter().collect();
        let text = "Finding [1] and [2], again [1], bogus [17].";
        assert_eq!(count_cited(text, &valid), 2);
    }
}
