//! Source adapters
//!
//! Two independent, failure-isolated fetchers. The web adapter is a thin
//! wrapper over the search provider; the academic adapter chains translation,
//! query refinement, and domain keyword augmentation before querying. Every
//! failure inside an adapter degrades to fewer results, never to an error.

use crate::types::SearchResult;
use delver_core::DelverResult;
use delver_llm::{generate_structured, LanguageModel};
use delver_search::{ScholarProvider, WebSearchProvider};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Truncate content to a character budget without splitting a UTF-8
/// character
pub(crate) fn truncate_content(content: &str, limit: usize) -> String {
    if content.len() <= limit {
        return content.to_string();
    }
    let mut end = limit;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    content[..end].to_string()
}

/// General web search adapter
pub struct WebSearchAdapter {
    provider: Arc<dyn WebSearchProvider>,
    max_results: usize,
    content_limit: usize,
}

impl WebSearchAdapter {
    pub fn new(provider: Arc<dyn WebSearchProvider>, max_results: usize, content_limit: usize) -> Self {
        Self {
            provider,
            max_results,
            content_limit,
        }
    }

    /// Fetch results for one sub-query. Any provider failure is logged and
    /// treated as zero results.
    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        match self.provider.search(query, self.max_results).await {
            Ok(results) => results
                .into_iter()
                .map(|r| SearchResult {
                    url: r.url,
                    title: r.title,
                    content: truncate_content(&r.snippet, self.content_limit),
                    citation: None,
                    translation_sourced: false,
                })
                .collect(),
            Err(e) => {
                warn!(query = query, error = %e, "Web search failed, continuing with zero results");
                Vec::new()
            }
        }
    }
}

#[derive(Deserialize)]
struct TranslationReply {
    translation: String,
    is_already_english: bool,
}

#[derive(Deserialize)]
struct RefinementReply {
    refined: String,
}

#[derive(Deserialize)]
struct DomainReply {
    domain: String,
}

#[derive(Deserialize)]
struct SubdomainReply {
    subdomain: String,
}

#[derive(Deserialize)]
struct VenueReply {
    venues: Vec<String>,
}

/// Coarse domains used for the first classification call
const DOMAINS: &[&str] = &[
    "computer science",
    "medicine",
    "biology",
    "physics",
    "chemistry",
    "mathematics",
    "engineering",
    "economics",
    "psychology",
    "social science",
    "environmental science",
];

/// Static subdomain to top-venue abbreviation table; the LLM fallback covers
/// everything missing here
fn static_venue_keywords(subdomain: &str) -> Option<&'static str> {
    match subdomain.to_lowercase().as_str() {
        "computer vision" => Some("CVPR ICCV ECCV"),
        "machine learning" => Some("NeurIPS ICML ICLR"),
        "natural language processing" => Some("ACL EMNLP NAACL"),
        "robotics" => Some("ICRA IROS RSS"),
        "databases" => Some("SIGMOD VLDB ICDE"),
        "computer networks" => Some("SIGCOMM NSDI INFOCOM"),
        "security" => Some("IEEE S&P CCS USENIX Security"),
        "human-computer interaction" => Some("CHI UIST CSCW"),
        "software engineering" => Some("ICSE FSE ASE"),
        "operating systems" => Some("SOSP OSDI EuroSys"),
        "computer graphics" => Some("SIGGRAPH TOG Eurographics"),
        "oncology" => Some("JCO Lancet Oncology Annals of Oncology"),
        "cardiology" => Some("Circulation JACC European Heart Journal"),
        "neuroscience" => Some("Nature Neuroscience Neuron Journal of Neuroscience"),
        "genetics" => Some("Nature Genetics AJHG Genome Research"),
        "immunology" => Some("Nature Immunology Immunity Journal of Immunology"),
        "materials science" => Some("Nature Materials Advanced Materials Acta Materialia"),
        "condensed matter physics" => Some("PRL PRB Nature Physics"),
        "astrophysics" => Some("ApJ MNRAS A&A"),
        "macroeconomics" => Some("AER QJE Econometrica"),
        "climate science" => Some("Nature Climate Change GRL Journal of Climate"),
        _ => None,
    }
}

/// Academic search adapter with the enhancement pipeline:
/// translation, refinement, domain keyword augmentation, then the provider
/// query plus citation fetches. Every stage has its own failure boundary.
pub struct AcademicSearchAdapter {
    provider: Arc<dyn ScholarProvider>,
    model: Arc<dyn LanguageModel>,
    max_results: usize,
    content_limit: usize,
}

impl AcademicSearchAdapter {
    pub fn new(
        provider: Arc<dyn ScholarProvider>,
        model: Arc<dyn LanguageModel>,
        max_results: usize,
        content_limit: usize,
    ) -> Self {
        Self {
            provider,
            model,
            max_results,
            content_limit,
        }
    }

    /// Fetch academic results for one sub-query. When the target language is
    /// not English the whole pipeline runs twice, the second time with forced
    /// translation, and new URLs from the second pass are unioned in.
    pub async fn search(&self, query: &str, language: &str) -> Vec<SearchResult> {
        let english_target = language.eq_ignore_ascii_case("english")
            || language.eq_ignore_ascii_case("en");

        let mut results = self.run_pipeline(query, english_target, false).await;

        if !english_target {
            let second_pass = self.run_pipeline(query, false, true).await;
            let known: HashSet<String> = results.iter().map(|r| r.url.clone()).collect();
            for mut result in second_pass {
                if !known.contains(&result.url) {
                    result.translation_sourced = true;
                    results.push(result);
                }
            }
        }

        results
    }

    async fn run_pipeline(
        &self,
        query: &str,
        skip_translation: bool,
        force_translation: bool,
    ) -> Vec<SearchResult> {
        // Stage 1: optional translation to English. The forced pass ignores
        // the model's own is-already-English judgement so the second run over
        // a non-English query cannot silently collapse into the first.
        let translated = if force_translation {
            self.translate_to_english(query, true).await
        } else if skip_translation {
            query.to_string()
        } else {
            self.translate_to_english(query, false).await
        };

        // Stage 2: academic phrasing refinement
        let refined = self.refine_academic_query(&translated).await;

        // Stage 3: domain keyword augmentation
        let keywords = self.venue_keywords(&refined).await;
        let final_query = match keywords {
            Some(ref kw) if !kw.is_empty() => format!("{} {}", refined, kw),
            _ => refined.clone(),
        };

        // Stage 4: provider query
        let papers = match self.provider.search(&final_query, self.max_results).await {
            Ok(papers) => papers,
            Err(e) => {
                warn!(query = %final_query, error = %e, "Academic search failed, continuing with zero results");
                return Vec::new();
            }
        };

        // Stage 5: per-result citation fetch
        let mut results = Vec::with_capacity(papers.len());
        for paper in papers {
            let citation = match &paper.paper_id {
                Some(id) => match self.provider.fetch_citation(id).await {
                    Ok(citation) => citation,
                    Err(e) => {
                        warn!(paper_id = %id, error = %e, "Citation fetch failed, keeping bare URL");
                        None
                    }
                },
                None => None,
            };

            let content = if paper.title.is_empty() {
                paper.snippet.clone()
            } else {
                format!("{}\n\n{}", paper.title, paper.snippet)
            };

            results.push(SearchResult {
                url: paper.url,
                title: paper.title,
                content: truncate_content(&content, self.content_limit),
                citation,
                translation_sourced: false,
            });
        }

        results
    }

    /// Translate the query to English; on failure the untranslated query is
    /// kept silently. With `force` set the model's is-already-English
    /// judgement is ignored and any non-empty translation is used.
    async fn translate_to_english(&self, query: &str, force: bool) -> String {
        let reply: DelverResult<TranslationReply> = generate_structured(
            self.model.as_ref(),
            "You translate search queries to English for academic paper search.",
            &format!("Translate this search query to English: \"{}\"", query),
            r#"Schema: {"translation": string, "is_already_english": boolean}"#,
        )
        .await;

        match reply {
            Ok(reply)
                if !reply.translation.trim().is_empty()
                    && (force || !reply.is_already_english) =>
            {
                debug!(original = query, translated = %reply.translation, "Translated query");
                reply.translation
            }
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!(query = query, error = %e, "Translation failed, using original query");
                query.to_string()
            }
        }
    }

    /// Rewrite the query into terse, paper-title-like phrasing. On failure
    /// or an empty rewrite the prior query is kept.
    async fn refine_academic_query(&self, query: &str) -> String {
        let reply: DelverResult<RefinementReply> = generate_structured(
            self.model.as_ref(),
            "You rewrite search queries into terse academic phrasing, like a paper title, under 10 words, no colloquialisms.",
            &format!("Rewrite this query for academic paper search: \"{}\"", query),
            r#"Schema: {"refined": string}"#,
        )
        .await;

        match reply {
            Ok(reply) if !reply.refined.trim().is_empty() => {
                debug!(original = query, refined = %reply.refined, "Refined query");
                reply.refined
            }
            Ok(_) => query.to_string(),
            Err(e) => {
                warn!(query = query, error = %e, "Query refinement failed, using prior query");
                query.to_string()
            }
        }
    }

    /// Classify the query into domain then subdomain, and map the subdomain
    /// to top-venue abbreviations. Any failure degrades to no extra keywords.
    async fn venue_keywords(&self, query: &str) -> Option<String> {
        let domain: DomainReply = match generate_structured(
            self.model.as_ref(),
            "You classify research queries into academic domains.",
            &format!(
                "Classify this query into exactly one of these domains: {}.\nQuery: \"{}\"",
                DOMAINS.join(", "),
                query
            ),
            r#"Schema: {"domain": string}"#,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(query = query, error = %e, "Domain detection failed, skipping venue keywords");
                return None;
            }
        };

        let subdomain: SubdomainReply = match generate_structured(
            self.model.as_ref(),
            "You classify research queries into academic subdomains.",
            &format!(
                "The query belongs to the domain \"{}\". Name its most specific subdomain (e.g. \"computer vision\", \"oncology\").\nQuery: \"{}\"",
                domain.domain, query
            ),
            r#"Schema: {"subdomain": string}"#,
        )
        .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(query = query, error = %e, "Subdomain detection failed, skipping venue keywords");
                return None;
            }
        };

        if let Some(keywords) = static_venue_keywords(&subdomain.subdomain) {
            return Some(keywords.to_string());
        }

        // No static entry: ask the model for plausible venue abbreviations
        match generate_structured::<VenueReply>(
            self.model.as_ref(),
            "You know the top publication venues of every academic field.",
            &format!(
                "List 3-5 abbreviations of top venues (conferences or journals) for the subdomain \"{}\".",
                subdomain.subdomain
            ),
            r#"Schema: {"venues": [string]}"#,
        )
        .await
        {
            Ok(reply) if !reply.venues.is_empty() => Some(reply.venues.join(" ")),
            Ok(_) => None,
            Err(e) => {
                warn!(subdomain = %subdomain.subdomain, error = %e, "Venue generation failed, skipping venue keywords");
                None
            }
        }
    }
}
