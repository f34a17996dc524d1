//! Academic citation search client
//!
//! Talks to a Semantic Scholar-style paper search API and fetches structured
//! citation data per paper through a second endpoint.

use crate::client::{create_http_client, handle_response_error, ApiClientConfig};
use crate::{Citation, ScholarProvider, ScholarResult};
use async_trait::async_trait;
use delver_core::{DelverError, DelverResult, ErrorContext, RateLimiter};
use log::{debug, warn};
use serde::Deserialize;

#[derive(Deserialize)]
struct PaperSearchResponse {
    #[serde(default)]
    data: Vec<PaperEntry>,
}

#[derive(Deserialize)]
struct PaperEntry {
    #[serde(rename = "paperId")]
    paper_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    r#abstract: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct PaperDetailResponse {
    #[serde(rename = "citationStyles")]
    citation_styles: Option<CitationStyles>,
}

#[derive(Deserialize)]
struct CitationStyles {
    #[serde(default)]
    apa: Option<String>,
    #[serde(default)]
    bibtex: Option<String>,
}

/// Academic search client backed by a Semantic Scholar-compatible HTTP API
pub struct HttpScholarSearch {
    client: reqwest::Client,
    config: ApiClientConfig,
    limiter: RateLimiter,
}

impl HttpScholarSearch {
    pub fn new(config: ApiClientConfig) -> DelverResult<Self> {
        let client = create_http_client(&config)?;
        // Public scholar APIs throttle aggressively; space requests out
        let limiter = RateLimiter::new(2, 1_000);
        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }
}

#[async_trait]
impl ScholarProvider for HttpScholarSearch {
    async fn search(&self, query: &str, limit: usize) -> DelverResult<Vec<ScholarResult>> {
        let url = format!(
            "{}/graph/v1/paper/search?query={}&limit={}&fields=title,abstract,url",
            self.config.base_url,
            urlencoding::encode(query),
            limit.clamp(1, 20)
        );

        debug!("Scholar search: {} (limit {})", query, limit);

        let _permit = self.limiter.acquire().await?;
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| DelverError::Search {
                message: format!("Scholar search request failed: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("scholar_search").with_operation("search"),
            })?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, "paper_search").await);
        }

        let body: PaperSearchResponse =
            response.json().await.map_err(|e| DelverError::Search {
                message: format!("Failed to parse scholar search response: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("scholar_search").with_operation("parse_response"),
            })?;

        let results = body
            .data
            .into_iter()
            .filter_map(|p| {
                // Papers without any landing page cannot be cited by URL
                let url = p.url.or_else(|| {
                    p.paper_id
                        .as_ref()
                        .map(|id| format!("https://www.semanticscholar.org/paper/{}", id))
                })?;
                Some(ScholarResult {
                    paper_id: p.paper_id,
                    url,
                    title: p.title.unwrap_or_default(),
                    snippet: p.r#abstract.unwrap_or_default(),
                })
            })
            .collect::<Vec<_>>();

        debug!("Scholar search returned {} results", results.len());
        Ok(results)
    }

    async fn fetch_citation(&self, paper_id: &str) -> DelverResult<Option<Citation>> {
        let url = format!(
            "{}/graph/v1/paper/{}?fields=citationStyles",
            self.config.base_url, paper_id
        );

        let _permit = self.limiter.acquire().await?;
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|e| DelverError::Search {
                message: format!("Citation fetch failed: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("scholar_search").with_operation("fetch_citation"),
            })?;

        if !response.status().is_success() {
            // Missing citation data is common; report it as absent, not fatal
            warn!(
                "Citation fetch for {} returned HTTP {}",
                paper_id,
                response.status()
            );
            return Ok(None);
        }

        let body: PaperDetailResponse =
            response.json().await.map_err(|e| DelverError::Search {
                message: format!("Failed to parse citation response: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("scholar_search").with_operation("parse_citation"),
            })?;

        Ok(body.citation_styles.and_then(|styles| {
            let citation = Citation {
                apa: styles.apa,
                bibtex: styles.bibtex,
            };
            if citation.is_empty() {
                None
            } else {
                Some(citation)
            }
        }))
    }
}
