//! Delver Search - HTTP clients for the two result sources
//!
//! This crate provides API clients for the general web search provider and
//! the academic citation provider, behind traits so the engine can be
//! tested against mocks.

use async_trait::async_trait;
use delver_core::DelverResult;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod scholar;
pub mod web;

pub use client::ApiClientConfig;
pub use scholar::HttpScholarSearch;
pub use web::HttpWebSearch;

/// A raw result from the general web search provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSearchResult {
    /// Result URL
    pub url: String,
    /// Result title
    pub title: String,
    /// Text snippet or page content excerpt
    pub snippet: String,
}

/// A raw result from the academic search provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScholarResult {
    /// Provider-side paper identifier, used for citation lookups
    pub paper_id: Option<String>,
    /// Landing page URL
    pub url: String,
    /// Paper title
    pub title: String,
    /// Abstract or snippet
    pub snippet: String,
}

/// Structured citation data for an academic source
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Citation {
    /// APA-formatted citation string
    pub apa: Option<String>,
    /// BibTeX entry
    pub bibtex: Option<String>,
}

impl Citation {
    /// The citation string to render, preferring APA
    pub fn preferred(&self) -> Option<&str> {
        self.apa.as_deref().or(self.bibtex.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.apa.is_none() && self.bibtex.is_none()
    }
}

/// General web search provider
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    /// Run a search and return up to `limit` results
    async fn search(&self, query: &str, limit: usize) -> DelverResult<Vec<RawSearchResult>>;
}

/// Academic citation search provider
#[async_trait]
pub trait ScholarProvider: Send + Sync {
    /// Run a paper search and return up to `limit` results
    async fn search(&self, query: &str, limit: usize) -> DelverResult<Vec<ScholarResult>>;

    /// Fetch structured citation data for a paper, if available
    async fn fetch_citation(&self, paper_id: &str) -> DelverResult<Option<Citation>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_prefers_apa_over_bibtex() {
        let citation = Citation {
            apa: Some("Doe, J. (2024). A paper.".to_string()),
            bibtex: Some("@article{doe2024}".to_string()),
        };
        assert_eq!(citation.preferred(), Some("Doe, J. (2024). A paper."));
    }

    #[test]
    fn citation_falls_back_to_bibtex() {
        let citation = Citation {
            apa: None,
            bibtex: Some("@article{doe2024}".to_string()),
        };
        assert_eq!(citation.preferred(), Some("@article{doe2024}"));
        assert!(!citation.is_empty());
    }

    #[test]
    fn empty_citation_has_no_preferred_format() {
        assert!(Citation::default().preferred().is_none());
        assert!(Citation::default().is_empty());
    }
}
