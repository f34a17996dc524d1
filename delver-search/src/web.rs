//! General web search client
//!
//! Talks to an Exa-style search API: one POST per query, page text included
//! in the response so no separate fetch round-trip is needed.

use crate::client::{create_http_client, handle_response_error, ApiClientConfig};
use crate::{RawSearchResult, WebSearchProvider};
use async_trait::async_trait;
use delver_core::DelverResult;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    query: String,
    num_results: u32,
    #[serde(rename = "type")]
    search_type: String,
    contents: ContentsRequest,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentsRequest {
    text: TextRequest,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TextRequest {
    max_characters: u32,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<ResponseResult>,
}

#[derive(Deserialize)]
struct ResponseResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Web search client backed by an Exa-compatible HTTP API
pub struct HttpWebSearch {
    client: reqwest::Client,
    config: ApiClientConfig,
}

impl HttpWebSearch {
    pub fn new(config: ApiClientConfig) -> DelverResult<Self> {
        let client = create_http_client(&config)?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl WebSearchProvider for HttpWebSearch {
    async fn search(&self, query: &str, limit: usize) -> DelverResult<Vec<RawSearchResult>> {
        let request = SearchRequest {
            query: query.to_string(),
            num_results: limit.clamp(1, 10) as u32,
            search_type: "auto".to_string(),
            contents: ContentsRequest {
                text: TextRequest {
                    max_characters: 25_000,
                },
            },
        };

        debug!("Web search: {} (limit {})", query, limit);

        let mut req = self
            .client
            .post(format!("{}/search", self.config.base_url))
            .json(&request);
        if let Some(key) = &self.config.api_key {
            req = req.header("x-api-key", key);
        }

        let response = req.send().await.map_err(|e| {
            delver_core::DelverError::Search {
                message: format!("Web search request failed: {}", e),
                source: Some(Box::new(e)),
                context: delver_core::ErrorContext::new("web_search").with_operation("search"),
            }
        })?;

        if !response.status().is_success() {
            return Err(handle_response_error(response, "search").await);
        }

        let body: SearchResponse =
            response
                .json()
                .await
                .map_err(|e| delver_core::DelverError::Search {
                    message: format!("Failed to parse web search response: {}", e),
                    source: Some(Box::new(e)),
                    context: delver_core::ErrorContext::new("web_search")
                        .with_operation("parse_response"),
                })?;

        let results = body
            .results
            .into_iter()
            .map(|r| RawSearchResult {
                url: r.url,
                title: r.title.unwrap_or_default(),
                snippet: r.text.unwrap_or_default(),
            })
            .collect::<Vec<_>>();

        debug!("Web search returned {} results", results.len());
        Ok(results)
    }
}
