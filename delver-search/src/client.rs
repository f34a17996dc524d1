//! Shared HTTP client construction and response-error handling

use delver_core::{DelverError, DelverResult, ErrorContext};
use std::collections::HashMap;

/// Configuration for API clients
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL for the API
    pub base_url: String,
    /// API key for authentication
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
    /// Additional headers
    pub headers: HashMap<String, String>,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            timeout_seconds: 30,
            user_agent: "delver/0.1".to_string(),
            headers: HashMap::new(),
        }
    }
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            ..Default::default()
        }
    }

    /// Set additional header
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// Helper function to create HTTP client with common configuration
pub(crate) fn create_http_client(config: &ApiClientConfig) -> DelverResult<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();

    headers.insert(
        reqwest::header::USER_AGENT,
        reqwest::header::HeaderValue::from_str(&config.user_agent).map_err(|e| {
            DelverError::Search {
                message: format!("Invalid user agent: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?,
    );

    for (key, value) in &config.headers {
        let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
            DelverError::Search {
                message: format!("Invalid header name '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            }
        })?;

        let header_value =
            reqwest::header::HeaderValue::from_str(value).map_err(|e| DelverError::Search {
                message: format!("Invalid header value for '{}': {}", key, e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("http_client").with_operation("create_client"),
            })?;

        headers.insert(header_name, header_value);
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.timeout_seconds))
        .default_headers(headers)
        .build()
        .map_err(|e| DelverError::Search {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })?;

    Ok(client)
}

/// Helper function to handle HTTP response errors
pub(crate) async fn handle_response_error(
    response: reqwest::Response,
    operation: &str,
) -> DelverError {
    let status = response.status();
    let url = response.url().clone();

    let error_body = response.text().await.unwrap_or_default();

    DelverError::Search {
        message: format!(
            "HTTP {} error for {}: {}",
            status.as_u16(),
            url,
            if error_body.is_empty() {
                status.canonical_reason().unwrap_or("Unknown error")
            } else {
                &error_body
            }
        ),
        source: None,
        context: ErrorContext::new("search_client")
            .with_operation(operation)
            .with_suggestion(match status.as_u16() {
                401 => "Check your API key",
                403 => "Check API permissions or quota",
                404 => "Resource not found",
                429 => "Rate limit exceeded, slow down requests",
                _ => "Check network connectivity and API status",
            }),
    }
}
