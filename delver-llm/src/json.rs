//! JSON extraction helpers for structured LLM output
//!
//! Models are prompted to reply with JSON but routinely wrap it in prose or
//! code fences; these helpers pull the outermost JSON value out of the text.

use delver_core::{DelverError, DelverResult, ErrorContext};
use serde::de::DeserializeOwned;

/// Extract and parse the outermost JSON object from a model response
pub fn extract_json_object<T: DeserializeOwned>(response: &str) -> DelverResult<T> {
    extract_delimited(response, '{', '}')
}

/// Extract and parse the outermost JSON array from a model response
pub fn extract_json_array<T: DeserializeOwned>(response: &str) -> DelverResult<T> {
    extract_delimited(response, '[', ']')
}

fn extract_delimited<T: DeserializeOwned>(response: &str, open: char, close: char) -> DelverResult<T> {
    let candidate = match (response.find(open), response.rfind(close)) {
        (Some(start), Some(end)) if end > start => &response[start..=end],
        _ => response.trim(),
    };

    serde_json::from_str(candidate).map_err(|e| DelverError::Llm {
        message: format!("Failed to parse structured output: {}", e),
        provider: None,
        model: None,
        context: ErrorContext::new("llm_json")
            .with_operation("extract_json")
            .with_metadata("response_len", &response.len().to_string())
            .with_suggestion("Check the format instructions in the prompt"),
    })
}
