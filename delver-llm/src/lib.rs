//! Delver LLM - Language model provider layer
//!
//! Provides the `LanguageModel` trait consumed by the research engine and a
//! siumai-backed implementation supporting multiple providers.

pub mod client;
pub mod json;

pub use client::{generate_structured, LanguageModel, SiumaiModel};
pub use json::{extract_json_array, extract_json_object};
