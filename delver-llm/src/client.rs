//! LLM client integration using siumai
//!
//! This module provides a unified interface for interacting with various
//! LLM providers through the siumai framework.

use crate::json::extract_json_object;
use async_trait::async_trait;
use delver_core::{retry_async, DelverError, DelverResult, ErrorContext, LlmConfig, RetryConfig};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use siumai::prelude::*;
use std::time::Instant;
use tracing::{debug, info};

/// The structured-call contract consumed by the research engine: a system
/// prompt plus a user prompt in, plain text out. Structured output is
/// layered on top via [`generate_structured`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> DelverResult<String>;

    fn model_name(&self) -> &str;
}

/// Call the model and parse its reply as a JSON object of type `T`.
///
/// Format instructions are appended to the user prompt; the reply is parsed
/// through the JSON extraction helper so fenced or prose-wrapped output
/// still deserializes. A transient provider failure or an unparseable reply
/// gets one retry before the error propagates.
pub async fn generate_structured<T: DeserializeOwned + Send>(
    model: &dyn LanguageModel,
    system_prompt: &str,
    user_prompt: &str,
    format_instructions: &str,
) -> DelverResult<T> {
    let prompt = format!(
        "{}\n\nRespond with a single JSON object, no other text. {}",
        user_prompt, format_instructions
    );

    retry_async(
        || {
            async {
                let response = model.generate(system_prompt, &prompt).await?;
                extract_json_object(&response)
            }
            .boxed()
        },
        RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 200,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter: true,
        },
        "generate_structured",
    )
    .await
}

/// Unified LLM client that supports multiple providers
pub struct SiumaiModel {
    client: Box<dyn LlmClient>,
    config: LlmConfig,
}

impl SiumaiModel {
    /// Create a new LLM client
    pub async fn new(config: LlmConfig) -> DelverResult<Self> {
        let client = Self::build_client(&config).await?;

        info!(
            "Created LLM client for provider: {} with model: {}",
            config.provider, config.model
        );

        Ok(Self { client, config })
    }

    /// Build the appropriate siumai client based on configuration
    async fn build_client(config: &LlmConfig) -> DelverResult<Box<dyn LlmClient>> {
        match config.provider.as_str() {
            "openai" => {
                let api_key = config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                    .ok_or_else(|| config_error(config, "OpenAI API key not found"))?;

                let mut builder = LlmBuilder::new()
                    .openai()
                    .api_key(&api_key)
                    .model(&config.model)
                    .temperature(config.temperature);

                if let Some(max_tokens) = config.max_tokens {
                    builder = builder.max_tokens(max_tokens);
                }

                if let Some(base_url) = &config.base_url {
                    builder = builder.base_url(base_url);
                }

                let client = builder
                    .build()
                    .await
                    .map_err(|e| build_error(config, "OpenAI", e))?;

                Ok(Box::new(client))
            }
            "anthropic" => {
                let api_key = config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                    .ok_or_else(|| config_error(config, "Anthropic API key not found"))?;

                let mut builder = LlmBuilder::new()
                    .anthropic()
                    .api_key(&api_key)
                    .model(&config.model)
                    .temperature(config.temperature);

                if let Some(max_tokens) = config.max_tokens {
                    builder = builder.max_tokens(max_tokens);
                }

                let client = builder
                    .build()
                    .await
                    .map_err(|e| build_error(config, "Anthropic", e))?;

                Ok(Box::new(client))
            }
            "ollama" => {
                let base_url = config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".to_string());

                let mut builder = LlmBuilder::new()
                    .ollama()
                    .model(&config.model)
                    .base_url(&base_url)
                    .temperature(config.temperature);

                if let Some(max_tokens) = config.max_tokens {
                    builder = builder.max_tokens(max_tokens);
                }

                let client = builder
                    .build()
                    .await
                    .map_err(|e| build_error(config, "Ollama", e))?;

                Ok(Box::new(client))
            }
            "groq" => {
                let api_key = config
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("GROQ_API_KEY").ok())
                    .ok_or_else(|| config_error(config, "Groq API key not found"))?;

                let mut builder = LlmBuilder::new()
                    .groq()
                    .api_key(&api_key)
                    .model(&config.model)
                    .temperature(config.temperature);

                if let Some(max_tokens) = config.max_tokens {
                    builder = builder.max_tokens(max_tokens);
                }

                let client = builder
                    .build()
                    .await
                    .map_err(|e| build_error(config, "Groq", e))?;

                Ok(Box::new(client))
            }
            provider => Err(DelverError::Config {
                message: format!("Unsupported LLM provider: {}", provider),
                source: None,
                context: ErrorContext::new("llm_client")
                    .with_operation("build_client")
                    .with_suggestion("Supported providers: openai, anthropic, ollama, groq"),
            }),
        }
    }

    /// Get the current configuration
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

#[async_trait]
impl LanguageModel for SiumaiModel {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> DelverResult<String> {
        let start_time = Instant::now();
        let messages = vec![system!(system_prompt), user!(user_prompt)];

        debug!("Generating response with {} messages", messages.len());

        let response = self.client.chat(messages).await.map_err(|e| DelverError::Llm {
            message: format!("LLM generation failed: {}", e),
            provider: Some(self.config.provider.clone()),
            model: Some(self.config.model.clone()),
            context: ErrorContext::new("llm_client").with_operation("generate"),
        })?;

        let generation_time = start_time.elapsed();

        if let Some(content) = response.content_text() {
            info!(
                "Generated response in {:?} ({} chars)",
                generation_time,
                content.len()
            );
            Ok(content.to_string())
        } else {
            Err(DelverError::Llm {
                message: "No text content in LLM response".to_string(),
                provider: Some(self.config.provider.clone()),
                model: Some(self.config.model.clone()),
                context: ErrorContext::new("llm_client").with_operation("generate"),
            })
        }
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn config_error(config: &LlmConfig, message: &str) -> DelverError {
    DelverError::Config {
        message: message.to_string(),
        source: None,
        context: ErrorContext::new("llm_client")
            .with_operation("build_client")
            .with_metadata("provider", &config.provider)
            .with_suggestion("Set the api_key in the [llm] config section")
            .with_suggestion("Or export the provider's API key environment variable"),
    }
}

fn build_error(
    config: &LlmConfig,
    provider: &str,
    error: impl std::error::Error + Send + Sync + 'static,
) -> DelverError {
    DelverError::Llm {
        message: format!("Failed to build {} client: {}", provider, error),
        provider: Some(config.provider.clone()),
        model: Some(config.model.clone()),
        context: ErrorContext::new("llm_client").with_operation("build_client"),
    }
}
