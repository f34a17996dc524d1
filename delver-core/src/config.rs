//! Configuration management
//!
//! Loads `~/.delver/config.toml` with environment-variable overrides

use crate::error::{DelverError, DelverResult, ErrorContext};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the Delver system
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DelverConfig {
    #[serde(default)]
    pub research: ResearchConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Research loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Default number of sequential research rounds
    pub default_depth: u32,
    /// Default number of sub-queries per round
    pub default_breadth: u32,
    /// Maximum sub-queries in flight within one depth level
    pub concurrency: usize,
    /// Timeout for the interactive yes/no gate; expiry counts as "yes"
    pub question_timeout_ms: u64,
    /// Learnings extracted per sub-query
    pub max_learnings_per_query: usize,
    /// Follow-up questions collected per sub-query
    pub max_follow_up_questions: usize,
    /// Per-result content budget in characters fed to the LLM
    pub content_char_limit: usize,
    /// Target report language
    pub language: String,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            default_depth: 2,
            default_breadth: 4,
            concurrency: 2,
            question_timeout_ms: 3000,
            max_learnings_per_query: 3,
            max_follow_up_questions: 3,
            content_char_limit: 25_000,
            language: "English".to_string(),
        }
    }
}

/// Credit pricing settings; cost = ceil(base + depth*dm + breadth*bm)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    pub base_credits: f64,
    pub depth_multiplier: f64,
    pub breadth_multiplier: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_credits: 2.0,
            depth_multiplier: 1.0,
            breadth_multiplier: 0.5,
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (openai, anthropic, ollama, groq)
    pub provider: String,
    pub model: String,
    /// API key; falls back to the provider's environment variable
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            temperature: 0.7,
            max_tokens: Some(4000),
        }
    }
}

/// Search provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// General web search endpoint
    pub web_base_url: String,
    pub web_api_key: Option<String>,
    /// Academic citation search endpoint
    pub scholar_base_url: String,
    pub scholar_api_key: Option<String>,
    /// Result count requested per sub-query
    pub max_results: usize,
    pub timeout_seconds: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            web_base_url: "https://api.exa.ai".to_string(),
            web_api_key: None,
            scholar_base_url: "https://api.semanticscholar.org".to_string(),
            scholar_api_key: None,
            max_results: 5,
            timeout_seconds: 30,
        }
    }
}

impl DelverConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> DelverResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DelverError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: DelverConfig = toml::from_str(&content).map_err(|e| DelverError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> DelverResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| DelverError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| DelverError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// Default config file location (`~/.delver/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".delver").join("config.toml"))
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist, then apply environment overrides.
    pub fn load() -> DelverResult<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables take precedence over file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("DELVER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(provider) = std::env::var("DELVER_LLM_PROVIDER") {
            self.llm.provider = provider;
        }
        if let Ok(model) = std::env::var("DELVER_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(key) = std::env::var("DELVER_WEB_SEARCH_API_KEY") {
            self.search.web_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("DELVER_SCHOLAR_API_KEY") {
            self.search.scholar_api_key = Some(key);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> DelverResult<()> {
        if self.research.default_depth == 0 {
            return Err(DelverError::Config {
                message: "research.default_depth must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set research.default_depth to a positive value"),
            });
        }

        if self.research.default_breadth == 0 {
            return Err(DelverError::Config {
                message: "research.default_breadth must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set research.default_breadth to a positive value"),
            });
        }

        if self.research.concurrency == 0 {
            return Err(DelverError::Config {
                message: "research.concurrency must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set research.concurrency to a positive value"),
            });
        }

        if self.pricing.base_credits < 0.0
            || self.pricing.depth_multiplier < 0.0
            || self.pricing.breadth_multiplier < 0.0
        {
            return Err(DelverError::Config {
                message: "pricing values must be non-negative".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Check the [pricing] section"),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DelverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.research.concurrency, 2);
        assert_eq!(config.research.question_timeout_ms, 3000);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = DelverConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: DelverConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.research.default_breadth, config.research.default_breadth);
        assert_eq!(parsed.pricing.breadth_multiplier, config.pricing.breadth_multiplier);
    }

    #[test]
    fn zero_depth_fails_validation() {
        let mut config = DelverConfig::default();
        config.research.default_depth = 0;
        assert!(config.validate().is_err());
    }
}
