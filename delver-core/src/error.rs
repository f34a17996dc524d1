//! Unified error handling system
//!
//! Provides structured error types with context, recovery suggestions, and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type DelverResult<T> = Result<T, DelverError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Main error type for the Delver system
#[derive(Error, Debug)]
pub enum DelverError {
    #[error("Search provider error: {message}")]
    Search {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("LLM error: {message}")]
    Llm {
        message: String,
        provider: Option<String>,
        model: Option<String>,
        context: ErrorContext,
    },

    #[error("Query planning error: {message}")]
    Planning {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Learning extraction error: {message}")]
    Extraction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Report synthesis error: {message}")]
    Synthesis {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits {
        required: u32,
        available: i64,
        context: ErrorContext,
    },

    #[error("Credit ledger error: {message}")]
    Ledger {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("Resource not found: {resource}")]
    NotFound {
        resource: String,
        context: ErrorContext,
    },

    #[error("Operation timeout: {operation}")]
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },
}

impl DelverError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            DelverError::Search { context, .. } => Some(context),
            DelverError::Llm { context, .. } => Some(context),
            DelverError::Planning { context, .. } => Some(context),
            DelverError::Extraction { context, .. } => Some(context),
            DelverError::Synthesis { context, .. } => Some(context),
            DelverError::InsufficientCredits { context, .. } => Some(context),
            DelverError::Ledger { context, .. } => Some(context),
            DelverError::Storage { context, .. } => Some(context),
            DelverError::Config { context, .. } => Some(context),
            DelverError::Network { context, .. } => Some(context),
            DelverError::Validation { context, .. } => Some(context),
            DelverError::NotFound { context, .. } => Some(context),
            DelverError::Timeout { context, .. } => Some(context),
            DelverError::Internal { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DelverError::Network { .. } | DelverError::Timeout { .. } | DelverError::Search { .. }
        )
    }

    /// Convenience constructor for LLM failures
    pub fn llm(message: impl Into<String>, component: &str) -> Self {
        DelverError::Llm {
            message: message.into(),
            provider: None,
            model: None,
            context: ErrorContext::new(component),
        }
    }

    /// Convenience constructor for search-provider failures
    pub fn search(message: impl Into<String>, component: &str) -> Self {
        DelverError::Search {
            message: message.into(),
            source: None,
            context: ErrorContext::new(component),
        }
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            DelverError::Internal { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Internal error occurred"
                );
            }
            DelverError::Config { .. } | DelverError::Validation { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Configuration or validation error"
                );
            }
            DelverError::Network { .. } | DelverError::Timeout { .. } | DelverError::Search { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Network or provider error (may be recoverable)"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        DelverError::Config {
            message: $msg.to_string(),
            source: None,
            context: ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'delver config --init' to create default config"),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        DelverError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: ErrorContext::new($component)
                .with_suggestion("Check the field value and format"),
        }
    };
}
