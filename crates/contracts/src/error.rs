//! Layered error definitions
//!
//! Categorized by source: api usage / runtime / config / io

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== API Usage Errors =====
    /// Operation called out of order (e.g. allocation before `init`)
    #[error("wrong api call sequence: {message}")]
    WrongApiCallSequence { message: String },

    /// Argument outside its accepted range
    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    // ===== Runtime Errors =====
    /// Resource could not be created or allocated
    #[error("runtime error: {message}")]
    Runtime { message: String },

    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create wrong-api-call-sequence error
    pub fn wrong_api_call_sequence(message: impl Into<String>) -> Self {
        Self::WrongApiCallSequence {
            message: message.into(),
        }
    }

    /// Create invalid value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create runtime error
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}
