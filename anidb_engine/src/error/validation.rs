//! Validation related error types
//!
//! These are always caller faults: they are returned synchronously before any
//! work starts and are never retried by the engine.

use thiserror::Error;

/// Validation and configuration errors
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Invalid input parameter
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    /// Missing required field
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// A string crossing the ABI was not valid UTF-8
    #[error("Invalid UTF-8 in '{parameter}'")]
    InvalidUtf8 { parameter: String },

    /// Caller was built against a different ABI version
    #[error("ABI version mismatch: engine provides {expected}, caller requested {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
}

impl ValidationError {
    /// Create an invalid configuration error
    pub fn invalid_configuration(message: &str) -> Self {
        Self::InvalidConfiguration {
            message: message.to_string(),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: &str, reason: &str) -> Self {
        Self::InvalidParameter {
            parameter: parameter.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
        }
    }

    /// Create an invalid UTF-8 error
    pub fn invalid_utf8(parameter: &str) -> Self {
        Self::InvalidUtf8 {
            parameter: parameter.to_string(),
        }
    }

    /// Create a version mismatch error
    pub fn version_mismatch(expected: u32, actual: u32) -> Self {
        Self::VersionMismatch { expected, actual }
    }
}
