//! Protocol related error types
//!
//! Raised by the identification collaborator behind [`crate::Identifier`].

use thiserror::Error;

/// Errors reported while identifying a file against AniDB
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Network is offline or AniDB service unavailable
    #[error("Network is offline or AniDB service unavailable")]
    NetworkOffline,

    /// No identification backend was configured for this client
    #[error("No identification backend configured")]
    NoIdentifier,

    /// AniDB API error with response code
    #[error("AniDB API error: {code} - {message}")]
    ServerError { code: u16, message: String },

    /// Request did not complete in time
    #[error("Request timed out: {operation}")]
    Timeout { operation: String },

    /// Generic protocol error
    #[error("Protocol error: {message}")]
    Other { message: String },
}

impl ProtocolError {
    /// Create a server error with code and message
    pub fn server_error(code: u16, message: &str) -> Self {
        Self::ServerError {
            code,
            message: message.to_string(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: &str) -> Self {
        Self::Timeout {
            operation: operation.to_string(),
        }
    }

    /// Create a generic protocol error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Check if this error is transient and can be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkOffline | Self::Timeout { .. } => true,
            Self::ServerError { code, .. } => matches!(code, 500..=504 | 600..=604),
            Self::NoIdentifier | Self::Other { .. } => false,
        }
    }
}
