//! Error types for the AniDB hashing engine
//!
//! Errors are organized into the same four categories throughout the crate.
//! Every error maps onto a stable [`ResultCode`] for programmatic branching,
//! while the `Display` text is meant for humans and may change.

use crate::abi::ResultCode;
use thiserror::Error;

pub mod internal;
pub mod io;
pub mod protocol;
pub mod validation;

pub use self::io::{IoError, IoErrorKind};
pub use self::protocol::ProtocolError;
pub use self::validation::ValidationError;
pub use internal::InternalError;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the hashing engine
///
/// Errors are categorized into four main types:
/// - I/O errors: file system access while reading media files
/// - Protocol errors: failures reported by the identification collaborator
/// - Validation errors: caller-supplied parameters and configuration
/// - Internal errors: engine state (memory, cache, handles, cancellation)
#[derive(Error, Debug)]
pub enum Error {
    /// I/O related errors
    #[error(transparent)]
    Io(#[from] IoError),

    /// Protocol related errors
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Validation related errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Internal engine errors
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl Error {
    /// Coarse result code for this error
    pub fn code(&self) -> ResultCode {
        match self {
            Self::Io(err) => match err.kind {
                IoErrorKind::FileNotFound => ResultCode::FileNotFound,
                IoErrorKind::PermissionDenied => ResultCode::PermissionDenied,
                IoErrorKind::Other => ResultCode::Io,
            },
            Self::Protocol(ProtocolError::Timeout { .. }) => ResultCode::Timeout,
            Self::Protocol(_) => ResultCode::Network,
            Self::Validation(err) => match err {
                ValidationError::InvalidUtf8 { .. } => ResultCode::InvalidUtf8,
                ValidationError::VersionMismatch { .. } => ResultCode::VersionMismatch,
                _ => ResultCode::InvalidParameter,
            },
            Self::Internal(err) => match err {
                InternalError::HashCalculation { .. } => ResultCode::Processing,
                InternalError::MemoryLimitExceeded { .. } | InternalError::BufferPool { .. } => {
                    ResultCode::OutOfMemory
                }
                InternalError::InvalidHandle { .. } => ResultCode::InvalidHandle,
                InternalError::HandlesExhausted { .. }
                | InternalError::OperationNotComplete { .. } => ResultCode::Busy,
                InternalError::Cancelled => ResultCode::Cancelled,
                InternalError::Cache { .. } => ResultCode::Cache,
                InternalError::Assertion { .. } => ResultCode::Unknown,
            },
        }
    }

    /// Shorthand for the cooperative cancellation error
    pub fn cancelled() -> Self {
        Self::Internal(InternalError::Cancelled)
    }

    /// Whether this error reports a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Internal(InternalError::Cancelled))
    }

    /// Shorthand for an invalid parameter error
    pub(crate) fn invalid_parameter(parameter: &str, reason: &str) -> Self {
        Self::Validation(ValidationError::invalid_parameter(parameter, reason))
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Self::Io(IoError::from_std(source))
    }
}
