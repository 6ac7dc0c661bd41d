//! Internal engine error types

use thiserror::Error;

/// Internal engine errors
#[derive(Error, Debug)]
pub enum InternalError {
    /// Hash calculation error
    #[error("Hash calculation failed for algorithm '{algorithm}': {message}")]
    HashCalculation { algorithm: String, message: String },

    /// Memory limit exceeded
    #[error(
        "Memory limit exceeded: current usage {current} bytes would exceed limit of {limit} bytes"
    )]
    MemoryLimitExceeded { limit: usize, current: usize },

    /// Buffer pool error
    #[error("Buffer pool error: {message}")]
    BufferPool { message: String },

    /// Handle is stale, destroyed or was never issued
    #[error("Invalid {kind} handle")]
    InvalidHandle { kind: String },

    /// Every handle slot of an arena is in use
    #[error("Too many live {kind} handles")]
    HandlesExhausted { kind: String },

    /// Result requested while the unit of work is still running
    #[error("{kind} has not completed yet")]
    OperationNotComplete { kind: String },

    /// Work was cancelled cooperatively
    #[error("Operation cancelled")]
    Cancelled,

    /// Cache read, write or persistence failure
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Internal assertion failure
    #[error("Internal assertion failed: {message}")]
    Assertion { message: String },
}

impl InternalError {
    /// Create a hash calculation error
    pub fn hash_calculation(algorithm: &str, message: &str) -> Self {
        Self::HashCalculation {
            algorithm: algorithm.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a memory limit exceeded error
    pub fn memory_limit_exceeded(limit: usize, current: usize) -> Self {
        Self::MemoryLimitExceeded { limit, current }
    }

    /// Create a buffer pool error
    pub fn buffer_pool(message: impl Into<String>) -> Self {
        Self::BufferPool {
            message: message.into(),
        }
    }

    /// Create an invalid handle error
    pub fn invalid_handle(kind: &str) -> Self {
        Self::InvalidHandle {
            kind: kind.to_string(),
        }
    }

    /// Create a handles-exhausted error
    pub fn handles_exhausted(kind: &str) -> Self {
        Self::HandlesExhausted {
            kind: kind.to_string(),
        }
    }

    /// Create an operation-not-complete error
    pub fn operation_not_complete(kind: &str) -> Self {
        Self::OperationNotComplete {
            kind: kind.to_string(),
        }
    }

    /// Create a cache error
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create an internal assertion failure error
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }

    /// Check if this error is transient
    ///
    /// Resource exhaustion and busy results may succeed if retried later by
    /// the caller; the engine itself never retries.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MemoryLimitExceeded { .. }
                | Self::BufferPool { .. }
                | Self::HandlesExhausted { .. }
                | Self::OperationNotComplete { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_calculation_error() {
        let error = InternalError::hash_calculation("ED2K", "Chunk processing failed");
        assert!(error.to_string().contains("Hash calculation failed"));
        assert!(error.to_string().contains("ED2K"));
        assert!(error.to_string().contains("Chunk processing failed"));
    }

    #[test]
    fn test_memory_limit_exceeded_error() {
        let error = InternalError::memory_limit_exceeded(500_000_000, 600_000_000);
        assert!(error.to_string().contains("Memory limit exceeded"));
        assert!(error.to_string().contains("500000000"));
        assert!(error.to_string().contains("600000000"));
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_buffer_pool_error() {
        let error = InternalError::buffer_pool("All buffers in use");
        assert!(error.to_string().contains("Buffer pool error"));
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_invalid_handle_error() {
        let error = InternalError::invalid_handle("operation");
        assert_eq!(error.to_string(), "Invalid operation handle");
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_operation_not_complete_error() {
        let error = InternalError::operation_not_complete("Batch");
        assert!(error.to_string().contains("Batch has not completed"));
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_cache_error() {
        let error = InternalError::cache("rename failed");
        assert!(error.to_string().contains("Cache error"));
        assert!(error.to_string().contains("rename failed"));
    }

    #[test]
    fn test_assertion_error() {
        let error = InternalError::assertion("slot table out of sync");
        assert!(error.to_string().contains("Internal assertion failed"));
        assert!(!error.is_recoverable());
    }
}
