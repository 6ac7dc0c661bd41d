//! Structured events produced while processing files

use crate::hashing::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Kind of structured event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum EventType {
    FileStart = 1,
    FileComplete = 2,
    HashStart = 3,
    HashComplete = 4,
    CacheHit = 5,
    CacheMiss = 6,
    NetworkStart = 7,
    NetworkComplete = 8,
    MemoryWarning = 9,
}

/// Event-specific data, one shape per event family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    File {
        path: PathBuf,
        size: u64,
    },
    Hash {
        algorithm: HashAlgorithm,
        /// Present on HashComplete only
        hash: Option<String>,
    },
    Cache {
        path: PathBuf,
        algorithm: HashAlgorithm,
    },
    Network {
        endpoint: String,
        status_code: i32,
    },
    Memory {
        current_usage: u64,
        max_usage: u64,
    },
}

/// A structured event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub payload: EventPayload,
    pub context: Option<String>,
}

impl Event {
    fn new(event_type: EventType, payload: EventPayload, context: Option<String>) -> Self {
        Self {
            event_type,
            timestamp_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
            payload,
            context,
        }
    }

    pub fn file_start(path: &Path, size: u64) -> Self {
        Self::new(
            EventType::FileStart,
            EventPayload::File {
                path: path.to_path_buf(),
                size,
            },
            None,
        )
    }

    pub fn file_complete(path: &Path, size: u64, context: Option<&str>) -> Self {
        Self::new(
            EventType::FileComplete,
            EventPayload::File {
                path: path.to_path_buf(),
                size,
            },
            context.map(str::to_string),
        )
    }

    /// Hash events carry the file path in `context`
    pub fn hash_start(path: &Path, algorithm: HashAlgorithm) -> Self {
        Self::new(
            EventType::HashStart,
            EventPayload::Hash {
                algorithm,
                hash: None,
            },
            Some(path.display().to_string()),
        )
    }

    pub fn hash_complete(path: &Path, algorithm: HashAlgorithm, hash: &str) -> Self {
        Self::new(
            EventType::HashComplete,
            EventPayload::Hash {
                algorithm,
                hash: Some(hash.to_string()),
            },
            Some(path.display().to_string()),
        )
    }

    pub fn cache_hit(path: &Path, algorithm: HashAlgorithm) -> Self {
        Self::new(
            EventType::CacheHit,
            EventPayload::Cache {
                path: path.to_path_buf(),
                algorithm,
            },
            None,
        )
    }

    pub fn cache_miss(path: &Path, algorithm: HashAlgorithm) -> Self {
        Self::new(
            EventType::CacheMiss,
            EventPayload::Cache {
                path: path.to_path_buf(),
                algorithm,
            },
            None,
        )
    }

    pub fn network_start(endpoint: &str) -> Self {
        Self::new(
            EventType::NetworkStart,
            EventPayload::Network {
                endpoint: endpoint.to_string(),
                status_code: 0,
            },
            None,
        )
    }

    pub fn network_complete(endpoint: &str, status_code: i32, context: Option<&str>) -> Self {
        Self::new(
            EventType::NetworkComplete,
            EventPayload::Network {
                endpoint: endpoint.to_string(),
                status_code,
            },
            context.map(str::to_string),
        )
    }

    pub fn memory_warning(current_usage: u64, max_usage: u64, context: Option<&str>) -> Self {
        Self::new(
            EventType::MemoryWarning,
            EventPayload::Memory {
                current_usage,
                max_usage,
            },
            context.map(str::to_string),
        )
    }

    /// File path this event refers to, if any
    pub fn path(&self) -> Option<&Path> {
        match &self.payload {
            EventPayload::File { path, .. } | EventPayload::Cache { path, .. } => Some(path),
            EventPayload::Hash { .. } => self.context.as_deref().map(Path::new),
            _ => None,
        }
    }
}
