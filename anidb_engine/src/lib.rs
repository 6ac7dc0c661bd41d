//! AniDB hashing engine
//!
//! Streams media files once to compute ED2K, CRC32, MD5, SHA1 and TTH
//! digests, caches them by file identity, schedules work across many files
//! with bounded concurrency and delivers progress and events through a
//! dedicated dispatch thread.
//!
//! The entry point is [`AniDBClient`]; [`abi::Engine::init`] adds the ABI
//! version check used by bindings.

pub mod abi;
pub mod api;
pub mod batch;
pub mod cache;
pub mod cancel;
pub mod client;
pub mod error;
pub mod events;
pub mod handles;
pub mod hashing;
pub mod identification;
pub mod memory;
pub mod operation;
pub mod pipeline;
pub mod progress;
pub mod reader;

// Re-export main types
pub use abi::{ABI_VERSION, ClientRegistry, Engine, ResultCode};
pub use api::{
    BatchOptions, BatchResult, FileCompleteCallback, FileError, FileResult, ProcessOptions,
    ProcessingStatus,
};
pub use batch::BatchHandle;
pub use cache::{CacheEntry, CacheLookup, CacheStats, FileIdentity, HashCache};
pub use cancel::CancelToken;
pub use client::AniDBClient;
pub use error::{Error, Result};
pub use events::{
    Callback, CallbackId, CompletionCallback, ErrorCallback, Event, EventBus, EventListener,
    EventPayload, EventType, ProgressCallback,
};
pub use hashing::{Ed2kVariant, HashAlgorithm, HashRecord, hash_bytes};
pub use identification::{AnimeInfo, AnimeSource, Identifier};
pub use memory::{MemoryMonitor, MemoryPressure, MemoryStats};
pub use operation::OperationHandle;
pub use pipeline::HashPipeline;
pub use progress::{NullProvider, ProgressProvider, ProgressUpdate};
pub use reader::ChunkReader;

use error::ValidationError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Core client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Directory holding the persisted hash cache; `None` keeps it in memory
    pub cache_dir: Option<PathBuf>,
    pub max_concurrent_files: usize,
    pub chunk_size: usize,
    /// Memory limit in bytes, 0 selects the default
    pub max_memory_usage: usize,
    /// Fraction of the memory limit where pressure becomes Medium
    pub memory_medium_threshold: f64,
    /// Fraction where pressure becomes High and concurrency is halved
    pub memory_high_threshold: f64,
    /// Fraction where new work is refused
    pub memory_critical_threshold: f64,
    pub enable_debug_logging: bool,
    /// Capacity of the event poll queue
    pub event_queue_capacity: usize,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_name: Option<String>,
    pub client_version: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_dir: Self::default_cache_dir(),
            max_concurrent_files: 4,
            chunk_size: reader::DEFAULT_CHUNK_SIZE,
            max_memory_usage: memory::DEFAULT_MEMORY_LIMIT,
            memory_medium_threshold: memory::MEMORY_MEDIUM_THRESHOLD,
            memory_high_threshold: memory::MEMORY_WARNING_THRESHOLD,
            memory_critical_threshold: memory::MEMORY_CRITICAL_THRESHOLD,
            enable_debug_logging: false,
            event_queue_capacity: events::DEFAULT_EVENT_QUEUE_CAPACITY,
            username: None,
            password: None,
            client_name: None,
            client_version: None,
        }
    }
}

impl ClientConfig {
    /// Create a test configuration
    pub fn test() -> Self {
        Self {
            cache_dir: None,
            max_concurrent_files: 2,
            chunk_size: 1024,                    // 1KB chunks for faster tests
            max_memory_usage: 100 * 1024 * 1024, // 100MB for tests
            memory_medium_threshold: memory::MEMORY_MEDIUM_THRESHOLD,
            memory_high_threshold: memory::MEMORY_WARNING_THRESHOLD,
            memory_critical_threshold: memory::MEMORY_CRITICAL_THRESHOLD,
            enable_debug_logging: false,
            event_queue_capacity: events::DEFAULT_EVENT_QUEUE_CAPACITY,
            username: Some("testuser".to_string()),
            password: Some("testpass".to_string()),
            client_name: Some("testclient".to_string()),
            client_version: Some("1".to_string()),
        }
    }

    /// Platform cache directory for the engine
    pub fn default_cache_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("anidb"))
    }

    /// Layer defaults, an optional TOML file and `ANIDB_` environment variables
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        if let Some(path) = config_file
            && path.exists()
        {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("ANIDB_").split("__"));

        let config: Self = figment.extract().map_err(|e| {
            Error::Validation(ValidationError::invalid_configuration(&e.to_string()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Memory monitor settings derived from this configuration
    pub fn memory_config(&self) -> memory::MemoryConfig {
        memory::MemoryConfig {
            medium_threshold: self.memory_medium_threshold,
            high_threshold: self.memory_high_threshold,
            critical_threshold: self.memory_critical_threshold,
            ..memory::MemoryConfig::with_limit(self.max_memory_usage)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(Error::Validation(ValidationError::invalid_configuration(
                message,
            )))
        };

        if self.max_concurrent_files == 0 {
            return invalid("max_concurrent_files must be greater than zero");
        }
        if self.chunk_size == 0 {
            return invalid("chunk_size must be greater than zero");
        }
        if self.event_queue_capacity == 0 {
            return invalid("event_queue_capacity must be greater than zero");
        }
        self.memory_config().validate()
    }
}
