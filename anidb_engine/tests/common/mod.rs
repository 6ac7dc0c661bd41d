//! Common test utilities for integration tests

#![allow(dead_code)]

use anidb_engine::{AniDBClient, ClientConfig, EventType};
use anidb_test_utils::TestFileBuilder;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Temporary directory with a file builder and a client configuration
pub struct TestEnv {
    pub files: TestFileBuilder,
    pub config: ClientConfig,
    dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        Self {
            files: TestFileBuilder::new(dir.path()),
            config: ClientConfig::test(),
            dir,
        }
    }

    /// Persist the cache under the temporary directory
    pub fn with_cache_dir(mut self) -> Self {
        self.config.cache_dir = Some(self.cache_dir());
        self
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn client(&self) -> AniDBClient {
        AniDBClient::new(self.config.clone()).unwrap()
    }

    pub fn file(&mut self, name: &str, size: usize, seed: u64) -> PathBuf {
        self.files
            .generate_deterministic_file(name, size, seed)
            .unwrap()
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Event kinds currently queued on the client
pub fn queued_event_types(client: &AniDBClient) -> Vec<EventType> {
    client
        .poll_events(usize::MAX)
        .unwrap()
        .into_iter()
        .map(|event| event.event_type)
        .collect()
}
