//! Scripted identification backend

use anidb_engine::{AnimeInfo, AnimeSource, Error, Identifier, Result, error::ProtocolError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Answers identification requests from a fixed table
///
/// # Examples
///
/// ```rust
/// use anidb_test_utils::MockIdentifier;
///
/// let identifier = MockIdentifier::new()
///     .with_anime("a69899814931280e2f527219ad6ac754", 12, "Cowboy Bebop", 1);
/// assert_eq!(identifier.calls(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MockIdentifier {
    known: HashMap<(String, u64), AnimeInfo>,
    offline: AtomicBool,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a known file
    pub fn with_anime(mut self, ed2k: &str, size: u64, title: &str, episode: u32) -> Self {
        let anime_id = self.known.len() as u64 + 1;
        self.known.insert(
            (ed2k.to_ascii_lowercase(), size),
            AnimeInfo {
                anime_id,
                episode_id: anime_id * 1000 + u64::from(episode),
                title: title.to_string(),
                episode_number: episode,
                confidence: 1.0,
                source: AnimeSource::Remote,
            },
        );
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail every request with a network error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Requests that reached the backend
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Identifier for MockIdentifier {
    async fn identify(&self, ed2k: &str, size: u64) -> Result<Option<AnimeInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Protocol(ProtocolError::NetworkOffline));
        }
        Ok(self.known.get(&(ed2k.to_string(), size)).cloned())
    }

    fn endpoint(&self) -> &str {
        "mock"
    }
}
