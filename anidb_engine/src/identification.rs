//! Identification boundary
//!
//! The engine does not speak the AniDB protocol itself. An [`Identifier`]
//! implementation resolves `(ed2k, size)` pairs; results, including "not
//! found", are memoized for the lifetime of the client.

use crate::events::{Event, EventBus};
use crate::{Error, Result, error::ProtocolError};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Where identification data came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimeSource {
    Remote,
    Cache,
    FilenameGuess,
}

/// Anime episode matched to a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimeInfo {
    pub anime_id: u64,
    pub episode_id: u64,
    pub title: String,
    pub episode_number: u32,
    /// Match confidence in 0.0..=1.0
    pub confidence: f64,
    pub source: AnimeSource,
}

/// Resolves a file fingerprint to anime metadata
#[async_trait]
pub trait Identifier: Send + Sync {
    /// `Ok(None)` means the service does not know the file
    async fn identify(&self, ed2k: &str, size: u64) -> Result<Option<AnimeInfo>>;

    /// Endpoint name reported in network events
    fn endpoint(&self) -> &str {
        "anidb"
    }
}

/// Memoizing front for an optional [`Identifier`]
pub struct IdentificationService {
    identifier: Option<Arc<dyn Identifier>>,
    events: Arc<EventBus>,
    cache: Mutex<HashMap<(String, u64), Option<AnimeInfo>>>,
}

impl IdentificationService {
    pub fn new(identifier: Option<Arc<dyn Identifier>>, events: Arc<EventBus>) -> Self {
        Self {
            identifier,
            events,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn has_identifier(&self) -> bool {
        self.identifier.is_some()
    }

    pub async fn identify(&self, ed2k: &str, size: u64) -> Result<Option<AnimeInfo>> {
        validate_ed2k(ed2k)?;
        if size == 0 {
            return Err(Error::invalid_parameter("size", "must be greater than zero"));
        }

        let key = (ed2k.to_ascii_lowercase(), size);
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(cached) = cached {
            debug!("Identification cache hit for {}", key.0);
            return Ok(cached.map(|info| AnimeInfo {
                source: AnimeSource::Cache,
                ..info
            }));
        }

        let identifier = self
            .identifier
            .as_ref()
            .ok_or(Error::Protocol(ProtocolError::NoIdentifier))?;
        let endpoint = identifier.endpoint().to_string();

        self.events.emit(Event::network_start(&endpoint));
        let result = identifier.identify(&key.0, size).await;
        match &result {
            Ok(_) => self
                .events
                .emit(Event::network_complete(&endpoint, 200, None)),
            Err(e) => {
                self.events
                    .emit(Event::network_complete(&endpoint, 0, Some(&e.to_string())))
            }
        }

        let info = result?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, info.clone());
        Ok(info)
    }

    /// Forget memoized results
    pub fn clear(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn validate_ed2k(ed2k: &str) -> Result<()> {
    if ed2k.len() != 32 || !ed2k.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::invalid_parameter(
            "ed2k",
            "must be 32 hexadecimal characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ResultCode;
    use crate::events::EventType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HASH: &str = "A69899814931280E2F527219AD6AC754";

    struct Counting {
        calls: AtomicUsize,
        answer: Option<AnimeInfo>,
    }

    #[async_trait]
    impl Identifier for Counting {
        async fn identify(&self, ed2k: &str, _size: u64) -> Result<Option<AnimeInfo>> {
            assert_eq!(ed2k, HASH.to_ascii_lowercase());
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    fn info() -> AnimeInfo {
        AnimeInfo {
            anime_id: 1,
            episode_id: 2,
            title: "Cowboy Bebop".into(),
            episode_number: 1,
            confidence: 1.0,
            source: AnimeSource::Remote,
        }
    }

    #[tokio::test]
    async fn test_results_are_memoized() {
        let bus = Arc::new(EventBus::new(16).unwrap());
        let identifier = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            answer: Some(info()),
        });
        let service = IdentificationService::new(
            Some(identifier.clone() as Arc<dyn Identifier>),
            Arc::clone(&bus),
        );

        let first = service.identify(HASH, 12).await.unwrap().unwrap();
        assert_eq!(first.source, AnimeSource::Remote);

        let second = service.identify(HASH, 12).await.unwrap().unwrap();
        assert_eq!(second.source, AnimeSource::Cache);
        assert_eq!(second.title, first.title);
        assert_eq!(identifier.calls.load(Ordering::SeqCst), 1);

        let kinds: Vec<EventType> = bus.poll(10).unwrap().iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![EventType::NetworkStart, EventType::NetworkComplete]);
    }

    #[tokio::test]
    async fn test_negative_results_are_memoized() {
        let bus = Arc::new(EventBus::new(16).unwrap());
        let identifier = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let service =
            IdentificationService::new(Some(identifier.clone() as Arc<dyn Identifier>), bus);

        assert!(service.identify(HASH, 12).await.unwrap().is_none());
        assert!(service.identify(HASH, 12).await.unwrap().is_none());
        assert_eq!(identifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_and_missing_identifier() {
        let bus = Arc::new(EventBus::new(16).unwrap());
        let service = IdentificationService::new(None, bus);

        let short = service.identify("abc", 1).await.unwrap_err();
        assert_eq!(short.code(), ResultCode::InvalidParameter);

        let not_hex = service.identify(&"z".repeat(32), 1).await.unwrap_err();
        assert_eq!(not_hex.code(), ResultCode::InvalidParameter);

        let empty = service.identify(HASH, 0).await.unwrap_err();
        assert_eq!(empty.code(), ResultCode::InvalidParameter);

        let missing = service.identify(HASH, 1).await.unwrap_err();
        assert_eq!(missing.code(), ResultCode::Network);
    }
}
