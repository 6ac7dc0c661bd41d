//! Durable hash cache keyed by file identity
//!
//! A file is the same file only while its canonical path, size and
//! modification time all match. Entries are persisted as JSON in the cache
//! directory and reloaded on open.

use crate::abi::ResultCode;
use crate::events::{Event, EventBus};
use crate::hashing::{HashAlgorithm, HashRecord};
use crate::memory::MemoryMonitor;
use crate::{Error, Result, error::InternalError, error::IoError};
use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::UNIX_EPOCH;

/// File name of the persisted cache inside the cache directory
pub const CACHE_FILE_NAME: &str = "hash_cache.json";

/// Approximate bookkeeping bytes per entry on top of path and digests
const ENTRY_OVERHEAD: usize = 128;

/// Cache key: canonical path, size and modification time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    pub path: PathBuf,
    pub size: u64,
    /// Nanoseconds since the Unix epoch, 0 if unavailable
    pub modified_ns: u64,
}

impl FileIdentity {
    /// Stat a file and build its identity
    pub async fn from_path(path: &Path) -> Result<Self> {
        let canonical = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| IoError::for_path(path, e))?;
        let metadata = tokio::fs::metadata(&canonical)
            .await
            .map_err(|e| IoError::for_path(path, e))?;
        if !metadata.is_file() {
            return Err(IoError::not_a_file(path).into());
        }

        let modified_ns = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |elapsed| elapsed.as_nanos().min(u128::from(u64::MAX)) as u64);

        Ok(Self {
            path: canonical,
            size: metadata.len(),
            modified_ns,
        })
    }
}

/// Digests stored for one identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub identity: FileIdentity,
    pub hashes: Vec<HashRecord>,
    pub inserted_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl CacheEntry {
    fn new(identity: FileIdentity) -> Self {
        let now = Utc::now();
        Self {
            identity,
            hashes: Vec::new(),
            inserted_at: now,
            last_accessed: now,
        }
    }

    pub fn hash(&self, algorithm: HashAlgorithm) -> Option<&HashRecord> {
        self.hashes.iter().find(|r| r.algorithm == algorithm)
    }

    fn upsert(&mut self, record: HashRecord) {
        match self.hashes.iter_mut().find(|r| r.algorithm == record.algorithm) {
            Some(existing) => *existing = record,
            None => {
                self.hashes.push(record);
                self.hashes.sort_by_key(|r| r.algorithm.id());
            }
        }
    }

    fn size_estimate(&self) -> usize {
        self.identity.path.as_os_str().len()
            + self.hashes.iter().map(|r| r.hash.len()).sum::<usize>()
            + ENTRY_OVERHEAD
    }
}

/// Result of a multi-algorithm lookup, both lists in request order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheLookup {
    pub found: Vec<HashRecord>,
    pub missing: Vec<HashAlgorithm>,
}

impl CacheLookup {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_size_bytes: usize,
    pub hit_count: u64,
    pub miss_count: u64,
}

/// Thread-safe, optionally persistent hash cache
pub struct HashCache {
    file: Option<PathBuf>,
    entries: RwLock<HashMap<FileIdentity, Arc<Mutex<CacheEntry>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    total_bytes: AtomicUsize,
    report_lock: Mutex<()>,
    dirty: AtomicBool,
    events: Option<Arc<EventBus>>,
    monitor: Option<Arc<MemoryMonitor>>,
}

impl HashCache {
    /// Open a cache persisted under `cache_dir`, or a memory-only one
    ///
    /// A missing cache file starts empty; an unreadable one is logged and
    /// ignored.
    pub fn new(cache_dir: Option<&Path>) -> Self {
        let file = cache_dir.map(|dir| dir.join(CACHE_FILE_NAME));
        let loaded = file.as_deref().map(load_entries).unwrap_or_default();

        let total_bytes = loaded.iter().map(CacheEntry::size_estimate).sum();
        let entries = loaded
            .into_iter()
            .map(|entry| (entry.identity.clone(), Arc::new(Mutex::new(entry))))
            .collect();

        Self {
            file,
            entries: RwLock::new(entries),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            total_bytes: AtomicUsize::new(total_bytes),
            report_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
            events: None,
            monitor: None,
        }
    }

    /// Emit CacheHit/CacheMiss events and report persistence failures
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Account entry bytes against a memory monitor
    pub fn with_monitor(mut self, monitor: Arc<MemoryMonitor>) -> Self {
        monitor.set_cache_bytes(self.total_bytes.load(Ordering::Acquire));
        self.monitor = Some(monitor);
        self
    }

    /// Location of the persisted file, if persistent
    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    fn entry(&self, identity: &FileIdentity) -> Option<Arc<Mutex<CacheEntry>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    // Caller holds the map lock
    fn adjust_bytes(&self, before: usize, after: usize) {
        if after >= before {
            self.total_bytes.fetch_add(after - before, Ordering::AcqRel);
        } else {
            self.total_bytes.fetch_sub(before - after, Ordering::AcqRel);
        }
    }

    fn report_bytes(&self) {
        if let Some(monitor) = &self.monitor {
            let _guard = self.report_lock.lock().unwrap_or_else(PoisonError::into_inner);
            monitor.set_cache_bytes(self.total_bytes.load(Ordering::Acquire));
        }
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Look up several algorithms at once, counting a hit or miss for each
    pub fn lookup(&self, identity: &FileIdentity, algorithms: &[HashAlgorithm]) -> CacheLookup {
        let mut lookup = CacheLookup::default();

        match self.entry(identity) {
            Some(entry) => {
                let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
                for &algorithm in algorithms {
                    match entry.hash(algorithm) {
                        Some(record) => lookup.found.push(record.clone()),
                        None => lookup.missing.push(algorithm),
                    }
                }
                if !lookup.found.is_empty() {
                    entry.last_accessed = Utc::now();
                }
            }
            None => lookup.missing.extend_from_slice(algorithms),
        }

        self.hits
            .fetch_add(lookup.found.len() as u64, Ordering::Relaxed);
        self.misses
            .fetch_add(lookup.missing.len() as u64, Ordering::Relaxed);

        for record in &lookup.found {
            self.emit(Event::cache_hit(&identity.path, record.algorithm));
        }
        for &algorithm in &lookup.missing {
            self.emit(Event::cache_miss(&identity.path, algorithm));
        }

        trace!(
            "Cache lookup for {}: {} hit(s), {} miss(es)",
            identity.path.display(),
            lookup.found.len(),
            lookup.missing.len()
        );
        lookup
    }

    /// Store one digest; the last writer wins
    pub fn insert(&self, identity: &FileIdentity, record: HashRecord) {
        self.insert_all(identity, std::iter::once(record));
    }

    /// Store several digests for the same identity
    ///
    /// Entries for the same path with a different size or modification
    /// time are dropped.
    pub fn insert_all(
        &self,
        identity: &FileIdentity,
        records: impl IntoIterator<Item = HashRecord>,
    ) {
        let records: Vec<HashRecord> = records.into_iter().collect();

        // Bytes are accounted under the map lock; the read guard keeps the
        // entry mapped while it is updated.
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(identity) {
                self.update_entry(entry, records);
                return;
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(identity) {
            self.update_entry(entry, records);
            return;
        }

        let stale: Vec<FileIdentity> = entries
            .keys()
            .filter(|key| key.path == identity.path)
            .cloned()
            .collect();
        let mut released = 0;
        for key in stale {
            if let Some(old) = entries.remove(&key) {
                released += old
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .size_estimate();
                debug!("Dropped stale cache entry for {}", key.path.display());
            }
        }

        let mut entry = CacheEntry::new(identity.clone());
        for record in records {
            entry.upsert(record);
        }
        let added = entry.size_estimate();
        entries.insert(identity.clone(), Arc::new(Mutex::new(entry)));
        self.adjust_bytes(released, added);
        drop(entries);

        self.report_bytes();
        self.dirty.store(true, Ordering::Release);
    }

    // Caller holds the map lock
    fn update_entry(&self, entry: &Mutex<CacheEntry>, records: Vec<HashRecord>) {
        let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entry.size_estimate();
        for record in records {
            entry.upsert(record);
        }
        entry.last_accessed = Utc::now();
        self.adjust_bytes(before, entry.size_estimate());
        drop(entry);

        self.report_bytes();
        self.dirty.store(true, Ordering::Release);
    }

    /// Whether a digest is stored; does not touch the hit counters
    pub fn contains(&self, identity: &FileIdentity, algorithm: HashAlgorithm) -> bool {
        self.entry(identity).is_some_and(|entry| {
            entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .hash(algorithm)
                .is_some()
        })
    }

    /// Copy of the entry for an identity
    pub fn get(&self, identity: &FileIdentity) -> Option<CacheEntry> {
        self.entry(identity)
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Remove every entry for `path`, returning whether anything was removed
    pub fn invalidate(&self, path: &Path) -> bool {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut released = 0;
        entries.retain(|key, entry| {
            if key.path == canonical {
                released += entry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .size_estimate();
                false
            } else {
                true
            }
        });
        if released == 0 {
            return false;
        }
        self.adjust_bytes(released, 0);
        drop(entries);

        self.report_bytes();
        self.dirty.store(true, Ordering::Release);
        true
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
        self.total_bytes.store(0, Ordering::Release);
        drop(entries);

        self.report_bytes();
        self.dirty.store(true, Ordering::Release);
        debug!("Hash cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.len(),
            total_size_bytes: self.total_bytes.load(Ordering::Acquire),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Write the cache to disk if anything changed since the last flush
    pub fn flush(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let snapshot: Vec<CacheEntry> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .values()
                .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).clone())
                .collect()
        };

        let result = write_entries(file, &snapshot);
        match &result {
            Ok(()) => debug!(
                "Flushed {} cache entries to {}",
                snapshot.len(),
                file.display()
            ),
            Err(_) => self.dirty.store(true, Ordering::Release),
        }
        result
    }

    /// Flush, logging and reporting a failure instead of returning it
    pub fn persist(&self) {
        if let Err(e) = self.flush() {
            warn!("Failed to persist hash cache: {e}");
            if let Some(events) = &self.events {
                events.report_error(ResultCode::Cache, e.to_string(), self.file.clone());
            }
        }
    }
}

fn load_entries(file: &Path) -> Vec<CacheEntry> {
    let data = match std::fs::read(file) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Ignoring unreadable cache file {}: {e}", file.display());
            return Vec::new();
        }
    };

    match serde_json::from_slice::<Vec<CacheEntry>>(&data) {
        Ok(entries) => {
            debug!("Loaded {} cache entries from {}", entries.len(), file.display());
            entries
        }
        Err(e) => {
            warn!("Ignoring corrupt cache file {}: {e}", file.display());
            Vec::new()
        }
    }
}

fn write_entries(file: &Path, entries: &[CacheEntry]) -> Result<()> {
    let cache_error = |action: &str, e: &dyn std::fmt::Display| {
        Error::Internal(InternalError::cache(format!(
            "Failed to {action} {}: {e}",
            file.display()
        )))
    };

    if let Some(dir) = file.parent() {
        std::fs::create_dir_all(dir).map_err(|e| cache_error("create directory for", &e))?;
    }

    let data = serde_json::to_vec(entries).map_err(|e| cache_error("serialize", &e))?;
    let temp = file.with_extension("json.tmp");
    std::fs::write(&temp, data).map_err(|e| cache_error("write", &e))?;
    std::fs::rename(&temp, file).map_err(|e| cache_error("replace", &e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::memory::MemoryConfig;
    use tempfile::TempDir;

    fn identity(path: &str, size: u64, modified_ns: u64) -> FileIdentity {
        FileIdentity {
            path: PathBuf::from(path),
            size,
            modified_ns,
        }
    }

    fn record(algorithm: HashAlgorithm, hash: &str) -> HashRecord {
        HashRecord::new(algorithm, hash.to_string())
    }

    #[test]
    fn test_lookup_splits_found_and_missing() {
        let cache = HashCache::new(None);
        let id = identity("/anime/ep01.mkv", 100, 1);
        cache.insert(&id, record(HashAlgorithm::ED2K, "aa"));

        let lookup = cache.lookup(&id, &[HashAlgorithm::MD5, HashAlgorithm::ED2K]);
        assert_eq!(lookup.found, vec![record(HashAlgorithm::ED2K, "aa")]);
        assert_eq!(lookup.missing, vec![HashAlgorithm::MD5]);
        assert!(!lookup.is_complete());

        let stats = cache.stats();
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.entry_count, 1);
    }

    #[test]
    fn test_identity_mismatch_is_a_miss() {
        let cache = HashCache::new(None);
        cache.insert(&identity("/a.mkv", 100, 1), record(HashAlgorithm::CRC32, "01"));

        assert!(!cache.contains(&identity("/a.mkv", 101, 1), HashAlgorithm::CRC32));
        assert!(!cache.contains(&identity("/a.mkv", 100, 2), HashAlgorithm::CRC32));
        assert!(cache.contains(&identity("/a.mkv", 100, 1), HashAlgorithm::CRC32));
        assert_eq!(cache.stats().hit_count, 0);
    }

    #[test]
    fn test_last_writer_wins_and_stale_identity_dropped() {
        let cache = HashCache::new(None);
        let old = identity("/a.mkv", 100, 1);
        let new = identity("/a.mkv", 200, 2);

        cache.insert(&old, record(HashAlgorithm::MD5, "old"));
        cache.insert(&old, record(HashAlgorithm::MD5, "newer"));
        assert_eq!(cache.get(&old).unwrap().hashes, vec![record(HashAlgorithm::MD5, "newer")]);

        cache.insert(&new, record(HashAlgorithm::MD5, "fresh"));
        assert!(cache.get(&old).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = HashCache::new(None);
        cache.insert(&identity("/x/a.mkv", 1, 1), record(HashAlgorithm::SHA1, "a"));
        cache.insert(&identity("/x/b.mkv", 1, 1), record(HashAlgorithm::SHA1, "b"));

        assert!(cache.invalidate(Path::new("/x/a.mkv")));
        assert!(!cache.invalidate(Path::new("/x/a.mkv")));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().total_size_bytes, 0);
    }

    #[test]
    fn test_flush_and_reload() {
        let dir = TempDir::new().unwrap();
        let id = identity("/anime/ep02.mkv", 42, 7);

        {
            let cache = HashCache::new(Some(dir.path()));
            cache.insert_all(
                &id,
                [
                    record(HashAlgorithm::TTH, "tt"),
                    record(HashAlgorithm::ED2K, "ee"),
                ],
            );
            cache.flush().unwrap();
        }
        assert!(dir.path().join(CACHE_FILE_NAME).exists());
        assert!(!dir.path().join("hash_cache.json.tmp").exists());

        let reloaded = HashCache::new(Some(dir.path()));
        let entry = reloaded.get(&id).unwrap();
        // Stored in algorithm id order
        assert_eq!(entry.hashes[0].algorithm, HashAlgorithm::ED2K);
        assert_eq!(entry.hash(HashAlgorithm::TTH).unwrap().hash, "tt");
        assert!(reloaded.stats().total_size_bytes > 0);
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CACHE_FILE_NAME), b"{not json").unwrap();

        let cache = HashCache::new(Some(dir.path()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_flush_failure_reports_cache_error() {
        let dir = TempDir::new().unwrap();
        // A regular file where the cache directory should be
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();

        let cache = HashCache::new(Some(&blocker));
        cache.insert(&identity("/a.mkv", 1, 1), record(HashAlgorithm::CRC32, "00"));

        let err = cache.flush().unwrap_err();
        assert_eq!(err.code(), ResultCode::Cache);
        // Still dirty, so the next flush tries again
        assert!(cache.flush().is_err());
    }

    #[test]
    fn test_emits_hit_and_miss_events() {
        let bus = Arc::new(EventBus::new(16).unwrap());
        let cache = HashCache::new(None).with_events(Arc::clone(&bus));
        let id = identity("/a.mkv", 1, 1);
        cache.insert(&id, record(HashAlgorithm::CRC32, "00"));

        cache.lookup(&id, &[HashAlgorithm::CRC32, HashAlgorithm::MD5]);

        let kinds: Vec<EventType> = bus.poll(10).unwrap().iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![EventType::CacheHit, EventType::CacheMiss]);
    }

    #[test]
    fn test_reports_bytes_to_monitor() {
        let monitor = Arc::new(MemoryMonitor::new(MemoryConfig::with_limit(1 << 20)));
        let cache = HashCache::new(None).with_monitor(Arc::clone(&monitor));
        cache.insert(&identity("/a.mkv", 1, 1), record(HashAlgorithm::MD5, "ff"));

        assert_eq!(monitor.stats().cache_memory, cache.stats().total_size_bytes);
        cache.clear();
        assert_eq!(monitor.stats().cache_memory, 0);
    }

    fn live_bytes(cache: &HashCache) -> usize {
        cache
            .entries
            .read()
            .unwrap()
            .values()
            .map(|entry| entry.lock().unwrap().size_estimate())
            .sum()
    }

    #[test]
    fn test_concurrent_mutation_keeps_byte_total_exact() {
        let monitor = Arc::new(MemoryMonitor::new(MemoryConfig::with_limit(1 << 20)));
        let cache = Arc::new(HashCache::new(None).with_monitor(Arc::clone(&monitor)));
        let paths = ["/s/a.mkv", "/s/b.mkv", "/s/c.mkv", "/s/d.mkv"];

        let workers: Vec<_> = (0..8u64)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for round in 0..400u64 {
                        let path = paths[((worker + round) % 4) as usize];
                        let id = identity(path, 10, round % 3);
                        match (worker + round) % 7 {
                            0 => cache.clear(),
                            1 => {
                                cache.invalidate(Path::new(path));
                            }
                            _ => cache.insert_all(
                                &id,
                                [
                                    record(HashAlgorithm::ED2K, &"e".repeat(32)),
                                    record(HashAlgorithm::CRC32, &format!("{round:08x}")),
                                ],
                            ),
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let reported = cache.stats().total_size_bytes;
        assert_eq!(reported, live_bytes(&cache));
        assert!(reported <= paths.len() * 1024);
        assert_eq!(monitor.stats().cache_memory, reported);
    }

    #[test]
    fn test_concurrent_inserts_merge_into_one_entry() {
        let cache = Arc::new(HashCache::new(None));
        let id = identity("/s/shared.mkv", 64, 9);

        let workers: Vec<_> = HashAlgorithm::ALL
            .into_iter()
            .map(|algorithm| {
                let cache = Arc::clone(&cache);
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cache.insert(&id, record(algorithm, algorithm.name()));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let entry = cache.get(&id).unwrap();
        assert_eq!(entry.hashes.len(), HashAlgorithm::ALL.len());
        for algorithm in HashAlgorithm::ALL {
            assert!(cache.contains(&id, algorithm));
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().total_size_bytes, live_bytes(&cache));
    }

    #[tokio::test]
    async fn test_identity_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ep.mkv");
        std::fs::write(&path, b"12345").unwrap();

        let id = FileIdentity::from_path(&path).await.unwrap();
        assert_eq!(id.size, 5);
        assert!(id.path.is_absolute());
        assert!(id.modified_ns > 0);

        let missing = FileIdentity::from_path(&dir.path().join("nope")).await;
        assert_eq!(missing.unwrap_err().code(), ResultCode::FileNotFound);
    }
}
