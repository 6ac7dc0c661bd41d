//! The engine client and its per-file processing flow

use crate::api::{FileResult, ProcessOptions, ProcessingStatus};
use crate::batch::BatchState;
use crate::cache::{CacheLookup, CacheStats, FileIdentity, HashCache};
use crate::cancel::CancelToken;
use crate::events::{Callback, CallbackId, CompletionCallback, Event, EventBus, EventListener};
use crate::handles::HandleArena;
use crate::hashing::{HashAlgorithm, HashRecord, hash_bytes};
use crate::identification::{AnimeInfo, IdentificationService, Identifier};
use crate::memory::{MemoryMonitor, MemoryStats};
use crate::operation::OperationState;
use crate::pipeline::HashPipeline;
use crate::progress::{EventProgress, NullProvider, ProgressProvider};
use crate::reader::ChunkReader;
use crate::{ClientConfig, Error, Result, abi::ResultCode, error::InternalError};
use log::{LevelFilter, debug, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;

/// One file to process and how
pub(crate) struct FileJob {
    pub(crate) path: PathBuf,
    pub(crate) algorithms: Vec<HashAlgorithm>,
    /// Consult the cache and short-circuit on a full hit
    pub(crate) use_cache: bool,
    pub(crate) verify_existing: bool,
    pub(crate) progress: Arc<dyn ProgressProvider>,
    pub(crate) completion: Option<Arc<dyn CompletionCallback>>,
}

/// State shared by the client and its spawned tasks
pub(crate) struct EngineContext {
    pub(crate) config: ClientConfig,
    pub(crate) events: Arc<EventBus>,
    pub(crate) monitor: Arc<MemoryMonitor>,
    pub(crate) cache: Arc<HashCache>,
    /// Client-wide bound on files hashed at once
    pub(crate) file_permits: Arc<Semaphore>,
    pub(crate) identification: IdentificationService,
}

impl EngineContext {
    /// Refuse new work under critical memory pressure
    pub(crate) fn admit(&self) -> Result<()> {
        self.monitor.check_admission().inspect_err(|_| {
            self.events.emit(Event::memory_warning(
                self.monitor.total_used() as u64,
                self.monitor.limit() as u64,
                Some("critical"),
            ));
        })
    }

    pub(crate) fn job(&self, path: &Path, options: &ProcessOptions) -> Result<FileJob> {
        options.validate()?;
        validate_path(path)?;

        let progress: Arc<dyn ProgressProvider> =
            match (options.progress_reporting(), options.progress_callback()) {
                (false, None) => Arc::new(NullProvider),
                (broadcast, callback) => {
                    let provider =
                        EventProgress::new(Arc::clone(&self.events)).with_callback(callback);
                    Arc::new(if broadcast {
                        provider
                    } else {
                        provider.targeted()
                    })
                }
            };

        Ok(FileJob {
            path: path.to_path_buf(),
            algorithms: dedup(options.algorithms()),
            use_cache: true,
            verify_existing: options.verify_existing(),
            progress,
            completion: options.completion_callback(),
        })
    }

    /// Process one file under a client-wide permit
    pub(crate) async fn run_permitted(&self, job: &FileJob, cancel: &CancelToken) -> FileResult {
        let started = Instant::now();
        match Arc::clone(&self.file_permits).acquire_owned().await {
            Ok(_permit) => self.run_file(job, cancel).await,
            Err(_) => {
                let error = Error::Internal(InternalError::assertion("file permits closed"));
                self.finish(job, FileResult::failed(&job.path, 0, &error, started.elapsed()))
            }
        }
    }

    /// Full per-file flow: identity, cache, hashing, events and callbacks
    pub(crate) async fn run_file(&self, job: &FileJob, cancel: &CancelToken) -> FileResult {
        let started = Instant::now();
        if cancel.is_cancelled() {
            return self.finish(job, FileResult::cancelled(&job.path, 0, started.elapsed()));
        }

        let identity = match FileIdentity::from_path(&job.path).await {
            Ok(identity) => identity,
            Err(error) => {
                self.events.emit(Event::file_start(&job.path, 0));
                return self.fail(job, 0, &error, started);
            }
        };

        let size = identity.size;
        self.events.emit(Event::file_start(&job.path, size));

        let result = match self.hash_identity(job, &identity, cancel).await {
            Ok((hashes, from_cache)) => {
                self.events.emit(Event::file_complete(&job.path, size, None));
                FileResult {
                    path: job.path.clone(),
                    size,
                    status: ProcessingStatus::Completed,
                    hashes,
                    processing_time: started.elapsed(),
                    from_cache,
                    error: None,
                }
            }
            Err(error) if error.is_cancelled() => {
                debug!("Processing of {} cancelled", job.path.display());
                FileResult::cancelled(&job.path, size, started.elapsed())
            }
            Err(error) => return self.fail(job, size, &error, started),
        };

        self.finish(job, result)
    }

    async fn hash_identity(
        &self,
        job: &FileJob,
        identity: &FileIdentity,
        cancel: &CancelToken,
    ) -> Result<(Vec<HashRecord>, bool)> {
        let cached = if job.use_cache {
            self.cache.lookup(identity, &job.algorithms)
        } else {
            CacheLookup {
                found: Vec::new(),
                missing: job.algorithms.clone(),
            }
        };

        if cached.is_complete() && !job.verify_existing {
            return Ok((cached.found, true));
        }

        let to_compute = if job.verify_existing {
            job.algorithms.clone()
        } else {
            cached.missing.clone()
        };

        let mut reader =
            ChunkReader::open(&job.path, self.config.chunk_size, &self.monitor).await?;
        for &algorithm in &to_compute {
            self.events.emit(Event::hash_start(&job.path, algorithm));
        }

        let computed = HashPipeline::new(&to_compute)?
            .run(&mut reader, cancel, job.progress.as_ref())
            .await?;
        drop(reader);

        for record in &computed {
            self.events
                .emit(Event::hash_complete(&job.path, record.algorithm, &record.hash));
        }

        if job.verify_existing {
            self.verify(job, &cached.found, &computed);
        }
        self.cache.insert_all(identity, computed.iter().cloned());

        let merged = job
            .algorithms
            .iter()
            .filter_map(|algorithm| {
                computed
                    .iter()
                    .chain(&cached.found)
                    .find(|r| r.algorithm == *algorithm)
                    .cloned()
            })
            .collect();
        Ok((merged, false))
    }

    fn verify(&self, job: &FileJob, cached: &[HashRecord], computed: &[HashRecord]) {
        for fresh in computed {
            let Some(old) = cached.iter().find(|r| r.algorithm == fresh.algorithm) else {
                continue;
            };
            if old.hash != fresh.hash {
                let message = format!(
                    "Cached {} digest for {} does not match: cached {}, computed {}",
                    fresh.algorithm.name(),
                    job.path.display(),
                    old.hash,
                    fresh.hash
                );
                warn!("{message}");
                self.events
                    .report_error(ResultCode::Cache, message, Some(job.path.clone()));
            }
        }
    }

    fn fail(&self, job: &FileJob, size: u64, error: &Error, started: Instant) -> FileResult {
        debug!("Failed to process {}: {error}", job.path.display());
        self.events
            .report_error(error.code(), error.to_string(), Some(job.path.clone()));
        self.events
            .emit(Event::file_complete(&job.path, size, Some("failed")));
        self.finish(
            job,
            FileResult::failed(&job.path, size, error, started.elapsed()),
        )
    }

    /// Deliver completion callbacks for a finished file
    pub(crate) fn finish(&self, job: &FileJob, result: FileResult) -> FileResult {
        let code = result.code();
        self.events.report_completion(code);
        if let Some(callback) = &job.completion {
            self.events.run_completion(callback, code);
        }
        result
    }

    /// Persist the cache off the async workers
    pub(crate) async fn persist_cache(&self) {
        let cache = Arc::clone(&self.cache);
        if tokio::task::spawn_blocking(move || cache.persist())
            .await
            .is_err()
        {
            warn!("Cache persistence task failed");
        }
    }
}

pub(crate) fn validate_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::invalid_parameter("file_path", "must not be empty"));
    }
    Ok(())
}

pub(crate) fn dedup(algorithms: &[HashAlgorithm]) -> Vec<HashAlgorithm> {
    let mut unique = Vec::with_capacity(algorithms.len());
    for &algorithm in algorithms {
        if !unique.contains(&algorithm) {
            unique.push(algorithm);
        }
    }
    unique
}

/// A hashing engine instance
///
/// Owns its worker runtime, event dispatcher and cache. Several clients may
/// coexist. Blocking methods must not be called from inside an async
/// context, and the client must not be dropped there either.
pub struct AniDBClient {
    pub(crate) ctx: Arc<EngineContext>,
    pub(crate) operations: Mutex<HandleArena<Arc<OperationState>>>,
    pub(crate) batches: Mutex<HandleArena<Arc<BatchState>>>,
    pub(crate) runtime: Runtime,
}

impl AniDBClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Client that can resolve digests through `identifier`
    pub fn with_identifier(config: ClientConfig, identifier: Arc<dyn Identifier>) -> Result<Self> {
        Self::build(config, Some(identifier))
    }

    fn build(config: ClientConfig, identifier: Option<Arc<dyn Identifier>>) -> Result<Self> {
        config.validate()?;
        if config.enable_debug_logging && log::max_level() < LevelFilter::Debug {
            log::set_max_level(LevelFilter::Debug);
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.max_concurrent_files.clamp(2, 16))
            .thread_name("anidb-worker")
            .enable_all()
            .build()?;

        let monitor = Arc::new(MemoryMonitor::new(config.memory_config()));
        let events = Arc::new(EventBus::new(config.event_queue_capacity)?);
        let cache = Arc::new(
            HashCache::new(config.cache_dir.as_deref())
                .with_events(Arc::clone(&events))
                .with_monitor(Arc::clone(&monitor)),
        );

        debug!(
            "Created client: {} concurrent files, {} byte chunks, cache {}",
            config.max_concurrent_files,
            config.chunk_size,
            config
                .cache_dir
                .as_deref()
                .map_or_else(|| "in memory".to_string(), |d| d.display().to_string())
        );

        let ctx = EngineContext {
            file_permits: Arc::new(Semaphore::new(config.max_concurrent_files)),
            identification: IdentificationService::new(identifier, Arc::clone(&events)),
            config,
            events,
            monitor,
            cache,
        };

        Ok(Self {
            ctx: Arc::new(ctx),
            operations: Mutex::new(HandleArena::new("operation")),
            batches: Mutex::new(HandleArena::new("batch")),
            runtime,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    /// Process one file, blocking until it finishes
    ///
    /// Invalid arguments are returned as `Err`; per-file failures are
    /// reported in the returned [`FileResult`].
    pub fn process(&self, path: &Path, options: &ProcessOptions) -> Result<FileResult> {
        let job = self.ctx.job(path, options)?;
        self.ctx.admit()?;

        let result = self
            .runtime
            .block_on(self.ctx.run_permitted(&job, &CancelToken::new()));
        self.ctx.cache.persist();
        Ok(result)
    }

    /// Hash a file with one algorithm, bypassing the cache
    pub fn calculate_hash(&self, path: &Path, algorithm: HashAlgorithm) -> Result<String> {
        validate_path(path)?;
        self.runtime.block_on(async {
            let mut reader =
                ChunkReader::open(path, self.ctx.config.chunk_size, &self.ctx.monitor).await?;
            let mut records = HashPipeline::new(&[algorithm])?
                .run(&mut reader, &CancelToken::new(), &NullProvider)
                .await?;
            records.pop().map(|record| record.hash).ok_or_else(|| {
                Error::Internal(InternalError::hash_calculation(
                    algorithm.name(),
                    "no digest produced",
                ))
            })
        })
    }

    /// Hash an in-memory buffer
    pub fn hash_buffer(&self, data: &[u8], algorithm: HashAlgorithm) -> String {
        hash_bytes(algorithm, data)
    }

    /// Whether a digest for the file's current identity is cached
    pub fn cache_check_file(&self, path: &Path, algorithm: HashAlgorithm) -> Result<bool> {
        validate_path(path)?;
        let identity = self.runtime.block_on(FileIdentity::from_path(path))?;
        Ok(self.ctx.cache.contains(&identity, algorithm))
    }

    /// Drop every cached digest, on disk as well
    pub fn cache_clear(&self) -> Result<()> {
        self.ctx.cache.clear();
        self.ctx.cache.flush()
    }

    /// Drop cached digests for one path
    pub fn cache_invalidate(&self, path: &Path) -> bool {
        self.ctx.cache.invalidate(path)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.ctx.cache.stats()
    }

    /// Write pending cache changes to disk
    pub fn cache_flush(&self) -> Result<()> {
        self.ctx.cache.flush()
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.ctx.monitor.stats()
    }

    /// Release pooled chunk buffers
    pub fn memory_shrink(&self) -> usize {
        self.ctx.monitor.shrink()
    }

    /// Resolve a fingerprint through the configured [`Identifier`]
    pub fn identify(&self, ed2k: &str, size: u64) -> Result<Option<AnimeInfo>> {
        self.runtime
            .block_on(self.ctx.identification.identify(ed2k, size))
    }

    pub fn register_callback(&self, callback: Callback) -> CallbackId {
        self.ctx.events.register(callback)
    }

    pub fn unregister_callback(&self, id: CallbackId) -> Result<()> {
        self.ctx.events.unregister(id)
    }

    /// Install the event listener, replacing any previous one
    pub fn connect_events(&self, listener: Arc<dyn EventListener>) {
        self.ctx.events.connect(listener);
    }

    pub fn disconnect_events(&self) {
        self.ctx.events.disconnect();
    }

    pub fn is_events_connected(&self) -> bool {
        self.ctx.events.is_connected()
    }

    /// Take queued events while no listener is connected
    pub fn poll_events(&self, max_events: usize) -> Result<Vec<Event>> {
        self.ctx.events.poll(max_events)
    }

    pub fn dropped_events(&self) -> u64 {
        self.ctx.events.dropped_events()
    }

    /// Wait until every event and callback sent so far has been delivered
    pub fn flush_events(&self) {
        self.ctx.events.flush();
    }
}

impl Drop for AniDBClient {
    fn drop(&mut self) {
        let operations = self.operations.get_mut().unwrap_or_else(PoisonError::into_inner);
        for operation in operations.drain() {
            operation.cancel_token().cancel();
        }
        let batches = self.batches.get_mut().unwrap_or_else(PoisonError::into_inner);
        for batch in batches.drain() {
            batch.cancel_token().cancel();
        }
        self.ctx.cache.persist();
        debug!("Client dropped");
    }
}

impl std::fmt::Debug for AniDBClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AniDBClient")
            .field("config", &self.ctx.config)
            .finish_non_exhaustive()
    }
}
