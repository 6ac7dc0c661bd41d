//! Batch scheduling with FIFO admission and bounded concurrency
//!
//! Files are admitted in submission order. The number in flight is bounded
//! by the batch's `max_concurrent`, by the client-wide file permits and by
//! memory pressure: High halves the batch limit, Critical stops admission and
//! fails the remaining files with `OutOfMemory`.

use crate::api::{BatchOptions, BatchResult, FileResult, ProcessingStatus};
use crate::cancel::CancelToken;
use crate::client::{AniDBClient, EngineContext, FileJob, dedup, validate_path};
use crate::error::InternalError;
use crate::events::Event;
use crate::handles::Handle;
use crate::progress::{EventProgress, NullProvider, ProgressProvider, ProgressUpdate};
use crate::{Error, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Tracking state of one asynchronous batch
pub struct BatchState {
    total: usize,
    completed: AtomicUsize,
    cancel: CancelToken,
    result: Mutex<Option<BatchResult>>,
}

pub type BatchHandle = Handle<Arc<BatchState>>;

impl BatchState {
    fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            cancel: CancelToken::new(),
            result: Mutex::new(None),
        }
    }

    /// Files finished so far and files submitted
    pub fn progress(&self) -> (usize, usize) {
        (self.completed.load(Ordering::Acquire), self.total)
    }

    pub fn is_complete(&self) -> bool {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn store(&self, result: BatchResult) {
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
    }
}

impl std::fmt::Debug for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (completed, total) = self.progress();
        f.debug_struct("BatchState")
            .field("completed", &completed)
            .field("total", &total)
            .finish_non_exhaustive()
    }
}

fn file_job(ctx: &EngineContext, path: &Path, options: &BatchOptions) -> FileJob {
    let progress: Arc<dyn ProgressProvider> = if options.progress_reporting() {
        Arc::new(EventProgress::new(Arc::clone(&ctx.events)))
    } else {
        Arc::new(NullProvider)
    };

    FileJob {
        path: path.to_path_buf(),
        algorithms: dedup(options.algorithms()),
        use_cache: options.skip_existing(),
        verify_existing: false,
        progress,
        completion: None,
    }
}

/// Collects per-file results and fans out batch notifications
struct Collector<'a> {
    ctx: &'a EngineContext,
    options: &'a BatchOptions,
    state: &'a BatchState,
    progress: EventProgress,
    results: Vec<Option<FileResult>>,
}

impl Collector<'_> {
    fn record(&mut self, index: usize, result: FileResult) {
        let completed = self.state.completed.fetch_add(1, Ordering::AcqRel) + 1;
        let total = self.state.total;

        if let Some(callback) = self.options.file_complete_callback() {
            let snapshot = result.clone();
            self.ctx
                .events
                .run(move || callback.on_file_complete(&snapshot, completed, total));
        }
        self.progress.report(ProgressUpdate::BatchProgress {
            completed,
            total,
            current_file: Some(result.path.clone()),
        });

        self.results[index] = Some(result);
    }

    /// Record a result the file task never produced
    fn synthesize(&mut self, index: usize, result: FileResult) {
        self.ctx.events.report_completion(result.code());
        self.record(index, result);
    }
}

/// Run a batch to completion; always yields one result per path
pub(crate) async fn run_batch(
    ctx: Arc<EngineContext>,
    paths: Vec<PathBuf>,
    options: BatchOptions,
    state: Arc<BatchState>,
) -> BatchResult {
    let started = Instant::now();
    let total = paths.len();
    info!("Starting batch of {total} files");

    let mut collector = Collector {
        ctx: &*ctx,
        options: &options,
        state: &state,
        progress: EventProgress::new(Arc::clone(&ctx.events))
            .with_callback(options.progress_callback())
            .targeted(),
        results: vec![None; total],
    };

    let mut queue: VecDeque<(usize, PathBuf)> = paths.into_iter().enumerate().collect();
    let mut running = FuturesUnordered::new();
    let mut halted = false;

    loop {
        let mut limit = options.max_concurrent();
        while !halted && !state.cancel.is_cancelled() && !queue.is_empty() {
            limit = options
                .max_concurrent()
                .min(ctx.monitor.effective_concurrency(options.max_concurrent()));
            if running.len() >= limit {
                break;
            }
            let Some((index, path)) = queue.pop_front() else {
                break;
            };

            let job = file_job(&ctx, &path, &options);
            let cancel = state.cancel.clone();
            let task_ctx = Arc::clone(&ctx);
            let task = tokio::spawn(async move { task_ctx.run_permitted(&job, &cancel).await });
            running.push(async move { (index, path, task.await) });
        }

        if running.is_empty() {
            if limit == 0 && !halted && !state.cancel.is_cancelled() && !queue.is_empty() {
                let used = ctx.monitor.total_used();
                let limit_bytes = ctx.monitor.limit();
                warn!(
                    "Memory pressure is critical, failing {} queued files",
                    queue.len()
                );
                ctx.events.emit(Event::memory_warning(
                    used as u64,
                    limit_bytes as u64,
                    Some("critical"),
                ));

                let error =
                    Error::Internal(InternalError::memory_limit_exceeded(limit_bytes, used));
                for (index, path) in queue.drain(..) {
                    collector.synthesize(
                        index,
                        FileResult::failed(&path, 0, &error, started.elapsed()),
                    );
                }
            }
            break;
        }

        let Some((index, path, joined)) = running.next().await else {
            break;
        };
        let result = joined.unwrap_or_else(|e| {
            warn!("File task for {} failed: {e}", path.display());
            let error = Error::Internal(InternalError::assertion(format!("file task failed: {e}")));
            let result = FileResult::failed(&path, 0, &error, started.elapsed());
            ctx.events.report_completion(result.code());
            result
        });

        if result.status == ProcessingStatus::Failed && !options.continue_on_error() && !halted {
            debug!("Stopping batch after failure on {}", path.display());
            halted = true;
        }
        collector.record(index, result);
    }

    for (index, path) in queue.drain(..) {
        collector.synthesize(index, FileResult::cancelled(&path, 0, started.elapsed()));
    }

    let results = collector.results.into_iter().flatten().collect();
    let batch = BatchResult::from_results(results, started.elapsed());
    info!(
        "Batch finished: {} succeeded, {} failed, {} cancelled in {:?}",
        batch.successful_files, batch.failed_files, batch.cancelled_files, batch.total_time
    );

    ctx.persist_cache().await;
    batch
}

fn validate_batch(paths: &[PathBuf], options: &BatchOptions) -> Result<()> {
    options.validate()?;
    paths.iter().try_for_each(|path| validate_path(path))
}

impl AniDBClient {
    /// Process many files, blocking until every one has a result
    pub fn process_batch(&self, paths: &[PathBuf], options: &BatchOptions) -> Result<BatchResult> {
        validate_batch(paths, options)?;
        if paths.is_empty() {
            return Ok(BatchResult::from_results(Vec::new(), Default::default()));
        }

        let state = Arc::new(BatchState::new(paths.len()));
        Ok(self.runtime.block_on(run_batch(
            Arc::clone(&self.ctx),
            paths.to_vec(),
            options.clone(),
            state,
        )))
    }

    /// Start a batch in the background
    pub fn process_batch_async(
        &self,
        paths: &[PathBuf],
        options: &BatchOptions,
    ) -> Result<BatchHandle> {
        validate_batch(paths, options)?;

        let state = Arc::new(BatchState::new(paths.len()));
        let handle = self
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Arc::clone(&state))?;

        let ctx = Arc::clone(&self.ctx);
        let paths = paths.to_vec();
        let options = options.clone();
        self.runtime.spawn(async move {
            let result = run_batch(ctx, paths, options, Arc::clone(&state)).await;
            state.store(result);
        });

        debug!("Queued batch {handle:?}");
        Ok(handle)
    }

    fn batch(&self, handle: BatchHandle) -> Result<Arc<BatchState>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .cloned()
    }

    /// Files finished so far and files submitted
    pub fn batch_progress(&self, handle: BatchHandle) -> Result<(usize, usize)> {
        Ok(self.batch(handle)?.progress())
    }

    /// Stop admitting files and cancel those in flight
    pub fn cancel_batch(&self, handle: BatchHandle) -> Result<()> {
        self.batch(handle)?.cancel.cancel();
        Ok(())
    }

    /// Result of a finished batch; `Busy` while it is still running
    pub fn batch_result(&self, handle: BatchHandle) -> Result<BatchResult> {
        self.batch(handle)?
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Internal(InternalError::operation_not_complete("batch")))
    }

    /// Cancel if needed and release the handle
    pub fn destroy_batch(&self, handle: BatchHandle) -> Result<()> {
        let batch = self
            .batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle)?;
        if !batch.is_complete() {
            batch.cancel.cancel();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_batch_state_progress() {
        let state = BatchState::new(3);
        assert_eq!(state.progress(), (0, 3));
        assert!(!state.is_complete());

        state.completed.fetch_add(2, Ordering::AcqRel);
        assert_eq!(state.progress(), (2, 3));

        state.store(BatchResult::from_results(
            vec![FileResult::cancelled(Path::new("a"), 0, Duration::ZERO)],
            Duration::ZERO,
        ));
        assert!(state.is_complete());
    }

    #[test]
    fn test_validate_batch() {
        let options = BatchOptions::new();
        assert!(validate_batch(&[PathBuf::from("a.mkv")], &options).is_ok());
        assert!(validate_batch(&[], &options).is_ok());
        assert!(validate_batch(&[PathBuf::new()], &options).is_err());
        let zero = options.clone().with_max_concurrent(0);
        assert!(validate_batch(&[PathBuf::from("a")], &zero).is_err());
    }

    #[test]
    fn test_cancelled_results_count_separately() {
        let results = vec![
            FileResult::cancelled(Path::new("a"), 0, Duration::ZERO),
            FileResult::failed(Path::new("b"), 0, &Error::cancelled(), Duration::ZERO),
        ];
        let batch = BatchResult::from_results(results, Duration::ZERO);
        assert_eq!(batch.cancelled_files, 1);
        assert_eq!(batch.failed_files, 1);
        assert_eq!(batch.results[0].status, ProcessingStatus::Cancelled);
    }
}
