//! Public request and result types
//!
//! Options are built with `with_*` methods and validated when submitted;
//! results are plain data returned by the client.

use crate::abi::ResultCode;
use crate::events::{CompletionCallback, ProgressCallback};
use crate::hashing::{HashAlgorithm, HashRecord};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Options for processing a single file
///
/// # Examples
///
/// ```
/// use anidb_engine::api::ProcessOptions;
/// use anidb_engine::HashAlgorithm;
///
/// let options = ProcessOptions::new()
///     .with_algorithms(&[HashAlgorithm::ED2K, HashAlgorithm::CRC32])
///     .with_progress_reporting(true);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct ProcessOptions {
    algorithms: Vec<HashAlgorithm>,
    progress_reporting: bool,
    verify_existing: bool,
    progress_callback: Option<Arc<dyn ProgressCallback>>,
    completion_callback: Option<Arc<dyn CompletionCallback>>,
}

impl std::fmt::Debug for ProcessOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessOptions")
            .field("algorithms", &self.algorithms)
            .field("progress_reporting", &self.progress_reporting)
            .field("verify_existing", &self.verify_existing)
            .field("has_progress_callback", &self.progress_callback.is_some())
            .field("has_completion_callback", &self.completion_callback.is_some())
            .finish()
    }
}

impl ProcessOptions {
    /// Options with no algorithms selected
    pub fn new() -> Self {
        Self {
            algorithms: Vec::new(),
            progress_reporting: false,
            verify_existing: false,
            progress_callback: None,
            completion_callback: None,
        }
    }

    pub fn with_algorithms(mut self, algorithms: &[HashAlgorithm]) -> Self {
        self.algorithms = algorithms.to_vec();
        self
    }

    /// Send per-chunk progress to registered progress callbacks
    pub fn with_progress_reporting(mut self, enabled: bool) -> Self {
        self.progress_reporting = enabled;
        self
    }

    /// Recompute even on a full cache hit and compare with the cached digests
    pub fn with_verify_existing(mut self, verify: bool) -> Self {
        self.verify_existing = verify;
        self
    }

    /// Progress callback for this call only
    pub fn with_progress_callback(mut self, callback: impl ProgressCallback + 'static) -> Self {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Completion callback for this call only
    pub fn with_completion_callback(
        mut self,
        callback: impl CompletionCallback + 'static,
    ) -> Self {
        self.completion_callback = Some(Arc::new(callback));
        self
    }

    pub fn algorithms(&self) -> &[HashAlgorithm] {
        &self.algorithms
    }

    pub fn progress_reporting(&self) -> bool {
        self.progress_reporting
    }

    pub fn verify_existing(&self) -> bool {
        self.verify_existing
    }

    pub fn progress_callback(&self) -> Option<Arc<dyn ProgressCallback>> {
        self.progress_callback.clone()
    }

    pub fn completion_callback(&self) -> Option<Arc<dyn CompletionCallback>> {
        self.completion_callback.clone()
    }

    pub fn validate(&self) -> Result<()> {
        if self.algorithms.is_empty() {
            return Err(Error::invalid_parameter(
                "algorithms",
                "at least one hash algorithm must be specified",
            ));
        }
        Ok(())
    }
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self::new().with_algorithms(&[HashAlgorithm::ED2K])
    }
}

/// Called once per finished file of a batch with `(result, completed, total)`
pub trait FileCompleteCallback: Send + Sync {
    fn on_file_complete(&self, result: &FileResult, completed: usize, total: usize);
}

impl<F> FileCompleteCallback for F
where
    F: Fn(&FileResult, usize, usize) + Send + Sync,
{
    fn on_file_complete(&self, result: &FileResult, completed: usize, total: usize) {
        self(result, completed, total)
    }
}

/// Options for processing many files
///
/// # Examples
///
/// ```
/// use anidb_engine::api::BatchOptions;
/// use anidb_engine::HashAlgorithm;
///
/// let options = BatchOptions::new()
///     .with_algorithms(&[HashAlgorithm::ED2K])
///     .with_max_concurrent(4)
///     .with_continue_on_error(true);
/// assert!(options.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct BatchOptions {
    algorithms: Vec<HashAlgorithm>,
    max_concurrent: usize,
    continue_on_error: bool,
    skip_existing: bool,
    progress_reporting: bool,
    progress_callback: Option<Arc<dyn ProgressCallback>>,
    file_complete_callback: Option<Arc<dyn FileCompleteCallback>>,
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("algorithms", &self.algorithms)
            .field("max_concurrent", &self.max_concurrent)
            .field("continue_on_error", &self.continue_on_error)
            .field("skip_existing", &self.skip_existing)
            .field("progress_reporting", &self.progress_reporting)
            .finish()
    }
}

impl BatchOptions {
    pub fn new() -> Self {
        Self {
            algorithms: vec![HashAlgorithm::ED2K],
            max_concurrent: 4,
            continue_on_error: true,
            skip_existing: false,
            progress_reporting: false,
            progress_callback: None,
            file_complete_callback: None,
        }
    }

    pub fn with_algorithms(mut self, algorithms: &[HashAlgorithm]) -> Self {
        self.algorithms = algorithms.to_vec();
        self
    }

    /// Maximum number of files hashed at once within this batch
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Complete files whose digests are all cached without reading them
    pub fn with_skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    /// Send per-chunk progress of each file to registered progress callbacks
    pub fn with_progress_reporting(mut self, enabled: bool) -> Self {
        self.progress_reporting = enabled;
        self
    }

    /// Batch-level progress: percentage of files finished
    pub fn with_progress_callback(mut self, callback: impl ProgressCallback + 'static) -> Self {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_file_complete_callback(
        mut self,
        callback: impl FileCompleteCallback + 'static,
    ) -> Self {
        self.file_complete_callback = Some(Arc::new(callback));
        self
    }

    pub fn algorithms(&self) -> &[HashAlgorithm] {
        &self.algorithms
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn continue_on_error(&self) -> bool {
        self.continue_on_error
    }

    pub fn skip_existing(&self) -> bool {
        self.skip_existing
    }

    pub fn progress_reporting(&self) -> bool {
        self.progress_reporting
    }

    pub fn progress_callback(&self) -> Option<Arc<dyn ProgressCallback>> {
        self.progress_callback.clone()
    }

    pub fn file_complete_callback(&self) -> Option<Arc<dyn FileCompleteCallback>> {
        self.file_complete_callback.clone()
    }

    pub fn validate(&self) -> Result<()> {
        if self.algorithms.is_empty() {
            return Err(Error::invalid_parameter(
                "algorithms",
                "at least one hash algorithm must be specified",
            ));
        }
        if self.max_concurrent == 0 {
            return Err(Error::invalid_parameter(
                "max_concurrent",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a file or operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ProcessingStatus {
    Pending = 0,
    Processing = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Processing,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }
}

/// Error attached to a failed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileError {
    pub code: ResultCode,
    pub message: String,
}

impl From<&Error> for FileError {
    fn from(error: &Error) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// Outcome of processing one file
#[derive(Debug, Clone)]
pub struct FileResult {
    pub path: PathBuf,
    pub size: u64,
    pub status: ProcessingStatus,
    /// Digests in the order the algorithms were requested
    pub hashes: Vec<HashRecord>,
    pub processing_time: Duration,
    /// Every digest came from the cache
    pub from_cache: bool,
    pub error: Option<FileError>,
}

impl FileResult {
    pub(crate) fn failed(path: &Path, size: u64, error: &Error, elapsed: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            size,
            status: ProcessingStatus::Failed,
            hashes: Vec::new(),
            processing_time: elapsed,
            from_cache: false,
            error: Some(FileError::from(error)),
        }
    }

    pub(crate) fn cancelled(path: &Path, size: u64, elapsed: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            size,
            status: ProcessingStatus::Cancelled,
            hashes: Vec::new(),
            processing_time: elapsed,
            from_cache: false,
            error: Some(FileError::from(&Error::cancelled())),
        }
    }

    /// Hex digest for an algorithm, if computed
    pub fn hash(&self, algorithm: HashAlgorithm) -> Option<&str> {
        self.hashes
            .iter()
            .find(|r| r.algorithm == algorithm)
            .map(|r| r.hash.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.status == ProcessingStatus::Completed
    }

    /// Result code delivered to completion callbacks
    pub fn code(&self) -> ResultCode {
        match (&self.status, &self.error) {
            (ProcessingStatus::Completed, _) => ResultCode::Success,
            (ProcessingStatus::Cancelled, _) => ResultCode::Cancelled,
            (_, Some(error)) => error.code,
            (_, None) => ResultCode::Unknown,
        }
    }
}

/// Outcome of a batch
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub total_files: usize,
    pub successful_files: usize,
    pub failed_files: usize,
    pub cancelled_files: usize,
    /// One result per submitted path, in submission order
    pub results: Vec<FileResult>,
    pub total_time: Duration,
}

impl BatchResult {
    pub(crate) fn from_results(results: Vec<FileResult>, total_time: Duration) -> Self {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        let successful_files = count(ProcessingStatus::Completed);
        let cancelled_files = count(ProcessingStatus::Cancelled);

        Self {
            total_files: results.len(),
            successful_files,
            failed_files: results.len() - successful_files - cancelled_files,
            cancelled_files,
            results,
            total_time,
        }
    }
}
