//! Progress reporting abstractions
//!
//! The pipeline and the batch scheduler report through [`ProgressProvider`]
//! without knowing who listens. [`EventProgress`] routes updates to the
//! event bus; [`NullProvider`] discards them.

use crate::events::{EventBus, ProgressCallback};
use std::path::PathBuf;
use std::sync::Arc;

/// Sink for progress updates
pub trait ProgressProvider: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Unified progress update type
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Bytes hashed for one file
    FileProgress {
        path: PathBuf,
        bytes_processed: u64,
        total_bytes: u64,
    },

    /// Files finished within a batch
    BatchProgress {
        completed: usize,
        total: usize,
        current_file: Option<PathBuf>,
    },
}

impl ProgressUpdate {
    /// Completion in percent, 100 when there is nothing to do
    pub fn percentage(&self) -> f32 {
        let (done, total) = self.counts();
        if total == 0 {
            100.0
        } else {
            ((done as f64 / total as f64) * 100.0).min(100.0) as f32
        }
    }

    fn counts(&self) -> (u64, u64) {
        match self {
            Self::FileProgress {
                bytes_processed,
                total_bytes,
                ..
            } => (*bytes_processed, *total_bytes),
            Self::BatchProgress {
                completed, total, ..
            } => (*completed as u64, *total as u64),
        }
    }
}

/// Null implementation for when no progress is needed
pub struct NullProvider;

impl ProgressProvider for NullProvider {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Forwards updates to the dispatch thread
///
/// Registered progress callbacks see file-level updates when `broadcast` is
/// set; the per-call callback, if any, sees every update routed to it.
pub struct EventProgress {
    bus: Arc<EventBus>,
    callback: Option<Arc<dyn ProgressCallback>>,
    broadcast: bool,
}

impl EventProgress {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            callback: None,
            broadcast: true,
        }
    }

    /// Also forward updates to a per-call callback
    pub fn with_callback(mut self, callback: Option<Arc<dyn ProgressCallback>>) -> Self {
        self.callback = callback;
        self
    }

    /// Skip registered callbacks and only serve the per-call one
    pub fn targeted(mut self) -> Self {
        self.broadcast = false;
        self
    }
}

impl ProgressProvider for EventProgress {
    fn report(&self, update: ProgressUpdate) {
        let percentage = update.percentage();
        let (done, total) = update.counts();

        if self.broadcast && matches!(update, ProgressUpdate::FileProgress { .. }) {
            self.bus.report_progress(percentage, done, total);
        }
        if let Some(callback) = &self.callback {
            self.bus.run_progress(callback, percentage, done, total);
        }
    }
}
