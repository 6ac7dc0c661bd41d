//! Asynchronous single-file operations

use crate::api::{FileResult, ProcessOptions, ProcessingStatus};
use crate::cancel::CancelToken;
use crate::client::AniDBClient;
use crate::error::InternalError;
use crate::handles::Handle;
use crate::{Error, ResultCode, Result};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Tracking state of one asynchronous operation
pub struct OperationState {
    path: PathBuf,
    status: AtomicU8,
    cancel: CancelToken,
    result: Mutex<Option<FileResult>>,
}

pub type OperationHandle = Handle<Arc<OperationState>>;

impl OperationState {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            status: AtomicU8::new(ProcessingStatus::Pending as u8),
            cancel: CancelToken::new(),
            result: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> ProcessingStatus {
        ProcessingStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Move from Pending to Processing unless cancelled first
    fn try_start(&self) -> bool {
        self.status
            .compare_exchange(
                ProcessingStatus::Pending as u8,
                ProcessingStatus::Processing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn finish(&self, result: FileResult) {
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let status = result.status;
        *slot = Some(result);
        self.status.store(status as u8, Ordering::Release);
    }

    /// Cancel; a pending operation becomes Cancelled immediately
    ///
    /// Returns whether the operation was still pending.
    fn cancel(&self) -> bool {
        self.cancel.cancel();
        let mut slot = self.result.lock().unwrap_or_else(PoisonError::into_inner);
        let was_pending = self
            .status
            .compare_exchange(
                ProcessingStatus::Pending as u8,
                ProcessingStatus::Cancelled as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if was_pending {
            *slot = Some(FileResult::cancelled(&self.path, 0, Duration::ZERO));
        }
        was_pending
    }

    fn result(&self) -> Option<FileResult> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationState")
            .field("path", &self.path)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl AniDBClient {
    /// Start processing a file in the background
    ///
    /// Operations queue in submission order on the client's file permits.
    pub fn process_async(&self, path: &Path, options: &ProcessOptions) -> Result<OperationHandle> {
        let job = self.ctx.job(path, options)?;
        self.ctx.admit()?;

        let state = Arc::new(OperationState::new(path));
        let handle = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Arc::clone(&state))?;

        let ctx = Arc::clone(&self.ctx);
        self.runtime.spawn(async move {
            let _permit = match Arc::clone(&ctx.file_permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            if !state.try_start() {
                debug!("Operation for {} cancelled before start", state.path.display());
                return;
            }

            let result = ctx.run_file(&job, &state.cancel).await;
            state.finish(result);
            ctx.persist_cache().await;
        });

        debug!("Queued operation {handle:?} for {}", path.display());
        Ok(handle)
    }

    fn operation(&self, handle: OperationHandle) -> Result<Arc<OperationState>> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(handle)
            .cloned()
    }

    pub fn operation_status(&self, handle: OperationHandle) -> Result<ProcessingStatus> {
        Ok(self.operation(handle)?.status())
    }

    /// Result of a finished operation; `Busy` while it is still running
    pub fn operation_result(&self, handle: OperationHandle) -> Result<FileResult> {
        let operation = self.operation(handle)?;
        match operation.result() {
            Some(result) if operation.status().is_terminal() => Ok(result),
            _ => Err(Error::Internal(InternalError::operation_not_complete(
                "operation",
            ))),
        }
    }

    /// Request cancellation; idempotent and a no-op once finished
    pub fn cancel_operation(&self, handle: OperationHandle) -> Result<()> {
        let operation = self.operation(handle)?;
        if operation.cancel() {
            self.ctx.events.report_completion(ResultCode::Cancelled);
        }
        Ok(())
    }

    /// Cancel if needed and release the handle
    pub fn destroy_operation(&self, handle: OperationHandle) -> Result<()> {
        let operation = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle)?;
        if operation.cancel() {
            self.ctx.events.report_completion(ResultCode::Cancelled);
        }
        Ok(())
    }
}
