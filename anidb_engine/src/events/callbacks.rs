//! Callback capabilities
//!
//! Each callback kind is a single-method trait. Any matching closure
//! implements it, and callers that need state can implement the trait on
//! their own type; the registry holds the `Arc` for the registration's
//! lifetime and drops it exactly once on unregistration.

use super::Event;
use crate::abi::ResultCode;
use std::path::Path;
use std::sync::Arc;

/// Progress notifications: percentage is 0.0..=100.0
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, percentage: f32, bytes_processed: u64, total_bytes: u64);
}

/// Error notifications with an optional file path
pub trait ErrorCallback: Send + Sync {
    fn on_error(&self, code: ResultCode, message: &str, file_path: Option<&Path>);
}

/// Completion notifications carrying the final result code
pub trait CompletionCallback: Send + Sync {
    fn on_complete(&self, result: ResultCode);
}

/// Receiver for structured events
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> ProgressCallback for F
where
    F: Fn(f32, u64, u64) + Send + Sync,
{
    fn on_progress(&self, percentage: f32, bytes_processed: u64, total_bytes: u64) {
        self(percentage, bytes_processed, total_bytes)
    }
}

impl<F> ErrorCallback for F
where
    F: Fn(ResultCode, &str, Option<&Path>) + Send + Sync,
{
    fn on_error(&self, code: ResultCode, message: &str, file_path: Option<&Path>) {
        self(code, message, file_path)
    }
}

impl<F> CompletionCallback for F
where
    F: Fn(ResultCode) + Send + Sync,
{
    fn on_complete(&self, result: ResultCode) {
        self(result)
    }
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Numeric callback kind, matching the ABI enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CallbackType {
    Progress = 1,
    Error = 2,
    Completion = 3,
}

/// A typed callback registration
#[derive(Clone)]
pub enum Callback {
    Progress(Arc<dyn ProgressCallback>),
    Error(Arc<dyn ErrorCallback>),
    Completion(Arc<dyn CompletionCallback>),
}

impl Callback {
    pub fn progress(callback: impl ProgressCallback + 'static) -> Self {
        Self::Progress(Arc::new(callback))
    }

    pub fn error(callback: impl ErrorCallback + 'static) -> Self {
        Self::Error(Arc::new(callback))
    }

    pub fn completion(callback: impl CompletionCallback + 'static) -> Self {
        Self::Completion(Arc::new(callback))
    }

    pub fn kind(&self) -> CallbackType {
        match self {
            Self::Progress(_) => CallbackType::Progress,
            Self::Error(_) => CallbackType::Error,
            Self::Completion(_) => CallbackType::Completion,
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Callback").field(&self.kind()).finish()
    }
}

/// Identifier of a registered callback, assigned from 1 upwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(pub u64);

impl std::fmt::Display for CallbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
