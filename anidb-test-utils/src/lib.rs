//! Test utilities for the AniDB hashing engine
//!
//! This crate provides deterministic file builders, a mock identification
//! backend and recorders for events and callbacks.

pub mod builders;
pub mod mocks;

// Re-export commonly used types
pub use builders::{TestFileBuilder, deterministic_bytes};
pub use mocks::{CallbackRecorder, EventRecorder, MockIdentifier};
