//! Mock implementations for testing

mod identifier;
mod recorder;

pub use identifier::MockIdentifier;
pub use recorder::{CallbackRecorder, EventRecorder};
