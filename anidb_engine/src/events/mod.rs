//! Events, callbacks and their dispatcher

mod bus;
mod callbacks;
mod types;

pub use bus::{DEFAULT_EVENT_QUEUE_CAPACITY, EventBus};
pub use callbacks::{
    Callback, CallbackId, CallbackType, CompletionCallback, ErrorCallback, EventListener,
    ProgressCallback,
};
pub use types::{Event, EventPayload, EventType};
