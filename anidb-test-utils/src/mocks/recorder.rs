//! Recorders for events and callbacks

use anidb_engine::{Callback, Event, EventListener, EventType, ResultCode};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Event listener that keeps everything it receives
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<EventType> {
        self.events.lock().unwrap().iter().map(|e| e.event_type).collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventListener for EventRecorder {
    fn on_event(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// One recorded callback invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Progress {
        percentage: f32,
        bytes_processed: u64,
        total_bytes: u64,
    },
    Error {
        code: ResultCode,
        message: String,
        path: Option<PathBuf>,
    },
    Completion(ResultCode),
}

/// Hands out callbacks that log their invocations in order
#[derive(Debug, Default)]
pub struct CallbackRecorder {
    calls: Mutex<Vec<Recorded>>,
}

impl CallbackRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn progress(self: &Arc<Self>) -> Callback {
        let recorder = Arc::clone(self);
        Callback::progress(move |percentage: f32, bytes_processed: u64, total_bytes: u64| {
            recorder.push(Recorded::Progress {
                percentage,
                bytes_processed,
                total_bytes,
            });
        })
    }

    pub fn error(self: &Arc<Self>) -> Callback {
        let recorder = Arc::clone(self);
        Callback::error(
            move |code: ResultCode, message: &str, path: Option<&std::path::Path>| {
                recorder.push(Recorded::Error {
                    code,
                    message: message.to_string(),
                    path: path.map(|p| p.to_path_buf()),
                });
            },
        )
    }

    pub fn completion(self: &Arc<Self>) -> Callback {
        let recorder = Arc::clone(self);
        Callback::completion(move |code: ResultCode| recorder.push(Recorded::Completion(code)))
    }

    fn push(&self, call: Recorded) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    /// Progress percentages in delivery order
    pub fn percentages(&self) -> Vec<f32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Recorded::Progress { percentage, .. } => Some(percentage),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<ResultCode> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Recorded::Completion(code) => Some(code),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(ResultCode, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Recorded::Error { code, message, .. } => Some((code, message)),
                _ => None,
            })
            .collect()
    }
}
