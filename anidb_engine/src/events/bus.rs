//! Event dispatch and the callback registry
//!
//! Producers never call user code directly: everything goes through an
//! unbounded channel drained by a single dispatch thread. While no listener
//! is connected, the dispatcher puts events in a bounded poll queue that
//! drops its oldest entry when full.

use super::{Callback, CallbackId, CompletionCallback, Event, EventListener, ProgressCallback};
use crate::abi::ResultCode;
use crate::{Error, Result};
use log::{debug, warn};
use std::collections::{BTreeMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc as std_mpsc};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::mpsc;

/// Default poll queue capacity
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

const DISPATCH_THREAD_NAME: &str = "anidb-event-dispatch";

type Task = Box<dyn FnOnce() + Send>;

enum Dispatch {
    Event(Event),
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
    /// Per-call callback supplied with an operation's options
    Run(Task),
    Barrier(std_mpsc::SyncSender<()>),
}

struct Shared {
    listener: Mutex<Option<Arc<dyn EventListener>>>,
    callbacks: Mutex<BTreeMap<CallbackId, Callback>>,
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl Shared {
    fn listener(&self) -> Option<Arc<dyn EventListener>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn enqueue(&self, event: Event) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
    }

    fn snapshot(&self) -> Vec<Callback> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn dispatch(&self, message: Dispatch) {
        match message {
            Dispatch::Event(event) => match self.listener() {
                Some(listener) => guarded("event listener", || listener.on_event(&event)),
                None => self.enqueue(event),
            },
            Dispatch::Progress {
                percentage,
                bytes_processed,
                total_bytes,
            } => {
                for callback in self.snapshot() {
                    if let Callback::Progress(cb) = callback {
                        guarded("progress callback", || {
                            cb.on_progress(percentage, bytes_processed, total_bytes)
                        });
                    }
                }
            }
            Dispatch::Error {
                code,
                message,
                path,
            } => {
                for callback in self.snapshot() {
                    if let Callback::Error(cb) = callback {
                        guarded("error callback", || {
                            cb.on_error(code, &message, path.as_deref())
                        });
                    }
                }
            }
            Dispatch::Completion(code) => {
                for callback in self.snapshot() {
                    if let Callback::Completion(cb) = callback {
                        guarded("completion callback", || cb.on_complete(code));
                    }
                }
            }
            Dispatch::Run(task) => guarded("operation callback", task),
            Dispatch::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

fn guarded(what: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("A panicking {what} was contained by the event dispatcher");
    }
}

/// Serialized delivery of events and callbacks
pub struct EventBus {
    shared: Arc<Shared>,
    sender: Mutex<Option<mpsc::UnboundedSender<Dispatch>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    dispatch_thread: ThreadId,
    next_id: AtomicU64,
}

impl EventBus {
    /// Start the dispatch thread with a poll queue of `capacity` events
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_parameter(
                "event_queue_capacity",
                "must be greater than zero",
            ));
        }

        let shared = Arc::new(Shared {
            listener: Mutex::new(None),
            callbacks: Mutex::new(BTreeMap::new()),
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<Dispatch>();
        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(DISPATCH_THREAD_NAME.to_string())
            .spawn(move || {
                while let Some(message) = rx.blocking_recv() {
                    worker.dispatch(message);
                }
                debug!("Event dispatcher stopped");
            })?;

        Ok(Self {
            shared,
            dispatch_thread: handle.thread().id(),
            sender: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(handle)),
            next_id: AtomicU64::new(1),
        })
    }

    fn send(&self, message: Dispatch) -> bool {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    fn on_dispatch_thread(&self) -> bool {
        thread::current().id() == self.dispatch_thread
    }

    /// Publish a structured event
    ///
    /// The dispatcher routes it to the listener or the poll queue, so one
    /// producer's events keep their order across connect and disconnect.
    pub fn emit(&self, event: Event) {
        if !self.send(Dispatch::Event(event)) {
            debug!("Event dropped after dispatcher shutdown");
        }
    }

    pub fn report_progress(&self, percentage: f32, bytes_processed: u64, total_bytes: u64) {
        self.send(Dispatch::Progress {
            percentage,
            bytes_processed,
            total_bytes,
        });
    }

    pub fn report_error(
        &self,
        code: ResultCode,
        message: impl Into<String>,
        path: Option<PathBuf>,
    ) {
        self.send(Dispatch::Error {
            code,
            message: message.into(),
            path,
        });
    }

    pub fn report_completion(&self, code: ResultCode) {
        self.send(Dispatch::Completion(code));
    }

    /// Run a per-operation callback on the dispatch thread
    pub fn run(&self, task: impl FnOnce() + Send + 'static) {
        self.send(Dispatch::Run(Box::new(task)));
    }

    /// Forward progress to a per-operation callback on the dispatch thread
    pub fn run_progress(
        &self,
        callback: &Arc<dyn ProgressCallback>,
        percentage: f32,
        bytes_processed: u64,
        total_bytes: u64,
    ) {
        let callback = Arc::clone(callback);
        self.run(move || callback.on_progress(percentage, bytes_processed, total_bytes));
    }

    /// Forward a result code to a per-operation completion callback
    pub fn run_completion(&self, callback: &Arc<dyn CompletionCallback>, code: ResultCode) {
        let callback = Arc::clone(callback);
        self.run(move || callback.on_complete(code));
    }

    /// Register a callback, returning its id
    pub fn register(&self, callback: Callback) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("Registered {:?} callback {id}", callback.kind());
        self.shared
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, callback);
        id
    }

    /// Remove a callback; its resources are released exactly once
    pub fn unregister(&self, id: CallbackId) -> Result<()> {
        let removed = self
            .shared
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        match removed {
            Some(_) => Ok(()),
            None => Err(Error::invalid_parameter(
                "callback_id",
                &format!("no callback registered with id {id}"),
            )),
        }
    }

    pub fn callback_count(&self) -> usize {
        self.shared
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Install a listener, replacing any previous one
    ///
    /// Once this returns, the previous listener receives no further events.
    pub fn connect(&self, listener: Arc<dyn EventListener>) {
        *self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
        self.flush();
    }

    /// Remove the listener; later events go to the poll queue
    pub fn disconnect(&self) {
        self.shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.flush();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.listener().is_some()
    }

    /// Wait until everything sent so far has been dispatched
    ///
    /// A no-op when called from inside a callback.
    pub fn flush(&self) {
        if self.on_dispatch_thread() {
            return;
        }

        let (ack_tx, ack_rx) = std_mpsc::sync_channel(1);
        if self.send(Dispatch::Barrier(ack_tx)) {
            let _ = ack_rx.recv();
        }
    }

    /// Take up to `max_events` queued events, oldest first
    ///
    /// Everything emitted before the call is visible to it.
    pub fn poll(&self, max_events: usize) -> Result<Vec<Event>> {
        if max_events == 0 {
            return Err(Error::invalid_parameter(
                "max_events",
                "must be greater than zero",
            ));
        }

        self.flush();
        let mut queue = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let take = max_events.min(queue.len());
        Ok(queue.drain(..take).collect())
    }

    /// Events currently waiting in the poll queue
    pub fn queued_events(&self) -> usize {
        self.flush();
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Events discarded because the poll queue was full
    pub fn dropped_events(&self) -> u64 {
        self.flush();
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Stop the dispatcher after draining what was already sent
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && !self.on_dispatch_thread()
            && handle.join().is_err()
        {
            warn!("Event dispatcher terminated abnormally");
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
