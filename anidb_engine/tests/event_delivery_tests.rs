//! Event listener, polling and callback registry behavior through the client

mod common;

use anidb_engine::{
    Callback, EventPayload, EventType, HashAlgorithm, ProcessOptions, ResultCode,
};
use anidb_test_utils::{CallbackRecorder, EventRecorder};
use common::TestEnv;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn options() -> ProcessOptions {
    ProcessOptions::new().with_algorithms(&[HashAlgorithm::CRC32])
}

#[test]
fn test_listener_receives_events_in_order() {
    let mut env = TestEnv::new();
    let path = env.file("listen.mkv", 1500, 1);
    let client = env.client();
    let recorder = EventRecorder::new();

    client.connect_events(recorder.clone());
    assert!(client.is_events_connected());
    client.process(&path, &options()).unwrap();
    client.flush_events();

    assert_eq!(
        recorder.event_types(),
        vec![
            EventType::FileStart,
            EventType::CacheMiss,
            EventType::HashStart,
            EventType::HashComplete,
            EventType::FileComplete,
        ]
    );
    // Nothing went to the poll queue while connected
    assert!(client.poll_events(10).unwrap().is_empty());

    let events = recorder.events();
    assert_eq!(
        events[0].payload,
        EventPayload::File {
            path: path.clone(),
            size: 1500
        }
    );
    match &events[3].payload {
        EventPayload::Hash { algorithm, hash } => {
            assert_eq!(*algorithm, HashAlgorithm::CRC32);
            assert_eq!(hash.as_deref().map(str::len), Some(8));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert!(events.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
}

#[test]
fn test_listener_replacement_is_exclusive() {
    let mut env = TestEnv::new();
    let first_file = env.file("one.mkv", 100, 1);
    let second_file = env.file("two.mkv", 100, 2);
    let client = env.client();
    let first = EventRecorder::new();
    let second = EventRecorder::new();

    client.connect_events(first.clone());
    client.process(&first_file, &options()).unwrap();
    client.flush_events();
    client.connect_events(second.clone());
    let seen_by_first = first.events().len();
    client.process(&second_file, &options()).unwrap();
    client.flush_events();

    assert_eq!(first.events().len(), seen_by_first);
    assert_eq!(second.count(EventType::FileStart), 1);

    client.disconnect_events();
    assert!(!client.is_events_connected());
    client.cache_clear().unwrap();
    client.process(&first_file, &options()).unwrap();
    assert_eq!(second.count(EventType::FileStart), 1);
    assert!(!client.poll_events(100).unwrap().is_empty());
}

#[test]
fn test_poll_queue_drops_oldest() {
    let mut env = TestEnv::new();
    env.config.event_queue_capacity = 4;
    let path = env.file("overflow.mkv", 100, 1);
    let client = env.client();

    // Five events for one fresh file
    client.process(&path, &options()).unwrap();

    assert_eq!(client.dropped_events(), 1);
    let events = client.poll_events(2).unwrap();
    assert_eq!(events[0].event_type, EventType::CacheMiss);
    assert_eq!(client.poll_events(10).unwrap().len(), 2);
    assert_eq!(
        client.poll_events(0).unwrap_err().code(),
        ResultCode::InvalidParameter
    );
}

#[test]
fn test_callback_registration_lifecycle() {
    let mut env = TestEnv::new();
    let path = env.file("register.mkv", 100, 1);
    let client = env.client();

    let hits = Arc::new(AtomicUsize::new(0));
    let id = {
        let hits = Arc::clone(&hits);
        client.register_callback(Callback::completion(move |_: ResultCode| {
            hits.fetch_add(1, Ordering::SeqCst);
        }))
    };

    client.process(&path, &options()).unwrap();
    client.flush_events();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    client.unregister_callback(id).unwrap();
    client.process(&path, &options()).unwrap();
    client.flush_events();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert_eq!(
        client.unregister_callback(id).unwrap_err().code(),
        ResultCode::InvalidParameter
    );
}

#[test]
fn test_panicking_callback_does_not_stop_delivery() {
    let mut env = TestEnv::new();
    let path = env.file("panic.mkv", 100, 1);
    let client = env.client();
    let recorder = CallbackRecorder::new();

    client.register_callback(Callback::completion(|_: ResultCode| panic!("boom")));
    client.register_callback(recorder.completion());

    client.process(&path, &options()).unwrap();
    client.flush_events();
    assert_eq!(recorder.completions(), vec![ResultCode::Success]);
}

#[test]
fn test_callbacks_may_call_back_into_client() {
    let mut env = TestEnv::new();
    let path = env.file("reentrant.mkv", 100, 1);
    let client = Arc::new(env.client());
    let polled = Arc::new(AtomicUsize::new(0));

    {
        let weak = Arc::downgrade(&client);
        let polled = Arc::clone(&polled);
        client.register_callback(Callback::completion(move |_: ResultCode| {
            if let Some(client) = weak.upgrade() {
                client.flush_events();
                polled.fetch_add(client.poll_events(100).unwrap().len(), Ordering::SeqCst);
            }
        }));
    }

    client.process(&path, &options()).unwrap();
    client.flush_events();
    assert_eq!(polled.load(Ordering::SeqCst), 5);
}
