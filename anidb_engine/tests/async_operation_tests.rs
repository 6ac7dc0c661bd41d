//! Asynchronous operations: status, results, cancellation and handles

mod common;

use anidb_engine::{
    AniDBClient, HashAlgorithm, OperationHandle, ProcessOptions, ProcessingStatus, ResultCode,
};
use anidb_test_utils::CallbackRecorder;
use common::{TestEnv, wait_until};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(30);

fn options() -> ProcessOptions {
    ProcessOptions::new().with_algorithms(&[HashAlgorithm::ED2K, HashAlgorithm::CRC32])
}

fn wait_for_status(client: &AniDBClient, handle: OperationHandle, status: ProcessingStatus) {
    assert!(
        wait_until(TIMEOUT, || client.operation_status(handle).unwrap() == status),
        "operation never reached {status:?}"
    );
}

fn wait_for_terminal(client: &AniDBClient, handle: OperationHandle) {
    assert!(wait_until(TIMEOUT, || client
        .operation_status(handle)
        .unwrap()
        .is_terminal()));
}

/// Client limited to one file at a time, with a large file that keeps it busy
fn busy_client(env: &mut TestEnv) -> (AniDBClient, std::path::PathBuf) {
    env.config.max_concurrent_files = 1;
    env.config.chunk_size = 1024;
    let blocker = env.files.generate_test_file("blocker.bin", 32 * 1024 * 1024).unwrap();
    (env.client(), blocker)
}

#[test]
fn test_async_result_matches_sync() {
    let mut env = TestEnv::new();
    let path = env.file("async.mkv", 20_000, 6);
    let client = env.client();

    let handle = client.process_async(&path, &options()).unwrap();
    wait_for_status(&client, handle, ProcessingStatus::Completed);

    let result = client.operation_result(handle).unwrap();
    assert!(result.is_success());
    assert_eq!(result.size, 20_000);
    assert_eq!(
        result.hash(HashAlgorithm::ED2K).unwrap(),
        client.calculate_hash(&path, HashAlgorithm::ED2K).unwrap()
    );

    client.destroy_operation(handle).unwrap();
}

#[test]
fn test_result_is_busy_until_finished() {
    let mut env = TestEnv::new();
    let (client, blocker) = busy_client(&mut env);

    let handle = client.process_async(&blocker, &options()).unwrap();
    let status = client.operation_status(handle).unwrap();
    assert!(matches!(
        status,
        ProcessingStatus::Pending | ProcessingStatus::Processing
    ));
    assert_eq!(
        client.operation_result(handle).unwrap_err().code(),
        ResultCode::Busy
    );

    client.cancel_operation(handle).unwrap();
    wait_for_terminal(&client, handle);
    assert_eq!(
        client.operation_result(handle).unwrap().code(),
        ResultCode::Cancelled
    );
}

#[test]
fn test_cancel_before_start() {
    let mut env = TestEnv::new();
    let (client, blocker) = busy_client(&mut env);
    let small = env.file("queued.mkv", 100, 1);
    let recorder = CallbackRecorder::new();
    client.register_callback(recorder.completion());

    let running = client.process_async(&blocker, &options()).unwrap();
    wait_for_status(&client, running, ProcessingStatus::Processing);

    let queued = client.process_async(&small, &options()).unwrap();
    assert_eq!(
        client.operation_status(queued).unwrap(),
        ProcessingStatus::Pending
    );
    client.cancel_operation(queued).unwrap();

    // Cancelled at once, without waiting for the blocker
    assert_eq!(
        client.operation_status(queued).unwrap(),
        ProcessingStatus::Cancelled
    );
    let result = client.operation_result(queued).unwrap();
    assert_eq!(result.code(), ResultCode::Cancelled);
    assert!(result.hashes.is_empty());

    // Cancelling again is harmless
    client.cancel_operation(queued).unwrap();

    client.cancel_operation(running).unwrap();
    wait_for_terminal(&client, running);
    client.flush_events();
    assert_eq!(
        recorder.completions(),
        vec![ResultCode::Cancelled, ResultCode::Cancelled]
    );

    // The queued file never produced events
    let paths: Vec<_> = client
        .poll_events(usize::MAX)
        .unwrap()
        .iter()
        .filter_map(|e| e.path().map(|p| p.to_path_buf()))
        .collect();
    assert!(!paths.contains(&small));
}

#[test]
fn test_cancel_in_flight() {
    let mut env = TestEnv::new();
    let (client, blocker) = busy_client(&mut env);

    let handle = client.process_async(&blocker, &options()).unwrap();
    wait_for_status(&client, handle, ProcessingStatus::Processing);
    client.cancel_operation(handle).unwrap();
    wait_for_terminal(&client, handle);

    let result = client.operation_result(handle).unwrap();
    assert_eq!(result.status, ProcessingStatus::Cancelled);
    assert!(result.hashes.is_empty());

    // Nothing partial was cached
    assert!(
        !client
            .cache_check_file(&blocker, HashAlgorithm::ED2K)
            .unwrap()
    );
}

#[test]
fn test_stale_handles_are_rejected() {
    let mut env = TestEnv::new();
    let path = env.file("stale.mkv", 10, 1);
    let client = env.client();

    let handle = client.process_async(&path, &options()).unwrap();
    wait_for_terminal(&client, handle);
    client.destroy_operation(handle).unwrap();

    for code in [
        client.operation_status(handle).map(|_| ()),
        client.operation_result(handle).map(|_| ()),
        client.cancel_operation(handle),
        client.destroy_operation(handle),
    ]
    .into_iter()
    .map(|r| r.unwrap_err().code())
    {
        assert_eq!(code, ResultCode::InvalidHandle);
    }

    // A new operation reusing the slot does not revive the old handle
    let fresh = client.process_async(&path, &options()).unwrap();
    assert_eq!(fresh.index(), handle.index());
    assert_ne!(fresh, handle);
    assert!(client.operation_status(handle).is_err());
    assert!(client.operation_status(fresh).is_ok());
}

#[test]
fn test_handles_are_scoped_to_their_client() {
    let mut env = TestEnv::new();
    let path = env.file("scoped.mkv", 10, 3);
    let a = env.client();
    let b = env.client();

    let from_a = a.process_async(&path, &options()).unwrap();
    let from_b = b.process_async(&path, &options()).unwrap();
    assert_eq!(
        (from_a.index(), from_a.generation()),
        (from_b.index(), from_b.generation())
    );
    wait_for_terminal(&a, from_a);
    wait_for_terminal(&b, from_b);

    assert_eq!(
        b.operation_status(from_a).unwrap_err().code(),
        ResultCode::InvalidHandle
    );
    assert_eq!(
        b.destroy_operation(from_a).unwrap_err().code(),
        ResultCode::InvalidHandle
    );
    assert!(a.operation_result(from_a).unwrap().is_success());
    assert!(b.operation_result(from_b).unwrap().is_success());
}

#[test]
fn test_operations_queue_on_client_permits() {
    let mut env = TestEnv::new();
    env.config.max_concurrent_files = 1;
    let paths: Vec<_> = (0..4)
        .map(|i| env.file(&format!("q{i}.mkv"), 5000, i))
        .collect();
    let client = env.client();

    let handles: Vec<_> = paths
        .iter()
        .map(|p| client.process_async(p, &options()).unwrap())
        .collect();
    for &handle in &handles {
        wait_for_terminal(&client, handle);
        assert!(client.operation_result(handle).unwrap().is_success());
    }
}

#[test]
fn test_dropping_client_with_running_operation() {
    let mut env = TestEnv::new();
    let (client, blocker) = busy_client(&mut env);
    client.process_async(&blocker, &options()).unwrap();
    drop(client);
}
