//! Identification through a pluggable backend

mod common;

use anidb_engine::{
    AniDBClient, AnimeSource, EventPayload, EventType, HashAlgorithm, ProcessOptions, ResultCode,
};
use anidb_test_utils::MockIdentifier;
use common::{TestEnv, queued_event_types};
use std::sync::Arc;

#[test]
fn test_identify_hashed_file() {
    let mut env = TestEnv::new();
    let path = env.files.generate_file("bebop.mkv", b"test content").unwrap();
    let identifier = Arc::new(MockIdentifier::new().with_anime(
        "a69899814931280e2f527219ad6ac754",
        12,
        "Cowboy Bebop",
        1,
    ));
    let client = AniDBClient::with_identifier(env.config.clone(), identifier.clone()).unwrap();

    let result = client.process(&path, &ProcessOptions::default()).unwrap();
    let ed2k = result.hash(HashAlgorithm::ED2K).unwrap();
    client.poll_events(usize::MAX).unwrap();

    let info = client.identify(ed2k, result.size).unwrap().unwrap();
    assert_eq!(info.title, "Cowboy Bebop");
    assert_eq!(info.episode_number, 1);
    assert_eq!(info.source, AnimeSource::Remote);

    let events = client.poll_events(10).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::NetworkStart);
    assert_eq!(
        events[1].payload,
        EventPayload::Network {
            endpoint: "mock".to_string(),
            status_code: 200
        }
    );

    // Memoized, including case-insensitive lookups
    let again = client
        .identify(&ed2k.to_ascii_uppercase(), result.size)
        .unwrap()
        .unwrap();
    assert_eq!(again.source, AnimeSource::Cache);
    assert_eq!(identifier.calls(), 1);
    assert!(client.poll_events(10).unwrap().is_empty());
}

#[test]
fn test_unknown_file_and_offline_backend() {
    let env = TestEnv::new();
    let identifier = Arc::new(MockIdentifier::new());
    let client = AniDBClient::with_identifier(env.config.clone(), identifier.clone()).unwrap();

    assert!(
        client
            .identify("31d6cfe0d16ae931b73c59d7e0c089c0", 1)
            .unwrap()
            .is_none()
    );

    identifier.set_offline(true);
    let err = client
        .identify("00000000000000000000000000000001", 5)
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::Network);

    let events = client.poll_events(10).unwrap();
    let failed = events.last().unwrap();
    assert_eq!(failed.event_type, EventType::NetworkComplete);
    assert!(failed.context.is_some());
}

#[test]
fn test_identify_without_backend() {
    let env = TestEnv::new();
    let client = env.client();

    let err = client
        .identify("31d6cfe0d16ae931b73c59d7e0c089c0", 1)
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::Network);

    let err = client.identify("not-a-hash", 1).unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidParameter);
    assert!(queued_event_types(&client).is_empty());
}
