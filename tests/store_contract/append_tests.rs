//! Append contract: versions, optimistic concurrency and idempotency.

use futures::future::join_all;
use tokio_test::assert_ok;
use uuid::Uuid;

use streamstore::{ExpectedVersion, NewStreamMessage, ReadDirection, ReadFrom, StoreError, StreamStore};

use super::{generate_messages, ids, new_message, unique_stream};

pub async fn test_append_assigns_versions_and_positions<S: StreamStore>(store: &S) {
    let stream = unique_stream("append");

    let first = assert_ok!(
        store
            .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(3))
            .await
    );
    assert_eq!(first.stream_version, 2);

    let second = store
        .append_to_stream(&stream, ExpectedVersion::Exact(2), generate_messages(2))
        .await
        .expect("Failed to append at exact version");
    assert_eq!(second.stream_version, 4);
    assert!(second.stream_position > first.stream_position);

    let page = store
        .read_stream(&stream, ReadFrom::Start, 10, ReadDirection::Forward)
        .await
        .expect("Failed to read stream");
    let versions: Vec<i64> = page.messages.iter().map(|m| m.stream_version).collect();
    assert_eq!(versions, vec![0, 1, 2, 3, 4]);
    assert!(page
        .messages
        .windows(2)
        .all(|w| w[0].position < w[1].position));
    assert_eq!(page.stream_position, second.stream_position);
}

pub async fn test_append_wrong_expected_version<S: StreamStore>(store: &S) {
    let stream = unique_stream("wev");

    let missing = store
        .append_to_stream(&stream, ExpectedVersion::Exact(0), generate_messages(1))
        .await;
    assert!(matches!(missing, Err(StoreError::WrongExpectedVersion { .. })));

    store
        .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(2))
        .await
        .expect("Failed to append");

    let ahead = store
        .append_to_stream(&stream, ExpectedVersion::Exact(5), generate_messages(1))
        .await;
    assert!(matches!(ahead, Err(StoreError::WrongExpectedVersion { .. })));

    let not_empty = store
        .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(1))
        .await;
    assert!(matches!(not_empty, Err(StoreError::WrongExpectedVersion { .. })));

    let page = store
        .read_stream(&stream, ReadFrom::Start, 10, ReadDirection::Forward)
        .await
        .expect("Failed to read stream");
    assert_eq!(page.messages.len(), 2);
}

pub async fn test_append_same_batch_twice_is_idempotent<S: StreamStore>(store: &S) {
    let stream = unique_stream("idempotent");
    let messages = generate_messages(2);

    let first = store
        .append_to_stream(&stream, ExpectedVersion::Empty, messages.clone())
        .await
        .expect("Failed to append");
    let replay = store
        .append_to_stream(&stream, ExpectedVersion::Empty, messages.clone())
        .await
        .expect("Replay should succeed");
    assert_eq!(first, replay);

    let page = store
        .read_stream(&stream, ReadFrom::Start, 10, ReadDirection::Forward)
        .await
        .expect("Failed to read stream");
    let stored: Vec<Uuid> = page.messages.iter().map(|m| m.message_id).collect();
    assert_eq!(stored, ids(&messages));
}

pub async fn test_append_any_idempotency<S: StreamStore>(store: &S) {
    let stream = unique_stream("any");
    let messages = generate_messages(3);

    let first = store
        .append_to_stream(&stream, ExpectedVersion::Any, messages.clone())
        .await
        .expect("Failed to append");

    let replay = store
        .append_to_stream(&stream, ExpectedVersion::Any, messages.clone())
        .await
        .expect("Full replay should succeed");
    assert_eq!(replay, first);

    let suffix = store
        .append_to_stream(&stream, ExpectedVersion::Any, messages[1..].to_vec())
        .await
        .expect("Replaying a stored suffix should succeed");
    assert_eq!(suffix.stream_version, 2);

    // Starts inside the stream but runs past its tail.
    let overlapping = store
        .append_to_stream(
            &stream,
            ExpectedVersion::Any,
            vec![messages[2].clone(), new_message("late")],
        )
        .await;
    assert!(matches!(
        overlapping,
        Err(StoreError::WrongExpectedVersion { .. })
    ));

    let page = store
        .read_stream(&stream, ReadFrom::Start, 10, ReadDirection::Forward)
        .await
        .expect("Failed to read stream");
    assert_eq!(page.messages.len(), 3);
}

pub async fn test_append_exact_version_idempotency<S: StreamStore>(store: &S) {
    let stream = unique_stream("exact");
    let messages = generate_messages(3);

    store
        .append_to_stream(&stream, ExpectedVersion::Empty, messages.clone())
        .await
        .expect("Failed to append");

    // Prefix of the stream written at Empty.
    let prefix = store
        .append_to_stream(&stream, ExpectedVersion::Empty, messages[..2].to_vec())
        .await
        .expect("Stored prefix should be accepted");
    assert_eq!(prefix.stream_version, 2);

    // Exactly the messages after version 0.
    let after_first = store
        .append_to_stream(&stream, ExpectedVersion::Exact(0), messages[1..].to_vec())
        .await
        .expect("Stored tail should be accepted");
    assert_eq!(after_first.stream_version, 2);

    let mismatch = store
        .append_to_stream(
            &stream,
            ExpectedVersion::Exact(0),
            vec![messages[1].clone(), new_message("other")],
        )
        .await;
    assert!(matches!(mismatch, Err(StoreError::WrongExpectedVersion { .. })));
}

pub async fn test_append_duplicate_message_id<S: StreamStore>(store: &S) {
    let stream = unique_stream("duplicate");
    let existing = new_message("existing");

    store
        .append_to_stream(&stream, ExpectedVersion::Empty, vec![existing.clone()])
        .await
        .expect("Failed to append");

    let at_tail = store
        .append_to_stream(&stream, ExpectedVersion::Exact(0), vec![existing.clone()])
        .await;
    match at_tail {
        Err(StoreError::DuplicateMessage { message_id, .. }) => {
            assert_eq!(message_id, existing.message_id)
        }
        other => panic!("Expected DuplicateMessage, got {:?}", other),
    }

    let mixed = store
        .append_to_stream(
            &stream,
            ExpectedVersion::Any,
            vec![new_message("fresh"), existing.clone()],
        )
        .await;
    assert!(matches!(mixed, Err(StoreError::DuplicateMessage { .. })));

    // Ids are only unique per stream.
    store
        .append_to_stream(&unique_stream("duplicate"), ExpectedVersion::Empty, vec![existing])
        .await
        .expect("Same id in another stream should be accepted");
}

pub async fn test_append_rejects_invalid_input<S: StreamStore>(store: &S) {
    let invalid = |result: Result<_, StoreError>| matches!(result, Err(StoreError::InvalidParameter(_)));

    assert!(invalid(
        store
            .append_to_stream("", ExpectedVersion::Any, generate_messages(1))
            .await
    ));
    assert!(invalid(
        store
            .append_to_stream("$operational", ExpectedVersion::Any, generate_messages(1))
            .await
    ));

    let stream = unique_stream("invalid");
    let nil_id = NewStreamMessage::new(Uuid::nil(), "nil", serde_json::json!({}));
    assert!(invalid(
        store
            .append_to_stream(&stream, ExpectedVersion::Any, vec![nil_id])
            .await
    ));

    let repeated = new_message("repeated");
    assert!(invalid(
        store
            .append_to_stream(&stream, ExpectedVersion::Any, vec![repeated.clone(), repeated])
            .await
    ));

    let page = store
        .read_stream(&stream, ReadFrom::Start, 1, ReadDirection::Forward)
        .await
        .expect("Failed to read stream");
    assert_eq!(page.stream_version, -1);
}

pub async fn test_concurrent_any_appends<S: StreamStore>(store: &S) {
    let stream = unique_stream("concurrent");

    let appends = (0..10).map(|_| store.append_to_stream(&stream, ExpectedVersion::Any, generate_messages(2)));
    for result in join_all(appends).await {
        result.expect("Concurrent append failed");
    }

    let page = store
        .read_stream(&stream, ReadFrom::Start, 50, ReadDirection::Forward)
        .await
        .expect("Failed to read stream");
    assert_eq!(page.messages.len(), 20);
    assert_eq!(page.stream_version, 19);
    let versions: Vec<i64> = page.messages.iter().map(|m| m.stream_version).collect();
    assert_eq!(versions, (0..20).collect::<Vec<i64>>());
}
