//! Metadata, retention scavenging and deletion.
//!
//! Expects the store to scavenge synchronously and to leave expired
//! messages unfiltered on read, so only scavenging removes them.

use std::time::Duration;

use serde_json::json;

use streamstore::{
    ExpectedVersion, ReadDirection, ReadFrom, SetStreamMetadataOptions, StoreError, StreamStore,
};

use super::{generate_messages, unique_stream};

async fn versions<S: StreamStore>(store: &S, stream: &str) -> Vec<i64> {
    store
        .read_stream(stream, ReadFrom::Start, 100, ReadDirection::Forward)
        .await
        .expect("Failed to read stream")
        .messages
        .iter()
        .map(|m| m.stream_version)
        .collect()
}

pub async fn test_read_missing_metadata<S: StreamStore>(store: &S) {
    let stream = unique_stream("no-meta");
    let metadata = store
        .read_stream_metadata(&stream)
        .await
        .expect("Failed to read metadata");
    assert_eq!(metadata.stream_id, stream);
    assert_eq!(metadata.metadata_stream_version, -1);
    assert_eq!(metadata.metadata, None);
    assert_eq!(metadata.max_age, None);
    assert_eq!(metadata.max_count, None);
    assert_eq!(metadata.truncate_before, None);
}

pub async fn test_set_and_read_metadata<S: StreamStore>(store: &S) {
    let stream = unique_stream("meta");
    let options = SetStreamMetadataOptions {
        metadata: Some(json!({ "owner": "billing" })),
        max_age: Some(3600),
        max_count: Some(50),
        truncate_before: None,
    };

    let result = store
        .set_stream_metadata(&stream, ExpectedVersion::Any, options)
        .await
        .expect("Failed to set metadata");
    assert_eq!(result.current_version, 0);

    let metadata = store
        .read_stream_metadata(&stream)
        .await
        .expect("Failed to read metadata");
    assert_eq!(metadata.metadata_stream_version, 0);
    assert_eq!(metadata.metadata, Some(json!({ "owner": "billing" })));
    assert_eq!(metadata.max_age, Some(3600));
    assert_eq!(metadata.max_count, Some(50));

    let updated = store
        .set_stream_metadata(
            &stream,
            ExpectedVersion::Exact(0),
            SetStreamMetadataOptions {
                max_count: Some(0),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to update metadata");
    assert_eq!(updated.current_version, 1);

    // A zero limit disables it.
    let metadata = store
        .read_stream_metadata(&stream)
        .await
        .expect("Failed to read metadata");
    assert_eq!(metadata.max_count, None);
    assert_eq!(metadata.max_age, None);

    let stale = store
        .set_stream_metadata(&stream, ExpectedVersion::Exact(0), SetStreamMetadataOptions::default())
        .await;
    assert!(matches!(stale, Err(StoreError::WrongExpectedVersion { .. })));

    let operational = store
        .set_stream_metadata("$deleted", ExpectedVersion::Any, SetStreamMetadataOptions::default())
        .await;
    assert!(matches!(operational, Err(StoreError::InvalidParameter(_))));
}

pub async fn test_scavenge_max_count_on_append<S: StreamStore>(store: &S) {
    let stream = unique_stream("max-count");
    store
        .set_stream_metadata(
            &stream,
            ExpectedVersion::Any,
            SetStreamMetadataOptions {
                max_count: Some(3),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to set metadata");

    store
        .append_to_stream(&stream, ExpectedVersion::Any, generate_messages(5))
        .await
        .expect("Failed to append");

    assert_eq!(versions(store, &stream).await, vec![2, 3, 4]);
}

pub async fn test_scavenge_max_count_on_metadata_change<S: StreamStore>(store: &S) {
    let stream = unique_stream("max-count-later");
    store
        .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(5))
        .await
        .expect("Failed to append");

    store
        .set_stream_metadata(
            &stream,
            ExpectedVersion::Any,
            SetStreamMetadataOptions {
                max_count: Some(2),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to set metadata");

    assert_eq!(versions(store, &stream).await, vec![3, 4]);

    // Versions keep counting after a scavenge.
    let appended = store
        .append_to_stream(&stream, ExpectedVersion::Exact(4), generate_messages(1))
        .await
        .expect("Failed to append after scavenge");
    assert_eq!(appended.stream_version, 5);
    assert_eq!(versions(store, &stream).await, vec![4, 5]);
}

pub async fn test_scavenge_truncate_before<S: StreamStore>(store: &S) {
    let stream = unique_stream("truncate");
    store
        .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(5))
        .await
        .expect("Failed to append");

    store
        .set_stream_metadata(
            &stream,
            ExpectedVersion::Any,
            SetStreamMetadataOptions {
                truncate_before: Some(3),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to set metadata");

    assert_eq!(versions(store, &stream).await, vec![3, 4]);
}

pub async fn test_scavenge_max_age<S: StreamStore>(store: &S) {
    let on_append = unique_stream("max-age");
    let on_metadata = unique_stream("max-age-later");
    let one_second = SetStreamMetadataOptions {
        max_age: Some(1),
        ..Default::default()
    };

    store
        .set_stream_metadata(&on_append, ExpectedVersion::Any, one_second.clone())
        .await
        .expect("Failed to set metadata");
    store
        .append_to_stream(&on_append, ExpectedVersion::Empty, generate_messages(2))
        .await
        .expect("Failed to append");
    store
        .append_to_stream(&on_metadata, ExpectedVersion::Empty, generate_messages(2))
        .await
        .expect("Failed to append");

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // Retention is enforced in storage, not only hidden on read.
    store
        .append_to_stream(&on_append, ExpectedVersion::Exact(1), generate_messages(1))
        .await
        .expect("Failed to append after messages aged");
    assert_eq!(versions(store, &on_append).await, vec![2]);

    store
        .set_stream_metadata(&on_metadata, ExpectedVersion::Any, one_second)
        .await
        .expect("Failed to set metadata");
    assert!(versions(store, &on_metadata).await.is_empty());
    let page = store
        .read_stream(&on_metadata, ReadFrom::Start, 10, ReadDirection::Forward)
        .await
        .expect("Failed to read stream");
    assert_eq!(page.stream_version, 1);
}

pub async fn test_delete_message<S: StreamStore>(store: &S) {
    let stream = unique_stream("delete-message");
    let messages = generate_messages(3);
    store
        .append_to_stream(&stream, ExpectedVersion::Empty, messages.clone())
        .await
        .expect("Failed to append");

    store
        .delete_message(&stream, messages[1].message_id)
        .await
        .expect("Failed to delete message");

    let page = store
        .read_stream(&stream, ReadFrom::Start, 10, ReadDirection::Forward)
        .await
        .expect("Failed to read stream");
    let ids: Vec<_> = page.messages.iter().map(|m| m.message_id).collect();
    assert_eq!(ids, vec![messages[0].message_id, messages[2].message_id]);
    assert_eq!(page.stream_version, 2);

    // Unknown ids are ignored.
    store
        .delete_message(&stream, uuid::Uuid::new_v4())
        .await
        .expect("Deleting an unknown message should succeed");
}

pub async fn test_delete_stream<S: StreamStore>(store: &S) {
    let stream = unique_stream("delete-stream");
    store
        .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(2))
        .await
        .expect("Failed to append");

    let deleted = store
        .delete_stream(&stream, ExpectedVersion::Any)
        .await
        .expect("Failed to delete stream");
    assert!(deleted);

    let page = store
        .read_stream(&stream, ReadFrom::Start, 10, ReadDirection::Forward)
        .await
        .expect("Failed to read deleted stream");
    assert!(page.messages.is_empty());
    assert_eq!(page.stream_version, -1);

    let tombstones = store
        .read_stream("$deleted", ReadFrom::End, 1, ReadDirection::Backward)
        .await
        .expect("Failed to read $deleted");
    let tombstone = &tombstones.messages[0];
    assert_eq!(tombstone.message_type, "$stream-deleted");
    assert_eq!(tombstone.data["streamId"], stream.as_str());

    let again = store
        .delete_stream(&stream, ExpectedVersion::Any)
        .await
        .expect("Failed to delete missing stream");
    assert!(!again);

    let recreated = store
        .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(1))
        .await
        .expect("Failed to recreate stream");
    assert_eq!(recreated.stream_version, 0);
}

pub async fn test_delete_stream_checks_expected_version<S: StreamStore>(store: &S) {
    let stream = unique_stream("delete-expected");
    store
        .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(3))
        .await
        .expect("Failed to append");

    let stale = store.delete_stream(&stream, ExpectedVersion::Exact(1)).await;
    assert!(matches!(stale, Err(StoreError::WrongExpectedVersion { .. })));

    let deleted = store
        .delete_stream(&stream, ExpectedVersion::Exact(2))
        .await
        .expect("Failed to delete at current version");
    assert!(deleted);
}
