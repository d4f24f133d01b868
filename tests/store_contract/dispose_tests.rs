//! Store disposal. Leaves the store unusable.

use std::sync::{Arc, Mutex};

use streamstore::{
    ExpectedVersion, ReadDirection, ReadFrom, StoreError, StreamStore, SubscribeAt,
    SubscriptionOptions,
};

use super::{collecting_handler, generate_messages, unique_stream};

pub async fn test_dispose<S: StreamStore>(store: &S) {
    let stream = unique_stream("dispose");
    let received = Arc::new(Mutex::new(Vec::new()));
    let subscription = store
        .subscribe_to_stream(
            &stream,
            collecting_handler(received.clone()),
            SubscriptionOptions::at(SubscribeAt::Beginning),
        )
        .await
        .expect("Failed to subscribe");

    // The append is already in flight when disposal starts.
    let (appended, disposed) = tokio::join!(
        store.append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(2)),
        async {
            tokio::task::yield_now().await;
            store.dispose().await
        }
    );
    appended.expect("In-flight append should complete");
    disposed.expect("Failed to dispose");

    assert!(subscription.is_disposed());

    let late = store
        .append_to_stream(&stream, ExpectedVersion::Any, generate_messages(1))
        .await;
    assert!(matches!(late, Err(StoreError::Disposed(_))));

    let read = store
        .read_stream(&stream, ReadFrom::Start, 10, ReadDirection::Forward)
        .await;
    assert!(matches!(read, Err(StoreError::Disposed(_))));

    let subscribe = store
        .subscribe_to_all(collecting_handler(received), SubscriptionOptions::default())
        .await;
    assert!(matches!(subscribe, Err(StoreError::Disposed(_))));

    let again = store.dispose().await;
    assert!(matches!(again, Err(StoreError::Disposed(_))));
}
