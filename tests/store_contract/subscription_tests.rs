//! Stream and all-subscriptions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use streamstore::{
    ExpectedVersion, HandlerError, MessageHandler, StreamMessage, StreamStore, SubscribeAt,
    SubscriptionOptions,
};

use super::{
    collecting_handler, generate_messages, ids, new_message, received_ids, received_len,
    unique_stream, wait_until,
};

pub async fn test_subscribe_to_stream_from_beginning<S: StreamStore>(store: &S) {
    let stream = unique_stream("sub-beginning");
    let before = generate_messages(50);
    let after = generate_messages(50);
    store
        .append_to_stream(&stream, ExpectedVersion::Empty, before.clone())
        .await
        .expect("Failed to append");

    let received = Arc::new(Mutex::new(Vec::new()));
    let subscription = store
        .subscribe_to_stream(
            &stream,
            collecting_handler(received.clone()),
            SubscriptionOptions::at(SubscribeAt::Beginning),
        )
        .await
        .expect("Failed to subscribe");

    store
        .append_to_stream(&stream, ExpectedVersion::Exact(49), after.clone())
        .await
        .expect("Failed to append");

    wait_until("100 messages", || received_len(&received) >= 100).await;
    let expected: Vec<Uuid> = ids(&before).into_iter().chain(ids(&after)).collect();
    assert_eq!(received_ids(&received), expected);
    let versions: Vec<i64> = received
        .lock()
        .unwrap()
        .iter()
        .map(|m| m.stream_version)
        .collect();
    assert_eq!(versions, (0..100).collect::<Vec<i64>>());

    subscription.dispose().await.expect("Failed to dispose");
    assert!(subscription.is_disposed());
}

pub async fn test_subscribe_to_stream_at_end<S: StreamStore>(store: &S) {
    let stream = unique_stream("sub-end");
    store
        .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(3))
        .await
        .expect("Failed to append");

    let received = Arc::new(Mutex::new(Vec::new()));
    let subscription = store
        .subscribe_to_stream(
            &stream,
            collecting_handler(received.clone()),
            SubscriptionOptions::at(SubscribeAt::End),
        )
        .await
        .expect("Failed to subscribe");

    let live = generate_messages(2);
    store
        .append_to_stream(&stream, ExpectedVersion::Exact(2), live.clone())
        .await
        .expect("Failed to append");

    wait_until("live messages", || received_len(&received) >= 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(received_ids(&received), ids(&live));

    subscription.dispose().await.expect("Failed to dispose");
}

pub async fn test_subscribe_to_stream_after_version<S: StreamStore>(store: &S) {
    let stream = unique_stream("sub-after");
    let messages = generate_messages(5);
    store
        .append_to_stream(&stream, ExpectedVersion::Empty, messages.clone())
        .await
        .expect("Failed to append");

    let received = Arc::new(Mutex::new(Vec::new()));
    let subscription = store
        .subscribe_to_stream(
            &stream,
            collecting_handler(received.clone()),
            SubscriptionOptions::at(SubscribeAt::After(2)),
        )
        .await
        .expect("Failed to subscribe");

    wait_until("messages after version 2", || received_len(&received) >= 2).await;
    assert_eq!(received_ids(&received), ids(&messages[3..]));

    subscription.dispose().await.expect("Failed to dispose");
}

pub async fn test_subscription_reports_caught_up<S: StreamStore>(store: &S) {
    let stream = unique_stream("sub-caught-up");
    store
        .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(12))
        .await
        .expect("Failed to append");

    let changes = Arc::new(Mutex::new(Vec::new()));
    let recorded = changes.clone();
    let received = Arc::new(Mutex::new(Vec::new()));
    let subscription = store
        .subscribe_to_stream(
            &stream,
            collecting_handler(received.clone()),
            SubscriptionOptions::at(SubscribeAt::Beginning)
                .with_max_count_per_read(5)
                .on_caught_up_changed(move |caught_up| recorded.lock().unwrap().push(caught_up)),
        )
        .await
        .expect("Failed to subscribe");

    wait_until("caught up", || changes.lock().unwrap().contains(&true)).await;
    assert_eq!(*changes.lock().unwrap(), vec![false, true]);
    assert_eq!(received_len(&received), 12);

    subscription.dispose().await.expect("Failed to dispose");
}

pub async fn test_subscription_dropped_on_handler_error<S: StreamStore>(store: &S) {
    let stream = unique_stream("sub-error");
    store
        .append_to_stream(
            &stream,
            ExpectedVersion::Empty,
            vec![new_message("ok"), new_message("poison"), new_message("ok")],
        )
        .await
        .expect("Failed to append");

    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let handler: Arc<dyn MessageHandler> = Arc::new(move |message: StreamMessage| {
        let counter = counter.clone();
        async move {
            if message.message_type == "poison" {
                return Err::<(), HandlerError>("cannot handle poison".into());
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });

    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();
    let subscription = store
        .subscribe_to_stream(
            &stream,
            handler,
            SubscriptionOptions::at(SubscribeAt::Beginning)
                .on_subscription_dropped(move || flag.store(true, Ordering::SeqCst)),
        )
        .await
        .expect("Failed to subscribe");

    wait_until("subscription dropped", || dropped.load(Ordering::SeqCst)).await;
    wait_until("subscription disposed", || subscription.is_disposed()).await;
    assert_eq!(handled.load(Ordering::SeqCst), 1);

    let again = subscription.dispose().await;
    assert!(matches!(again, Err(e) if e.is_disposed()));
}

pub async fn test_subscription_dispose_waits_for_handler<S: StreamStore>(store: &S) {
    let stream = unique_stream("sub-dispose");
    store
        .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(1))
        .await
        .expect("Failed to append");

    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let (started_flag, finished_flag) = (started.clone(), finished.clone());
    let handler: Arc<dyn MessageHandler> = Arc::new(move |_message: StreamMessage| {
        let started = started_flag.clone();
        let finished = finished_flag.clone();
        async move {
            started.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            finished.store(true, Ordering::SeqCst);
            Ok::<(), HandlerError>(())
        }
    });

    let hook_ran = Arc::new(AtomicBool::new(false));
    let hook_flag = hook_ran.clone();
    let subscription = store
        .subscribe_to_stream(
            &stream,
            handler,
            SubscriptionOptions::at(SubscribeAt::Beginning).on_dispose(move || {
                let hook_flag = hook_flag.clone();
                async move { hook_flag.store(true, Ordering::SeqCst) }
            }),
        )
        .await
        .expect("Failed to subscribe");

    wait_until("handler started", || started.load(Ordering::SeqCst)).await;
    subscription.dispose().await.expect("Failed to dispose");
    assert!(finished.load(Ordering::SeqCst));
    assert!(hook_ran.load(Ordering::SeqCst));
}

pub async fn test_subscribe_to_all<S: StreamStore>(store: &S) {
    let first_stream = unique_stream("sub-all-a");
    let second_stream = unique_stream("sub-all-b");

    let received = Arc::new(Mutex::new(Vec::new()));
    let subscription = store
        .subscribe_to_all(collecting_handler(received.clone()), SubscriptionOptions::at(SubscribeAt::End))
        .await
        .expect("Failed to subscribe");

    let first = generate_messages(3);
    let second = generate_messages(3);
    store
        .append_to_stream(&first_stream, ExpectedVersion::Empty, first.clone())
        .await
        .expect("Failed to append");
    store
        .append_to_stream(&second_stream, ExpectedVersion::Empty, second.clone())
        .await
        .expect("Failed to append");

    let ours = |received: &Arc<Mutex<Vec<StreamMessage>>>| -> Vec<StreamMessage> {
        received
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.stream_id == first_stream || m.stream_id == second_stream)
            .cloned()
            .collect()
    };
    wait_until("all-stream messages", || ours(&received).len() >= 6).await;

    let delivered = ours(&received);
    let delivered_ids: Vec<Uuid> = delivered.iter().map(|m| m.message_id).collect();
    let expected: Vec<Uuid> = ids(&first).into_iter().chain(ids(&second)).collect();
    assert_eq!(delivered_ids, expected);
    assert!(delivered.windows(2).all(|w| w[0].position < w[1].position));

    subscription.dispose().await.expect("Failed to dispose");
}

pub async fn test_deleted_stream_tombstone_is_delivered<S: StreamStore>(store: &S) {
    let stream = unique_stream("sub-tombstone");
    store
        .append_to_stream(&stream, ExpectedVersion::Empty, generate_messages(1))
        .await
        .expect("Failed to append");

    let received = Arc::new(Mutex::new(Vec::new()));
    let subscription = store
        .subscribe_to_stream("$deleted", collecting_handler(received.clone()), SubscriptionOptions::default())
        .await
        .expect("Failed to subscribe to $deleted");

    store
        .delete_stream(&stream, ExpectedVersion::Any)
        .await
        .expect("Failed to delete stream");

    let tombstone_for = |received: &Arc<Mutex<Vec<StreamMessage>>>| {
        received
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.data["streamId"] == stream.as_str())
    };
    wait_until("tombstone", || tombstone_for(&received)).await;

    subscription.dispose().await.expect("Failed to dispose");
}
