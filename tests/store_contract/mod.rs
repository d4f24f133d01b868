//! Shared StreamStore contract tests.
//!
//! Every backend runs the same suite through `run_stream_store_tests!`.
//! Tests share one store, so each one writes to fresh stream ids and
//! never assumes absolute global positions.

#![allow(dead_code)]

pub mod append_tests;
pub mod dispose_tests;
pub mod metadata_tests;
pub mod subscription_tests;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use uuid::Uuid;

use streamstore::{HandlerError, MessageHandler, NewStreamMessage, StreamMessage};

/// A message with a fresh id.
pub fn new_message(message_type: &str) -> NewStreamMessage {
    NewStreamMessage::new(Uuid::new_v4(), message_type, json!({ "hello": "world" }))
}

pub fn generate_messages(count: usize) -> Vec<NewStreamMessage> {
    (0..count)
        .map(|i| {
            NewStreamMessage::new(Uuid::new_v4(), "generated", json!({ "index": i }))
                .with_meta(json!({ "source": "contract" }))
        })
        .collect()
}

pub fn unique_stream(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

pub fn ids(messages: &[NewStreamMessage]) -> Vec<Uuid> {
    messages.iter().map(|m| m.message_id).collect()
}

/// Poll `condition` until it holds or ten seconds pass.
pub async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", description);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Handler that records every message it receives.
pub fn collecting_handler(received: Arc<Mutex<Vec<StreamMessage>>>) -> Arc<dyn MessageHandler> {
    Arc::new(move |message: StreamMessage| {
        let received = received.clone();
        async move {
            received.lock().unwrap().push(message);
            Ok::<(), HandlerError>(())
        }
    })
}

pub fn received_ids(received: &Arc<Mutex<Vec<StreamMessage>>>) -> Vec<Uuid> {
    received.lock().unwrap().iter().map(|m| m.message_id).collect()
}

pub fn received_len(received: &Arc<Mutex<Vec<StreamMessage>>>) -> usize {
    received.lock().unwrap().len()
}

/// Run the whole suite. Disposes the store at the end.
#[macro_export]
macro_rules! run_stream_store_tests {
    ($store:expr) => {
        use $crate::store_contract::append_tests::*;
        use $crate::store_contract::dispose_tests::*;
        use $crate::store_contract::metadata_tests::*;
        use $crate::store_contract::read_tests::*;
        use $crate::store_contract::subscription_tests::*;

        // append
        test_append_assigns_versions_and_positions($store).await;
        println!("  test_append_assigns_versions_and_positions: PASSED");

        test_append_wrong_expected_version($store).await;
        println!("  test_append_wrong_expected_version: PASSED");

        test_append_same_batch_twice_is_idempotent($store).await;
        println!("  test_append_same_batch_twice_is_idempotent: PASSED");

        test_append_any_idempotency($store).await;
        println!("  test_append_any_idempotency: PASSED");

        test_append_exact_version_idempotency($store).await;
        println!("  test_append_exact_version_idempotency: PASSED");

        test_append_duplicate_message_id($store).await;
        println!("  test_append_duplicate_message_id: PASSED");

        test_append_rejects_invalid_input($store).await;
        println!("  test_append_rejects_invalid_input: PASSED");

        test_concurrent_any_appends($store).await;
        println!("  test_concurrent_any_appends: PASSED");

        // read
        test_read_stream_forward_paging($store).await;
        println!("  test_read_stream_forward_paging: PASSED");

        test_read_stream_backward_paging($store).await;
        println!("  test_read_stream_backward_paging: PASSED");

        test_read_missing_stream($store).await;
        println!("  test_read_missing_stream: PASSED");

        test_read_preserves_payloads($store).await;
        println!("  test_read_preserves_payloads: PASSED");

        test_read_all_forward_and_backward($store).await;
        println!("  test_read_all_forward_and_backward: PASSED");

        test_read_head_position($store).await;
        println!("  test_read_head_position: PASSED");

        test_read_rejects_zero_count($store).await;
        println!("  test_read_rejects_zero_count: PASSED");

        test_list_streams($store).await;
        println!("  test_list_streams: PASSED");

        // metadata, scavenging, deletion
        test_read_missing_metadata($store).await;
        println!("  test_read_missing_metadata: PASSED");

        test_set_and_read_metadata($store).await;
        println!("  test_set_and_read_metadata: PASSED");

        test_scavenge_max_count_on_append($store).await;
        println!("  test_scavenge_max_count_on_append: PASSED");

        test_scavenge_max_count_on_metadata_change($store).await;
        println!("  test_scavenge_max_count_on_metadata_change: PASSED");

        test_scavenge_truncate_before($store).await;
        println!("  test_scavenge_truncate_before: PASSED");

        test_scavenge_max_age($store).await;
        println!("  test_scavenge_max_age: PASSED");

        test_delete_message($store).await;
        println!("  test_delete_message: PASSED");

        test_delete_stream($store).await;
        println!("  test_delete_stream: PASSED");

        test_delete_stream_checks_expected_version($store).await;
        println!("  test_delete_stream_checks_expected_version: PASSED");

        // subscriptions
        test_subscribe_to_stream_from_beginning($store).await;
        println!("  test_subscribe_to_stream_from_beginning: PASSED");

        test_subscribe_to_stream_at_end($store).await;
        println!("  test_subscribe_to_stream_at_end: PASSED");

        test_subscribe_to_stream_after_version($store).await;
        println!("  test_subscribe_to_stream_after_version: PASSED");

        test_subscription_reports_caught_up($store).await;
        println!("  test_subscription_reports_caught_up: PASSED");

        test_subscription_dropped_on_handler_error($store).await;
        println!("  test_subscription_dropped_on_handler_error: PASSED");

        test_subscription_dispose_waits_for_handler($store).await;
        println!("  test_subscription_dispose_waits_for_handler: PASSED");

        test_subscribe_to_all($store).await;
        println!("  test_subscribe_to_all: PASSED");

        test_deleted_stream_tombstone_is_delivered($store).await;
        println!("  test_deleted_stream_tombstone_is_delivered: PASSED");

        // must run last
        test_dispose($store).await;
        println!("  test_dispose: PASSED");
    };
}
