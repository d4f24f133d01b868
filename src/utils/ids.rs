//! Stream identifier helpers and operational stream names.

use uuid::Uuid;

/// Prefix reserved for operational streams.
pub const OPERATIONAL_PREFIX: &str = "$";

/// Stream receiving one tombstone per deleted stream.
pub const DELETED_STREAM_ID: &str = "$deleted";

/// Message type of deletion tombstones.
pub const STREAM_DELETED_MESSAGE_TYPE: &str = "$stream-deleted";

/// Message type of metadata stream messages.
pub const STREAM_METADATA_MESSAGE_TYPE: &str = "$stream-metadata";

/// Namespace for deterministic tombstone ids.
const DELETION_NAMESPACE: Uuid = Uuid::from_u128(0x42d1_1719_ef3b_4a2c_a10f_df8f_84ae_73a3);

/// Shadow stream holding the metadata of `stream_id`.
pub fn metadata_stream_id(stream_id: &str) -> String {
    format!("$${}", stream_id)
}

/// True for any `$`-prefixed stream, metadata streams included.
pub fn is_operational_stream(stream_id: &str) -> bool {
    stream_id.starts_with(OPERATIONAL_PREFIX)
}

/// Deterministic id for the tombstone written when a stream is deleted.
///
/// Retrying the same deletion yields the same id, so the tombstone append
/// is idempotent.
pub fn stream_deleted_message_id(stream_id: &str, expected_version: i64) -> Uuid {
    let name = format!("{}.deleted.{}", stream_id, expected_version);
    Uuid::new_v5(&DELETION_NAMESPACE, name.as_bytes())
}
