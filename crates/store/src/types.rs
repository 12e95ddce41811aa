//! The decoded stream data model: [`FieldEntry`], [`MessageEntry`],
//! [`StreamEntry`]. Reply-tree decoding in `stream.rs` produces these types
//! at the boundary; nothing downstream ever touches a raw `redis::Value`.

/// A single `(key, value)` pair inside a stream message.
///
/// A message body is a sequence of `FieldEntry`; the first pair carries the
/// application's semantic `(key, payload)`, subsequent pairs are optional
/// metadata appended by `reQueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntry {
    pub key: String,
    pub value: Vec<u8>,
}

impl FieldEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A message as delivered by a stream read.
///
/// `id` is the store-assigned identifier: opaque to this crate but
/// lexicographically ordered, which is what lets the store use it as a `>`
/// ("after last delivered to this group") cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    pub id: String,
    pub fields: Vec<FieldEntry>,
}

/// The messages a single stream returned from one read call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub name: String,
    pub messages: Vec<MessageEntry>,
}

/// A row from `XPENDING`: `(message-id, consumer-name, idle-ms, delivery-count)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle_ms: i64,
    pub delivery_count: i64,
}
