//! Error taxonomy shared by the store, stream and lock layers.
//!
//! Two kinds of outcome exist: a small closed set of *expected sentinels*
//! (no data, idempotent-create, lock contention, unlock mismatch) that
//! callers are meant to match on and handle inline, and *operational*
//! errors (decode failures, connection errors) that propagate up.

use thiserror::Error;

/// Main error type for msq operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No data: an empty read, or the end of a key scan. Re-exported meaning
    /// of the store driver's "nil reply".
    #[error("no data")]
    NotFound,

    /// Idempotent-create path: the target (e.g. a consumer group) already
    /// exists.
    #[error("data already exists")]
    DataExist,

    /// Non-blocking lock acquire found the key already held.
    #[error("locked by another owner")]
    Locked,

    /// Unlock attempted by a caller that does not own the lock.
    #[error("only the owner can unlock")]
    NotOwner,

    /// A stream reply did not have the shape a decoder expected.
    #[error("decode error: {0}")]
    Decode(String),

    /// Underlying store (Redis wire protocol) error.
    #[error("store error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON (de)serialization error from `put_json`/`scan_json`.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Caller-supplied argument was invalid (e.g. a lock TTL below 1ms).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias for msq operations.
pub type Result<T> = std::result::Result<T, StoreError>;
