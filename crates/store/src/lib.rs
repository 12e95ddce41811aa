//! # msq-store
//!
//! Pooled store connection, stream/consumer-group primitives, and a
//! distributed lock, all sharing one connection pool. `msq-queue` builds the
//! producer/consumer work-queue on top of what this crate exposes.

pub mod client;
pub mod config;
pub mod lock;
pub mod stream;
pub mod types;

pub use client::StoreClient;
pub use config::StoreConfig;
pub use lock::Lock;
pub use stream::StreamOps;
pub use types::{FieldEntry, MessageEntry, PendingEntry, StreamEntry};
