//! # msq-queue
//!
//! A reliable work queue over consumer-group streams: [`Producer`] appends
//! messages, [`Consumer`] delivers them at-least-once with explicit ack,
//! delay-based retry, and automatic recovery of messages left pending by
//! slow or dead peers.

pub mod consumer;
pub mod node_id;
pub mod producer;

pub use consumer::{Consumer, Handler};
pub use node_id::default_consumer_name;
pub use producer::Producer;
