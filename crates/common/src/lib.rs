//! # msq-common
//!
//! Shared error taxonomy and logging setup for the msq workspace: the
//! reliable work-queue and distributed-lock layers built in `msq-store` and
//! `msq-queue` both depend on this crate instead of duplicating it.

pub mod error;
pub mod logging;

pub use error::{Result, StoreError};
pub use logging::{init_tracing, init_tracing_json};
