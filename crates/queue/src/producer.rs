//! Producer: the write side of a queue. Appends `(key, payload)` pairs to
//! the main stream; no retry beyond what the pooled connection gives it.
//!
//! Grounded in the original's `msq/producer.go` (`redisMsqProducer.Put`).

use msq_common::Result;
use msq_store::{FieldEntry, StoreClient, StreamOps};

/// Appends messages to a single stream.
pub struct Producer {
    ops: StreamOps,
    stream: String,
}

impl Producer {
    pub fn new(client: &StoreClient, stream: impl Into<String>) -> Self {
        Self {
            ops: StreamOps::new(client),
            stream: stream.into(),
        }
    }

    /// Append `(key, payload)` to the stream. Returns the assigned message id.
    pub async fn put(&self, key: &str, payload: &[u8]) -> Result<String> {
        let fields = vec![FieldEntry::new(key, payload.to_vec())];
        self.ops.xadd(&self.stream, &fields).await
    }

    /// Current length of the backing stream.
    pub async fn len(&self) -> Result<i64> {
        self.ops.xlen(&self.stream).await
    }

    /// Releases nothing on its own; the underlying connection is pooled and
    /// owned by whoever constructed the `StoreClient`. Present for symmetry
    /// with the original's `Close` and for callers that want an explicit
    /// end-of-life marker.
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::aio::ConnectionManager;

    async fn test_store() -> Option<StoreClient> {
        let url = std::env::var("MSQ_TEST_REDIS_URL").ok()?;
        let client = redis::Client::open(url).ok()?;
        let manager = ConnectionManager::new(client).await.ok()?;
        Some(StoreClient::from_manager(manager))
    }

    #[tokio::test]
    #[ignore = "requires a running Redis; set MSQ_TEST_REDIS_URL"]
    async fn put_increases_len() {
        let Some(store) = test_store().await else { return };
        let producer = Producer::new(&store, "msq:test:producer-stream");
        let before = producer.len().await.unwrap_or(0);
        producer.put("order.created", b"{}").await.unwrap();
        let after = producer.len().await.unwrap();
        assert_eq!(after, before + 1);
    }
}
