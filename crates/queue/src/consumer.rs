//! Consumer: the read side of a queue, with consumer-group delivery,
//! explicit ack, delay-based retry, and a background claim loop that
//! recovers messages left pending by slow or dead peers.
//!
//! Grounded in the original's `msq/consumer.go` (`redisMsqConsumer`), which
//! is the authoritative (later) implementation — `msq/msq.go` carries an
//! older, simpler variant of the same protocol that this supersedes.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use msq_common::{Result, StoreError};
use msq_store::{FieldEntry, MessageEntry, StoreClient, StreamOps};

const CLAIM_BATCH_LIMIT: i64 = 100;
const READ_LIMIT: i64 = 10;

/// `true` ⇒ ack the message; `false` ⇒ move it to the delay stream for
/// redelivery after at least one claim cycle.
pub trait Handler: Fn(&str, &FieldEntry) -> bool + Send + Sync {}
impl<F> Handler for F where F: Fn(&str, &FieldEntry) -> bool + Send + Sync {}

/// The claim/requeue machinery, shared between `Consumer::claim` and the
/// background loop spawned at construction. Holds no state beyond what it
/// needs to name streams and issue commands, so it's cheap to clone into the
/// spawned task.
#[derive(Clone)]
struct ClaimWorker {
    ops: StreamOps,
    main_stream: String,
    delay_stream: String,
    client_id: String,
}

impl ClaimWorker {
    async fn ack_on(&self, stream: &str, id: &str) -> Result<()> {
        self.ops.xdel(stream, id).await?;
        self.ops.xack(stream, stream, id).await?;
        Ok(())
    }

    async fn requeue(&self, from_stream: &str, to_stream: &str, entry: &MessageEntry) -> Result<()> {
        if entry.fields.is_empty() {
            return Err(StoreError::InvalidArgument(
                "need at least one field to requeue an entry".to_string(),
            ));
        }
        self.ops.xadd(to_stream, &entry.fields).await?;
        self.ack_on(from_stream, &entry.id).await
    }

    /// Recover messages whose owning consumer is slow or dead, on both the
    /// main and delay streams, then drain the delay stream back into main.
    async fn claim(&self, min_idle: Duration) -> Result<()> {
        let main_len = self.ops.xlen(&self.main_stream).await?;
        let delay_len = self.ops.xlen(&self.delay_stream).await?;

        if main_len > 0 {
            self.claim_stream(&self.main_stream, min_idle).await?;
        }
        if delay_len > 0 {
            self.claim_stream(&self.delay_stream, min_idle).await?;
            self.drain_delay().await?;
        }
        Ok(())
    }

    async fn claim_stream(&self, stream: &str, min_idle: Duration) -> Result<()> {
        let pending = self.ops.x_pending(stream, stream, CLAIM_BATCH_LIMIT).await?;
        let min_idle_ms = min_idle.as_millis() as i64;
        for entry in pending {
            if entry.idle_ms < min_idle_ms {
                continue;
            }
            if entry.consumer == self.client_id {
                continue;
            }
            self.ops
                .x_claim(stream, stream, &self.client_id, min_idle, &entry.id)
                .await?;
        }
        Ok(())
    }

    /// Repeatedly read the delay stream non-blocking and requeue every
    /// message back to main, until the stream is drained.
    async fn drain_delay(&self) -> Result<()> {
        loop {
            let entry = self
                .ops
                .x_read_group_non_block(&self.delay_stream, &self.delay_stream, &self.client_id, CLAIM_BATCH_LIMIT)
                .await;
            match entry {
                Ok(e) => {
                    for message in &e.messages {
                        self.requeue(&self.delay_stream, &self.main_stream, message).await?;
                    }
                }
                Err(StoreError::NotFound) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

/// A consumer-group reader over one logical queue (a main stream plus its
/// `.delay` sibling), with a background claim loop spawned at construction.
pub struct Consumer {
    ops: StreamOps,
    worker: ClaimWorker,
    main_stream: String,
    delay_duration: Duration,
    cancel: CancellationToken,
    /// `close` only needs `&self` — a different task is expected to cancel
    /// a `next` loop that's mid-`.await` on `self`, so taking the handle
    /// can't require exclusive access. A `Mutex` makes `.take()` possible
    /// through a shared reference.
    claim_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Consumer {
    /// Ensure both consumer groups exist and spawn the background claim
    /// loop (ticking every `delay_duration`, invoking `claim(delay_duration)`).
    pub async fn new(
        client: &StoreClient,
        main_stream: impl Into<String>,
        client_id: impl Into<String>,
        delay_duration: Duration,
    ) -> Result<Self> {
        if delay_duration.is_zero() {
            return Err(StoreError::InvalidArgument(
                "delay_duration must be non-zero".to_string(),
            ));
        }

        let main_stream = main_stream.into();
        let client_id = client_id.into();
        let delay_stream = format!("{main_stream}.delay");
        let ops = StreamOps::new(client);

        ensure_group(&ops, &main_stream, &main_stream).await?;
        ensure_group(&ops, &delay_stream, &delay_stream).await?;

        let worker = ClaimWorker {
            ops: ops.clone(),
            main_stream: main_stream.clone(),
            delay_stream,
            client_id,
        };

        let cancel = CancellationToken::new();
        let claim_task = spawn_claim_loop(worker.clone(), delay_duration, cancel.clone());

        Ok(Self {
            ops,
            worker,
            main_stream,
            delay_duration,
            cancel,
            claim_task: tokio::sync::Mutex::new(Some(claim_task)),
        })
    }

    /// A single group read on the main stream; an empty result (not an
    /// error) when there is no data.
    pub async fn read(&self, limit: i64, timeout: Duration) -> Result<Vec<MessageEntry>> {
        let entry = self
            .ops
            .x_read_group(&self.main_stream, &self.main_stream, &self.worker.client_id, limit, timeout)
            .await?;
        Ok(entry.map(|e| e.messages).unwrap_or_default())
    }

    /// `XDEL` then `XACK` on the main stream. Order matters: the payload is
    /// removed first, then the pending-list entry. Not atomic; a failure
    /// between the two is recoverable by the claim loop.
    pub async fn ack(&self, id: &str) -> Result<()> {
        self.worker.ack_on(&self.main_stream, id).await
    }

    /// Move a message from the main stream to the delay stream, then ack it
    /// on main. `entry.fields` must be non-empty: its first pair becomes the
    /// delay stream's primary `(key, value)`; the rest are appended as-is.
    pub async fn delay(&self, entry: &MessageEntry) -> Result<()> {
        self.worker
            .requeue(&self.main_stream, &self.worker.delay_stream, entry)
            .await
    }

    /// Recover messages whose original consumer is slow or dead, and drain
    /// the delay stream back into main. Also invoked by the background
    /// claim loop on every `delay_duration` tick.
    pub async fn claim(&self, min_idle: Duration) -> Result<()> {
        self.worker.claim(min_idle).await
    }

    /// `(main_len, delay_len)`.
    pub async fn len(&self) -> Result<(i64, i64)> {
        let main_len = self.ops.xlen(&self.main_stream).await?;
        let delay_len = self.ops.xlen(&self.worker.delay_stream).await?;
        Ok((main_len, delay_len))
    }

    /// One batch of the consume loop. Non-conformant messages (fields.len()
    /// != 1) are delayed unconditionally; otherwise the handler decides
    /// ack vs delay.
    async fn next_batch(&self, handler: &impl Handler) -> Result<()> {
        let messages = self.read(READ_LIMIT, self.delay_duration).await?;
        for message in &messages {
            if message.fields.len() != 1 {
                self.delay(message).await?;
                continue;
            }
            if handler(&message.id, &message.fields[0]) {
                self.ack(&message.id).await?;
            } else {
                self.delay(message).await?;
            }
        }
        Ok(())
    }

    /// The consume loop: read a batch, dispatch each message to `handler`,
    /// repeat until cancelled via [`Consumer::close`]. Any unrecoverable
    /// error is returned; the caller is expected to re-invoke `next` after
    /// diagnosing.
    pub async fn next(&self, handler: impl Handler) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            match self.next_batch(&handler).await {
                Ok(()) => continue,
                Err(e) => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    return Err(e);
                }
            }
        }
    }

    /// Cancel the background claim loop and wait for it to actually exit.
    ///
    /// Takes `&self` so it can be called from a task other than the one
    /// driving `next`/`read` in a foreground loop.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(task) = self.claim_task.lock().await.take() {
            let _ = task.await;
        }
        Ok(())
    }
}

/// Create a consumer group, tolerating the case where it already exists.
///
/// Mirrors `original_source/msq/consumer.go`'s
/// `if redis.ErrDataExist != err { return nil, err }`.
async fn ensure_group(ops: &StreamOps, stream: &str, group: &str) -> Result<()> {
    match ops.x_create_group(stream, group).await {
        Ok(()) | Err(StoreError::DataExist) => Ok(()),
        Err(e) => Err(e),
    }
}

fn spawn_claim_loop(worker: ClaimWorker, delay_duration: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(delay_duration);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    match worker.claim(delay_duration).await {
                        Ok(()) => {}
                        Err(StoreError::NotFound) => {}
                        Err(e) => warn!(error = %e, "claim loop iteration failed"),
                    }
                }
            }
        }
    })
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

    #[test]
    fn non_conformant_message_detection_is_by_field_count() {
        let one = MessageEntry {
            id: "1-0".to_string(),
            fields: vec![FieldEntry::new("k", b"v".to_vec())],
        };
        let two = MessageEntry {
            id: "1-1".to_string(),
            fields: vec![
                FieldEntry::new("k", b"v".to_vec()),
                FieldEntry::new("k2", b"v2".to_vec()),
            ],
        };
        assert_eq!(one.fields.len(), 1);
        assert_ne!(two.fields.len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis; set MSQ_TEST_REDIS_URL"]
    async fn round_trip_read_then_ack_removes_the_message() {
        let Some(store) = test_store().await else { return };
        let stream = "msq:test:consumer-roundtrip";
        let ops = StreamOps::new(&store);
        let _ = ops.x_destroy_group(stream, stream).await;
        let _ = ops.x_destroy_group(&format!("{stream}.delay"), &format!("{stream}.delay")).await;

        let consumer = Consumer::new(&store, stream, "test-consumer", Duration::from_secs(30))
            .await
            .unwrap();
        ops.xadd(stream, &[FieldEntry::new("order.created", b"{}".to_vec())])
            .await
            .unwrap();

        let messages = consumer.read(10, Duration::from_secs(1)).await.unwrap();
        assert_eq!(messages.len(), 1);
        consumer.ack(&messages[0].id).await.unwrap();

        let (main_len, _) = consumer.len().await.unwrap();
        assert_eq!(main_len, 0);
        consumer.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis; set MSQ_TEST_REDIS_URL"]
    async fn delay_then_claim_moves_the_message_back_to_main() {
        let Some(store) = test_store().await else { return };
        let stream = "msq:test:consumer-delay";
        let ops = StreamOps::new(&store);
        let _ = ops.x_destroy_group(stream, stream).await;
        let _ = ops.x_destroy_group(&format!("{stream}.delay"), &format!("{stream}.delay")).await;

        let consumer = Consumer::new(&store, stream, "test-consumer", Duration::from_millis(50))
            .await
            .unwrap();
        ops.xadd(stream, &[FieldEntry::new("order.created", b"{}".to_vec())])
            .await
            .unwrap();

        let messages = consumer.read(10, Duration::from_secs(1)).await.unwrap();
        consumer.delay(&messages[0]).await.unwrap();

        let (main_len, delay_len) = consumer.len().await.unwrap();
        assert_eq!(main_len, 0);
        assert_eq!(delay_len, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        consumer.claim(Duration::from_millis(50)).await.unwrap();

        let (main_len, delay_len) = consumer.len().await.unwrap();
        assert_eq!(main_len, 1);
        assert_eq!(delay_len, 0);
        consumer.close().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis; set MSQ_TEST_REDIS_URL"]
    async fn claim_skips_messages_still_owned_by_self() {
        let Some(store) = test_store().await else { return };
        let stream = "msq:test:consumer-skip-self";
        let ops = StreamOps::new(&store);
        let _ = ops.x_destroy_group(stream, stream).await;
        let _ = ops.x_destroy_group(&format!("{stream}.delay"), &format!("{stream}.delay")).await;

        let consumer = Consumer::new(&store, stream, "solo-consumer", Duration::from_millis(20))
            .await
            .unwrap();
        ops.xadd(stream, &[FieldEntry::new("k", b"v".to_vec())])
            .await
            .unwrap();
        let messages = consumer.read(10, Duration::from_secs(1)).await.unwrap();
        assert_eq!(messages.len(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        consumer.claim(Duration::from_millis(20)).await.unwrap();

        let (main_len, _) = consumer.len().await.unwrap();
        assert_eq!(main_len, 1, "message should remain pending to the same owner, not reset");
        consumer.close().await.unwrap();
    }
}
