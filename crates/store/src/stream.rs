//! `StreamOps`: typed wrappers over the stream/consumer-group commands,
//! decoding raw replies into [`crate::types`] once at this boundary.
//!
//! Grounded in the original's `stream.go` (`XAdd`/`XTrim`/`XReadGroup`/...)
//! and the reply-walking style of the teacher's
//! `message-processor/src/consumer.rs::read_events`.

use redis::Value;
use redis::aio::ConnectionManager;

use msq_common::{Result, StoreError};

use crate::client::StoreClient;
use crate::types::{FieldEntry, MessageEntry, PendingEntry, StreamEntry};

/// Stream and consumer-group operations over a [`StoreClient`]'s connection.
#[derive(Clone)]
pub struct StreamOps {
    manager: ConnectionManager,
}

impl StreamOps {
    pub fn new(client: &StoreClient) -> Self {
        Self {
            manager: client.manager(),
        }
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// `XADD stream * field value [field value ...]`. Returns the assigned
    /// message id.
    pub async fn xadd(&self, stream: &str, fields: &[FieldEntry]) -> Result<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for f in fields {
            cmd.arg(&f.key).arg(&f.value);
        }
        let id: String = cmd.query_async(&mut self.conn()).await?;
        Ok(id)
    }

    /// `XTRIM stream MAXLEN ~ max_len`.
    pub async fn xtrim(&self, stream: &str, max_len: i64) -> Result<()> {
        let _: i64 = redis::cmd("XTRIM")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_len)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    /// `XLEN stream`.
    pub async fn xlen(&self, stream: &str) -> Result<i64> {
        let len: i64 = redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut self.conn())
            .await?;
        Ok(len)
    }

    /// `XDEL stream id`.
    pub async fn xdel(&self, stream: &str, id: &str) -> Result<()> {
        let _: i64 = redis::cmd("XDEL")
            .arg(stream)
            .arg(id)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    /// `XGROUP CREATE stream group 0 MKSTREAM`.
    ///
    /// Returns [`StoreError::DataExist`] when the group already exists
    /// (`BUSYGROUP`); callers that want idempotent-create-on-restart
    /// semantics are expected to match on that sentinel and tolerate it,
    /// same as `original_source/msq/consumer.go`'s
    /// `if redis.ErrDataExist != err { return ... }`.
    pub async fn x_create_group(&self, stream: &str, group: &str) -> Result<()> {
        let result: std::result::Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut self.conn())
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Err(StoreError::DataExist),
            Err(e) => Err(e.into()),
        }
    }

    /// `XGROUP DESTROY stream group`.
    pub async fn x_destroy_group(&self, stream: &str, group: &str) -> Result<()> {
        let _: i64 = redis::cmd("XGROUP")
            .arg("DESTROY")
            .arg(stream)
            .arg(group)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    /// `XGROUP DELCONSUMER stream group consumer`.
    pub async fn x_delete_group_consumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<()> {
        let _: i64 = redis::cmd("XGROUP")
            .arg("DELCONSUMER")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    /// Two-phase group read: first drain this consumer's already-delivered
    /// pending entries (cursor `0`, non-blocking), then read new messages
    /// (cursor `>`, blocking up to `block`). Returns `Ok(None)` when neither
    /// phase yields anything.
    pub async fn x_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: i64,
        block: std::time::Duration,
    ) -> Result<Option<StreamEntry>> {
        if let Some(entry) = self.read_group_cursor(stream, group, consumer, count, "0", None).await? {
            if !entry.messages.is_empty() {
                return Ok(Some(entry));
            }
        }
        self.read_group_cursor(stream, group, consumer, count, ">", Some(block))
            .await
    }

    /// Both phases non-blocking; used by the claim/delay-drain loop which
    /// polls rather than waits. Returns [`StoreError::NotFound`] when both
    /// phases are empty, mirroring `XReadGroupNonBlock`'s `ErrNil`.
    pub async fn x_read_group_non_block(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: i64,
    ) -> Result<StreamEntry> {
        if let Some(entry) = self.read_group_cursor(stream, group, consumer, count, "0", None).await? {
            if !entry.messages.is_empty() {
                return Ok(entry);
            }
        }
        let entry = self
            .read_group_cursor(stream, group, consumer, count, ">", None)
            .await?;
        match entry {
            Some(e) if !e.messages.is_empty() => Ok(e),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn read_group_cursor(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: i64,
        cursor: &str,
        block: Option<std::time::Duration>,
    ) -> Result<Option<StreamEntry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);
        if let Some(b) = block {
            cmd.arg("BLOCK").arg(b.as_millis() as i64);
        }
        cmd.arg("STREAMS").arg(stream).arg(cursor);

        let value: Value = cmd.query_async(&mut self.conn()).await?;
        decode_stream_reply(value, stream)
    }

    /// `XACK stream group id`.
    pub async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let _: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id)
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    /// `XPENDING stream group - + count`.
    pub async fn x_pending(
        &self,
        stream: &str,
        group: &str,
        count: i64,
    ) -> Result<Vec<PendingEntry>> {
        let value: Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut self.conn())
            .await?;
        decode_pending_reply(value)
    }

    /// `XCLAIM stream group consumer min_idle_ms id`.
    ///
    /// Returns the claimed message, or `Ok(None)` if the entry was already
    /// claimed/acked/deleted by the time this ran (a normal race, not an
    /// error).
    pub async fn x_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: std::time::Duration,
        id: &str,
    ) -> Result<Option<MessageEntry>> {
        let value: Value = redis::cmd("XCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as i64)
            .arg(id)
            .query_async(&mut self.conn())
            .await?;

        let messages = decode_messages(value)?;
        Ok(messages.into_iter().next())
    }
}

/// Decode the nested reply of `XREADGROUP ... STREAMS name cursor`:
/// `[[name, [[id, [field, value, ...]], ...]], ...]`, or nil.
fn decode_stream_reply(value: Value, expected_name: &str) -> Result<Option<StreamEntry>> {
    let outer = match value {
        Value::Nil => return Ok(None),
        Value::Array(v) => v,
        other => {
            return Err(StoreError::Decode(format!(
                "XREADGROUP: expected array or nil, got {other:?}"
            )));
        }
    };

    for entry in outer {
        let (name, messages) = match entry {
            Value::Array(pair) if pair.len() == 2 => {
                let mut it = pair.into_iter();
                let name = decode_bulk_string(it.next().unwrap())?;
                let messages = decode_messages(it.next().unwrap())?;
                (name, messages)
            }
            other => {
                return Err(StoreError::Decode(format!(
                    "XREADGROUP: malformed stream entry {other:?}"
                )));
            }
        };
        if name == expected_name {
            return Ok(Some(StreamEntry { name, messages }));
        }
    }
    Ok(None)
}

/// Decode `[[id, [field, value, ...]], ...]` into `MessageEntry`s. Accepts
/// `Nil` (an XCLAIM/XRANGE style empty reply) as zero messages.
fn decode_messages(value: Value) -> Result<Vec<MessageEntry>> {
    let items = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Array(v) => v,
        other => {
            return Err(StoreError::Decode(format!(
                "expected array of messages, got {other:?}"
            )));
        }
    };

    let mut messages = Vec::with_capacity(items.len());
    for item in items {
        let (id, fields) = match item {
            Value::Array(pair) if pair.len() == 2 => {
                let mut it = pair.into_iter();
                let id = decode_bulk_string(it.next().unwrap())?;
                let fields = decode_fields(it.next().unwrap())?;
                (id, fields)
            }
            other => {
                return Err(StoreError::Decode(format!(
                    "malformed message entry {other:?}"
                )));
            }
        };
        messages.push(MessageEntry { id, fields });
    }
    Ok(messages)
}

/// Decode a flat `[field, value, field, value, ...]` reply into `FieldEntry`s.
fn decode_fields(value: Value) -> Result<Vec<FieldEntry>> {
    let flat = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Array(v) => v,
        other => {
            return Err(StoreError::Decode(format!(
                "expected flat field array, got {other:?}"
            )));
        }
    };

    if flat.len() % 2 != 0 {
        return Err(StoreError::Decode(
            "field array has an odd number of elements".to_string(),
        ));
    }

    let mut fields = Vec::with_capacity(flat.len() / 2);
    let mut it = flat.into_iter();
    while let (Some(key), Some(val)) = (it.next(), it.next()) {
        let key = decode_bulk_string(key)?;
        let val = decode_bulk_bytes(val)?;
        fields.push(FieldEntry::new(key, val));
    }
    Ok(fields)
}

/// Decode `XPENDING stream group - + count` extended-form rows:
/// `[[id, consumer, idle_ms, delivery_count], ...]`.
fn decode_pending_reply(value: Value) -> Result<Vec<PendingEntry>> {
    let rows = match value {
        Value::Nil => return Ok(Vec::new()),
        Value::Array(v) => v,
        other => {
            return Err(StoreError::Decode(format!(
                "XPENDING: expected array, got {other:?}"
            )));
        }
    };

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        let fields = match row {
            Value::Array(v) if v.len() == 4 => v,
            other => {
                return Err(StoreError::Decode(format!(
                    "XPENDING: malformed row {other:?}"
                )));
            }
        };
        let mut it = fields.into_iter();
        let id = decode_bulk_string(it.next().unwrap())?;
        let consumer = decode_bulk_string(it.next().unwrap())?;
        let idle_ms = decode_int(it.next().unwrap())?;
        let delivery_count = decode_int(it.next().unwrap())?;
        entries.push(PendingEntry {
            id,
            consumer,
            idle_ms,
            delivery_count,
        });
    }
    Ok(entries)
}

fn decode_bulk_string(value: Value) -> Result<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes)
            .map_err(|e| StoreError::Decode(format!("non-utf8 bulk string: {e}"))),
        Value::Okay => Ok("OK".to_string()),
        Value::Int(i) => Ok(i.to_string()),
        other => Err(StoreError::Decode(format!(
            "expected bulk string, got {other:?}"
        ))),
    }
}

fn decode_bulk_bytes(value: Value) -> Result<Vec<u8>> {
    match value {
        Value::BulkString(bytes) => Ok(bytes),
        other => Err(StoreError::Decode(format!(
            "expected bulk bytes, got {other:?}"
        ))),
    }
}

fn decode_int(value: Value) -> Result<i64> {
    match value {
        Value::Int(i) => Ok(i),
        Value::BulkString(bytes) => String::from_utf8_lossy(&bytes)
            .parse()
            .map_err(|e| StoreError::Decode(format!("expected integer: {e}"))),
        other => Err(StoreError::Decode(format!("expected integer, got {other:?}"))),
    }
}
