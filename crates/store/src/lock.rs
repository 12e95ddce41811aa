//! Distributed mutex keyed by `(name, owner)`, built on `SET NX PX` for
//! acquisition and a Lua compare-and-delete for release, sharing the same
//! pooled connection as `StreamOps`.
//!
//! Grounded in the original's `lock.go` (`Lock`/`TryLock`/`Unlock`), with one
//! deliberate departure: `Unlock` there does `GET` then compares then `DEL`
//! as three separate round trips, which is racy (the original's own comment
//! says so). Here the compare-and-delete runs as a single `EVAL` so it's
//! atomic on the server; the abstract contract is unchanged.

use redis::Script;
use redis::aio::ConnectionManager;

use msq_common::{Result, StoreError};

use crate::client::StoreClient;

const RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10);

/// Deletes `name` only if its value still equals `owner`, so a lock that
/// expired and was reacquired by someone else is never torn down by its
/// previous holder.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A distributed mutex. Stateless beyond the connection it borrows — `name`
/// and `owner` are supplied per call, exactly as in the original.
pub struct Lock {
    manager: ConnectionManager,
}

impl Lock {
    pub fn new(client: &StoreClient) -> Self {
        Self {
            manager: client.manager(),
        }
    }

    /// Wait (busy-polling at [`RETRY_INTERVAL`]) until the lock is acquired.
    /// Fails only on store errors or `ttl < 1ms`; never returns `Locked`.
    pub async fn lock(&self, name: &str, owner: &str, ttl: std::time::Duration) -> Result<()> {
        loop {
            match self.try_lock(name, owner, ttl).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Locked) => tokio::time::sleep(RETRY_INTERVAL).await,
                Err(e) => return Err(e),
            }
        }
    }

    /// Attempt to acquire once; never blocks. [`StoreError::Locked`] if
    /// another owner currently holds it.
    pub async fn try_lock(&self, name: &str, owner: &str, ttl: std::time::Duration) -> Result<()> {
        if ttl < std::time::Duration::from_millis(1) {
            return Err(StoreError::InvalidArgument(
                "lock ttl must be at least 1ms".to_string(),
            ));
        }
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        if reply.is_some() {
            Ok(())
        } else {
            Err(StoreError::Locked)
        }
    }

    /// Release the lock. A no-op if `name` is already gone (expired or never
    /// acquired). [`StoreError::NotOwner`] if the stored owner doesn't match.
    pub async fn unlock(&self, name: &str, owner: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let script = Script::new(UNLOCK_SCRIPT);
        let deleted: i64 = script.key(name).arg(owner).invoke_async(&mut conn).await?;
        if deleted == 0 {
            let held: Option<String> = redis::cmd("GET").arg(name).query_async(&mut conn).await?;
            if held.is_some() {
                return Err(StoreError::NotOwner);
            }
        }
        Ok(())
    }
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
    async fn zero_ttl_rejected_without_a_round_trip() {
        let Some(store) = test_store().await else { return };
        let lock = Lock::new(&store);
        assert!(matches!(
            lock.try_lock("msq:test:zero-ttl", "alice", std::time::Duration::ZERO).await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    #[ignore = "requires a running Redis; set MSQ_TEST_REDIS_URL"]
    async fn try_lock_then_unlock_round_trip() {
        let Some(store) = test_store().await else { return };
        let lock = Lock::new(&store);
        let key = "msq:test:lock-a";
        let _ = lock.unlock(key, "alice").await;

        lock.try_lock(key, "alice", std::time::Duration::from_secs(5)).await.unwrap();
        assert!(matches!(
            lock.try_lock(key, "bob", std::time::Duration::from_secs(5)).await,
            Err(StoreError::Locked)
        ));
        lock.unlock(key, "alice").await.unwrap();
        lock.try_lock(key, "bob", std::time::Duration::from_secs(5)).await.unwrap();
        lock.unlock(key, "bob").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis; set MSQ_TEST_REDIS_URL"]
    async fn unlock_by_a_non_owner_fails() {
        let Some(store) = test_store().await else { return };
        let lock = Lock::new(&store);
        let key = "msq:test:lock-b";
        let _ = lock.unlock(key, "alice").await;

        lock.try_lock(key, "alice", std::time::Duration::from_secs(5)).await.unwrap();
        assert!(matches!(lock.unlock(key, "mallory").await, Err(StoreError::NotOwner)));
        lock.unlock(key, "alice").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a running Redis; set MSQ_TEST_REDIS_URL"]
    async fn unlock_of_absent_key_is_a_no_op() {
        let Some(store) = test_store().await else { return };
        let lock = Lock::new(&store);
        lock.unlock("msq:test:lock-never-held", "alice").await.unwrap();
    }
}
