//! Store connection configuration.
//!
//! Mirrors the original `RediStore` constructor parameters (pool size,
//! network, address, password, optional DB) plus the durations the queue
//! layer needs (claim/delay interval, blocking read timeout).

use std::env;
use std::time::Duration;

use msq_common::{Result, StoreError};

/// Connection and pooling configuration for [`crate::client::StoreClient`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Network type Redis listens on (`"tcp"` or `"unix"`).
    pub network: String,
    /// `host:port` (tcp) or socket path (unix).
    pub address: String,
    /// Password for `AUTH`; empty string means no auth.
    pub password: String,
    /// Logical database number selected via `SELECT`. `None` uses the
    /// server's default database.
    pub db: Option<u32>,
    /// Maximum number of pooled connections the underlying connection
    /// manager is allowed to multiplex over.
    pub pool_size: usize,
    /// Default blocking-read timeout for `XREADGROUP ... BLOCK`.
    pub block_timeout: Duration,
    /// Claim-loop tick period / minimum idle time before claim, as used by
    /// `Consumer`.
    pub delay_duration: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            address: "127.0.0.1:6379".to_string(),
            password: String::new(),
            db: None,
            pool_size: 10,
            block_timeout: Duration::from_secs(5),
            delay_duration: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    /// Build the `redis://` URL this config describes.
    pub fn redis_url(&self) -> String {
        let scheme = if self.network == "unix" {
            "redis+unix"
        } else {
            "redis"
        };
        let auth = if self.password.is_empty() {
            String::new()
        } else {
            format!(":{}@", self.password)
        };
        let db = self.db.map(|d| format!("/{d}")).unwrap_or_default();
        format!("{scheme}://{auth}{}{db}", self.address)
    }

    /// Load configuration from environment variables, falling back to
    /// [`StoreConfig::default`] for anything unset. Reads a `.env` file
    /// first, same as the rest of the ecosystem's `from_env` constructors.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let network = env::var("MSQ_REDIS_NETWORK").unwrap_or(defaults.network);
        let address = env::var("MSQ_REDIS_ADDRESS").unwrap_or(defaults.address);
        let password = env::var("MSQ_REDIS_PASSWORD").unwrap_or(defaults.password);
        let db = match env::var("MSQ_REDIS_DB") {
            Ok(s) => Some(
                s.parse::<u32>()
                    .map_err(|e| StoreError::InvalidArgument(format!("MSQ_REDIS_DB: {e}")))?,
            ),
            Err(_) => defaults.db,
        };
        let pool_size = match env::var("MSQ_REDIS_POOL_SIZE") {
            Ok(s) => s
                .parse::<usize>()
                .map_err(|e| StoreError::InvalidArgument(format!("MSQ_REDIS_POOL_SIZE: {e}")))?,
            Err(_) => defaults.pool_size,
        };
        let block_timeout = match env::var("MSQ_BLOCK_TIMEOUT_MS") {
            Ok(s) => Duration::from_millis(
                s.parse::<u64>()
                    .map_err(|e| StoreError::InvalidArgument(format!("MSQ_BLOCK_TIMEOUT_MS: {e}")))?,
            ),
            Err(_) => defaults.block_timeout,
        };
        let delay_duration = match env::var("MSQ_DELAY_DURATION_MS") {
            Ok(s) => Duration::from_millis(s.parse::<u64>().map_err(|e| {
                StoreError::InvalidArgument(format!("MSQ_DELAY_DURATION_MS: {e}"))
            })?),
            Err(_) => defaults.delay_duration,
        };

        Ok(Self {
            network,
            address,
            password,
            db,
            pool_size,
            block_timeout,
            delay_duration,
        })
    }
}
