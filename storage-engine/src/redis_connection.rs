//! Redis-backed [`StoreConnection`].
//!
//! One multiplexed connection behind a mutex: commands from one adapter go
//! out one at a time in call order, and a blocking pop keeps the connection
//! until it returns.

use async_trait::async_trait;
use datasource::ports::StoreConnection;
use redis::aio::MultiplexedConnection;
use redis::{Client, Cmd, FromRedisValue, RedisError};
use shared::{Result, StoreError, StoreResult};
use tokio::sync::Mutex;
use tracing::info;

/// Classify a client error. I/O and dropped-connection failures are
/// connection-level, everything else is a command reply error.
pub fn store_error(error: RedisError) -> StoreError {
    if error.is_io_error()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.is_timeout()
    {
        StoreError::Connection(error.to_string())
    } else {
        StoreError::Response(error.to_string())
    }
}

pub struct RedisConnection {
    conn: Mutex<MultiplexedConnection>,
    address: String,
}

impl RedisConnection {
    /// Open one connection to `host:port`.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let address = format!("{}:{}", host, port);
        let client = Client::open(format!("redis://{}/", address)).map_err(store_error)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_error)?;

        info!("Connected to store at {}", address);

        Ok(Self {
            conn: Mutex::new(conn),
            address,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> StoreResult<T> {
        let mut conn = self.conn.lock().await;
        cmd.query_async(&mut *conn).await.map_err(store_error)
    }
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.query(redis::cmd("EXISTS").arg(key)).await
    }

    async fn rpush(&self, key: &str, value: String) -> StoreResult<i64> {
        self.query(redis::cmd("RPUSH").arg(key).arg(value)).await
    }

    async fn lpush(&self, key: &str, value: String) -> StoreResult<i64> {
        self.query(redis::cmd("LPUSH").arg(key).arg(value)).await
    }

    async fn brpop(&self, key: &str, timeout_secs: u64) -> StoreResult<Option<(String, String)>> {
        self.query(redis::cmd("BRPOP").arg(key).arg(timeout_secs)).await
    }

    async fn blpop(&self, key: &str, timeout_secs: u64) -> StoreResult<Option<(String, String)>> {
        self.query(redis::cmd("BLPOP").arg(key).arg(timeout_secs)).await
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        self.query(redis::cmd("LPOP").arg(key)).await
    }

    async fn llen(&self, key: &str) -> StoreResult<i64> {
        self.query(redis::cmd("LLEN").arg(key)).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.query(redis::cmd("SET").arg(key).arg(value)).await
    }

    async fn set_nx(&self, key: &str, value: String) -> StoreResult<bool> {
        self.query(redis::cmd("SETNX").arg(key).arg(value)).await
    }

    async fn set_ex(&self, key: &str, value: String, seconds: u64) -> StoreResult<()> {
        self.query(redis::cmd("SETEX").arg(key).arg(seconds).arg(value))
            .await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn del(&self, key: &str) -> StoreResult<i64> {
        self.query(redis::cmd("DEL").arg(key)).await
    }

    async fn expire(&self, key: &str, seconds: i64) -> StoreResult<bool> {
        self.query(redis::cmd("EXPIRE").arg(key).arg(seconds)).await
    }

    /// Queued behind any pending command, blocking pops included.
    /// `Storage::disconnect` sends it from a spawned task and does not wait.
    async fn quit(&self) -> StoreResult<()> {
        match self.query::<()>(&redis::cmd("QUIT")).await {
            // server may hang up before the reply is read
            Err(StoreError::Connection(_)) | Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("address", &self.address)
            .finish()
    }
}
