use crate::domain::codec::{self, prepare_string};
use crate::domain::options::CallOptions;
use crate::ports::StoreConnection;
use serde::Serialize;
use serde_json::Value;
use shared::{Error, Result, StoreError, StoreResult};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

pub type ErrorObserver = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// Data-access adapter over one store connection.
///
/// Every operation turns a key (prefixed) and an optional value (serialized)
/// into exactly one store command. The adapter is either connected or, after
/// [`Storage::disconnect`], permanently disconnected.
pub struct Storage {
    connection: RwLock<Option<Arc<dyn StoreConnection>>>,
    key_prefix: Option<String>,
    on_connection_error: ErrorObserver,
}

impl Storage {
    /// BRPOP waits forever unless a timeout is given.
    pub const BRPOP_DEFAULT_TIMEOUT: u64 = 0;
    /// BLPOP gives up after one second unless a timeout is given.
    pub const BLPOP_DEFAULT_TIMEOUT: u64 = 1;

    pub fn new(connection: Arc<dyn StoreConnection>, key_prefix: Option<String>) -> Self {
        Self {
            connection: RwLock::new(Some(connection)),
            key_prefix: key_prefix.filter(|p| !p.is_empty()),
            on_connection_error: Arc::new(|error: &StoreError| {
                warn!("[ storage ][ connection error ] {}", error);
            }),
        }
    }

    /// Replace the observer called for connection-level failures.
    ///
    /// Only failures reported by a command (or by the teardown `QUIT`) reach
    /// the observer. A connection that drops while idle is seen on the next
    /// command.
    pub fn with_error_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        self.on_connection_error = Arc::new(observer);
        self
    }

    pub fn key_prefix(&self) -> Option<&str> {
        self.key_prefix.as_deref()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.is_some()
    }

    /// Drop the connection handle and close it.
    ///
    /// Returns once the handle is cleared. `QUIT` is sent from a spawned task,
    /// so a pending blocking pop (which holds the connection) does not hold up
    /// teardown. Operations already in flight keep their own handle and are
    /// not awaited. A second call is a no-op.
    pub async fn disconnect(&self) {
        let Some(conn) = self.connection.write().await.take() else {
            return;
        };

        let observer = self.on_connection_error.clone();
        tokio::spawn(async move {
            if let Err(error) = conn.quit().await {
                log_failure::<()>("QUIT", &error);
                if error.is_connection() {
                    (observer)(&error);
                }
            }
        });
    }

    /// Per-call prefix if non-empty, else the instance prefix, else none.
    pub fn hash_key(&self, key: &str, prefix: Option<&str>) -> String {
        let prefix = prefix
            .filter(|p| !p.is_empty())
            .or(self.key_prefix.as_deref())
            .unwrap_or("");
        format!("{}{}", prefix, key)
    }

    pub fn prepare_string<T>(value: &T) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        prepare_string(value)
    }

    pub fn prepare_hash(data: &Value) -> Value {
        codec::prepare_hash(data)
    }

    pub fn parse_hash(data: &Value) -> Value {
        codec::parse_hash(data)
    }

    /// Validate the key, grab the live handle and build the store key.
    async fn target(
        &self,
        key: &str,
        options: &CallOptions,
    ) -> Result<(Arc<dyn StoreConnection>, String)> {
        if key.is_empty() {
            return Err(Error::key_undefined());
        }

        let conn = self
            .connection
            .read()
            .await
            .clone()
            .ok_or(Error::NotConnected)?;

        Ok((conn, self.hash_key(key, options.key_prefix.as_deref())))
    }

    fn fail(&self, error: StoreError) -> Error {
        if error.is_connection() {
            (self.on_connection_error)(&error);
        }
        Error::Store(error)
    }

    fn settle<T: Debug>(&self, command: &str, result: StoreResult<T>) -> Result<T> {
        result.map_err(|error| {
            log_failure::<T>(command, &error);
            self.fail(error)
        })
    }

    pub async fn exists(&self, key: &str, options: &CallOptions) -> Result<bool> {
        let (conn, hash_key) = self.target(key, options).await?;
        self.settle("EXISTS", conn.exists(&hash_key).await)
    }

    /// Insert at the tail of the list, creating it if absent. Returns the new length.
    pub async fn rpush<T>(&self, key: &str, value: &T, options: &CallOptions) -> Result<i64>
    where
        T: Serialize + ?Sized,
    {
        let (conn, hash_key) = self.target(key, options).await?;
        let data = prepare_string(value)?;
        trace!("[ REDIS ][ rpush ] {{ {}: {} }}", hash_key, data);
        self.settle("RPUSH", conn.rpush(&hash_key, data).await)
    }

    /// Insert at the head of the list, creating it if absent. Returns the new length.
    pub async fn lpush<T>(&self, key: &str, value: &T, options: &CallOptions) -> Result<i64>
    where
        T: Serialize + ?Sized,
    {
        let (conn, hash_key) = self.target(key, options).await?;
        let data = prepare_string(value)?;
        trace!("[ REDIS ][ lpush ] {{ {}: {} }}", hash_key, data);
        self.settle("LPUSH", conn.lpush(&hash_key, data).await)
    }

    /// Pop from the tail, waiting until an element arrives or the timeout elapses.
    ///
    /// Holds the connection while waiting. Resolves to `(key, value)`, or
    /// `None` on timeout.
    pub async fn brpop(
        &self,
        key: &str,
        options: &CallOptions,
    ) -> Result<Option<(String, String)>> {
        let (conn, hash_key) = self.target(key, options).await?;
        let timeout = options.timeout.unwrap_or(Self::BRPOP_DEFAULT_TIMEOUT);
        self.settle("BRPOP", conn.brpop(&hash_key, timeout).await)
    }

    /// Pop from the head, waiting until an element arrives or the timeout elapses.
    pub async fn blpop(
        &self,
        key: &str,
        options: &CallOptions,
    ) -> Result<Option<(String, String)>> {
        let (conn, hash_key) = self.target(key, options).await?;
        let timeout = options.timeout.unwrap_or(Self::BLPOP_DEFAULT_TIMEOUT);
        self.settle("BLPOP", conn.blpop(&hash_key, timeout).await)
    }

    pub async fn lpop(&self, key: &str, options: &CallOptions) -> Result<Option<String>> {
        let (conn, hash_key) = self.target(key, options).await?;
        self.settle("LPOP", conn.lpop(&hash_key).await)
    }

    pub async fn llen(&self, key: &str, options: &CallOptions) -> Result<i64> {
        let (conn, hash_key) = self.target(key, options).await?;
        self.settle("LLEN", conn.llen(&hash_key).await)
    }

    /// Inclusive slice; negative indexes count back from the tail.
    pub async fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        options: &CallOptions,
    ) -> Result<Vec<String>> {
        let (conn, hash_key) = self.target(key, options).await?;
        self.settle("LRANGE", conn.lrange(&hash_key, start, stop).await)
    }

    pub async fn save<T>(&self, key: &str, value: &T, options: &CallOptions) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let (conn, hash_key) = self.target(key, options).await?;
        let data = prepare_string(value)?;
        self.settle("SET", conn.set(&hash_key, data).await)
    }

    /// Set only when the key is absent. Returns `true` when written.
    pub async fn savenx<T>(&self, key: &str, value: &T, options: &CallOptions) -> Result<bool>
    where
        T: Serialize + ?Sized,
    {
        let (conn, hash_key) = self.target(key, options).await?;
        let data = prepare_string(value)?;
        self.settle("SETNX", conn.set_nx(&hash_key, data).await)
    }

    /// Set with an expiry of `timeout` seconds.
    pub async fn saveex<T>(
        &self,
        key: &str,
        timeout: u64,
        value: &T,
        options: &CallOptions,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let (conn, hash_key) = self.target(key, options).await?;
        let data = prepare_string(value)?;
        self.settle("SETEX", conn.set_ex(&hash_key, data, timeout).await)
    }

    pub async fn read(&self, key: &str, options: &CallOptions) -> Result<Option<String>> {
        let (conn, hash_key) = self.target(key, options).await?;
        self.settle("GET", conn.get(&hash_key).await)
    }

    /// Delete the key. Returns the number of keys removed.
    pub async fn remove(&self, key: &str, options: &CallOptions) -> Result<i64> {
        let (conn, hash_key) = self.target(key, options).await?;
        self.settle("DEL", conn.del(&hash_key).await)
    }

    /// Set a time-to-live in seconds. Returns `false` when the key does not exist.
    pub async fn expire(&self, key: &str, timeout: i64, options: &CallOptions) -> Result<bool> {
        let (conn, hash_key) = self.target(key, options).await?;
        self.settle("EXPIRE", conn.expire(&hash_key, timeout).await)
    }
}

fn log_failure<T>(command: &str, error: &StoreError) {
    debug!("[ REDIS ][ {} ][ ERROR ] {:?}", command, error);
    debug!("[ REDIS ][ {} ][ RESULT ] None", command);
    debug!(
        "[ REDIS ][ {} ][ TYPEOF RESULT ] {}",
        command,
        std::any::type_name::<T>()
    );
}

impl Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("key_prefix", &self.key_prefix)
            .field("connection", &"<dyn StoreConnection>")
            .finish()
    }
}
