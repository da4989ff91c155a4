#![deny(clippy::all)]

use async_trait::async_trait;
use shared::StoreResult;

// Ports are the pluggable extension points for the underlying store client

/// Port for a single connection to a key/value and list store.
///
/// Each method issues exactly one store command. Keys arrive already
/// prefixed and values already serialized.
#[async_trait]
pub trait StoreConnection: Send + Sync + 'static {
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Append to the tail of a list, returning the new length.
    async fn rpush(&self, key: &str, value: String) -> StoreResult<i64>;

    /// Prepend to the head of a list, returning the new length.
    async fn lpush(&self, key: &str, value: String) -> StoreResult<i64>;

    /// Blocking tail pop. `timeout_secs == 0` waits forever.
    async fn brpop(&self, key: &str, timeout_secs: u64) -> StoreResult<Option<(String, String)>>;

    /// Blocking head pop. `timeout_secs == 0` waits forever.
    async fn blpop(&self, key: &str, timeout_secs: u64) -> StoreResult<Option<(String, String)>>;

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>>;
    async fn llen(&self, key: &str) -> StoreResult<i64>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    async fn set(&self, key: &str, value: String) -> StoreResult<()>;

    /// Returns `true` when the value was written.
    async fn set_nx(&self, key: &str, value: String) -> StoreResult<bool>;

    async fn set_ex(&self, key: &str, value: String, seconds: u64) -> StoreResult<()>;
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Returns the number of keys removed.
    async fn del(&self, key: &str) -> StoreResult<i64>;

    /// Returns `true` when a timeout was set.
    async fn expire(&self, key: &str, seconds: i64) -> StoreResult<bool>;

    /// Close the connection.
    async fn quit(&self) -> StoreResult<()>;
}
