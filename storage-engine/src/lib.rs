pub mod memory_store;
pub mod redis_connection;

pub use memory_store::{MemoryConnection, MemoryStore};
pub use redis_connection::RedisConnection;

use datasource::Storage;
use shared::Result;
use shared::config::StorageConfig;
use std::sync::Arc;
use tracing::info;

/// Open one store connection from config and wrap it in a [`Storage`].
pub async fn connect(config: &StorageConfig) -> Result<Storage> {
    info!(
        "Connecting storage to {} (key prefix: {:?})",
        config.address(),
        config.key_prefix
    );

    let conn = RedisConnection::connect(&config.host, config.port).await?;
    Ok(Storage::new(Arc::new(conn), config.key_prefix.clone()))
}
