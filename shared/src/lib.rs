// shared/src/lib.rs

/// Failure reported by the store connection itself.
///
/// Messages are carried verbatim from the underlying client.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("connection: {0}")]
    Connection(String),
    #[error("{0}")]
    Response(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("There is no connection.")]
    NotConnected,
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    pub const KEY_UNDEFINED: &str = "Key is undefined";

    pub fn key_undefined() -> Self {
        Error::InvalidArgument(Self::KEY_UNDEFINED.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub mod config;
pub mod logging;
