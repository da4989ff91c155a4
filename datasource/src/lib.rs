//! Promise-style data access over a key/value and list store.
//!
//! [`Storage`] forwards each call as a single store command through a
//! [`StoreConnection`](ports::StoreConnection). Backends live in the
//! `storage-engine` crate.

pub mod domain;
pub mod ports;
pub mod storage;

pub use domain::options::CallOptions;
pub use ports::StoreConnection;
pub use storage::Storage;
