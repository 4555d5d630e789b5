//! Key-value backend access
//!
//! [`KvStore`] is one live connection to a backend, [`StoreConnector`] opens
//! them, and [`StoreClient`] wraps a lazily opened connection with the retry
//! budget and dry-run handling used by file processing.

pub mod client;
pub mod memcached;
pub mod memory;

use thiserror::Error;

use crate::router::Endpoint;

pub use client::{StoreClient, WritePolicy, WriteStats};
pub use memcached::MemcacheConnector;
pub use memory::MemoryStore;

/// Backend failures; all of them are treated as transient and retried
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("cannot connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    #[error("request to {endpoint} failed: {message}")]
    Backend { endpoint: String, message: String },
}

/// One open connection to a backend
pub trait KvStore: Send {
    /// Store `value` under `key`, replacing any previous value; `ttl_secs == 0` never expires
    fn set(&self, key: &str, value: &[u8], ttl_secs: u32) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Opens connections; shared read-only by every worker
pub trait StoreConnector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn KvStore>, StoreError>;
}
