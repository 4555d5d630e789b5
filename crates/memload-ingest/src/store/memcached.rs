//! memcached backend

use std::time::Duration;
use tracing::debug;

use super::{KvStore, StoreConnector, StoreError};
use crate::router::Endpoint;

/// Connects to memcached servers with a fixed socket timeout
#[derive(Debug, Clone)]
pub struct MemcacheConnector {
    timeout: Duration,
}

impl MemcacheConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Connection URL understood by the `memcache` crate
    pub fn connection_url(&self, endpoint: &Endpoint) -> String {
        let secs = self.timeout.as_secs_f64();
        format!(
            "memcache://{}?timeout={}&connect_timeout={}&tcp_nodelay=true",
            endpoint, secs, secs
        )
    }
}

impl StoreConnector for MemcacheConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn KvStore>, StoreError> {
        let url = self.connection_url(endpoint);
        debug!(%endpoint, "Connecting to memcached");

        let client = memcache::Client::connect(url.as_str()).map_err(|e| StoreError::Connect {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;

        Ok(Box::new(MemcacheStore {
            endpoint: endpoint.to_string(),
            client,
        }))
    }
}

struct MemcacheStore {
    endpoint: String,
    client: memcache::Client,
}

impl MemcacheStore {
    fn backend_error(&self, err: memcache::MemcacheError) -> StoreError {
        StoreError::Backend {
            endpoint: self.endpoint.clone(),
            message: err.to_string(),
        }
    }
}

impl KvStore for MemcacheStore {
    fn set(&self, key: &str, value: &[u8], ttl_secs: u32) -> Result<(), StoreError> {
        self.client
            .set(key, value, ttl_secs)
            .map_err(|e| self.backend_error(e))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.client
            .get::<Vec<u8>>(key)
            .map_err(|e| self.backend_error(e))
    }
}
