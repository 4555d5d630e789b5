//! Retrying per-endpoint client

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::{KvStore, StoreConnector, StoreError};
use crate::config::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_MS, DEFAULT_TTL_SECS};
use crate::router::Endpoint;

/// How writes are performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WritePolicy {
    /// Total attempts per key, first try included
    pub attempts: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
    pub ttl_secs: u32,
    /// Log writes instead of performing them
    pub dry_run: bool,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            ttl_secs: DEFAULT_TTL_SECS,
            dry_run: false,
        }
    }
}

/// Per-client write counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    /// Backend requests issued, retries included
    pub attempts: u64,
    pub stored: u64,
    /// Writes skipped by dry-run
    pub simulated: u64,
    pub retries: u64,
    /// Keys given up on after the last attempt
    pub exhausted: u64,
}

impl WriteStats {
    pub fn merge(&mut self, other: &WriteStats) {
        self.attempts += other.attempts;
        self.stored += other.stored;
        self.simulated += other.simulated;
        self.retries += other.retries;
        self.exhausted += other.exhausted;
    }
}

/// Exclusive handle to one endpoint, owned by a single file processor
pub struct StoreClient {
    endpoint: Endpoint,
    connector: Arc<dyn StoreConnector>,
    connection: Option<Box<dyn KvStore>>,
    policy: WritePolicy,
    stats: WriteStats,
}

impl StoreClient {
    /// No connection is opened until the first live request
    pub fn new(
        endpoint: Endpoint,
        connector: Arc<dyn StoreConnector>,
        policy: WritePolicy,
    ) -> Self {
        Self {
            endpoint,
            connector,
            connection: None,
            policy,
            stats: WriteStats::default(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Write one key, retrying up to the policy's budget
    ///
    /// Returns `false` once every attempt has failed. In dry-run mode the
    /// write is only counted and always succeeds; callers log the value.
    pub fn write(&mut self, key: &str, value: &[u8]) -> bool {
        if self.policy.dry_run {
            self.stats.simulated += 1;
            return true;
        }

        let ttl_secs = self.policy.ttl_secs;
        match self.with_retries("SET", key, |conn| conn.set(key, value, ttl_secs)) {
            Ok(()) => {
                self.stats.stored += 1;
                true
            },
            Err(_) => {
                self.stats.exhausted += 1;
                false
            },
        }
    }

    /// Read one key with the same retry budget; a miss is `Ok(None)`
    ///
    /// Dry-run never touches the network, so it always reports a miss.
    pub fn fetch(&mut self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if self.policy.dry_run {
            debug!(endpoint = %self.endpoint, key, "Dry run read");
            return Ok(None);
        }

        self.with_retries("GET", key, |conn| conn.get(key))
    }

    fn with_retries<T>(
        &mut self,
        operation: &'static str,
        key: &str,
        mut op: impl FnMut(&dyn KvStore) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.stats.attempts += 1;

            let result = self.connection().and_then(|conn| op(conn));
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            // Reconnect on the next attempt
            self.connection = None;

            if attempt >= attempts {
                error!(
                    endpoint = %self.endpoint,
                    key,
                    operation,
                    attempts,
                    error = %err,
                    "Backend request failed, giving up"
                );
                return Err(err);
            }

            self.stats.retries += 1;
            warn!(
                endpoint = %self.endpoint,
                key,
                operation,
                attempt,
                attempts,
                error = %err,
                "Backend request failed, retrying"
            );
            if !self.policy.retry_delay.is_zero() {
                std::thread::sleep(self.policy.retry_delay);
            }
        }
    }

    fn connection(&mut self) -> Result<&dyn KvStore, StoreError> {
        let conn = match self.connection.take() {
            Some(conn) => conn,
            None => self.connector.connect(&self.endpoint)?,
        };
        Ok(&**self.connection.insert(conn))
    }
}
