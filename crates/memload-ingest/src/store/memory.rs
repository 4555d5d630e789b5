//! In-process backend
//!
//! Keeps one map per endpoint behind a shared handle, so every connection
//! opened from the same [`MemoryStore`] sees the same data. Counts connects
//! and requests and can inject failures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{KvStore, StoreConnector, StoreError};
use crate::router::Endpoint;

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    data: Mutex<HashMap<Endpoint, HashMap<String, Vec<u8>>>>,
    unreachable: Mutex<HashSet<Endpoint>>,
    /// Requests still to fail before the backend recovers
    pending_failures: AtomicU64,
    connects: AtomicU64,
    requests: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` requests on any endpoint
    pub fn fail_next(&self, count: u64) {
        self.inner.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Refuse every connection to `endpoint`
    pub fn set_unreachable(&self, endpoint: &Endpoint) {
        lock(&self.inner.unreachable).insert(endpoint.clone());
    }

    pub fn get(&self, endpoint: &Endpoint, key: &str) -> Option<Vec<u8>> {
        lock(&self.inner.data)
            .get(endpoint)
            .and_then(|keys| keys.get(key).cloned())
    }

    /// Every stored `(endpoint, key) -> value`, in a stable order
    pub fn snapshot(&self) -> BTreeMap<(String, String), Vec<u8>> {
        lock(&self.inner.data)
            .iter()
            .flat_map(|(endpoint, keys)| {
                keys.iter()
                    .map(move |(key, value)| ((endpoint.to_string(), key.clone()), value.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.data).values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connects(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> u64 {
        self.inner.requests.load(Ordering::SeqCst)
    }
}

impl StoreConnector for MemoryStore {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn KvStore>, StoreError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        if lock(&self.inner.unreachable).contains(endpoint) {
            return Err(StoreError::Connect {
                endpoint: endpoint.to_string(),
                message: "connection refused".to_string(),
            });
        }

        Ok(Box::new(MemoryConnection {
            endpoint: endpoint.clone(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemoryConnection {
    endpoint: Endpoint,
    inner: Arc<Inner>,
}

impl MemoryConnection {
    fn request(&self) -> Result<(), StoreError> {
        self.inner.requests.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .inner
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Backend {
                endpoint: self.endpoint.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl KvStore for MemoryConnection {
    fn set(&self, key: &str, value: &[u8], _ttl_secs: u32) -> Result<(), StoreError> {
        self.request()?;
        lock(&self.inner.data)
            .entry(self.endpoint.clone())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.request()?;
        Ok(lock(&self.inner.data)
            .get(&self.endpoint)
            .and_then(|keys| keys.get(key).cloned()))
    }
}
