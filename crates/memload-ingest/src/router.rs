//! Device-type to backend routing

use memload_common::{MemloadError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Address of one backend instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(invalid(&format!(":{}", port), "empty host"));
        }
        if port == 0 {
            return Err(invalid(&format!("{}:0", host), "port must be non-zero"));
        }
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = MemloadError;

    /// Parse `host:port`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| invalid(s, "expected host:port"))?;
        let port: u16 = port
            .parse()
            .map_err(|_| invalid(s, "port is not a number in 1..=65535"))?;
        Endpoint::new(host, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn invalid(address: &str, reason: &str) -> MemloadError {
    MemloadError::InvalidEndpoint {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no backend configured for device type '{0}'")]
    UnknownDeviceType(String),
}

/// Static device-type to endpoint table, fixed for the whole run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShardTable {
    shards: BTreeMap<String, Endpoint>,
}

impl ShardTable {
    /// Build from `(device_type, "host:port")` pairs; later pairs win
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut shards = BTreeMap::new();
        for (device_type, address) in pairs {
            let device_type = device_type.as_ref().trim();
            if device_type.is_empty() {
                return Err(MemloadError::config("device type in shard table is empty"));
            }
            shards.insert(device_type.to_string(), address.as_ref().parse()?);
        }
        Ok(Self { shards })
    }

    pub fn route(&self, device_type: &str) -> std::result::Result<&Endpoint, RoutingError> {
        self.shards
            .get(device_type)
            .ok_or_else(|| RoutingError::UnknownDeviceType(device_type.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Endpoint)> {
        self.shards.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}
