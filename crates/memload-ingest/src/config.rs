//! Run-level configuration

use memload_common::{MemloadError, Result};
use serde::Serialize;
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::router::ShardTable;
use crate::store::WritePolicy;

// ============================================================================
// Defaults
// ============================================================================

/// Default input file pattern.
pub const DEFAULT_PATTERN: &str = "./data/*.tsv.gz";

/// Reference device types and their backends.
pub const DEFAULT_SHARDS: [(&str, &str); 4] = [
    ("idfa", "127.0.0.1:33013"),
    ("gaid", "127.0.0.1:33014"),
    ("adid", "127.0.0.1:33015"),
    ("dvid", "127.0.0.1:33016"),
];

/// Attempts per key, first try included.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Pause between attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Socket timeout for backend connections.
pub const DEFAULT_SOCKET_TIMEOUT_SECS: u64 = 3;

/// Key time-to-live; 0 never expires.
pub const DEFAULT_TTL_SECS: u32 = 0;

/// A file passes when its error rate is strictly below this.
pub const NORMAL_ERR_RATE: f64 = 0.01;

/// Which processed files get the completion marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkPolicy {
    /// Every file that was processed to the end, whatever its verdict
    #[default]
    Always,
    /// Only files that passed; failing files stay pending for the next run
    PassedOnly,
}

/// Validated configuration consumed by the coordinator
#[derive(Debug, Clone, Serialize)]
pub struct LoaderConfig {
    /// Glob pattern for input files
    pub pattern: String,

    pub shards: ShardTable,

    /// Files processed concurrently
    pub workers: usize,

    pub write: WritePolicy,

    /// Connect/read/write timeout for each backend request
    pub socket_timeout: Duration,

    pub max_error_rate: f64,

    pub mark_policy: MarkPolicy,
}

impl LoaderConfig {
    /// Configuration with every default except the shard table
    pub fn new(shards: ShardTable) -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            shards,
            workers: default_workers(),
            write: WritePolicy::default(),
            socket_timeout: Duration::from_secs(DEFAULT_SOCKET_TIMEOUT_SECS),
            max_error_rate: NORMAL_ERR_RATE,
            mark_policy: MarkPolicy::default(),
        }
    }

    /// Configuration for the reference shard table
    pub fn reference() -> Result<Self> {
        Ok(Self::new(ShardTable::from_pairs(DEFAULT_SHARDS)?))
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_write_policy(mut self, write: WritePolicy) -> Self {
        self.write = write;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.write.dry_run = dry_run;
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_max_error_rate(mut self, rate: f64) -> Self {
        self.max_error_rate = rate;
        self
    }

    pub fn with_mark_policy(mut self, policy: MarkPolicy) -> Self {
        self.mark_policy = policy;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.pattern.trim().is_empty() {
            return Err(MemloadError::config("file pattern cannot be empty"));
        }

        if self.shards.is_empty() {
            return Err(MemloadError::config("at least one shard must be configured"));
        }

        if self.workers == 0 {
            return Err(MemloadError::config("workers must be at least 1"));
        }

        if self.write.attempts == 0 {
            return Err(MemloadError::config("retry attempts must be at least 1"));
        }

        if !(self.max_error_rate > 0.0 && self.max_error_rate <= 1.0) {
            return Err(MemloadError::config(format!(
                "max error rate must be in (0, 1], got {}",
                self.max_error_rate
            )));
        }

        if self.socket_timeout.is_zero() {
            return Err(MemloadError::config("socket timeout must be greater than 0"));
        }

        Ok(())
    }
}

/// One worker per available CPU
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_config() {
        let config = LoaderConfig::reference().unwrap();
        assert_eq!(config.pattern, "./data/*.tsv.gz");
        assert_eq!(config.shards.len(), 4);
        assert_eq!(config.write.attempts, 3);
        assert_eq!(config.write.retry_delay, Duration::from_secs(1));
        assert_eq!(config.socket_timeout, Duration::from_secs(3));
        assert_eq!(config.max_error_rate, 0.01);
        assert_eq!(config.mark_policy, MarkPolicy::Always);
        assert!(!config.write.dry_run);
        assert!(config.workers >= 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = LoaderConfig::reference().unwrap();

        assert!(base.clone().with_pattern("  ").validate().is_err());
        assert!(base.clone().with_workers(0).validate().is_err());
        assert!(base.clone().with_max_error_rate(0.0).validate().is_err());
        assert!(base.clone().with_max_error_rate(1.5).validate().is_err());
        assert!(base.clone().with_max_error_rate(f64::NAN).validate().is_err());
        assert!(LoaderConfig::new(ShardTable::default()).validate().is_err());

        let no_attempts = WritePolicy {
            attempts: 0,
            ..WritePolicy::default()
        };
        assert!(base.with_write_policy(no_attempts).validate().is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = LoaderConfig::reference()
            .unwrap()
            .with_pattern("/tmp/in/*.gz")
            .with_workers(2)
            .with_dry_run(true)
            .with_socket_timeout(Duration::from_millis(500))
            .with_mark_policy(MarkPolicy::PassedOnly);

        assert_eq!(config.pattern, "/tmp/in/*.gz");
        assert_eq!(config.workers, 2);
        assert!(config.write.dry_run);
        assert_eq!(config.socket_timeout, Duration::from_millis(500));
        assert_eq!(config.mark_policy, MarkPolicy::PassedOnly);
        config.validate().unwrap();

        let no_timeout = config.with_socket_timeout(Duration::ZERO);
        assert!(no_timeout.validate().is_err());
    }
}
