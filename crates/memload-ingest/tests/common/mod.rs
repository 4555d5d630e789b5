//! Shared fixtures for memload integration tests
//!
//! Input files are written as real gzip archives into a temporary directory
//! and loaded into an in-process [`MemoryStore`], so no memcached is needed.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use memload_ingest::config::LoaderConfig;
use memload_ingest::coordinator::Coordinator;
use memload_ingest::router::Endpoint;
use memload_ingest::store::{KvStore, MemoryStore, StoreConnector, StoreError, WritePolicy};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const IDFA: &str = "127.0.0.1:33013";
pub const GAID: &str = "127.0.0.1:33014";

/// Temporary input directory plus the backend every run writes into
pub struct TestEnv {
    pub dir: TempDir,
    pub store: MemoryStore,
}

impl TestEnv {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
            store: MemoryStore::new(),
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn pattern(&self) -> String {
        format!("{}/*.tsv.gz", self.dir.path().display())
    }

    /// Reference shard table, no retry delay, two workers
    pub fn config(&self) -> LoaderConfig {
        LoaderConfig::reference()
            .unwrap()
            .with_pattern(self.pattern())
            .with_workers(2)
            .with_write_policy(WritePolicy {
                retry_delay: Duration::ZERO,
                ..WritePolicy::default()
            })
    }

    pub fn coordinator(&self, config: LoaderConfig) -> Coordinator {
        Coordinator::new(config, Arc::new(self.store.clone())).unwrap()
    }

    pub fn write_gz(&self, name: &str, lines: &[String]) -> Result<PathBuf> {
        write_gz(self.dir.path(), name, lines)
    }

    /// Names currently in the input directory, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

/// Write `lines` as one gzip member, newline-terminated
pub fn write_gz(dir: &Path, name: &str, lines: &[String]) -> Result<PathBuf> {
    let path = dir.join(name);
    let mut encoder = GzEncoder::new(std::fs::File::create(&path)?, Compression::default());
    for line in lines {
        writeln!(encoder, "{}", line)?;
    }
    encoder.finish()?;
    Ok(path)
}

/// Gzip bytes for `lines`, for building concatenated or truncated archives
pub fn gz_bytes(lines: &[String]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for line in lines {
        writeln!(encoder, "{}", line).unwrap();
    }
    encoder.finish().unwrap()
}

/// `count` well-formed lines of one device type
pub fn good_lines(device_type: &str, prefix: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{device_type}\t{prefix}{i:05}\t55.55\t42.42\t1423,43,{i}"))
        .collect()
}

/// `count` lines that fail to parse
pub fn bad_lines(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("broken line {i}")).collect()
}

pub fn endpoint(address: &str) -> Endpoint {
    address.parse().unwrap()
}

/// Panics on connect, to exercise worker panic isolation
pub struct PanickingConnector;

impl StoreConnector for PanickingConnector {
    fn connect(&self, _endpoint: &Endpoint) -> std::result::Result<Box<dyn KvStore>, StoreError> {
        panic!("backend exploded");
    }
}
