//! Single-file processing
//!
//! A [`FileProcessor`] streams one gzip TSV file line by line: parse, encode,
//! route and write each record, tally the outcome and judge the file by its
//! error rate. It is synchronous and owns its backend clients, so it runs on
//! a blocking worker and shares nothing mutable with other files.

use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::encoding::{self, UserApps};
use crate::record;
use crate::router::{Endpoint, ShardTable};
use crate::store::{StoreClient, StoreConnector, WritePolicy, WriteStats};

/// Per-file line tallies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounters {
    pub ok: u64,
    pub err: u64,
    /// Blank lines; counted in neither `ok` nor `err`
    pub skipped: u64,
}

impl OutcomeCounters {
    pub fn processed(&self) -> u64 {
        self.ok + self.err
    }

    /// `err / (ok + err)`; a file with nothing processed counts as fully failed
    pub fn error_rate(&self) -> f64 {
        match self.processed() {
            0 => 1.0,
            total => self.err as f64 / total as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    /// Pass only when `error_rate` is strictly below `threshold`
    pub fn judge(error_rate: f64, threshold: f64) -> Self {
        if error_rate < threshold {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

/// Result of processing a file to the end
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub counters: OutcomeCounters,
    pub error_rate: f64,
    pub verdict: Verdict,
    pub writes: WriteStats,
}

/// Failures that stop a file before its last line
#[derive(Error, Debug)]
pub enum FileError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read of {} failed after line {line}: {source}", path.display())]
    Read {
        path: PathBuf,
        line: u64,
        #[source]
        source: io::Error,
    },
}

enum LineOutcome {
    Ok,
    Err,
    Blank,
}

/// Processes exactly one file, then is consumed
pub struct FileProcessor {
    shards: Arc<ShardTable>,
    connector: Arc<dyn StoreConnector>,
    policy: WritePolicy,
    max_error_rate: f64,
    /// Opened lazily, one per endpoint this file actually routes to
    clients: HashMap<Endpoint, StoreClient>,
}

impl FileProcessor {
    pub fn new(
        shards: Arc<ShardTable>,
        connector: Arc<dyn StoreConnector>,
        policy: WritePolicy,
        max_error_rate: f64,
    ) -> Self {
        Self {
            shards,
            connector,
            policy,
            max_error_rate,
            clients: HashMap::new(),
        }
    }

    /// Decompress and process the file at `path`
    ///
    /// Concatenated gzip members are read as one stream. An unreadable file
    /// or a bad gzip header is [`FileError::Open`]; corruption found later
    /// is [`FileError::Read`].
    pub fn process_file(self, path: &Path) -> Result<FileOutcome, FileError> {
        let reader = open_gzip(path)?;
        self.run(reader).map_err(|(line, source)| FileError::Read {
            path: path.to_path_buf(),
            line,
            source,
        })
    }

    /// Process already-decompressed lines
    pub fn process_reader<R: BufRead>(self, reader: R) -> io::Result<FileOutcome> {
        self.run(reader).map_err(|(_, source)| source)
    }

    fn run<R: BufRead>(mut self, mut reader: R) -> Result<FileOutcome, (u64, io::Error)> {
        let mut counters = OutcomeCounters::default();
        let mut buf = Vec::new();
        let mut line_no = 0u64;

        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|err| (line_no, err))?;
            if read == 0 {
                break;
            }
            line_no += 1;

            match self.process_line(line_no, &buf) {
                LineOutcome::Ok => counters.ok += 1,
                LineOutcome::Err => counters.err += 1,
                LineOutcome::Blank => counters.skipped += 1,
            }
        }

        Ok(self.finish(counters))
    }

    fn process_line(&mut self, line_no: u64, raw: &[u8]) -> LineOutcome {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(err) => {
                warn!(line = line_no, error = %err, "Line is not valid UTF-8");
                return LineOutcome::Err;
            },
        };
        if line.trim().is_empty() {
            return LineOutcome::Blank;
        }

        let parsed = match record::parse(line) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(line = line_no, error = %err, "Cannot parse line");
                return LineOutcome::Err;
            },
        };

        let record = parsed.record;
        let key = record.key();
        if !parsed.ignored_apps.is_empty() {
            warn!(
                line = line_no,
                key = %key,
                ignored = ?parsed.ignored_apps,
                "Not all app ids are integers"
            );
        }
        if !parsed.ignored_coords.is_empty() {
            info!(
                line = line_no,
                key = %key,
                ignored = ?parsed.ignored_coords,
                "Invalid geo coordinates"
            );
        }

        let value = encoding::encode(&record);

        let endpoint = match self.shards.route(&record.device_type) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                warn!(line = line_no, key = %key, error = %err, "Cannot route record");
                return LineOutcome::Err;
            },
        };

        let client = self.clients.entry(endpoint.clone()).or_insert_with(|| {
            StoreClient::new(endpoint.clone(), Arc::clone(&self.connector), self.policy)
        });

        if self.policy.dry_run {
            debug!(
                line = line_no,
                endpoint = %client.endpoint(),
                key = %key,
                value = ?UserApps::from(&record),
                "Dry run write"
            );
        }

        if client.write(&key, &value) {
            LineOutcome::Ok
        } else {
            LineOutcome::Err
        }
    }

    fn finish(self, counters: OutcomeCounters) -> FileOutcome {
        let mut writes = WriteStats::default();
        for client in self.clients.values() {
            writes.merge(&client.stats());
        }

        let error_rate = counters.error_rate();
        let verdict = Verdict::judge(error_rate, self.max_error_rate);

        match verdict {
            Verdict::Pass => info!(
                ok = counters.ok,
                err = counters.err,
                skipped = counters.skipped,
                error_rate,
                "Acceptable error rate, successful load"
            ),
            Verdict::Fail => error!(
                ok = counters.ok,
                err = counters.err,
                skipped = counters.skipped,
                error_rate,
                threshold = self.max_error_rate,
                "High error rate, failed load"
            ),
        }

        FileOutcome {
            counters,
            error_rate,
            verdict,
            writes,
        }
    }
}

fn open_gzip(path: &Path) -> Result<BufReader<MultiGzDecoder<File>>, FileError> {
    let open_error = |source| FileError::Open {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(open_error)?;
    let mut reader = BufReader::new(MultiGzDecoder::new(file));
    // The first fill reads the gzip header
    reader.fill_buf().map_err(open_error)?;
    Ok(reader)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::io::Cursor;
    use std::time::Duration;

    fn shards() -> Arc<ShardTable> {
        Arc::new(
            ShardTable::from_pairs([("idfa", "127.0.0.1:33013"), ("gaid", "127.0.0.1:33014")])
                .unwrap(),
        )
    }

    fn policy() -> WritePolicy {
        WritePolicy {
            retry_delay: Duration::ZERO,
            ..WritePolicy::default()
        }
    }

    fn processor(store: &MemoryStore, policy: WritePolicy) -> FileProcessor {
        FileProcessor::new(shards(), Arc::new(store.clone()), policy, 0.01)
    }

    fn endpoint(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    #[test]
    fn test_error_rate() {
        let empty = OutcomeCounters::default();
        assert_eq!(empty.error_rate(), 1.0);

        let counters = OutcomeCounters {
            ok: 99,
            err: 1,
            skipped: 7,
        };
        assert_eq!(counters.processed(), 100);
        assert_eq!(counters.error_rate(), 0.01);
    }

    #[test]
    fn test_verdict_threshold_is_strict() {
        assert_eq!(Verdict::judge(0.0, 0.01), Verdict::Pass);
        assert_eq!(Verdict::judge(0.005, 0.01), Verdict::Pass);
        assert_eq!(Verdict::judge(0.01, 0.01), Verdict::Fail);
        assert_eq!(Verdict::judge(1.0, 1.0), Verdict::Fail);
    }

    #[test]
    fn test_lines_are_routed_and_stored() {
        let store = MemoryStore::new();
        let input = "idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23\n\
                     gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424\n";

        let outcome = processor(&store, policy())
            .process_reader(Cursor::new(input))
            .unwrap();

        assert_eq!(outcome.counters.ok, 2);
        assert_eq!(outcome.counters.err, 0);
        assert_eq!(outcome.verdict, Verdict::Pass);
        assert_eq!(outcome.writes.stored, 2);

        let stored = store
            .get(&endpoint("127.0.0.1:33013"), "idfa:1rfw452y52g2gq4g")
            .unwrap();
        let decoded = encoding::decode(&stored).unwrap();
        assert_eq!(decoded.apps, vec![1423, 43, 567, 3, 7, 23]);
        assert!(store
            .get(&endpoint("127.0.0.1:33014"), "gaid:7rfw452y52g2gq4g")
            .is_some());
        assert_eq!(store.connects(), 2);
    }

    #[test]
    fn test_line_failures_are_counted() {
        let store = MemoryStore::new();
        let input = "idfa\tgood\t1\t2\t3\n\
                     only\ttwo\n\
                     imei\tunrouted\t1\t2\t3\n\
                     \tmissing-type\t1\t2\t3\n\
                     \n\
                     gaid\tdegraded\tnorth\t2\t3,x,4\n";

        let outcome = processor(&store, policy())
            .process_reader(Cursor::new(input))
            .unwrap();

        assert_eq!(outcome.counters.ok, 2);
        assert_eq!(outcome.counters.err, 3);
        assert_eq!(outcome.counters.skipped, 1);
        assert_eq!(outcome.verdict, Verdict::Fail);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_invalid_utf8_is_an_error_line() {
        let store = MemoryStore::new();
        let mut input = b"idfa\tok\t1\t2\t3\n".to_vec();
        input.extend_from_slice(b"idfa\t\xff\xfe\t1\t2\t3\n");

        let outcome = processor(&store, policy())
            .process_reader(Cursor::new(input))
            .unwrap();

        assert_eq!(outcome.counters.ok, 1);
        assert_eq!(outcome.counters.err, 1);
    }

    #[test]
    fn test_failed_write_counts_as_error() {
        let store = MemoryStore::new();
        store.fail_next(3);

        let outcome = processor(&store, policy())
            .process_reader(Cursor::new("idfa\ta\t1\t2\t3\nidfa\tb\t1\t2\t3\n"))
            .unwrap();

        assert_eq!(outcome.counters.err, 1);
        assert_eq!(outcome.counters.ok, 1);
        assert_eq!(outcome.writes.exhausted, 1);
        assert_eq!(outcome.writes.retries, 2);
        assert!(store.get(&endpoint("127.0.0.1:33013"), "idfa:b").is_some());
    }

    #[test]
    fn test_unreachable_shard_fails_only_its_lines() {
        let store = MemoryStore::new();
        store.set_unreachable(&endpoint("127.0.0.1:33014"));

        let outcome = processor(&store, policy())
            .process_reader(Cursor::new("gaid\ta\t1\t2\t3\nidfa\tb\t1\t2\t3\n"))
            .unwrap();

        assert_eq!(outcome.counters.ok, 1);
        assert_eq!(outcome.counters.err, 1);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let store = MemoryStore::new();
        let dry = WritePolicy {
            dry_run: true,
            ..policy()
        };

        let outcome = processor(&store, dry)
            .process_reader(Cursor::new("idfa\ta\t1\t2\t3\ngaid\tb\t1\t2\t3\n"))
            .unwrap();

        assert_eq!(outcome.counters.ok, 2);
        assert_eq!(outcome.writes.simulated, 2);
        assert_eq!(store.connects(), 0);
        assert!(store.is_empty());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_dry_run_logs_key_and_value() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let store = MemoryStore::new();
        let dry = WritePolicy {
            dry_run: true,
            ..policy()
        };
        tracing::subscriber::with_default(subscriber, || {
            processor(&store, dry)
                .process_reader(Cursor::new("idfa\tdev42\t55.5\t42.5\t1423,43\n"))
                .unwrap();
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let line = output
            .lines()
            .find(|line| line.contains("Dry run write"))
            .expect("dry run write logged");
        assert!(line.contains("idfa:dev42"));
        assert!(line.contains("127.0.0.1:33013"));
        assert!(line.contains("1423"));
        assert!(line.contains("55.5"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_last_line_without_newline() {
        let store = MemoryStore::new();
        let outcome = processor(&store, policy())
            .process_reader(Cursor::new("idfa\ta\t1\t2\t3\r\nidfa\tb\t1\t2\t3"))
            .unwrap();

        assert_eq!(outcome.counters.ok, 2);
        assert!(store.get(&endpoint("127.0.0.1:33013"), "idfa:b").is_some());
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let store = MemoryStore::new();
        let err = processor(&store, policy())
            .process_file(Path::new("/nonexistent/memload/a.tsv.gz"))
            .unwrap_err();
        assert!(matches!(err, FileError::Open { .. }));
    }
}
