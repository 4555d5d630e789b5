//! Pool coordination
//!
//! Discovers the input files, dispatches one [`FileProcessor`] per file onto
//! the blocking pool with at most `workers` files in flight, and marks each
//! file once its worker returns.

use futures::stream::{self, StreamExt};
use glob::MatchOptions;
use memload_common::{MemloadError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};

use crate::config::{LoaderConfig, MarkPolicy};
use crate::marker;
use crate::processor::{FileError, FileOutcome, FileProcessor, Verdict};
use crate::router::ShardTable;
use crate::store::StoreConnector;

/// What happened to one discovered file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    /// Processed to the end and renamed
    Marked {
        outcome: FileOutcome,
        marked_path: PathBuf,
    },
    /// Processed to the end, not renamed because of the marking policy
    LeftPending { outcome: FileOutcome },
    /// Processed to the end, but the rename failed
    MarkFailed { outcome: FileOutcome, error: String },
    /// Could not be opened or read through, or its worker panicked
    Unreadable { error: String },
    /// Never dispatched because shutdown was requested
    Cancelled,
}

impl FileStatus {
    pub fn outcome(&self) -> Option<&FileOutcome> {
        match self {
            FileStatus::Marked { outcome, .. }
            | FileStatus::LeftPending { outcome }
            | FileStatus::MarkFailed { outcome, .. } => Some(outcome),
            FileStatus::Unreadable { .. } | FileStatus::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// Per-file results of one run, in discovery order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub files: Vec<FileReport>,
}

/// Counts derived from a [`RunReport`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub discovered: usize,
    pub marked: usize,
    pub left_pending: usize,
    pub mark_failed: usize,
    pub unreadable: usize,
    pub cancelled: usize,
    pub passed: usize,
    pub failed: usize,
    pub lines_ok: u64,
    pub lines_err: u64,
}

impl RunReport {
    pub fn get(&self, path: &Path) -> Option<&FileStatus> {
        self.files
            .iter()
            .find(|report| report.path == path)
            .map(|report| &report.status)
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            discovered: self.files.len(),
            ..RunSummary::default()
        };

        for report in &self.files {
            match &report.status {
                FileStatus::Marked { .. } => summary.marked += 1,
                FileStatus::LeftPending { .. } => summary.left_pending += 1,
                FileStatus::MarkFailed { .. } => summary.mark_failed += 1,
                FileStatus::Unreadable { .. } => summary.unreadable += 1,
                FileStatus::Cancelled => summary.cancelled += 1,
            }

            if let Some(outcome) = report.status.outcome() {
                match outcome.verdict {
                    Verdict::Pass => summary.passed += 1,
                    Verdict::Fail => summary.failed += 1,
                }
                summary.lines_ok += outcome.counters.ok;
                summary.lines_err += outcome.counters.err;
            }
        }

        summary
    }
}

pub struct Coordinator {
    config: LoaderConfig,
    shards: Arc<ShardTable>,
    connector: Arc<dyn StoreConnector>,
}

impl Coordinator {
    /// Validates `config`; the shard table is frozen from here on
    pub fn new(config: LoaderConfig, connector: Arc<dyn StoreConnector>) -> Result<Self> {
        config.validate()?;
        let shards = Arc::new(config.shards.clone());
        Ok(Self {
            config,
            shards,
            connector,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Pending regular files matching the pattern, sorted by file name
    ///
    /// Wildcards never match a leading dot, and names that already carry the
    /// marker are skipped even when the pattern spells the dot out.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        let entries = glob::glob_with(&self.config.pattern, options).map_err(|err| {
            MemloadError::Pattern {
                pattern: self.config.pattern.clone(),
                reason: err.to_string(),
            }
        })?;

        let mut files = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if marker::is_marked(&path) || !path.is_file() => {},
                Ok(path) => files.push(path),
                Err(err) => warn!(
                    path = %err.path().display(),
                    error = %err.error(),
                    "Cannot inspect path during discovery"
                ),
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
        Ok(files)
    }

    /// Process every pending file
    ///
    /// Cancelling `cancel` stops dispatch: files already in flight finish and
    /// are marked, the rest are reported [`FileStatus::Cancelled`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport> {
        let files = self.discover()?;
        let total = files.len();

        info!(
            files = total,
            workers = self.config.workers,
            pattern = %self.config.pattern,
            dry_run = self.config.write.dry_run,
            "Starting load"
        );

        let mut results: Vec<(usize, FileReport)> = stream::iter(files.into_iter().enumerate())
            .map(|(index, path)| {
                let cancel = cancel.clone();
                async move {
                    let status = if cancel.is_cancelled() {
                        FileStatus::Cancelled
                    } else {
                        info!("Dispatching {} ({} / {})", path.display(), index + 1, total);
                        self.process(path.clone()).await
                    };
                    (index, FileReport { path, status })
                }
            })
            .buffer_unordered(self.config.workers)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        Ok(RunReport {
            files: results.into_iter().map(|(_, report)| report).collect(),
        })
    }

    async fn process(&self, path: PathBuf) -> FileStatus {
        let processor = FileProcessor::new(
            Arc::clone(&self.shards),
            Arc::clone(&self.connector),
            self.config.write,
            self.config.max_error_rate,
        );
        let policy = self.config.mark_policy;
        let span = info_span!("file", path = %path.display());
        let task_path = path.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let result = processor.process_file(&task_path);
            settle(&task_path, result, policy)
        })
        .await;

        match joined {
            Ok(status) => status,
            Err(err) => {
                error!(path = %path.display(), error = %err, "File worker panicked");
                FileStatus::Unreadable {
                    error: err.to_string(),
                }
            },
        }
    }
}

/// Decide and apply the marking for a finished file
fn settle(
    path: &Path,
    result: std::result::Result<FileOutcome, FileError>,
    policy: MarkPolicy,
) -> FileStatus {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "File not processed, leaving it unmarked");
            return FileStatus::Unreadable {
                error: err.to_string(),
            };
        },
    };

    let mark = match policy {
        MarkPolicy::Always => true,
        MarkPolicy::PassedOnly => outcome.verdict == Verdict::Pass,
    };
    if !mark {
        info!("Failed file left pending");
        return FileStatus::LeftPending { outcome };
    }

    match marker::mark_processed(path) {
        Ok(marked_path) => {
            info!(marked = %marked_path.display(), "Marked file as processed");
            FileStatus::Marked {
                outcome,
                marked_path,
            }
        },
        Err(err) => {
            error!(error = %err, "Cannot mark file as processed");
            FileStatus::MarkFailed {
                outcome,
                error: err.to_string(),
            }
        },
    }
}
