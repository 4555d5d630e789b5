//! memload - load gzip TSV install logs into sharded memcached

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use memload_common::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use memload_ingest::config::{self, LoaderConfig, MarkPolicy};
use memload_ingest::coordinator::Coordinator;
use memload_ingest::encoding;
use memload_ingest::router::ShardTable;
use memload_ingest::store::{MemcacheConnector, WritePolicy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "memload")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Glob pattern for input files
    #[arg(long, env = "MEMLOAD_PATTERN", default_value = config::DEFAULT_PATTERN)]
    pattern: String,

    #[arg(long, env = "MEMLOAD_IDFA", default_value = "127.0.0.1:33013")]
    idfa: String,

    #[arg(long, env = "MEMLOAD_GAID", default_value = "127.0.0.1:33014")]
    gaid: String,

    #[arg(long, env = "MEMLOAD_ADID", default_value = "127.0.0.1:33015")]
    adid: String,

    #[arg(long, env = "MEMLOAD_DVID", default_value = "127.0.0.1:33016")]
    dvid: String,

    /// Extra or overriding route, TYPE=HOST:PORT (repeatable)
    #[arg(
        long = "shard",
        env = "MEMLOAD_SHARDS",
        value_delimiter = ',',
        value_parser = parse_shard
    )]
    shards: Vec<(String, String)>,

    /// Log writes instead of performing them
    #[arg(long, env = "MEMLOAD_DRY")]
    dry: bool,

    /// Log to this file instead of stdout
    #[arg(long, env = "MEMLOAD_LOG")]
    log: Option<PathBuf>,

    #[arg(long, env = "MEMLOAD_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,

    /// Files processed concurrently [default: available parallelism]
    #[arg(long, env = "MEMLOAD_WORKERS")]
    workers: Option<usize>,

    /// Attempts per key, first try included
    #[arg(long, env = "MEMLOAD_RETRY_ATTEMPTS", default_value_t = config::DEFAULT_RETRY_ATTEMPTS)]
    retry_attempts: u32,

    #[arg(long, env = "MEMLOAD_RETRY_DELAY_MS", default_value_t = config::DEFAULT_RETRY_DELAY_MS)]
    retry_delay_ms: u64,

    #[arg(
        long,
        env = "MEMLOAD_SOCKET_TIMEOUT_SECS",
        default_value_t = config::DEFAULT_SOCKET_TIMEOUT_SECS
    )]
    socket_timeout_secs: u64,

    /// Key expiry in seconds, 0 never expires
    #[arg(long, env = "MEMLOAD_TTL_SECS", default_value_t = config::DEFAULT_TTL_SECS)]
    ttl_secs: u32,

    /// A file passes when its error rate is strictly below this
    #[arg(long, env = "MEMLOAD_MAX_ERROR_RATE", default_value_t = config::NORMAL_ERR_RATE)]
    max_error_rate: f64,

    /// Which processed files get renamed
    #[arg(long, env = "MEMLOAD_MARK_POLICY", value_enum, default_value_t = MarkPolicyArg::Always)]
    mark_policy: MarkPolicyArg,

    /// Run the encoder self-check and exit
    #[arg(long, env = "MEMLOAD_TEST")]
    test: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormatArg {
    Text,
    Json,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MarkPolicyArg {
    /// Every file processed to the end
    Always,
    /// Only files that passed
    Passed,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl From<MarkPolicyArg> for MarkPolicy {
    fn from(arg: MarkPolicyArg) -> Self {
        match arg {
            MarkPolicyArg::Always => MarkPolicy::Always,
            MarkPolicyArg::Passed => MarkPolicy::PassedOnly,
        }
    }
}

fn parse_shard(s: &str) -> std::result::Result<(String, String), String> {
    let (device_type, address) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=HOST:PORT, got '{}'", s))?;
    Ok((device_type.trim().to_string(), address.trim().to_string()))
}

impl Cli {
    fn log_config(&self) -> Result<LogConfig> {
        let level = if self.dry {
            LogLevel::Debug
        } else {
            LogLevel::Info
        };

        // Environment variables take precedence
        LogConfig::builder()
            .level(level)
            .log_file(self.log.clone())
            .format(self.log_format.into())
            .build()
            .merge_env()
    }

    fn loader_config(&self) -> Result<LoaderConfig> {
        let mut pairs = vec![
            ("idfa".to_string(), self.idfa.clone()),
            ("gaid".to_string(), self.gaid.clone()),
            ("adid".to_string(), self.adid.clone()),
            ("dvid".to_string(), self.dvid.clone()),
        ];
        pairs.extend(self.shards.iter().cloned());
        let shards = ShardTable::from_pairs(pairs)?;

        let write = WritePolicy {
            attempts: self.retry_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            ttl_secs: self.ttl_secs,
            dry_run: self.dry,
        };

        let mut loader = LoaderConfig::new(shards)
            .with_pattern(self.pattern.clone())
            .with_write_policy(write)
            .with_socket_timeout(Duration::from_secs(self.socket_timeout_secs))
            .with_max_error_rate(self.max_error_rate)
            .with_mark_policy(self.mark_policy.into());
        if let Some(workers) = self.workers {
            loader = loader.with_workers(workers);
        }

        loader.validate()?;
        Ok(loader)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_logging(&cli.log_config()?).context("Failed to initialize logging")?;

    if cli.test {
        let checked = encoding::self_check()?;
        info!(records = checked, "Encoder self-check passed");
        return Ok(());
    }

    let loader = cli.loader_config()?;
    let connector = Arc::new(MemcacheConnector::new(loader.socket_timeout));
    let coordinator = Coordinator::new(loader, connector)?;
    info!(config = %serde_json::to_string(coordinator.config())?, "Starting memload");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Shutdown requested, finishing files in flight");
                cancel.cancel();
            }
        }
    });

    let report = coordinator.run(cancel).await?;
    let summary = report.summary();

    info!(
        discovered = summary.discovered,
        marked = summary.marked,
        left_pending = summary.left_pending,
        mark_failed = summary.mark_failed,
        unreadable = summary.unreadable,
        cancelled = summary.cancelled,
        passed = summary.passed,
        failed = summary.failed,
        lines_ok = summary.lines_ok,
        lines_err = summary.lines_err,
        "Load finished"
    );

    Ok(())
}
