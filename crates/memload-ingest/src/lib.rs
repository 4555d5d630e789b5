//! memload ingest library
//!
//! Bulk loader for gzip-compressed TSV install logs. Each line becomes one
//! protobuf-encoded value stored under `"{device_type}:{device_id}"` on the
//! memcached instance that owns its device type.
//!
//! # Pipeline
//!
//! - [`record`]: line parsing
//! - [`encoding`]: protobuf value encoding
//! - [`router`]: device type to backend endpoint
//! - [`store`]: backend connections with bounded retries
//! - [`processor`]: one file, line by line, judged by its error rate
//! - [`coordinator`]: discovery, bounded parallel dispatch and [`marker`]ing
//!
//! # Example
//!
//! ```no_run
//! use memload_ingest::config::LoaderConfig;
//! use memload_ingest::coordinator::Coordinator;
//! use memload_ingest::store::MemcacheConnector;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LoaderConfig::reference()?.with_pattern("./data/*.tsv.gz");
//!     let connector = Arc::new(MemcacheConnector::new(Duration::from_secs(3)));
//!     let report = Coordinator::new(config, connector)?
//!         .run(CancellationToken::new())
//!         .await?;
//!     println!("{:?}", report.summary());
//!     Ok(())
//! }
//! ```
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod coordinator;
pub mod encoding;
pub mod marker;
pub mod processor;
pub mod record;
pub mod router;
pub mod store;
