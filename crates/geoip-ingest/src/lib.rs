//! Geo-IP bulk loader
//!
//! Reads delimited geo-IP range records, turns each into a document keyed by
//! a digest of its range, and bulk-indexes the documents in fixed-size
//! batches.
//!
//! # Pipeline
//!
//! - **Source**: [`source::RecordSource`] reads records, skipping comment lines
//! - **Transform**: [`transform::transform_records`] assigns range identifiers
//! - **Commit**: [`committer::BatchCommitter`] batches and writes to a
//!   [`sink::DocumentSink`]
//!
//! The stages run concurrently over bounded channels and share one
//! [`pipeline::CancelSignal`]; the first failure stops all of them.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use geoip_ingest::pipeline::Pipeline;
//! use geoip_ingest::sink::MemorySink;
//! use geoip_ingest::source::RecordSource;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = RecordSource::open("./data/geoip.csv", ';', '#').await?;
//!     let summary = Pipeline::new(Arc::new(MemorySink::counting()), 10_000)
//!         .run(source)
//!         .await?;
//!     println!("{} documents in {} batches", summary.documents, summary.batches);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod committer;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod sink;
pub mod source;
pub mod transform;

pub use config::IngestConfig;
pub use error::{ErrorKind, IngestError, Result};
pub use pipeline::{CancelReason, CancelSignal, Pipeline, PipelineSummary, Stage};
