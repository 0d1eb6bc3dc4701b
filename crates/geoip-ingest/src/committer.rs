//! Batch committer stage
//!
//! Accumulates documents into a batch, commits it to the sink whenever it
//! reaches the configured size, and flushes the remainder once the document
//! channel closes cleanly. A cancelled run never triggers that final flush.

use geoip_common::types::Document;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{IngestError, Result};
use crate::pipeline::CancelSignal;
use crate::progress::Throughput;
use crate::sink::{CommitReport, DocumentSink};

/// Upper bound on the batch buffer reserved up front
const MAX_PREALLOCATED: usize = 10_000;

/// Totals for one committer run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub documents: u64,
    pub batches: u64,
}

/// Consumer stage writing batches to a [`DocumentSink`]
pub struct BatchCommitter {
    sink: Arc<dyn DocumentSink>,
    batch_size: usize,
    throughput: Arc<Throughput>,
    progress_interval: Option<Duration>,
}

impl BatchCommitter {
    pub fn new(sink: Arc<dyn DocumentSink>, batch_size: usize, throughput: Arc<Throughput>) -> Self {
        Self {
            sink,
            batch_size,
            throughput,
            progress_interval: None,
        }
    }

    /// Log a progress line at most once per `interval`; zero disables it
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Consume documents until the channel closes, then flush the remainder.
    ///
    /// Returns the cancellation error as soon as the signal fires, whether
    /// waiting for input or inside a commit. A zero batch size is rejected
    /// before anything is received.
    pub async fn run(
        &self,
        rx: &mut mpsc::Receiver<Document>,
        cancel: &CancelSignal,
    ) -> Result<CommitStats> {
        if self.batch_size == 0 {
            return Err(IngestError::config("batch size must be a positive number"));
        }

        let mut batch = Vec::with_capacity(self.batch_size.min(MAX_PREALLOCATED));
        let mut stats = CommitStats::default();
        let mut last_progress = Instant::now();

        info!(sink = self.sink.name(), batch_size = self.batch_size, "Committer started");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancel.error()),
                next = rx.recv() => next,
            };

            let Some(document) = next else {
                break;
            };

            batch.push(document);
            if batch.len() >= self.batch_size {
                self.commit(&mut batch, &mut stats, cancel).await?;
                self.report_progress(&mut last_progress);
            }
        }

        if cancel.is_cancelled() {
            return Err(cancel.error());
        }

        if !batch.is_empty() {
            self.commit(&mut batch, &mut stats, cancel).await?;
        }

        info!(
            documents = stats.documents,
            batches = stats.batches,
            "{}",
            self.throughput.snapshot()
        );
        Ok(stats)
    }

    async fn commit(
        &self,
        batch: &mut Vec<Document>,
        stats: &mut CommitStats,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancel.error()),
            report = self.sink.commit(batch.as_slice()) => report?,
        };

        if !report.is_success() {
            return Err(IngestError::sink_commit(batch.len(), rejection_message(&report, batch.len())));
        }

        let size = batch.len() as u64;
        stats.documents += size;
        stats.batches += 1;
        self.throughput.add(size);
        debug!(batch = stats.batches, size, total = stats.documents, "Committed batch");

        batch.clear();
        Ok(())
    }

    fn report_progress(&self, last: &mut Instant) {
        let Some(interval) = self.progress_interval else {
            return;
        };
        if last.elapsed() >= interval {
            info!("{}", self.throughput.snapshot());
            *last = Instant::now();
        }
    }
}

fn rejection_message(report: &CommitReport, batch_len: usize) -> String {
    match report.failures.first() {
        Some(first) => format!(
            "{} of {} documents rejected, first {} (status {}): {}",
            report.failures.len(),
            batch_len,
            first.id,
            first.status,
            first.reason
        ),
        None => format!("{} documents rejected", batch_len),
    }
}
