//! In-memory sink
//!
//! Keeps committed batches in memory. Backs `--dry-run` and the pipeline
//! tests, which can make it reject a given commit or stall every commit.

use async_trait::async_trait;
use geoip_common::types::Document;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{CommitReport, DocumentSink, ItemFailure};
use crate::error::Result;

#[derive(Debug, Default)]
struct Recorded {
    attempts: usize,
    sizes: Vec<usize>,
    batches: Vec<Vec<Document>>,
}

/// Sink that records batches instead of writing them anywhere
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    recorded: Arc<Mutex<Recorded>>,
    fail_on_commit: Option<usize>,
    commit_delay: Option<Duration>,
    retain: bool,
}

impl MemorySink {
    /// Sink that keeps every committed document
    pub fn new() -> Self {
        Self {
            retain: true,
            ..Default::default()
        }
    }

    /// Sink that only counts, for dry runs over full-size inputs
    pub fn counting() -> Self {
        Self::default()
    }

    /// Reject every document of the `n`-th commit (1-based)
    pub fn failing_on(mut self, n: usize) -> Self {
        self.fail_on_commit = Some(n);
        self
    }

    /// Sleep this long inside every commit
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }

    /// Number of commit calls received, including rejected ones
    pub fn commit_attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Successfully committed batches, in commit order
    pub fn batches(&self) -> Vec<Vec<Document>> {
        self.lock().batches.clone()
    }

    /// Sizes of the successfully committed batches
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().sizes.clone()
    }

    /// All committed documents, batches concatenated
    pub fn documents(&self) -> Vec<Document> {
        self.lock().batches.iter().flatten().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn commit(&self, batch: &[Document]) -> Result<CommitReport> {
        if let Some(delay) = self.commit_delay {
            tokio::time::sleep(delay).await;
        }

        let mut recorded = self.lock();
        recorded.attempts += 1;

        if self.fail_on_commit == Some(recorded.attempts) {
            let failures = batch
                .iter()
                .map(|doc| ItemFailure {
                    id: doc.id.clone(),
                    status: 400,
                    reason: "rejected by memory sink".to_string(),
                })
                .collect();
            return Ok(CommitReport {
                indexed: 0,
                failures,
            });
        }

        recorded.sizes.push(batch.len());
        if self.retain {
            recorded.batches.push(batch.to_vec());
        }
        Ok(CommitReport::all_indexed(batch.len()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
