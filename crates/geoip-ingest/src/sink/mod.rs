//! Bulk-write targets for committed batches
//!
//! A sink receives whole batches in input order and reports, per batch,
//! how many documents were written and which ones were rejected.

use async_trait::async_trait;
use geoip_common::types::Document;

use crate::error::Result;

pub mod elasticsearch;
pub mod memory;

pub use elasticsearch::ElasticsearchSink;
pub use memory::MemorySink;

/// A document the sink refused to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

/// Outcome of one bulk commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub indexed: usize,
    pub failures: Vec<ItemFailure>,
}

impl CommitReport {
    /// Every document in the batch was written
    pub fn all_indexed(indexed: usize) -> Self {
        Self {
            indexed,
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Synchronous bulk writer used by the batch committer.
///
/// Documents are addressed by [`Document::id`], so writing the same batch
/// twice overwrites rather than duplicates.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Write a batch. Transport-level failures are errors; per-document
    /// rejections are reported in the returned [`CommitReport`].
    async fn commit(&self, batch: &[Document]) -> Result<CommitReport>;

    /// Short name for logs
    fn name(&self) -> &str;
}
