//! Ingestion configuration
//!
//! Startup parameters for one bulk-load run. Everything here is checked by
//! [`IngestConfig::validate`] before any pipeline stage is spawned.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IngestError, Result};

/// Default search cluster address
pub const DEFAULT_URL: &str = "http://localhost:9200";

/// Default target index
pub const DEFAULT_INDEX: &str = "geoip_index";

/// Documents collected before a bulk commit
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

pub const DEFAULT_DELIMITER: char = ';';
pub const DEFAULT_COMMENT: char = '#';

/// Capacity of each handoff channel between stages
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

/// Timeout for a single bulk request, sized for large batches
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 5;

/// Configuration for a bulk-load run
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Search cluster base URL
    pub url: String,
    /// Target index name
    pub index: String,
    /// Legacy mapping type, only sent when set
    pub doc_type: Option<String>,
    /// Delimited input file
    pub filename: Option<PathBuf>,
    /// Documents per bulk commit
    pub batch_size: usize,
    /// Field delimiter
    pub delimiter: char,
    /// Leading character of comment lines
    pub comment: char,
    /// Bounded capacity of both handoff channels
    pub channel_capacity: usize,
    /// Per-request timeout for the sink
    pub request_timeout_secs: u64,
    /// Interval between progress lines
    pub progress_interval_secs: u64,
    /// Cancel the run once this much time has passed
    pub deadline_secs: Option<u64>,
    /// Parse and transform without writing to the cluster
    pub dry_run: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            index: DEFAULT_INDEX.to_string(),
            doc_type: None,
            filename: None,
            batch_size: DEFAULT_BATCH_SIZE,
            delimiter: DEFAULT_DELIMITER,
            comment: DEFAULT_COMMENT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            progress_interval_secs: DEFAULT_PROGRESS_INTERVAL_SECS,
            deadline_secs: None,
            dry_run: false,
        }
    }
}

impl IngestConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(IngestError::config("url cannot be empty"));
        }
        if self.index.trim().is_empty() {
            return Err(IngestError::config("index cannot be empty"));
        }
        if matches!(self.doc_type.as_deref(), Some(t) if t.trim().is_empty()) {
            return Err(IngestError::config("type cannot be empty when given"));
        }
        match &self.filename {
            None => return Err(IngestError::config("missing path to the input file")),
            Some(path) if path.as_os_str().is_empty() => {
                return Err(IngestError::config("missing path to the input file"))
            },
            Some(_) => {},
        }
        if self.batch_size == 0 {
            return Err(IngestError::config("batch size must be a positive number"));
        }
        if self.channel_capacity == 0 {
            return Err(IngestError::config("channel capacity must be a positive number"));
        }
        if !self.delimiter.is_ascii() || !self.comment.is_ascii() {
            return Err(IngestError::config(
                "delimiter and comment marker must be single ASCII characters",
            ));
        }
        if self.delimiter == self.comment {
            return Err(IngestError::config(format!(
                "delimiter and comment marker must differ, both are '{}'",
                self.delimiter
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(IngestError::config("request timeout must be greater than 0"));
        }
        if self.deadline_secs == Some(0) {
            return Err(IngestError::config("deadline must be greater than 0"));
        }
        Ok(())
    }

    /// Input path, once validated
    pub fn input_path(&self) -> Result<&PathBuf> {
        self.filename
            .as_ref()
            .ok_or_else(|| IngestError::config("missing path to the input file"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}
