//! Error types for the ingestion pipeline
//!
//! Every variant is fatal to a run. The pipeline surfaces the first root-cause
//! error and discards the cancellation errors of the stages it tore down.

use geoip_common::RecordError;
use thiserror::Error;

use crate::pipeline::{CancelReason, Stage};

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Stable error classification, used for the exit diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceRead,
    SinkCommit,
    SinkUnavailable,
    Query,
    Cancellation,
    Configuration,
    StageAborted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::SourceRead => "SourceReadError",
            ErrorKind::SinkCommit => "SinkCommitError",
            ErrorKind::SinkUnavailable => "SinkUnavailableError",
            ErrorKind::Query => "QueryError",
            ErrorKind::Cancellation => "CancellationError",
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::StageAborted => "StageAbortedError",
        };
        f.write_str(name)
    }
}

/// Ingestion error
#[derive(Error, Debug)]
pub enum IngestError {
    /// Input could not be opened, read, or split into records
    #[error("Failed to read input at line {line}: {message}")]
    SourceRead { line: u64, message: String },

    /// A bulk commit failed as a whole or for some of its documents
    #[error("Bulk commit of {batch_len} documents failed: {message}")]
    SinkCommit { batch_len: usize, message: String },

    /// The sink could not be reached before the pipeline started
    #[error("Sink unavailable at {url}: {message}")]
    SinkUnavailable { url: String, message: String },

    /// A lookup against the index failed
    #[error("Lookup failed: {0}")]
    Query(String),

    /// The run was stopped by a sibling stage failure or an external signal
    #[error("Pipeline cancelled: {reason}")]
    Cancelled { reason: CancelReason },

    /// Invalid startup parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stage task died without reporting an error through the pipeline
    #[error("{stage} stage aborted: {message}")]
    StageAborted { stage: Stage, message: String },
}

impl IngestError {
    /// Create a source read error
    pub fn source_read(line: u64, message: impl Into<String>) -> Self {
        Self::SourceRead {
            line,
            message: message.into(),
        }
    }

    /// Create a sink commit error
    pub fn sink_commit(batch_len: usize, message: impl Into<String>) -> Self {
        Self::SinkCommit {
            batch_len,
            message: message.into(),
        }
    }

    /// Create a sink unavailable error
    pub fn sink_unavailable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkUnavailable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a stage aborted error
    pub fn stage_aborted(stage: Stage, message: impl Into<String>) -> Self {
        Self::StageAborted {
            stage,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::SourceRead { .. } => ErrorKind::SourceRead,
            IngestError::SinkCommit { .. } => ErrorKind::SinkCommit,
            IngestError::SinkUnavailable { .. } => ErrorKind::SinkUnavailable,
            IngestError::Query(_) => ErrorKind::Query,
            IngestError::Cancelled { .. } => ErrorKind::Cancellation,
            IngestError::Config(_) => ErrorKind::Configuration,
            IngestError::StageAborted { .. } => ErrorKind::StageAborted,
        }
    }

    /// Whether this error only reports that the run was torn down
    pub fn is_cancellation(&self) -> bool {
        matches!(self, IngestError::Cancelled { .. })
    }
}

impl From<(u64, RecordError)> for IngestError {
    fn from((line, err): (u64, RecordError)) -> Self {
        IngestError::source_read(line, err.to_string())
    }
}
