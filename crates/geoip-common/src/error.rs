//! Error types for GeoIP records

use thiserror::Error;

/// Result type alias for record operations
pub type Result<T> = std::result::Result<T, RecordError>;

/// Errors raised while turning raw input fields into records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Invalid field count: expected {expected}, got {actual}")]
    FieldCount { expected: usize, actual: usize },
}

impl RecordError {
    /// Create a field count error
    pub fn field_count(expected: usize, actual: usize) -> Self {
        Self::FieldCount { expected, actual }
    }
}
