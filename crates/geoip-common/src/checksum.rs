//! Checksum utilities for deterministic document identifiers

/// Length of a rendered range identifier in hex characters
pub const RANGE_ID_LEN: usize = 32;

/// Compute MD5 checksum of bytes as lowercase hex
pub fn compute_md5(data: &[u8]) -> String {
    let digest = md5::compute(data);
    format!("{:x}", digest)
}

/// Compute the identifier for an IP range
///
/// The identifier only depends on `start` and `end`, so re-indexing the same
/// range always addresses the same document.
pub fn range_id(start: &str, end: &str) -> String {
    compute_md5(format!("{}-{}", start, end).as_bytes())
}
