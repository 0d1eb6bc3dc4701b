//! GeoIP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the GeoIP loader.
//!
//! # Overview
//!
//! This crate provides common functionality used across all workspace members:
//!
//! - **Types**: Raw geo-IP range records and the documents built from them
//! - **Checksums**: Deterministic identifiers derived from an IP range
//! - **Error Handling**: Record-level error types and result types
//! - **Logging**: Centralized tracing setup
//!
//! # Example
//!
//! ```
//! use geoip_common::types::RawRecord;
//!
//! let fields = [
//!     "10.0.0.0", "10.0.0.255", "us", "ca", "6", "san jose", "4", "broadband",
//!     "acme", "", "",
//! ];
//! let record = RawRecord::from_fields(fields).unwrap();
//! let document = record.into_document();
//! assert_eq!(document.id.len(), 32);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{RecordError, Result};
pub use types::{Document, IpRange, RawRecord};
