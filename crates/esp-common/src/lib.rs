//! ESP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the ESP event pipeline.
//!
//! # Overview
//!
//! This crate provides functionality used by every ESP workspace member:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Fingerprints**: Content hashing used to identify source files
//! - **Logging**: Centralized `tracing` subscriber setup
//! - **Types**: The event model (`Event`, `RawRecord`, `RejectedRecord`, `WorkUnit`)
//!
//! # Example
//!
//! ```no_run
//! use esp_common::Result;
//! use esp_common::fingerprint::Fingerprint;
//!
//! fn unchanged(path: &str, discovered: &Fingerprint) -> Result<()> {
//!     let data = std::fs::read(path).unwrap_or_default();
//!     discovered.verify(path, &data)
//! }
//! ```

pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{EspError, Result};
pub use fingerprint::Fingerprint;
