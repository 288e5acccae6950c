//! Error types for ESP

use thiserror::Error;

/// Result type alias for ESP operations
pub type Result<T> = std::result::Result<T, EspError>;

/// Main error type for ESP
#[derive(Error, Debug)]
pub enum EspError {
    #[error("Fingerprint mismatch for {path}: expected {expected}, got {actual}")]
    FingerprintMismatch {
        path: String,
        expected: String,
        actual: String,
    },
}
