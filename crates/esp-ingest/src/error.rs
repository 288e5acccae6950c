//! Cycle-level error taxonomy
//!
//! Validation problems never show up here; they are carried by
//! [`RejectedRecord`](esp_common::types::RejectedRecord) values. Everything in
//! [`IngestError`] aborts the current cycle without advancing the checkpoint,
//! and only [`IngestError::Configuration`] is fatal to the process.

use std::path::PathBuf;

use crate::sink::SinkError;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Transient sink failures outlasted the retry budget
    #[error("Sink unavailable after {attempts} attempts: {source}")]
    SinkUnavailable {
        attempts: u32,
        #[source]
        source: SinkError,
    },

    /// The sink refused the batch for a non-transient reason
    #[error("Sink rejected batch: {0}")]
    SinkRejected(#[source] SinkError),

    #[error("Checkpoint write failed after {attempts} attempts: {source}")]
    CheckpointWriteFailure {
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write quarantine file {}: {source}", path.display())]
    ErrorSinkWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to scan {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        IngestError::Configuration(msg.into())
    }

    /// Whether the process should stop instead of waiting for the next trigger
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::Configuration(_))
    }

    /// Short tag used in logs and cycle reports
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::SinkUnavailable { .. } => "SinkUnavailable",
            IngestError::SinkRejected(_) => "SinkRejected",
            IngestError::CheckpointWriteFailure { .. } => "CheckpointWriteFailure",
            IngestError::ErrorSinkWriteFailure { .. } => "ErrorSinkWriteFailure",
            IngestError::Configuration(_) => "Configuration",
            IngestError::Scan { .. } => "Scan",
        }
    }
}
