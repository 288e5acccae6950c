//! ESP Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Micro-batch ingestion engine: picks up event files from a landing
//! directory, validates and deduplicates their records, writes accepted events
//! to a sink with retry, quarantines the rest, and checkpoints every batch so
//! a restart resumes exactly after the last committed file.
//!
//! # Components
//!
//! - [`scanner`]: lists uncommitted, settled source files
//! - [`reader`] and [`validate`]: turn file bytes into events or rejections
//! - [`dedup`]: first-occurrence-wins filtering within and across batches
//! - [`sink`]: the sink interface, PostgreSQL and in-memory sinks, retries
//! - [`error_sink`]: per-batch quarantine files
//! - [`checkpoint`]: the append-only commit ledger
//! - [`orchestrator`]: the cycle state machine and the scheduled loop
//!
//! # Example
//!
//! ```no_run
//! use esp_ingest::config::IngestConfig;
//! use esp_ingest::orchestrator::BatchOrchestrator;
//! use esp_ingest::sink::MemoryEventSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let mut orchestrator = BatchOrchestrator::new(&config, Arc::new(MemoryEventSink::new()))?;
//!     orchestrator.run_cycle().await?;
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod dedup;
pub mod error;
pub mod error_sink;
pub mod orchestrator;
pub mod reader;
pub mod report;
pub mod scanner;
pub mod signal;
pub mod sink;
pub mod validate;

pub use config::IngestConfig;
pub use error::{IngestError, Result};
pub use orchestrator::{BatchOrchestrator, CycleState};
pub use report::{CycleOutcome, CycleReport};
