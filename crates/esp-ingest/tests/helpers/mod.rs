//! Test helpers for ESP ingest integration tests
//!
//! This module provides utilities for:
//! - Temporary landing/error/checkpoint directory layouts
//! - Writing source files with controlled modification times
//! - Row builders for valid and invalid events
//! - A sink that stores a batch and then fails, to stand in for a crash

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use esp_common::types::Event;
use esp_ingest::sink::{EventSink, InsertOutcome, MemoryEventSink, SinkError};
use esp_ingest::IngestConfig;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

pub const HEADER: &str =
    "event_id,user_id,product_id,product_name,category,price,event_type,timestamp";

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,esp_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Directory layout for one test, removed on drop
pub struct TestEnv {
    pub base: TempDir,
    pub config: IngestConfig,
}

impl TestEnv {
    pub fn new() -> Self {
        let base = TempDir::new().unwrap();
        let mut config = IngestConfig::rooted_at(base.path());
        config.batch.file_quiescence_ms = 0;
        config.retry.sink_initial_backoff_ms = 1;
        config.retry.sink_max_backoff_ms = 5;
        std::fs::create_dir_all(&config.paths.landing_dir).unwrap();
        Self { base, config }
    }

    pub fn landing(&self) -> &Path {
        &self.config.paths.landing_dir
    }

    pub fn error_dir(&self) -> &Path {
        &self.config.paths.error_dir
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.paths.checkpoint_dir
    }

    /// Write a source file whose mtime is `age` in the past
    pub fn drop_file(&self, name: &str, rows: &[String], age: Duration) -> PathBuf {
        let mut content = String::from(HEADER);
        content.push('\n');
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }

        let path = self.landing().join(name);
        std::fs::write(&path, content).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
        path
    }

    /// Rows of the quarantine file for batch `sequence`
    pub fn quarantined(&self, sequence: u64) -> Vec<csv::StringRecord> {
        let path = self.error_dir().join(format!("batch_{}.csv", sequence));
        if !path.exists() {
            return Vec::new();
        }
        csv::Reader::from_path(path)
            .unwrap()
            .records()
            .map(|r| r.unwrap())
            .collect()
    }
}

/// A valid row
pub fn valid_row(event_id: &str) -> String {
    format!(
        "{},user_1,prod_9,Desk Lamp,Home,24.99,view,2026-01-15 08:30:00",
        event_id
    )
}

pub fn row_with_price(event_id: &str, price: &str) -> String {
    format!(
        "{},user_1,prod_9,Desk Lamp,Home,{},purchase,2026-01-15 08:30:00",
        event_id, price
    )
}

/// `n` valid rows with ids `{prefix}-0 .. {prefix}-{n-1}`
pub fn valid_rows(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| valid_row(&format!("{}-{}", prefix, i))).collect()
}

/// Sink that stores the batch, then reports a failure for the first
/// `crashes` calls, as if the process died before hearing back
pub struct CrashAfterWriteSink {
    pub inner: Arc<MemoryEventSink>,
    crashes: AtomicU32,
}

impl CrashAfterWriteSink {
    pub fn new(inner: Arc<MemoryEventSink>, crashes: u32) -> Self {
        Self {
            inner,
            crashes: AtomicU32::new(crashes),
        }
    }
}

#[async_trait]
impl EventSink for CrashAfterWriteSink {
    async fn insert_batch(&self, events: &[Event]) -> Result<InsertOutcome, SinkError> {
        let outcome = self.inner.insert_batch(events).await?;
        let remaining = self.crashes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.crashes.store(remaining - 1, Ordering::SeqCst);
            return Err(SinkError::Permanent("process killed after write".to_string()));
        }
        Ok(outcome)
    }

    async fn health_check(&self) -> Result<(), SinkError> {
        self.inner.health_check().await
    }

    fn name(&self) -> &'static str {
        "crash-after-write"
    }
}
