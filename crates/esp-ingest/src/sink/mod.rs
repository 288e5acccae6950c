//! Event sink
//!
//! [`EventSink`] is the narrow interface to the durable store: insert a batch
//! of events, skipping any whose `event_id` is already present. Two
//! implementations ship with the crate:
//!
//! - [`PgEventSink`] writes to PostgreSQL in one transaction per batch
//! - [`MemoryEventSink`] keeps rows in process, for dry runs and tests
//!
//! [`SinkWriter`] wraps a sink with bounded exponential backoff.

pub mod memory;
pub mod postgres;

pub use memory::MemoryEventSink;
pub use postgres::PgEventSink;

use async_trait::async_trait;
use esp_common::types::Event;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::error::IngestError;

/// Failure reported by a sink
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Worth retrying: connection loss, timeouts, serialization conflicts
    #[error("transient sink error: {0}")]
    Transient(String),

    /// Retrying the same batch will fail the same way
    #[error("permanent sink error: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

/// Result of one successful batch insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Rows newly written
    pub inserted: usize,
    /// Rows skipped because their `event_id` was already stored
    pub already_present: usize,
}

impl InsertOutcome {
    pub fn total(&self) -> usize {
        self.inserted + self.already_present
    }
}

/// Durable store for accepted events
///
/// `insert_batch` must be atomic (all rows or none) and idempotent: sending
/// the same batch again inserts nothing new.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn insert_batch(&self, events: &[Event]) -> Result<InsertOutcome, SinkError>;

    /// Cheap reachability check
    async fn health_check(&self) -> Result<(), SinkError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

/// Retry/backoff policy for sink writes
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling from the initial backoff
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.sink_max_retries.max(1),
            initial_backoff: Duration::from_millis(config.sink_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.sink_max_backoff_ms),
        }
    }
}

/// Outcome of a write together with how many attempts it took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    pub outcome: InsertOutcome,
    pub attempts: u32,
}

/// Sink writer with bounded exponential backoff
///
/// Every retry re-sends the identical batch; the sink's uniqueness
/// constraint makes that safe.
#[derive(Clone)]
pub struct SinkWriter {
    sink: Arc<dyn EventSink>,
    policy: RetryPolicy,
}

impl SinkWriter {
    pub fn new(sink: Arc<dyn EventSink>, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Write one batch of accepted events
    ///
    /// An empty batch succeeds without touching the sink.
    pub async fn write(&self, events: &[Event]) -> Result<WriteReport, IngestError> {
        if events.is_empty() {
            return Ok(WriteReport {
                outcome: InsertOutcome::default(),
                attempts: 0,
            });
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sink.insert_batch(events).await {
                Ok(outcome) => {
                    if attempt > 1 {
                        info!(
                            sink = self.sink.name(),
                            attempt,
                            rows = events.len(),
                            "Sink write succeeded after retry"
                        );
                    }
                    return Ok(WriteReport {
                        outcome,
                        attempts: attempt,
                    });
                },
                Err(e) if !e.is_transient() => {
                    warn!(sink = self.sink.name(), error = %e, "Sink rejected batch");
                    return Err(IngestError::SinkRejected(e));
                },
                Err(e) if attempt >= self.policy.max_attempts => {
                    return Err(IngestError::SinkUnavailable {
                        attempts: attempt,
                        source: e,
                    });
                },
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        sink = self.sink.name(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Sink write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    /// Wait until the sink answers a health check
    ///
    /// Gives up after `attempts` checks spaced by `delay`; the caller treats
    /// that as fatal.
    pub async fn wait_until_ready(&self, attempts: u32, delay: Duration) -> Result<(), IngestError> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            match self.sink.health_check().await {
                Ok(()) => {
                    info!(sink = self.sink.name(), attempt, "Sink is ready");
                    return Ok(());
                },
                Err(e) => {
                    warn!(
                        sink = self.sink.name(),
                        attempt,
                        attempts,
                        error = %e,
                        "Sink not ready"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }

        Err(IngestError::config(format!(
            "sink '{}' unreachable after {} attempts",
            self.sink.name(),
            attempts
        )))
    }
}
