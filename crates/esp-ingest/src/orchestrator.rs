//! Batch orchestrator
//!
//! Drives one cycle at a time through
//! `Idle → Scanning → Validating → Writing → Checkpointing → Idle`:
//!
//! 1. scan the landing directory for uncommitted work units
//! 2. read and validate every file concurrently, merging results back in
//!    work-unit order
//! 3. deduplicate accepted events (first occurrence wins)
//! 4. write the accepted events to the sink, with retry
//! 5. quarantine rejected records
//! 6. commit all work units to the checkpoint ledger in one entry
//!
//! Any failure returns the machine to `Idle` without touching the ledger, so
//! the next trigger retries the same work units from scratch. Cycles never
//! overlap: [`BatchOrchestrator::run_cycle`] takes `&mut self`.

use chrono::{DateTime, Utc};
use esp_common::types::{Event, RawRecord, RejectReason, RejectedRecord, WorkUnit};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::config::IngestConfig;
use crate::dedup::{Admission, BatchDeduplicator, DedupIndex};
use crate::error::{IngestError, Result};
use crate::error_sink::QuarantineWriter;
use crate::reader::read_rows;
use crate::report::{CycleOutcome, CycleReport};
use crate::scanner::SourceScanner;
use crate::sink::{EventSink, RetryPolicy, SinkWriter};
use crate::validate::Validator;

/// Where the orchestrator is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Scanning,
    Validating,
    Writing,
    Checkpointing,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Scanning => "scanning",
            CycleState::Validating => "validating",
            CycleState::Writing => "writing",
            CycleState::Checkpointing => "checkpointing",
        }
    }
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated line, kept with its raw form in case it turns out a duplicate
#[derive(Debug)]
enum RowResult {
    Valid {
        event: Event,
        raw: RawRecord,
        line: u64,
    },
    Rejected(RejectedRecord),
}

/// Result of reading one work unit
#[derive(Debug)]
enum FileResult {
    Parsed { unit: WorkUnit, rows: Vec<RowResult> },
    /// The file no longer matches what was discovered
    Changed { unit: WorkUnit, reason: String },
}

/// `<stem>.<short fingerprint>.<ext>`, so rewrites of one name never collide
fn archived_name(unit: &WorkUnit) -> String {
    let path = Path::new(unit.path());
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(unit.path());
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}.{}", stem, unit.fingerprint().short(), ext),
        None => format!("{}.{}", stem, unit.fingerprint().short()),
    }
}

/// Read, fingerprint-check and validate one file
fn validate_unit(unit: WorkUnit, validator: &Validator, now: DateTime<Utc>) -> FileResult {
    let data = match std::fs::read(&unit.location) {
        Ok(data) => data,
        Err(e) => {
            return FileResult::Changed {
                reason: format!("unreadable: {}", e),
                unit,
            }
        },
    };

    if let Err(e) = unit.fingerprint().verify(unit.path(), &data) {
        return FileResult::Changed {
            reason: e.to_string(),
            unit,
        };
    }

    let rows = read_rows(&data)
        .into_iter()
        .map(|row| match row.defect {
            Some(defect) => RowResult::Rejected(
                RejectedRecord::new(row.raw, defect.reason, defect.detail).at(unit.path(), row.line),
            ),
            None => match validator.validate(&row.raw, now) {
                Ok(event) => RowResult::Valid {
                    event,
                    raw: row.raw,
                    line: row.line,
                },
                Err(rejected) => RowResult::Rejected(rejected.at(unit.path(), row.line)),
            },
        })
        .collect();

    FileResult::Parsed { unit, rows }
}

pub struct BatchOrchestrator {
    scanner: SourceScanner,
    validator: Validator,
    dedup_index: DedupIndex,
    checkpoint: CheckpointStore,
    writer: SinkWriter,
    quarantine: QuarantineWriter,
    processed_dir: Option<PathBuf>,
    trigger_interval: Duration,
    validation_workers: usize,
    checkpoint_retry: RetryPolicy,
    state: CycleState,
}

impl BatchOrchestrator {
    /// Assemble the engine
    ///
    /// Fails with a configuration error when the landing directory is missing
    /// or the checkpoint ledger cannot be replayed. The quarantine, checkpoint
    /// and archive directories are created as needed.
    pub fn new(config: &IngestConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;

        let landing = &config.paths.landing_dir;
        if !landing.is_dir() {
            return Err(IngestError::config(format!(
                "landing directory {} does not exist or is not a directory",
                landing.display()
            )));
        }

        std::fs::create_dir_all(&config.paths.error_dir).map_err(|e| {
            IngestError::config(format!(
                "cannot create error directory {}: {}",
                config.paths.error_dir.display(),
                e
            ))
        })?;
        if let Some(processed) = &config.paths.processed_dir {
            std::fs::create_dir_all(processed).map_err(|e| {
                IngestError::config(format!(
                    "cannot create processed directory {}: {}",
                    processed.display(),
                    e
                ))
            })?;
        }

        let checkpoint = CheckpointStore::open(&config.paths.checkpoint_dir).map_err(|e| {
            IngestError::config(format!(
                "cannot open checkpoint ledger in {}: {}",
                config.paths.checkpoint_dir.display(),
                e
            ))
        })?;

        let sink_policy = RetryPolicy::from(&config.retry);
        let checkpoint_retry = RetryPolicy {
            max_attempts: config.retry.checkpoint_max_retries.max(1),
            ..sink_policy.clone()
        };

        info!(
            landing_dir = %landing.display(),
            error_dir = %config.paths.error_dir.display(),
            checkpoint_dir = %config.paths.checkpoint_dir.display(),
            sink = sink.name(),
            trigger_interval_secs = config.batch.trigger_interval_secs,
            max_files_per_batch = config.batch.max_files_per_batch,
            "Batch orchestrator ready"
        );

        Ok(Self {
            scanner: SourceScanner::new(
                landing.clone(),
                config.file_quiescence(),
                config.batch.max_files_per_batch,
            ),
            validator: Validator::new(config.clock_skew()),
            dedup_index: DedupIndex::new(config.batch.dedup_capacity),
            checkpoint,
            writer: SinkWriter::new(sink, sink_policy),
            quarantine: QuarantineWriter::new(config.paths.error_dir.clone()),
            processed_dir: config.paths.processed_dir.clone(),
            trigger_interval: config.trigger_interval(),
            validation_workers: config.batch.validation_workers.max(1),
            checkpoint_retry,
            state: CycleState::Idle,
        })
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    pub fn dedup_index(&self) -> &DedupIndex {
        &self.dedup_index
    }

    pub fn writer(&self) -> &SinkWriter {
        &self.writer
    }

    /// Block until the sink answers, or fail fatally
    pub async fn wait_for_sink(&self, attempts: u32, delay: Duration) -> Result<()> {
        self.writer.wait_until_ready(attempts, delay).await
    }

    fn transition(&mut self, next: CycleState) {
        debug!(from = %self.state, to = %next, "Cycle state change");
        self.state = next;
    }

    /// Run one cycle now
    ///
    /// Cycle-level failures are logged and returned; the checkpoint is left
    /// untouched so the next cycle retries the same work units.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let sequence = self.checkpoint.next_sequence();
        let result = self.execute(sequence).await;
        self.transition(CycleState::Idle);

        match &result {
            Ok(CycleOutcome::Committed(report)) => report.log(),
            Ok(CycleOutcome::Idle) => debug!("No new work units"),
            Err(e) => error!(
                sequence,
                kind = e.kind(),
                error = %e,
                "Batch {} failed; work units stay uncommitted for the next cycle",
                sequence
            ),
        }

        result
    }

    async fn execute(&mut self, sequence: u64) -> Result<CycleOutcome> {
        let started = Instant::now();
        let mut report = CycleReport {
            sequence,
            ..Default::default()
        };

        // Scanning
        self.transition(CycleState::Scanning);
        let phase = Instant::now();
        let units = self.scanner.scan(&self.checkpoint).await?;
        report.timings.scan = phase.elapsed();
        if units.is_empty() {
            return Ok(CycleOutcome::Idle);
        }
        info!(
            sequence,
            units = units.len(),
            "Batch {}: processing {} file(s)",
            sequence,
            units.len()
        );

        // Validating
        self.transition(CycleState::Validating);
        let phase = Instant::now();
        let now = Utc::now();
        let files = self.validate_units(units, now).await;
        report.timings.validation = phase.elapsed();

        let phase = Instant::now();
        let mut committed_units = Vec::with_capacity(files.len());
        let mut accepted: Vec<Event> = Vec::new();
        let mut rejected: Vec<RejectedRecord> = Vec::new();
        let mut dedup = BatchDeduplicator::new(&self.dedup_index);

        for file in files {
            let (unit, rows) = match file {
                FileResult::Parsed { unit, rows } => (unit, rows),
                FileResult::Changed { unit, reason } => {
                    warn!(
                        sequence,
                        unit = %unit.id,
                        reason = %reason,
                        "Work unit changed after discovery; dropped from batch"
                    );
                    report.units_changed += 1;
                    self.scanner.forget(unit.path());
                    continue;
                },
            };

            report.raw_records += rows.len();
            for row in rows {
                match row {
                    RowResult::Valid { event, raw, line } => match dedup.admit(&event) {
                        Admission::Duplicate => {
                            report.duplicates += 1;
                            rejected.push(
                                RejectedRecord::new(
                                    raw,
                                    RejectReason::DuplicateId,
                                    format!("event_id '{}' already accepted", event.event_id),
                                )
                                .at(unit.path(), line),
                            );
                        },
                        Admission::Accepted | Admission::Recheck => {
                            report.observe_lag(now - event.event_timestamp);
                            accepted.push(event);
                        },
                    },
                    RowResult::Rejected(record) => {
                        report.rejected += 1;
                        rejected.push(record);
                    },
                }
            }
            committed_units.push(unit);
        }

        report.rechecked = dedup.rechecked();
        let admitted_ids = dedup.into_admitted();
        report.accepted = accepted.len();
        report.units = committed_units.len();
        report.timings.dedup = phase.elapsed();

        if committed_units.is_empty() {
            return Ok(CycleOutcome::Idle);
        }

        // Writing
        self.transition(CycleState::Writing);
        let phase = Instant::now();
        let written = self.writer.write(&accepted).await?;
        report.inserted = written.outcome.inserted;
        report.already_present = written.outcome.already_present;
        report.write_attempts = written.attempts;
        report.timings.write = phase.elapsed();

        if written.outcome.already_present > 0 {
            info!(
                sequence,
                already_present = written.outcome.already_present,
                "Batch {}: some events were already stored; skipped",
                sequence
            );
        }

        let phase = Instant::now();
        report.quarantine_file = self.quarantine.write_batch(sequence, &rejected)?;
        report.timings.quarantine = phase.elapsed();

        // Checkpointing
        self.transition(CycleState::Checkpointing);
        let phase = Instant::now();
        self.commit_with_retry(sequence, &committed_units).await?;
        report.timings.checkpoint = phase.elapsed();

        self.dedup_index.merge(admitted_ids);
        self.archive(&committed_units);

        report.timings.total = started.elapsed();
        Ok(CycleOutcome::Committed(report))
    }

    /// Validate files on blocking workers, preserving work-unit order
    async fn validate_units(&self, units: Vec<WorkUnit>, now: DateTime<Utc>) -> Vec<FileResult> {
        let results: Vec<_> = stream::iter(units)
            .map(|unit| {
                let validator = self.validator.clone();
                let fallback = unit.clone();
                let handle =
                    tokio::task::spawn_blocking(move || validate_unit(unit, &validator, now));
                async move { (fallback, handle.await) }
            })
            .buffered(self.validation_workers)
            .collect()
            .await;

        results
            .into_iter()
            .map(|(unit, joined)| match joined {
                Ok(result) => result,
                Err(e) => FileResult::Changed {
                    reason: format!("validation task failed: {}", e),
                    unit,
                },
            })
            .collect()
    }

    async fn commit_with_retry(&mut self, sequence: u64, units: &[WorkUnit]) -> Result<()> {
        let max_attempts = self.checkpoint_retry.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.checkpoint.commit(sequence, units, Utc::now()) {
                Ok(entry) => {
                    debug!(sequence = entry.sequence, units = entry.units.len(), "Checkpoint committed");
                    return Ok(());
                },
                Err(e) if attempt >= max_attempts => {
                    return Err(IngestError::CheckpointWriteFailure {
                        attempts: attempt,
                        source: e,
                    });
                },
                Err(e) => {
                    let delay = self.checkpoint_retry.backoff(attempt);
                    warn!(
                        sequence,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Checkpoint write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    /// Move committed files out of the landing directory; best effort
    fn archive(&self, units: &[WorkUnit]) {
        let Some(processed_dir) = &self.processed_dir else {
            return;
        };

        for unit in units {
            let target = processed_dir.join(archived_name(unit));
            if let Err(e) = std::fs::rename(&unit.location, &target) {
                warn!(
                    unit = %unit.id,
                    target = %target.display(),
                    error = %e,
                    "Failed to archive committed file; it stays excluded by the checkpoint"
                );
            }
        }
    }

    /// Scheduled loop
    ///
    /// Runs a cycle on every tick of the trigger interval (the first one
    /// immediately) and whenever a message arrives on `manual`. Shutdown is
    /// only observed between cycles, so an in-flight write or commit always
    /// completes. Returns early only on a fatal error.
    pub async fn run(
        &mut self,
        shutdown: CancellationToken,
        mut manual: Option<mpsc::Receiver<()>>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.trigger_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.trigger_interval.as_secs(),
            "Starting micro-batch loop"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested while idle, stopping");
                    break;
                }
                _ = ticker.tick() => {}
                Some(()) = next_manual(&mut manual) => {
                    debug!("Manual trigger received");
                }
            }

            if let Err(e) = self.run_cycle().await {
                if e.is_fatal() {
                    return Err(e);
                }
            }
        }

        Ok(())
    }
}

async fn next_manual(manual: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match manual {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
