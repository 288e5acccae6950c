//! Per-cycle reporting

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Wall-clock time spent in each phase of a cycle
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PhaseTimings {
    pub scan: Duration,
    pub validation: Duration,
    pub dedup: Duration,
    pub write: Duration,
    pub quarantine: Duration,
    pub checkpoint: Duration,
    pub total: Duration,
}

/// Summary of one committed batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub sequence: u64,
    pub units: usize,
    /// Units dropped because their file changed after discovery
    pub units_changed: usize,
    pub raw_records: usize,
    pub accepted: usize,
    /// Repeats caught in process (within the batch or against earlier batches)
    pub duplicates: usize,
    /// Records that failed validation
    pub rejected: usize,
    /// Rows newly written to the sink
    pub inserted: usize,
    /// Accepted rows the sink already held
    pub already_present: usize,
    /// Accepted ids that may have been seen before eviction
    pub rechecked: usize,
    pub write_attempts: u32,
    pub quarantine_file: Option<PathBuf>,
    /// Largest gap between an accepted event's timestamp and ingestion
    pub max_event_lag_secs: Option<i64>,
    pub timings: PhaseTimings,
}

impl CycleReport {
    /// raw == accepted + duplicates + rejected
    pub fn is_conserved(&self) -> bool {
        self.raw_records == self.accepted + self.duplicates + self.rejected
    }

    /// Accepted records per second over the whole cycle
    pub fn throughput(&self) -> f64 {
        let secs = self.timings.total.as_secs_f64();
        if secs > 0.0 {
            self.accepted as f64 / secs
        } else {
            0.0
        }
    }

    /// Share of raw records that passed validation and dedup, in percent
    pub fn valid_rate(&self) -> f64 {
        if self.raw_records == 0 {
            0.0
        } else {
            self.accepted as f64 * 100.0 / self.raw_records as f64
        }
    }

    pub fn observe_lag(&mut self, lag: ChronoDuration) {
        let secs = lag.num_seconds();
        self.max_event_lag_secs = Some(self.max_event_lag_secs.map_or(secs, |m| m.max(secs)));
    }

    pub fn log(&self) {
        info!(
            sequence = self.sequence,
            units = self.units,
            units_changed = self.units_changed,
            raw = self.raw_records,
            accepted = self.accepted,
            duplicates = self.duplicates,
            rejected = self.rejected,
            inserted = self.inserted,
            already_present = self.already_present,
            rechecked = self.rechecked,
            write_attempts = self.write_attempts,
            max_event_lag_secs = ?self.max_event_lag_secs,
            quarantine = ?self.quarantine_file,
            "Batch {} committed",
            self.sequence
        );
        info!(
            "Batch #{} metrics: total={:.3}s | scan={:.3}s | validation={:.3}s | dedup={:.3}s | write={:.3}s | checkpoint={:.3}s | throughput={:.1} rec/s | valid_rate={:.1}%",
            self.sequence,
            self.timings.total.as_secs_f64(),
            self.timings.scan.as_secs_f64(),
            self.timings.validation.as_secs_f64(),
            self.timings.dedup.as_secs_f64(),
            self.timings.write.as_secs_f64(),
            self.timings.checkpoint.as_secs_f64(),
            self.throughput(),
            self.valid_rate()
        );
    }
}

/// What a cycle did
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// Nothing new in the landing directory
    Idle,
    Committed(CycleReport),
}

impl CycleOutcome {
    pub fn report(&self) -> Option<&CycleReport> {
        match self {
            CycleOutcome::Idle => None,
            CycleOutcome::Committed(report) => Some(report),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_conservation_and_rates() {
        let report = CycleReport {
            raw_records: 26,
            accepted: 24,
            duplicates: 1,
            rejected: 1,
            timings: PhaseTimings {
                total: Duration::from_secs(2),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(report.is_conserved());
        assert_eq!(report.throughput(), 12.0);
        assert!((report.valid_rate() - 92.307).abs() < 0.01);
    }

    #[test]
    fn test_empty_report_rates() {
        let report = CycleReport::default();
        assert_eq!(report.throughput(), 0.0);
        assert_eq!(report.valid_rate(), 0.0);
    }

    #[test]
    fn test_observe_lag_keeps_max() {
        let mut report = CycleReport::default();
        report.observe_lag(ChronoDuration::seconds(5));
        report.observe_lag(ChronoDuration::seconds(90));
        report.observe_lag(ChronoDuration::seconds(3));
        assert_eq!(report.max_event_lag_secs, Some(90));
    }
}
