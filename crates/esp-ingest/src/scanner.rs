//! Landing directory scanner
//!
//! Each call to [`SourceScanner::scan`] takes a fresh snapshot of the landing
//! directory and returns the work units not yet committed, oldest first.

use chrono::{DateTime, Utc};
use esp_common::types::{WorkUnit, WorkUnitId};
use esp_common::Fingerprint;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

use crate::checkpoint::CheckpointStore;
use crate::error::{IngestError, Result};

/// File extension of source files
pub const SOURCE_EXTENSION: &str = "csv";

/// Cached fingerprint, valid while size and mtime are unchanged
#[derive(Debug, Clone)]
struct CachedFingerprint {
    size: u64,
    modified: SystemTime,
    fingerprint: Fingerprint,
}

#[derive(Debug)]
pub struct SourceScanner {
    landing_dir: PathBuf,
    quiescence: Duration,
    max_files: usize,
    fingerprints: HashMap<String, CachedFingerprint>,
}

impl SourceScanner {
    pub fn new(landing_dir: impl Into<PathBuf>, quiescence: Duration, max_files: usize) -> Self {
        Self {
            landing_dir: landing_dir.into(),
            quiescence,
            max_files: max_files.max(1),
            fingerprints: HashMap::new(),
        }
    }

    pub fn landing_dir(&self) -> &Path {
        &self.landing_dir
    }

    /// List uncommitted, settled source files
    ///
    /// Files are ordered by modification time, then by path, and capped at
    /// the per-batch file limit. A file modified within the quiescence
    /// window is left for a later scan.
    pub async fn scan(&mut self, checkpoint: &CheckpointStore) -> Result<Vec<WorkUnit>> {
        let scan_error = |source| IngestError::Scan {
            path: self.landing_dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.landing_dir)
            .await
            .map_err(scan_error)?;

        let now = SystemTime::now();
        let mut candidates = Vec::new();
        let mut listed = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(scan_error)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_source_file_name(&name) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    debug!(file = %name, error = %e, "Skipping file that disappeared during scan");
                    continue;
                },
            };
            listed.push(name.clone());

            let modified = metadata.modified().unwrap_or(now);
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < self.quiescence {
                trace!(file = %name, age_ms = age.as_millis() as u64, "File not yet quiescent");
                continue;
            }

            candidates.push((name, entry.path(), metadata.len(), modified));
        }

        // forget cached fingerprints of files that are gone
        self.fingerprints.retain(|name, _| listed.contains(name));

        let mut units = Vec::new();
        for (name, location, size, modified) in candidates {
            let fingerprint = match self.fingerprint(&name, &location, size, modified).await {
                Ok(f) => f,
                Err(e) => {
                    debug!(file = %name, error = %e, "Skipping unreadable file");
                    continue;
                },
            };

            let id = WorkUnitId::new(name, fingerprint);
            if checkpoint.is_committed(&id) {
                continue;
            }

            units.push(WorkUnit {
                id,
                location,
                discovered_size: size,
                modified_at: DateTime::<Utc>::from(modified),
            });
        }

        units.sort_by(|a, b| {
            a.modified_at
                .cmp(&b.modified_at)
                .then_with(|| a.path().cmp(b.path()))
        });
        let pending = units.len();
        units.truncate(self.max_files);

        debug!(
            landing_dir = %self.landing_dir.display(),
            listed = listed.len(),
            pending,
            offered = units.len(),
            "Scan complete"
        );

        Ok(units)
    }

    /// Drop the cached fingerprint of `name` so the next scan rehashes it
    pub fn forget(&mut self, name: &str) {
        self.fingerprints.remove(name);
    }

    async fn fingerprint(
        &mut self,
        name: &str,
        location: &Path,
        size: u64,
        modified: SystemTime,
    ) -> std::io::Result<Fingerprint> {
        if let Some(cached) = self.fingerprints.get(name) {
            if cached.size == size && cached.modified == modified {
                return Ok(cached.fingerprint.clone());
            }
        }

        let data = tokio::fs::read(location).await?;
        let fingerprint = Fingerprint::of_bytes(&data);
        self.fingerprints.insert(
            name.to_string(),
            CachedFingerprint {
                size,
                modified,
                fingerprint: fingerprint.clone(),
            },
        );
        Ok(fingerprint)
    }
}

/// Visible `*.csv` file names; dot-files are producer temporaries
pub fn is_source_file_name(name: &str) -> bool {
    !name.starts_with('.')
        && Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(SOURCE_EXTENSION))
}
