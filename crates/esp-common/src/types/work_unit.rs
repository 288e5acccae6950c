use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::fingerprint::Fingerprint;

/// Identity of a work unit: the file path plus the fingerprint of its content
///
/// The same path with different content is a different identity, so a file
/// rewritten after it was committed is offered again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkUnitId {
    pub path: String,
    pub fingerprint: Fingerprint,
}

impl WorkUnitId {
    pub fn new(path: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            path: path.into(),
            fingerprint,
        }
    }
}

impl std::fmt::Display for WorkUnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.path, self.fingerprint.short())
    }
}

/// One source file discovered by the scanner
///
/// Immutable once handed to a batch. If the file on disk no longer matches
/// `fingerprint` when it is read, the unit is dropped from the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: WorkUnitId,
    /// Absolute or landing-relative location of the file
    pub location: PathBuf,
    pub discovered_size: u64,
    /// Modification time at discovery; the scanner's ordering key
    pub modified_at: DateTime<Utc>,
}

impl WorkUnit {
    pub fn path(&self) -> &str {
        &self.id.path
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.id.fingerprint
    }
}
