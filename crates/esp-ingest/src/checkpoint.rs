//! Durable ledger of committed work units
//!
//! The ledger is a JSON-lines file, `commits.jsonl`, inside the checkpoint
//! directory. Each line is one committed batch:
//!
//! ```text
//! {"sequence":3,"committed_at":"2026-03-01T12:00:10Z","run_id":"…","units":[{"path":"events_1.csv","fingerprint":"ab12…","size":812}]}
//! ```
//!
//! A batch becomes committed when its line is fully appended and synced. A
//! line cut short by a crash is never counted; it is truncated away the next
//! time the ledger is opened.

use chrono::{DateTime, Utc};
use esp_common::types::{WorkUnit, WorkUnitId};
use esp_common::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LEDGER_FILE: &str = "commits.jsonl";

/// One work unit inside a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedUnit {
    pub path: String,
    pub fingerprint: Fingerprint,
    pub size: u64,
}

impl CommittedUnit {
    pub fn id(&self) -> WorkUnitId {
        WorkUnitId::new(self.path.clone(), self.fingerprint.clone())
    }
}

/// One committed batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub sequence: u64,
    pub committed_at: DateTime<Utc>,
    /// Process run that wrote the entry
    pub run_id: Uuid,
    pub units: Vec<CommittedUnit>,
}

/// Append-only checkpoint store, replayed in full on open
#[derive(Debug)]
pub struct CheckpointStore {
    ledger_path: PathBuf,
    run_id: Uuid,
    entries: Vec<CommitEntry>,
    committed: HashMap<WorkUnitId, u64>,
}

impl CheckpointStore {
    /// Open (or create) the ledger in `dir` and replay it
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let mut store = Self::empty(dir);
        store.replay(true)?;

        info!(
            ledger = %store.ledger_path.display(),
            batches = store.entries.len(),
            units = store.committed.len(),
            last_sequence = ?store.last_sequence(),
            "Checkpoint ledger replayed"
        );

        Ok(store)
    }

    /// Replay the ledger for inspection only
    ///
    /// Never modifies the file, so it is safe to use while another process
    /// owns the ledger. Commits through a read-only store still work but are
    /// not meant to.
    pub fn open_read_only(dir: impl AsRef<Path>) -> io::Result<Self> {
        let mut store = Self::empty(dir.as_ref());
        store.replay(false)?;
        Ok(store)
    }

    fn empty(dir: &Path) -> Self {
        Self {
            ledger_path: dir.join(LEDGER_FILE),
            run_id: Uuid::new_v4(),
            entries: Vec::new(),
            committed: HashMap::new(),
        }
    }

    fn replay(&mut self, repair: bool) -> io::Result<()> {
        let mut content = Vec::new();
        match File::open(&self.ledger_path) {
            Ok(mut file) => {
                file.read_to_end(&mut content)?;
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        }

        // Byte offset just past the last intact line
        let mut intact_len = 0usize;
        let mut offset = 0usize;
        let mut line_no = 0usize;

        while offset < content.len() {
            line_no += 1;
            let rest = &content[offset..];
            let (line, complete) = match rest.iter().position(|b| *b == b'\n') {
                Some(pos) => (&rest[..pos], true),
                None => (rest, false),
            };
            let next_offset = offset + line.len() + usize::from(complete);
            let is_last = next_offset >= content.len();

            if line.iter().all(u8::is_ascii_whitespace) {
                offset = next_offset;
                if complete {
                    intact_len = offset;
                }
                continue;
            }

            match serde_json::from_slice::<CommitEntry>(line) {
                Ok(entry) if complete => {
                    self.apply(entry)?;
                    intact_len = next_offset;
                },
                Err(e) if !is_last => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "corrupt checkpoint ledger {} at line {}: {}",
                            self.ledger_path.display(),
                            line_no,
                            e
                        ),
                    ));
                },
                // torn or unparsable tail: the commit never completed
                _ => {
                    warn!(
                        ledger = %self.ledger_path.display(),
                        line = line_no,
                        bytes = line.len(),
                        "Discarding incomplete trailing ledger entry"
                    );
                    break;
                },
            }

            offset = next_offset;
        }

        if repair && intact_len < content.len() {
            let file = OpenOptions::new().write(true).open(&self.ledger_path)?;
            file.set_len(intact_len as u64)?;
            file.sync_all()?;
        }

        Ok(())
    }

    fn apply(&mut self, entry: CommitEntry) -> io::Result<()> {
        if let Some(last) = self.last_sequence() {
            if entry.sequence <= last {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "checkpoint sequence {} does not follow {} in {}",
                        entry.sequence,
                        last,
                        self.ledger_path.display()
                    ),
                ));
            }
        }

        for unit in &entry.units {
            self.committed.insert(unit.id(), entry.sequence);
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn is_committed(&self, id: &WorkUnitId) -> bool {
        self.committed.contains_key(id)
    }

    /// Sequence of the batch that committed `id`
    pub fn committed_in(&self, id: &WorkUnitId) -> Option<u64> {
        self.committed.get(id).copied()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.entries.last().map(|e| e.sequence)
    }

    /// Sequence number the next commit must use
    pub fn next_sequence(&self) -> u64 {
        self.last_sequence().map_or(1, |s| s + 1)
    }

    pub fn entries(&self) -> &[CommitEntry] {
        &self.entries
    }

    /// Number of committed work units
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Record every unit of batch `sequence` as committed, or none of them
    ///
    /// The entry is appended as a single line and synced before the in-memory
    /// view changes. On a failed write the file is cut back to its previous
    /// length so a retry starts from a clean tail.
    pub fn commit(
        &mut self,
        sequence: u64,
        units: &[WorkUnit],
        timestamp: DateTime<Utc>,
    ) -> io::Result<&CommitEntry> {
        if sequence < self.next_sequence() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("batch {} is not after committed batch {}", sequence, self.next_sequence() - 1),
            ));
        }
        if let Some(unit) = units.iter().find(|u| self.is_committed(&u.id)) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("work unit {} is already committed", unit.id),
            ));
        }

        let entry = CommitEntry {
            sequence,
            committed_at: timestamp,
            run_id: self.run_id,
            units: units
                .iter()
                .map(|u| CommittedUnit {
                    path: u.path().to_string(),
                    fingerprint: u.fingerprint().clone(),
                    size: u.discovered_size,
                })
                .collect(),
        };

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.append(&line)?;

        debug!(sequence, units = entry.units.len(), "Checkpoint entry appended");

        for unit in &entry.units {
            self.committed.insert(unit.id(), sequence);
        }
        self.entries.push(entry);
        self.entries
            .last()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "ledger entry vanished"))
    }

    fn append(&self, line: &[u8]) -> io::Result<()> {
        let created = !self.ledger_path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_path)?;
        let previous_len = file.metadata()?.len();

        let written = file.write_all(line).and_then(|_| file.sync_data());
        if let Err(e) = written {
            if let Err(truncate_err) = file.set_len(previous_len) {
                warn!(
                    ledger = %self.ledger_path.display(),
                    error = %truncate_err,
                    "Failed to roll back partial ledger write"
                );
            }
            return Err(e);
        }

        if created {
            sync_parent_dir(&self.ledger_path);
        }
        Ok(())
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
            warn!(dir = %parent.display(), error = %e, "Failed to sync checkpoint directory");
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(name: &str, content: &[u8]) -> WorkUnit {
        WorkUnit {
            id: WorkUnitId::new(name, Fingerprint::of_bytes(content)),
            location: PathBuf::from(name),
            discovered_size: content.len() as u64,
            modified_at: Utc::now(),
        }
    }

    #[test]
    fn test_commit_and_replay() {
        let dir = TempDir::new().unwrap();
        let a = unit("a.csv", b"a");
        let b = unit("b.csv", b"b");

        {
            let mut store = CheckpointStore::open(dir.path()).unwrap();
            assert!(store.is_empty());
            assert_eq!(store.next_sequence(), 1);
            store.commit(1, &[a.clone(), b.clone()], Utc::now()).unwrap();
            assert!(store.is_committed(&a.id));
        }

        let store = CheckpointStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.last_sequence(), Some(1));
        assert_eq!(store.committed_in(&b.id), Some(1));
        assert_eq!(store.next_sequence(), 2);
        assert_eq!(store.entries()[0].units[0].path, "a.csv");
    }

    #[test]
    fn test_same_path_new_content_is_not_committed() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        store.commit(1, &[unit("a.csv", b"v1")], Utc::now()).unwrap();

        assert!(!store.is_committed(&unit("a.csv", b"v2").id));
    }

    #[test]
    fn test_sequences_strictly_increase() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        store.commit(1, &[unit("a.csv", b"a")], Utc::now()).unwrap();

        let err = store.commit(1, &[unit("b.csv", b"b")], Utc::now()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        store.commit(5, &[unit("b.csv", b"b")], Utc::now()).unwrap();
        assert_eq!(store.next_sequence(), 6);
    }

    #[test]
    fn test_unit_committed_at_most_once() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        store.commit(1, &[unit("a.csv", b"a")], Utc::now()).unwrap();

        let err = store.commit(2, &[unit("a.csv", b"a")], Utc::now()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = CheckpointStore::open(dir.path()).unwrap();
            store.commit(1, &[unit("a.csv", b"a")], Utc::now()).unwrap();
        }

        let ledger = dir.path().join(LEDGER_FILE);
        let intact = std::fs::metadata(&ledger).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&ledger).unwrap();
        file.write_all(br#"{"sequence":2,"committed_at":"2026-"#).unwrap();
        drop(file);

        let mut store = CheckpointStore::open(dir.path()).unwrap();
        assert_eq!(store.last_sequence(), Some(1));
        assert_eq!(std::fs::metadata(&ledger).unwrap().len(), intact);

        // the next commit lands on a clean line
        store.commit(2, &[unit("b.csv", b"b")], Utc::now()).unwrap();
        let reopened = CheckpointStore::open(dir.path()).unwrap();
        assert_eq!(reopened.entries().len(), 2);
    }

    #[test]
    fn test_corruption_before_tail_is_an_error() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = CheckpointStore::open(dir.path()).unwrap();
            store.commit(1, &[unit("a.csv", b"a")], Utc::now()).unwrap();
        }
        let ledger = dir.path().join(LEDGER_FILE);
        let good = std::fs::read_to_string(&ledger).unwrap();
        std::fs::write(&ledger, format!("not json\n{}", good)).unwrap();

        let err = CheckpointStore::open(dir.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_ledger_is_human_readable() {
        let dir = TempDir::new().unwrap();
        let mut store = CheckpointStore::open(dir.path()).unwrap();
        store.commit(1, &[unit("events_1.csv", b"x")], Utc::now()).unwrap();

        let text = std::fs::read_to_string(store.ledger_path()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("\"path\":\"events_1.csv\""));
        assert!(text.contains("\"sequence\":1"));
    }
}
