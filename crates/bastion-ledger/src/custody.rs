//! Chain-of-custody access stream.
//!
//! Every access to an evidence artifact is one more line in its own
//! append-only file. The artifact records and the ledger are never touched;
//! the full custody history is assembled at read time.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bastion_types::time::now_utc;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::entry::LedgerEntry;
use crate::error::LedgerError;
use crate::jsonl::{JsonlAppender, JsonlReader};
use crate::traits::LedgerReader;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Read,
    Verify,
    Export,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Verify => "verify",
            Self::Export => "export",
        })
    }
}

/// One recorded access to an artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub artifact_id: String,
    pub accessed_by: String,
    pub access_type: AccessType,
    /// Ledger entry documenting the access.
    pub ledger_entry_id: Uuid,
    #[serde(with = "bastion_types::time::rfc3339")]
    pub accessed_at: DateTime<Utc>,
}

/// An access joined with the ledger entry it references.
#[derive(Clone, Debug, PartialEq)]
pub struct CustodyRecord {
    pub access: AccessEvent,
    /// `None` if the referenced entry is not in the ledger.
    pub ledger_entry: Option<LedgerEntry>,
}

/// Append-only access log.
pub struct CustodyLog {
    path: PathBuf,
    writer: Mutex<JsonlAppender>,
}

impl CustodyLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let writer = JsonlAppender::open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an access that happened now.
    pub fn record(
        &self,
        artifact_id: impl Into<String>,
        accessed_by: impl Into<String>,
        access_type: AccessType,
        ledger_entry_id: Uuid,
    ) -> Result<AccessEvent, LedgerError> {
        let event = AccessEvent {
            artifact_id: artifact_id.into(),
            accessed_by: accessed_by.into(),
            access_type,
            ledger_entry_id,
            accessed_at: now_utc(),
        };
        self.writer
            .lock()
            .map_err(|_| LedgerError::LockPoisoned)?
            .append(&event)?;
        debug!(
            artifact_id = %event.artifact_id,
            accessed_by = %event.accessed_by,
            access_type = %event.access_type,
            "custody access recorded"
        );
        Ok(event)
    }

    /// All accesses to one artifact, oldest first.
    pub fn history(&self, artifact_id: &str) -> Result<Vec<AccessEvent>, LedgerError> {
        let mut out = Vec::new();
        for event in JsonlReader::<AccessEvent>::open(&self.path)? {
            let event = event?;
            if event.artifact_id == artifact_id {
                out.push(event);
            }
        }
        Ok(out)
    }

    /// History joined with the referenced ledger entries.
    pub fn history_with_entries(
        &self,
        artifact_id: &str,
        ledger: &dyn LedgerReader,
    ) -> Result<Vec<CustodyRecord>, LedgerError> {
        let accesses = self.history(artifact_id)?;
        let mut wanted: std::collections::HashMap<Uuid, Option<LedgerEntry>> =
            accesses.iter().map(|a| (a.ledger_entry_id, None)).collect();

        if !wanted.is_empty() {
            for entry in ledger.iterate()? {
                let entry = entry?;
                if let Some(slot) = wanted.get_mut(&entry.entry_id) {
                    *slot = Some(entry);
                }
            }
        }

        Ok(accesses
            .into_iter()
            .map(|access| {
                let ledger_entry = wanted.get(&access.ledger_entry_id).cloned().flatten();
                CustodyRecord {
                    access,
                    ledger_entry,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::NewEntry;
    use crate::memory::InMemoryLedger;
    use crate::traits::LedgerWriter;
    use bastion_types::{Actor, Subject};

    #[test]
    fn history_filters_by_artifact_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = CustodyLog::open(dir.path().join("custody.jsonl")).unwrap();
        let id = Uuid::new_v4();
        log.record("a-1", "alice", AccessType::Read, id).unwrap();
        log.record("a-2", "bob", AccessType::Read, id).unwrap();
        log.record("a-1", "carol", AccessType::Export, id).unwrap();

        let history = log.history("a-1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].accessed_by, "alice");
        assert_eq!(history[1].access_type, AccessType::Export);
    }

    #[test]
    fn records_are_only_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custody.jsonl");
        let log = CustodyLog::open(&path).unwrap();
        log.record("a-1", "alice", AccessType::Read, Uuid::new_v4()).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();
        log.record("a-1", "bob", AccessType::Verify, Uuid::new_v4()).unwrap();
        let after = std::fs::read_to_string(&path).unwrap();
        assert!(after.starts_with(&before));
    }

    #[test]
    fn join_resolves_ledger_entries() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = InMemoryLedger::ephemeral();
        let entry = ledger
            .append(NewEntry::new(
                "forensics",
                "f-1",
                "artifact_accessed",
                Subject::new("artifact", "a-1"),
                Actor::new("user", "alice"),
            ))
            .unwrap();

        let log = CustodyLog::open(dir.path().join("custody.jsonl")).unwrap();
        log.record("a-1", "alice", AccessType::Read, entry.entry_id).unwrap();
        log.record("a-1", "mallory", AccessType::Read, Uuid::new_v4()).unwrap();

        let joined = log.history_with_entries("a-1", &ledger).unwrap();
        assert_eq!(joined[0].ledger_entry.as_ref(), Some(&entry));
        assert!(joined[1].ledger_entry.is_none());
    }
}
