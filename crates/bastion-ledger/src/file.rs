use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bastion_crypto::KeyRecord;
use bastion_types::time::now_utc;
use bastion_types::Sha256Digest;
use tracing::{debug, info};

use crate::entry::{LedgerEntry, NewEntry};
use crate::error::LedgerError;
use crate::jsonl::{self, JsonlAppender, JsonlReader};
use crate::traits::{EntryIter, LedgerReader, LedgerWriter};

/// Append-only JSON-lines ledger on disk.
///
/// Exactly one writer per file: the append handle, head hash, and entry
/// count live behind one mutex and are updated together. Readers open their
/// own handles and take no lock.
pub struct FileLedger {
    path: PathBuf,
    writer: Option<Mutex<WriterState>>,
}

struct WriterState {
    log: JsonlAppender,
    key: KeyRecord,
    head: Option<Sha256Digest>,
    count: u64,
}

impl FileLedger {
    /// Open for writing, recovering the head hash from the existing stream.
    ///
    /// Refuses a stream whose last line is torn or unparsable, and a stream
    /// another `FileLedger` already has open for writing.
    pub fn open(path: impl Into<PathBuf>, key: KeyRecord) -> Result<Self, LedgerError> {
        let path = path.into();
        let log = JsonlAppender::open_exclusive(&path)?;

        let mut head = None;
        let mut count = 0u64;
        for entry in JsonlReader::<LedgerEntry>::open(&path)? {
            head = Some(entry?.hash);
            count += 1;
        }

        info!(
            path = %path.display(),
            entries = count,
            key_id = %key.key_id,
            "opened ledger"
        );
        Ok(Self {
            path,
            writer: Some(Mutex::new(WriterState {
                log,
                key,
                head,
                count,
            })),
        })
    }

    /// Open without a writer. Appends fail with [`LedgerError::ReadOnly`].
    pub fn open_read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.writer.is_none()
    }
}

impl LedgerWriter for FileLedger {
    fn append(&self, entry: NewEntry) -> Result<LedgerEntry, LedgerError> {
        let writer = self.writer.as_ref().ok_or(LedgerError::ReadOnly)?;
        let mut state = writer.lock().map_err(|_| LedgerError::LockPoisoned)?;

        let sealed = LedgerEntry::seal(entry, state.head, now_utc(), &state.key)?;
        state.log.append(&sealed)?;
        state.head = Some(sealed.hash);
        state.count += 1;

        debug!(
            entry_id = %sealed.entry_id,
            action_type = %sealed.action_type,
            subject = %sealed.subject,
            hash = %sealed.hash.short_hex(),
            "ledger append"
        );
        Ok(sealed)
    }
}

impl LedgerReader for FileLedger {
    fn iterate(&self) -> Result<EntryIter<'_>, LedgerError> {
        Ok(Box::new(JsonlReader::<LedgerEntry>::open(&self.path)?))
    }

    fn head(&self) -> Result<Option<Sha256Digest>, LedgerError> {
        if let Some(writer) = &self.writer {
            return Ok(writer.lock().map_err(|_| LedgerError::LockPoisoned)?.head);
        }
        let mut head = None;
        for entry in self.iterate()? {
            head = Some(entry?.hash);
        }
        Ok(head)
    }

    fn entry_count(&self) -> Result<u64, LedgerError> {
        if let Some(writer) = &self.writer {
            return Ok(writer.lock().map_err(|_| LedgerError::LockPoisoned)?.count);
        }
        let mut count = 0;
        for entry in self.iterate()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    fn torn_tail_len(&self) -> Result<u64, LedgerError> {
        jsonl::torn_tail_len(&self.path)
    }
}
