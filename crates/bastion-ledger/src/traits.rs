use bastion_types::Sha256Digest;
use uuid::Uuid;

use crate::entry::{LedgerEntry, NewEntry};
use crate::error::LedgerError;

/// Lazy, ordered (oldest first) sequence of ledger entries.
pub type EntryIter<'a> = Box<dyn Iterator<Item = Result<LedgerEntry, LedgerError>> + Send + 'a>;

/// Write boundary: the only way facts enter the ledger.
pub trait LedgerWriter: Send + Sync {
    /// Chain, hash, sign, and durably persist one entry.
    ///
    /// Returns only after the entry is on stable storage.
    fn append(&self, entry: NewEntry) -> Result<LedgerEntry, LedgerError>;
}

/// Read boundary for ledger consumers and verifiers.
pub trait LedgerReader: Send + Sync {
    fn iterate(&self) -> Result<EntryIter<'_>, LedgerError>;

    /// Hash of the newest entry, `None` for an empty stream.
    fn head(&self) -> Result<Option<Sha256Digest>, LedgerError>;

    fn entry_count(&self) -> Result<u64, LedgerError>;

    /// Bytes of an incomplete final record that [`LedgerReader::iterate`]
    /// does not yield.
    fn torn_tail_len(&self) -> Result<u64, LedgerError> {
        Ok(0)
    }

    fn find(&self, entry_id: &Uuid) -> Result<Option<LedgerEntry>, LedgerError> {
        for entry in self.iterate()? {
            let entry = entry?;
            if entry.entry_id == *entry_id {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn read_all(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.iterate()?.collect()
    }
}
