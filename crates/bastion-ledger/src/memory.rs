use std::sync::RwLock;

use bastion_crypto::KeyRecord;
use bastion_types::time::now_utc;
use bastion_types::Sha256Digest;
use tracing::debug;

use crate::entry::{LedgerEntry, NewEntry};
use crate::error::LedgerError;
use crate::traits::{EntryIter, LedgerReader, LedgerWriter};

/// In-memory ledger for tests and embedding.
pub struct InMemoryLedger {
    key: KeyRecord,
    entries: RwLock<Vec<LedgerEntry>>,
}

impl InMemoryLedger {
    pub fn new(key: KeyRecord) -> Self {
        Self {
            key,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Ledger signing with a fresh throwaway key.
    pub fn ephemeral() -> Self {
        Self::new(KeyRecord::ephemeral())
    }

    pub fn key(&self) -> &KeyRecord {
        &self.key
    }

    /// Entries with the given action type, oldest first.
    pub fn entries_of(&self, action_type: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self.entries.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(entries
            .iter()
            .filter(|e| e.action_type == action_type)
            .cloned()
            .collect())
    }
}

impl LedgerWriter for InMemoryLedger {
    fn append(&self, entry: NewEntry) -> Result<LedgerEntry, LedgerError> {
        let mut entries = self.entries.write().map_err(|_| LedgerError::LockPoisoned)?;
        let prev = entries.last().map(|e| e.hash);
        let sealed = LedgerEntry::seal(entry, prev, now_utc(), &self.key)?;
        debug!(
            entry_id = %sealed.entry_id,
            action_type = %sealed.action_type,
            hash = %sealed.hash.short_hex(),
            "ledger append (memory)"
        );
        entries.push(sealed.clone());
        Ok(sealed)
    }
}

impl LedgerReader for InMemoryLedger {
    fn iterate(&self) -> Result<EntryIter<'_>, LedgerError> {
        let snapshot = self
            .entries
            .read()
            .map_err(|_| LedgerError::LockPoisoned)?
            .clone();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn head(&self) -> Result<Option<Sha256Digest>, LedgerError> {
        let entries = self.entries.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(entries.last().map(|e| e.hash))
    }

    fn entry_count(&self) -> Result<u64, LedgerError> {
        let entries = self.entries.read().map_err(|_| LedgerError::LockPoisoned)?;
        Ok(entries.len() as u64)
    }
}
