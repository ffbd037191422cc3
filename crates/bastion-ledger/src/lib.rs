//! Append-only, hash-chained, signed ledger for Bastion.
//!
//! The ledger is the single source of truth for "what happened". It provides:
//! - [`LedgerEntry`] with canonical SHA-256 hashing and Ed25519 signatures
//! - `LedgerWriter` / `LedgerReader` trait boundaries
//! - [`FileLedger`] (durable JSON lines) and [`InMemoryLedger`]
//! - [`OfflineVerifier`] producing deterministic verification reports
//! - [`CustodyLog`], a separate append-only stream of artifact accesses

pub mod custody;
pub mod entry;
pub mod error;
pub mod file;
pub mod jsonl;
pub mod memory;
pub mod traits;
pub mod verify;

pub use custody::{AccessEvent, AccessType, CustodyLog, CustodyRecord};
pub use entry::{LedgerEntry, NewEntry};
pub use error::LedgerError;
pub use file::FileLedger;
pub use jsonl::{JsonlAppender, JsonlReader};
pub use memory::InMemoryLedger;
pub use traits::{EntryIter, LedgerReader, LedgerWriter};
pub use verify::{
    verify_entry, EntryCheck, FailureKind, OfflineVerifier, VerificationFailure,
    VerificationReport,
};
