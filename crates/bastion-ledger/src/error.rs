use std::path::PathBuf;

use bastion_crypto::CryptoError;
use bastion_types::TypeError;

/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Persisting an entry failed. Fatal: the caller must not assume the
    /// fact was recorded.
    #[error("ledger write to {path} failed: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger read from {path} failed: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger is open read-only")]
    ReadOnly,

    #[error("corrupt ledger line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("ledger {path} ends with an incomplete line; refusing to append")]
    TornTail { path: PathBuf },

    /// Another writer holds the file.
    #[error("{path} is locked by another writer")]
    Locked { path: PathBuf },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("ledger lock poisoned")]
    LockPoisoned,
}

impl From<TypeError> for LedgerError {
    fn from(e: TypeError) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
