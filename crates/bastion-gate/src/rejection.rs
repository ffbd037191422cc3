use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why the gate refused an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    SchemaViolation,
    DuplicateEvent,
    IntegrityViolation,
    HashMismatch,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaViolation => "SCHEMA_VIOLATION",
            Self::DuplicateEvent => "DUPLICATE_EVENT",
            Self::IntegrityViolation => "INTEGRITY_VIOLATION",
            Self::HashMismatch => "HASH_MISMATCH",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused event, already recorded in the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub detail: String,
    /// Set when a sequence gap exceeds the configured bound.
    pub corruption_suspected: bool,
    /// Ledger entry recording this rejection.
    pub audit_entry_id: Uuid,
}
