//! Entry and stream verification.
//!
//! Verification needs only the stream and public keys. The report it produces
//! carries no timestamps and has a fixed field order, so the same inputs always
//! serialize to the same bytes.

use std::fmt;

use bastion_crypto::{KeyId, KeyRegistry};
use bastion_types::Sha256Digest;
use serde::Serialize;
use tracing::{info, warn};

use crate::entry::LedgerEntry;
use crate::error::LedgerError;
use crate::traits::LedgerReader;

/// Outcome of checking a single entry. Each failure is a distinct variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryCheck {
    Valid,
    HashMismatch {
        stored: Sha256Digest,
        computed: Sha256Digest,
    },
    ChainBroken {
        expected: Option<Sha256Digest>,
        found: Option<Sha256Digest>,
    },
    Unencodable(String),
    KeyNotFound(KeyId),
    KeyRevoked(KeyId),
    SignatureInvalid,
}

impl EntryCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Report category, or `None` for a valid entry.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Valid => None,
            Self::HashMismatch { .. } | Self::Unencodable(_) => Some(FailureKind::HashMismatch),
            Self::ChainBroken { .. } => Some(FailureKind::ChainBroken),
            Self::KeyNotFound(_) => Some(FailureKind::KeyNotFound),
            Self::KeyRevoked(_) => Some(FailureKind::KeyRevoked),
            Self::SignatureInvalid => Some(FailureKind::SignatureVerificationFailed),
        }
    }
}

impl fmt::Display for EntryCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = |d: &Option<Sha256Digest>| d.map(|d| d.to_hex()).unwrap_or_else(|| "none".into());
        match self {
            Self::Valid => write!(f, "valid"),
            Self::HashMismatch { stored, computed } => {
                write!(f, "hash mismatch: stored={stored}, computed={computed}")
            }
            Self::ChainBroken { expected, found } => write!(
                f,
                "prev_hash mismatch: expected={}, found={}",
                hex(expected),
                hex(found)
            ),
            Self::Unencodable(reason) => write!(f, "entry cannot be canonically encoded: {reason}"),
            Self::KeyNotFound(id) => write!(f, "signing key {id} not found"),
            Self::KeyRevoked(id) => write!(f, "signing key {id} is revoked"),
            Self::SignatureInvalid => write!(f, "signature verification failed"),
        }
    }
}

/// Check one entry: content hash, then chain link, then key, then signature.
pub fn verify_entry(
    entry: &LedgerEntry,
    expected_prev: Option<Sha256Digest>,
    registry: &dyn KeyRegistry,
) -> EntryCheck {
    let computed = match entry.compute_hash() {
        Ok(h) => h,
        Err(e) => return EntryCheck::Unencodable(e.to_string()),
    };
    if computed != entry.hash {
        return EntryCheck::HashMismatch {
            stored: entry.hash,
            computed,
        };
    }

    if entry.prev_hash != expected_prev {
        return EntryCheck::ChainBroken {
            expected: expected_prev,
            found: entry.prev_hash,
        };
    }

    let Some(key) = registry.public_key(&entry.signing_key_id) else {
        return EntryCheck::KeyNotFound(entry.signing_key_id);
    };
    if registry.is_revoked(&entry.signing_key_id) {
        return EntryCheck::KeyRevoked(entry.signing_key_id);
    }
    if !entry.verify_signature(&key) {
        return EntryCheck::SignatureInvalid;
    }

    EntryCheck::Valid
}

/// Failure categories as they appear in reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    HashMismatch,
    ChainBroken,
    SignatureVerificationFailed,
    KeyNotFound,
    KeyRevoked,
    Unreadable,
}

/// The first failure found in a stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationFailure {
    /// Zero-based position in the stream.
    pub index: u64,
    pub entry_id: Option<String>,
    pub kind: FailureKind,
    pub detail: String,
}

/// Result of verifying a whole stream.
///
/// Any single failure marks the stream compromised: [`Self::is_valid`] is
/// then false regardless of how many entries verified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub total_entries: u64,
    pub verified_entries: u64,
    pub hash_chain_valid: bool,
    pub signatures_valid: bool,
    pub key_continuity_valid: bool,
    pub first_failure: Option<VerificationFailure>,
    /// Size of an incomplete final line left by an interrupted append. Such a
    /// record was never acknowledged, so it does not invalidate the stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_tail_bytes: Option<u64>,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.first_failure.is_none()
    }

    /// Stable, pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, LedgerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Verifies a ledger stream against a set of public keys without any other
/// state.
pub struct OfflineVerifier<'a> {
    registry: &'a dyn KeyRegistry,
}

impl<'a> OfflineVerifier<'a> {
    pub fn new(registry: &'a dyn KeyRegistry) -> Self {
        Self { registry }
    }

    /// Verify the stream front to back, stopping verification at the first
    /// failure. Entries after it are still counted.
    pub fn verify(&self, reader: &dyn LedgerReader) -> Result<VerificationReport, LedgerError> {
        let mut report = VerificationReport {
            total_entries: 0,
            verified_entries: 0,
            hash_chain_valid: true,
            signatures_valid: true,
            key_continuity_valid: true,
            first_failure: None,
            truncated_tail_bytes: None,
        };
        let mut expected_prev = None;

        for item in reader.iterate()? {
            let index = report.total_entries;
            let entry = match item {
                Ok(entry) => entry,
                Err(LedgerError::Corrupt { line, reason }) => {
                    report.hash_chain_valid = false;
                    report.first_failure.get_or_insert(VerificationFailure {
                        index,
                        entry_id: None,
                        kind: FailureKind::Unreadable,
                        detail: format!("line {line}: {reason}"),
                    });
                    break;
                }
                Err(e) => return Err(e),
            };
            report.total_entries += 1;

            if report.first_failure.is_some() {
                continue;
            }

            let check = verify_entry(&entry, expected_prev, self.registry);
            match check.failure_kind() {
                None => {
                    report.verified_entries += 1;
                    expected_prev = Some(entry.hash);
                }
                Some(kind) => {
                    match kind {
                        FailureKind::HashMismatch | FailureKind::ChainBroken => {
                            report.hash_chain_valid = false
                        }
                        FailureKind::SignatureVerificationFailed => report.signatures_valid = false,
                        FailureKind::KeyNotFound | FailureKind::KeyRevoked => {
                            report.key_continuity_valid = false;
                            report.signatures_valid = false;
                        }
                        FailureKind::Unreadable => {}
                    }
                    warn!(index, entry_id = %entry.entry_id, failure = %check, "ledger verification failed");
                    report.first_failure = Some(VerificationFailure {
                        index,
                        entry_id: Some(entry.entry_id.to_string()),
                        kind,
                        detail: check.to_string(),
                    });
                }
            }
        }

        let torn = reader.torn_tail_len()?;
        if torn > 0 {
            warn!(bytes = torn, "ledger ends with a truncated record");
            report.truncated_tail_bytes = Some(torn);
        }

        info!(
            total = report.total_entries,
            verified = report.verified_entries,
            valid = report.is_valid(),
            "ledger verification complete"
        );
        Ok(report)
    }
}
