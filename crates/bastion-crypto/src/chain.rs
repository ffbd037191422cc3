use bastion_types::{Sha256Digest, TypeError};

/// A record that participates in a hash chain.
///
/// Ledger entries and raw events both implement this: each carries its own
/// hash, the hash of its predecessor, and can recompute its hash from content.
pub trait ChainLinked {
    /// The record's declared hash.
    fn link_hash(&self) -> Sha256Digest;
    /// The predecessor's hash (None for genesis).
    fn prev_link(&self) -> Option<Sha256Digest>;
    /// Recompute the hash from the record's content.
    fn computed_hash(&self) -> Result<Sha256Digest, TypeError>;
}

/// Hash chain integrity verifier.
///
/// Verifies that a sequence of records forms a valid hash chain:
/// each record's prev link matches the previous record's hash,
/// and each record's hash is correctly computed from its content.
pub struct HashChainVerifier;

impl HashChainVerifier {
    /// Verify a chain that starts at genesis.
    pub fn verify_chain<R: ChainLinked>(records: &[R]) -> Result<(), ChainError> {
        Self::verify_from(records, None)
    }

    /// Verify a chain segment whose first record should link to `anchor`.
    ///
    /// With `anchor == None` the first record must be a genesis record.
    pub fn verify_from<R: ChainLinked>(
        records: &[R],
        anchor: Option<Sha256Digest>,
    ) -> Result<(), ChainError> {
        let mut expected_prev = anchor;

        for (index, record) in records.iter().enumerate() {
            match (expected_prev, record.prev_link()) {
                (None, None) => {}
                (None, Some(_)) => return Err(ChainError::GenesisHasPrevHash { index }),
                (Some(_), None) => return Err(ChainError::MissingPrevHash { index }),
                (Some(want), Some(got)) if want == got => {}
                (Some(_), Some(_)) => return Err(ChainError::BrokenLink { index }),
            }

            let computed = record
                .computed_hash()
                .map_err(|_| ChainError::Unencodable { index })?;
            if computed != record.link_hash() {
                return Err(ChainError::HashMismatch { index });
            }

            expected_prev = Some(record.link_hash());
        }

        Ok(())
    }
}

/// Errors from chain verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("record at index {index} has a previous hash but should be genesis")]
    GenesisHasPrevHash { index: usize },

    #[error("broken link at index {index}: prev_hash does not match")]
    BrokenLink { index: usize },

    #[error("missing prev_hash at index {index} (should reference previous record)")]
    MissingPrevHash { index: usize },

    #[error("hash mismatch at index {index}: computed hash differs from stored")]
    HashMismatch { index: usize },

    #[error("record at index {index} cannot be canonically encoded")]
    Unencodable { index: usize },
}

impl ChainError {
    /// Position of the offending record.
    pub fn index(&self) -> usize {
        match self {
            Self::GenesisHasPrevHash { index }
            | Self::BrokenLink { index }
            | Self::MissingPrevHash { index }
            | Self::HashMismatch { index }
            | Self::Unencodable { index } => *index,
        }
    }
}
