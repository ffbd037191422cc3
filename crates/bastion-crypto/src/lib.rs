//! Ledger cryptography for Bastion.
//!
//! Provides SHA-256 canonical hashing, Ed25519 signing/verification, on-disk
//! keypair management, a key registry boundary for revocation lookups, and
//! hash-chain verification.
//!
//! All crypto operations wrap established libraries; no custom cryptography.

pub mod chain;
pub mod error;
pub mod hasher;
pub mod keys;
pub mod registry;
pub mod signer;

pub use chain::{ChainError, ChainLinked, HashChainVerifier};
pub use error::CryptoError;
pub use hasher::CanonicalHasher;
pub use keys::{KeyId, KeyManager, KeyRecord, DEFAULT_KEY_NAME};
pub use registry::{InMemoryKeyRegistry, KeyRegistry};
pub use signer::{Signature, SigningKey, VerifyingKey};
