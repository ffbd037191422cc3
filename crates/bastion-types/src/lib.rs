//! Foundation types for the Bastion integrity core.
//!
//! Every other Bastion crate depends on `bastion-types`. The types here are
//! deliberately small and serialization-stable, because their canonical JSON
//! encoding feeds directly into ledger and event hashes.
//!
//! # Key Types
//!
//! - [`Sha256Digest`]: SHA-256 digest, hex-encoded on the wire
//! - [`Subject`] / [`Actor`]: who did what to which thing, as recorded in the ledger
//! - [`Payload`]: ordered key/value map carried by entries and events
//! - [`canonical`]: sorted-key, whitespace-free JSON encoding used for hashing

pub mod canonical;
pub mod digest;
pub mod error;
pub mod identity;
pub mod time;

pub use canonical::{canonical_bytes, canonical_bytes_without, canonical_string};
pub use digest::Sha256Digest;
pub use error::TypeError;
pub use identity::{Actor, Subject};

/// Opaque structured payload. `BTreeMap` keeps key order stable.
pub type Payload = std::collections::BTreeMap<String, serde_json::Value>;
