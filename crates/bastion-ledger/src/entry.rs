use bastion_crypto::{ChainLinked, KeyId, KeyRecord, Signature, VerifyingKey};
use bastion_types::time::format_rfc3339;
use bastion_types::{canonical_bytes, Actor, Payload, Sha256Digest, Subject, TypeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

/// One immutable, signed, hash-chained ledger record.
///
/// `hash` is SHA-256 over the canonical encoding of every other field except
/// `signature`; `signature` is Ed25519 over the raw 32 hash bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    #[serde(with = "bastion_types::time::rfc3339")]
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub component_instance_id: String,
    pub action_type: String,
    pub subject: Subject,
    pub actor: Actor,
    pub payload: Payload,
    pub prev_hash: Option<Sha256Digest>,
    pub hash: Sha256Digest,
    pub signing_key_id: KeyId,
    pub signature: Signature,
}

/// The caller-supplied part of an entry.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEntry {
    pub component: String,
    pub component_instance_id: String,
    pub action_type: String,
    pub subject: Subject,
    pub actor: Actor,
    pub payload: Payload,
}

impl NewEntry {
    pub fn new(
        component: impl Into<String>,
        component_instance_id: impl Into<String>,
        action_type: impl Into<String>,
        subject: Subject,
        actor: Actor,
    ) -> Self {
        Self {
            component: component.into(),
            component_instance_id: component_instance_id.into(),
            action_type: action_type.into(),
            subject,
            actor,
            payload: Payload::new(),
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Add one payload field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// Hashed view of an entry: everything except `hash` and `signature`.
#[derive(Serialize)]
struct HashedFields<'a> {
    entry_id: &'a Uuid,
    timestamp: String,
    component: &'a str,
    component_instance_id: &'a str,
    action_type: &'a str,
    subject: &'a Subject,
    actor: &'a Actor,
    payload: &'a Payload,
    prev_hash: &'a Option<Sha256Digest>,
    signing_key_id: &'a KeyId,
}

impl LedgerEntry {
    /// Build, hash, and sign an entry that follows `prev_hash`.
    pub fn seal(
        new: NewEntry,
        prev_hash: Option<Sha256Digest>,
        timestamp: DateTime<Utc>,
        key: &KeyRecord,
    ) -> Result<Self, LedgerError> {
        let entry_id = Uuid::new_v4();
        let hash = hash_fields(&HashedFields {
            entry_id: &entry_id,
            timestamp: format_rfc3339(&timestamp),
            component: &new.component,
            component_instance_id: &new.component_instance_id,
            action_type: &new.action_type,
            subject: &new.subject,
            actor: &new.actor,
            payload: &new.payload,
            prev_hash: &prev_hash,
            signing_key_id: &key.key_id,
        })?;
        let signature = key.signing_key.sign_digest(&hash);

        Ok(Self {
            entry_id,
            timestamp,
            component: new.component,
            component_instance_id: new.component_instance_id,
            action_type: new.action_type,
            subject: new.subject,
            actor: new.actor,
            payload: new.payload,
            prev_hash,
            hash,
            signing_key_id: key.key_id,
            signature,
        })
    }

    /// Recompute the hash from the entry's content.
    pub fn compute_hash(&self) -> Result<Sha256Digest, TypeError> {
        hash_fields(&HashedFields {
            entry_id: &self.entry_id,
            timestamp: format_rfc3339(&self.timestamp),
            component: &self.component,
            component_instance_id: &self.component_instance_id,
            action_type: &self.action_type,
            subject: &self.subject,
            actor: &self.actor,
            payload: &self.payload,
            prev_hash: &self.prev_hash,
            signing_key_id: &self.signing_key_id,
        })
    }

    /// Check the signature over the stored hash.
    pub fn verify_signature(&self, key: &VerifyingKey) -> bool {
        key.verify_digest(&self.hash, &self.signature).is_ok()
    }

    /// One JSON line (no trailing newline).
    pub fn to_line(&self) -> Result<String, LedgerError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn hash_fields(fields: &HashedFields<'_>) -> Result<Sha256Digest, TypeError> {
    Ok(Sha256Digest::of(&canonical_bytes(fields)?))
}

impl ChainLinked for LedgerEntry {
    fn link_hash(&self) -> Sha256Digest {
        self.hash
    }

    fn prev_link(&self) -> Option<Sha256Digest> {
        self.prev_hash
    }

    fn computed_hash(&self) -> Result<Sha256Digest, TypeError> {
        self.compute_hash()
    }
}
