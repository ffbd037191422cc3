use bastion_types::{canonical_bytes, Payload, Sha256Digest, TypeError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Producer-side identity attached to every event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Identity {
    pub hostname: String,
    pub boot_id: String,
    pub agent_version: String,
}

/// Hash-chain fields declared by the producer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Integrity {
    pub hash_sha256: Sha256Digest,
    #[serde(default)]
    pub prev_hash_sha256: Option<Sha256Digest>,
}

/// The event envelope as sent by a producer.
///
/// Timestamps are kept as the producer's strings: the self-hash covers them
/// verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEvent {
    pub event_id: String,
    pub machine_id: String,
    pub component: String,
    pub component_instance_id: String,
    pub observed_at: String,
    pub ingested_at: String,
    pub sequence: u64,
    pub payload: Payload,
    pub identity: Identity,
    pub integrity: Integrity,
}

/// An event that passed (or is being run through) the gate.
#[derive(Clone, Debug, PartialEq)]
pub struct AdmittedEvent {
    pub event: RawEvent,
    /// The envelope exactly as received.
    pub envelope: Value,
    pub observed_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    /// Seconds between observation and ingestion.
    pub arrival_latency_secs: i64,
    pub late_arrival: bool,
}

impl AdmittedEvent {
    pub fn event_id(&self) -> &str {
        &self.event.event_id
    }

    pub fn component_instance_id(&self) -> &str {
        &self.event.component_instance_id
    }

    pub fn sequence(&self) -> u64 {
        self.event.sequence
    }

    pub fn declared_hash(&self) -> Sha256Digest {
        self.event.integrity.hash_sha256
    }

    pub fn prev_hash(&self) -> Option<Sha256Digest> {
        self.event.integrity.prev_hash_sha256
    }
}

/// SHA-256 of the canonical envelope with `integrity.hash_sha256` set to "".
pub fn envelope_hash(envelope: &Value) -> Result<Sha256Digest, TypeError> {
    let mut copy = envelope.clone();
    if let Some(integrity) = copy.get_mut("integrity").and_then(Value::as_object_mut) {
        integrity.insert("hash_sha256".into(), Value::String(String::new()));
    }
    Ok(Sha256Digest::of(&canonical_bytes(&copy)?))
}

/// Fill in `integrity.hash_sha256` so the envelope hashes to itself.
///
/// Producer-side helper, also used by tests and the CLI.
pub fn seal_envelope(envelope: &mut Value) -> Result<Sha256Digest, TypeError> {
    let hash = envelope_hash(envelope)?;
    if let Some(integrity) = envelope.get_mut("integrity").and_then(Value::as_object_mut) {
        integrity.insert("hash_sha256".into(), Value::String(hash.to_hex()));
    }
    Ok(hash)
}
