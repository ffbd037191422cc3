//! Ingestion integrity gate for Bastion.
//!
//! Every raw event must pass through the gate before anything downstream may
//! see it. The gate runs five checks in a fixed order and stops at the first
//! failure:
//!
//! 1. schema completeness, timestamp sanity and any registered
//!    [`PayloadContract`]s (`SCHEMA_VIOLATION`)
//! 2. idempotency (`DUPLICATE_EVENT`)
//! 3. sequence monotonicity (`INTEGRITY_VIOLATION`)
//! 4. hash-chain continuity (`INTEGRITY_VIOLATION`)
//! 5. self-hash (`HASH_MISMATCH`)
//!
//! Each rejection is written to the ledger before the call returns.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use bastion_gate::{seal_envelope, GateConfig, InMemoryEventStore, IntegrityGate};
//! use bastion_ledger::InMemoryLedger;
//!
//! let gate = IntegrityGate::with_default_stages(
//!     GateConfig::default(),
//!     Box::new(InMemoryEventStore::new()),
//!     Arc::new(InMemoryLedger::ephemeral()),
//! );
//! let mut envelope = serde_json::json!({
//!     "event_id": "e-0",
//!     "machine_id": "host-1",
//!     "component": "linux-agent",
//!     "component_instance_id": "agent-1",
//!     "observed_at": "2025-01-01T00:00:00Z",
//!     "ingested_at": "2025-01-01T00:00:01Z",
//!     "sequence": 0,
//!     "payload": {},
//!     "identity": {"hostname": "host-1", "boot_id": "b1", "agent_version": "1.0"},
//!     "integrity": {"hash_sha256": "", "prev_hash_sha256": null}
//! });
//! seal_envelope(&mut envelope).unwrap();
//! assert!(gate.admit(&envelope).unwrap().is_accepted());
//! ```

pub mod config;
pub mod corruption;
pub mod error;
pub mod event;
pub mod gate;
pub mod rejection;
pub mod schema;
pub mod stage;
pub mod stages;
pub mod store;

pub use config::GateConfig;
pub use corruption::{CorruptionFinding, CorruptionReport, FindingKind};
pub use error::GateError;
pub use event::{envelope_hash, seal_envelope, AdmittedEvent, Identity, Integrity, RawEvent};
pub use gate::{Admission, IntegrityGate, ACTION_EVENT_REJECTED};
pub use rejection::{Rejection, RejectionReason};
pub use schema::PayloadContract;
pub use stage::{EventIndex, GateStage, StageDecision};
pub use stages::{ChainStage, IdempotencyStage, SelfHashStage, SequenceStage};
pub use store::{EventStore, FileEventStore, InMemoryEventStore, StoredEvent};
