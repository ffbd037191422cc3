//! Incident correlation state machine for Bastion.
//!
//! Admitted events become [`Signal`]s. Each signal either opens an incident,
//! adds weighted evidence to an existing one, or (when it conflicts with the
//! evidence already gathered) decays its confidence. Incident stages move
//! CLEAN -> SUSPICIOUS -> PROBABLE -> CONFIRMED one step at a time and never
//! move back. Every change is written to the ledger before it is applied.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use bastion_correlation::{CorrelationConfig, CorrelationEngine, IncidentStage, Signal};
//! use bastion_ledger::InMemoryLedger;
//!
//! let engine = CorrelationEngine::new(
//!     CorrelationConfig::default(),
//!     Arc::new(InMemoryLedger::ephemeral()),
//! )
//! .unwrap();
//! let payload = serde_json::from_value(serde_json::json!({"evidence_type": "DPI_FLOW"})).unwrap();
//! let signal = Signal::from_parts("e-1", "host-1", "dpi", chrono::Utc::now(), &payload).unwrap();
//! engine.correlate(&signal).unwrap();
//! assert_eq!(engine.incidents().unwrap()[0].stage, IncidentStage::Suspicious);
//! ```

pub mod confidence;
pub mod config;
pub mod contradiction;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod incident;
pub mod replay;
pub mod signal;
pub mod stage;

pub use config::CorrelationConfig;
pub use contradiction::ContradictionKind;
pub use engine::{
    Correlation, CorrelationEngine, ACTION_CONTRADICTION_APPLIED, ACTION_EVIDENCE_ADDED,
    ACTION_INCIDENT_CREATED, ACTION_STAGE_ADVANCED,
};
pub use error::CorrelationError;
pub use incident::{EvidenceRef, Incident, Transition};
pub use replay::{replay, ReplayOutcome};
pub use signal::{
    Activity, Facets, Signal, SignalContract, Source, Timing, Verdict, DEFAULT_EVIDENCE_TYPE,
};
pub use stage::IncidentStage;
