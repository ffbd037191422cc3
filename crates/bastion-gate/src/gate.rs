use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use bastion_ledger::{LedgerWriter, NewEntry};
use bastion_types::{Actor, Subject};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::GateConfig;
use crate::corruption::{self, CorruptionReport};
use crate::error::GateError;
use crate::event::AdmittedEvent;
use crate::rejection::{Rejection, RejectionReason};
use crate::schema::{self, PayloadContract};
use crate::stage::{GateStage, StageDecision};
use crate::stages::{ChainStage, IdempotencyStage, SelfHashStage, SequenceStage};
use crate::store::{EventStore, StoredEvent};

/// Ledger action type of rejection audit entries.
pub const ACTION_EVENT_REJECTED: &str = "event_rejected";

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// The gate's verdict on one event.
#[derive(Debug)]
pub enum Admission<T = ()> {
    /// Admitted and persisted; `output` is what the downstream write returned.
    Accepted { event: AdmittedEvent, output: T },
    /// Refused and recorded in the ledger.
    Rejected(Rejection),
}

impl<T> Admission<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(r) => Some(r),
            Self::Accepted { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// IntegrityGate
// ---------------------------------------------------------------------------

/// The ingestion gate: every raw event passes schema validation and then a
/// fail-fast pipeline of stages before it is admitted.
///
/// The whole evaluation, the store insert, and the downstream write run under
/// one lock, so two events for the same component instance can never both see
/// the same predecessor.
pub struct IntegrityGate {
    contracts: Vec<Box<dyn PayloadContract>>,
    stages: Vec<Box<dyn GateStage>>,
    config: GateConfig,
    store: Mutex<Box<dyn EventStore>>,
    ledger: Arc<dyn LedgerWriter>,
}

impl IntegrityGate {
    /// Create a gate with an empty stage pipeline.
    pub fn new(
        config: GateConfig,
        store: Box<dyn EventStore>,
        ledger: Arc<dyn LedgerWriter>,
    ) -> Self {
        Self {
            contracts: Vec::new(),
            stages: Vec::new(),
            config,
            store: Mutex::new(store),
            ledger,
        }
    }

    /// Create a gate with the standard pipeline:
    /// Idempotency -> Sequence -> Chain -> SelfHash
    pub fn with_default_stages(
        config: GateConfig,
        store: Box<dyn EventStore>,
        ledger: Arc<dyn LedgerWriter>,
    ) -> Self {
        let gap_bound = config.sequence_gap_bound;
        let mut gate = Self::new(config, store, ledger);
        gate.add_stage(Box::new(IdempotencyStage));
        gate.add_stage(Box::new(SequenceStage::new(gap_bound)));
        gate.add_stage(Box::new(ChainStage));
        gate.add_stage(Box::new(SelfHashStage));
        gate
    }

    /// Append a stage to the end of the pipeline.
    pub fn add_stage(&mut self, stage: Box<dyn GateStage>) {
        self.stages.push(stage);
    }

    /// Check payloads against `contract` as part of the schema step.
    pub fn with_payload_contract(mut self, contract: Box<dyn PayloadContract>) -> Self {
        self.contracts.push(contract);
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Admit or reject one envelope.
    pub fn admit(&self, envelope: &Value) -> Result<Admission, GateError> {
        self.admit_with(envelope, |_| Ok::<(), Infallible>(()))
    }

    /// Parse one JSON line and admit it. Unparsable input is a schema
    /// violation.
    pub fn admit_line(&self, line: &str) -> Result<Admission, GateError> {
        match serde_json::from_str::<Value>(line) {
            Ok(envelope) => self.admit(&envelope),
            Err(e) => {
                let _store = self.store.lock().map_err(|_| GateError::LockPoisoned)?;
                let rejection = self.reject(
                    &Value::Null,
                    RejectionReason::SchemaViolation,
                    format!("envelope is not valid JSON: {e}"),
                    false,
                )?;
                Ok(Admission::Rejected(rejection))
            }
        }
    }

    /// Admit an envelope and run `downstream` inside the same atomic unit.
    ///
    /// The event is inserted first and `downstream` runs only once the insert
    /// is durable. If `downstream` fails the insert is rolled back and its
    /// error is returned, so the event stays unseen.
    pub fn admit_with<T, E, F>(&self, envelope: &Value, downstream: F) -> Result<Admission<T>, GateError>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce(&AdmittedEvent) -> Result<T, E>,
    {
        let mut store = self.store.lock().map_err(|_| GateError::LockPoisoned)?;

        let checked = schema::validate(envelope, &self.config).and_then(|candidate| {
            for contract in &self.contracts {
                contract
                    .check(&candidate)
                    .map_err(|detail| format!("payload ({}): {detail}", contract.name()))?;
            }
            Ok(candidate)
        });
        let candidate = match checked {
            Ok(candidate) => candidate,
            Err(detail) => {
                let rejection =
                    self.reject(envelope, RejectionReason::SchemaViolation, detail, false)?;
                return Ok(Admission::Rejected(rejection));
            }
        };

        for stage in &self.stages {
            let decision = stage.evaluate(&candidate, store.as_index())?;
            debug!(
                stage = stage.name(),
                event_id = candidate.event_id(),
                passed = decision.is_pass(),
                "gate stage evaluated"
            );

            // Fail-fast: stop on first failure.
            if let StageDecision::Fail {
                reason,
                detail,
                corruption_suspected,
            } = decision
            {
                let rejection = self.reject(envelope, reason, detail, corruption_suspected)?;
                return Ok(Admission::Rejected(rejection));
            }
        }

        store.insert(StoredEvent::from_admitted(&candidate))?;
        let output = match downstream(&candidate) {
            Ok(output) => output,
            Err(e) => {
                if let Err(undo) = store.rollback(candidate.event_id()) {
                    error!(
                        event_id = candidate.event_id(),
                        error = %undo,
                        "downstream failed and the stored event could not be rolled back"
                    );
                    return Err(undo);
                }
                warn!(event_id = candidate.event_id(), error = %e, "downstream failed; event rolled back");
                return Err(GateError::Downstream(Box::new(e)));
            }
        };

        info!(
            event_id = candidate.event_id(),
            component_instance_id = candidate.component_instance_id(),
            sequence = candidate.sequence(),
            late_arrival = candidate.late_arrival,
            "event admitted"
        );
        Ok(Admission::Accepted {
            event: candidate,
            output,
        })
    }

    /// Scan the stored events of one component instance for chain breaks and
    /// sequence gaps. Reports only; never repairs.
    pub fn detect_corruption(&self, component_instance_id: &str) -> Result<CorruptionReport, GateError> {
        let events = {
            let store = self.store.lock().map_err(|_| GateError::LockPoisoned)?;
            store.events_for(component_instance_id)
        };
        let report = corruption::scan(component_instance_id, &events);
        if report.is_corrupted() {
            warn!(
                component_instance_id,
                findings = report.findings.len(),
                "event stream corruption detected"
            );
        }
        Ok(report)
    }

    /// Component instances with admitted events.
    pub fn instances(&self) -> Result<Vec<String>, GateError> {
        Ok(self
            .store
            .lock()
            .map_err(|_| GateError::LockPoisoned)?
            .instances())
    }

    /// Record the rejection in the ledger. Callers hold the store lock.
    fn reject(
        &self,
        envelope: &Value,
        reason: RejectionReason,
        detail: String,
        corruption_suspected: bool,
    ) -> Result<Rejection, GateError> {
        let field = |name: &str| envelope.get(name).cloned().unwrap_or(Value::Null);
        let event_id = envelope
            .get("event_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string();

        let entry = NewEntry::new(
            self.config.component.clone(),
            self.config.component_instance_id.clone(),
            ACTION_EVENT_REJECTED,
            Subject::event(event_id.clone()),
            Actor::component(self.config.component.clone()),
        )
        .field("reason", reason.as_str())
        .field("detail", detail.clone())
        .field("corruption_suspected", corruption_suspected)
        .field("event_id", field("event_id"))
        .field("machine_id", field("machine_id"))
        .field("component_instance_id", field("component_instance_id"))
        .field("sequence", field("sequence"));

        let audit = self.ledger.append(entry)?;

        warn!(
            event_id = %event_id,
            reason = %reason,
            corruption_suspected,
            audit_entry_id = %audit.entry_id,
            detail = %detail,
            "event rejected"
        );
        Ok(Rejection {
            reason,
            detail,
            corruption_suspected,
            audit_entry_id: audit.entry_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::seal_envelope;
    use crate::stage::EventIndex;
    use crate::store::{FileEventStore, InMemoryEventStore};
    use bastion_ledger::{InMemoryLedger, LedgerReader};
    use bastion_types::Sha256Digest;
    use serde_json::json;

    fn envelope(instance: &str, event_id: &str, sequence: u64, prev: Option<Sha256Digest>) -> Value {
        let mut env = json!({
            "event_id": event_id,
            "machine_id": "m-1",
            "component": "linux-agent",
            "component_instance_id": instance,
            "observed_at": "2025-01-01T00:00:00Z",
            "ingested_at": "2025-01-01T00:00:01Z",
            "sequence": sequence,
            "payload": {"evidence_type": "PROCESS_ACTIVITY"},
            "identity": {"hostname": "h", "boot_id": "b", "agent_version": "1.0"},
            "integrity": {"hash_sha256": "", "prev_hash_sha256": prev.map(|p| p.to_hex())}
        });
        seal_envelope(&mut env).unwrap();
        env
    }

    fn gate() -> (IntegrityGate, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::ephemeral());
        let gate = IntegrityGate::with_default_stages(
            GateConfig::default(),
            Box::new(InMemoryEventStore::new()),
            ledger.clone(),
        );
        (gate, ledger)
    }

    fn hash_of(env: &Value) -> Sha256Digest {
        env["integrity"]["hash_sha256"].as_str().unwrap().parse().unwrap()
    }

    fn reason(admission: &Admission) -> RejectionReason {
        admission.rejection().expect("expected rejection").reason
    }

    #[test]
    fn default_pipeline_has_four_stages() {
        let (gate, _) = gate();
        assert_eq!(gate.stage_count(), 4);
    }

    #[test]
    fn sequence_chain_scenario() {
        let (gate, _) = gate();
        let e0 = envelope("A", "e0", 0, None);
        assert!(gate.admit(&e0).unwrap().is_accepted());

        let e1 = envelope("A", "e1", 1, Some(hash_of(&e0)));
        assert!(gate.admit(&e1).unwrap().is_accepted());

        let replayed_seq = envelope("A", "e1-other", 1, Some(hash_of(&e0)));
        let rejected = gate.admit(&replayed_seq).unwrap();
        assert_eq!(reason(&rejected), RejectionReason::IntegrityViolation);

        let e3 = envelope("A", "e3", 3, Some(hash_of(&e1)));
        let rejected = gate.admit(&e3).unwrap();
        assert_eq!(reason(&rejected), RejectionReason::IntegrityViolation);

        let e1_again = gate.admit(&e1).unwrap();
        assert_eq!(reason(&e1_again), RejectionReason::DuplicateEvent);
    }

    #[test]
    fn every_rejection_is_audited() {
        let (gate, ledger) = gate();
        let e0 = envelope("A", "e0", 0, None);
        gate.admit(&e0).unwrap();
        let dup = gate.admit(&e0).unwrap();
        let rejection = dup.rejection().unwrap();

        let audit = ledger.entries_of(ACTION_EVENT_REJECTED).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].entry_id, rejection.audit_entry_id);
        assert_eq!(audit[0].subject, Subject::event("e0"));
        assert_eq!(audit[0].payload["reason"], json!("DUPLICATE_EVENT"));
        assert_eq!(audit[0].payload["component_instance_id"], json!("A"));
    }

    #[test]
    fn admissions_write_nothing_to_ledger() {
        let (gate, ledger) = gate();
        gate.admit(&envelope("A", "e0", 0, None)).unwrap();
        assert_eq!(ledger.entry_count().unwrap(), 0);
    }

    #[test]
    fn schema_checked_before_idempotency() {
        let (gate, _) = gate();
        let e0 = envelope("A", "e0", 0, None);
        gate.admit(&e0).unwrap();

        let mut broken = e0.clone();
        broken.as_object_mut().unwrap().remove("identity");
        assert_eq!(reason(&gate.admit(&broken).unwrap()), RejectionReason::SchemaViolation);
    }

    #[test]
    fn self_hash_checked_last() {
        let (gate, _) = gate();
        let mut e0 = envelope("A", "e0", 0, None);
        e0["payload"]["evidence_type"] = json!("DECEPTION");
        assert_eq!(reason(&gate.admit(&e0).unwrap()), RejectionReason::HashMismatch);
    }

    #[test]
    fn tampered_event_is_not_stored() {
        let (gate, _) = gate();
        let mut e0 = envelope("A", "e0", 0, None);
        e0["payload"]["evidence_type"] = json!("DECEPTION");
        gate.admit(&e0).unwrap();
        // A correct genesis for the same instance is still accepted.
        assert!(gate.admit(&envelope("A", "e0b", 0, None)).unwrap().is_accepted());
    }

    #[test]
    fn invalid_json_line_is_schema_violation() {
        let (gate, ledger) = gate();
        let admission = gate.admit_line("{not json").unwrap();
        assert_eq!(reason(&admission), RejectionReason::SchemaViolation);
        let audit = ledger.entries_of(ACTION_EVENT_REJECTED).unwrap();
        assert_eq!(audit[0].subject, Subject::event("unknown"));
    }

    #[test]
    fn failed_downstream_persists_nothing() {
        let (gate, _) = gate();
        let e0 = envelope("A", "e0", 0, None);
        let err = gate
            .admit_with(&e0, |_| Err::<(), _>(std::io::Error::other("correlation down")))
            .unwrap_err();
        assert!(matches!(err, GateError::Downstream(_)));

        // Nothing was stored, so the same event is admitted on retry.
        assert!(gate.admit(&e0).unwrap().is_accepted());
    }

    #[test]
    fn downstream_output_is_returned() {
        let (gate, _) = gate();
        let e0 = envelope("A", "e0", 0, None);
        let admission = gate
            .admit_with(&e0, |ev| Ok::<_, Infallible>(ev.event_id().len()))
            .unwrap();
        match admission {
            Admission::Accepted { output, .. } => assert_eq!(output, 2),
            Admission::Rejected(r) => panic!("unexpected rejection: {r:?}"),
        }
    }

    #[test]
    fn instances_are_independent() {
        let (gate, _) = gate();
        assert!(gate.admit(&envelope("A", "a0", 0, None)).unwrap().is_accepted());
        assert!(gate.admit(&envelope("B", "b0", 0, None)).unwrap().is_accepted());
        assert_eq!(gate.instances().unwrap(), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn file_store_keeps_idempotency_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let ledger = Arc::new(InMemoryLedger::ephemeral());
        let e0 = envelope("A", "e0", 0, None);
        {
            let gate = IntegrityGate::with_default_stages(
                GateConfig::default(),
                Box::new(FileEventStore::open(&path).unwrap()),
                ledger.clone(),
            );
            assert!(gate.admit(&e0).unwrap().is_accepted());
        }
        let gate = IntegrityGate::with_default_stages(
            GateConfig::default(),
            Box::new(FileEventStore::open(&path).unwrap()),
            ledger,
        );
        assert_eq!(reason(&gate.admit(&e0).unwrap()), RejectionReason::DuplicateEvent);
        let e1 = envelope("A", "e1", 1, Some(hash_of(&e0)));
        assert!(gate.admit(&e1).unwrap().is_accepted());
    }

    #[test]
    fn clean_stream_has_no_corruption() {
        let (gate, _) = gate();
        let e0 = envelope("A", "e0", 0, None);
        gate.admit(&e0).unwrap();
        gate.admit(&envelope("A", "e1", 1, Some(hash_of(&e0)))).unwrap();
        assert!(!gate.detect_corruption("A").unwrap().is_corrupted());
    }

    /// Refuses every insert; reads delegate to an empty memory store.
    struct FullDisk(InMemoryEventStore);

    impl EventIndex for FullDisk {
        fn contains(&self, event_id: &str) -> bool {
            self.0.contains(event_id)
        }

        fn max_sequence(&self, component_instance_id: &str) -> Option<u64> {
            self.0.max_sequence(component_instance_id)
        }

        fn hash_at(&self, component_instance_id: &str, sequence: u64) -> Option<Sha256Digest> {
            self.0.hash_at(component_instance_id, sequence)
        }
    }

    impl EventStore for FullDisk {
        fn as_index(&self) -> &dyn EventIndex {
            self
        }

        fn insert(&mut self, _event: StoredEvent) -> Result<(), GateError> {
            Err(GateError::Store("disk full".into()))
        }

        fn rollback(&mut self, event_id: &str) -> Result<(), GateError> {
            self.0.rollback(event_id)
        }

        fn get(&self, event_id: &str) -> Option<StoredEvent> {
            self.0.get(event_id)
        }

        fn events_for(&self, component_instance_id: &str) -> Vec<StoredEvent> {
            self.0.events_for(component_instance_id)
        }

        fn instances(&self) -> Vec<String> {
            self.0.instances()
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn store_failure_skips_downstream() {
        let ledger = Arc::new(InMemoryLedger::ephemeral());
        let gate = IntegrityGate::with_default_stages(
            GateConfig::default(),
            Box::new(FullDisk(InMemoryEventStore::new())),
            ledger.clone(),
        );
        let mut called = false;
        let err = gate
            .admit_with(&envelope("A", "e0", 0, None), |_| {
                called = true;
                Ok::<_, Infallible>(())
            })
            .unwrap_err();

        assert!(matches!(err, GateError::Store(_)));
        assert!(!called);
        assert!(ledger.read_all().unwrap().is_empty());
    }

    #[test]
    fn downstream_sees_the_event_already_stored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let ledger = Arc::new(InMemoryLedger::ephemeral());
        let gate = IntegrityGate::with_default_stages(
            GateConfig::default(),
            Box::new(FileEventStore::open(&path).unwrap()),
            ledger,
        );
        let e0 = envelope("A", "e0", 0, None);
        let err = gate
            .admit_with(&e0, |ev| {
                let on_disk = std::fs::read_to_string(&path).unwrap();
                assert!(on_disk.contains(ev.event_id()));
                Err::<(), _>(std::io::Error::other("correlation down"))
            })
            .unwrap_err();
        assert!(matches!(err, GateError::Downstream(_)));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
        assert!(gate.admit(&e0).unwrap().is_accepted());
    }

    struct NeedsEvidenceType;

    impl PayloadContract for NeedsEvidenceType {
        fn name(&self) -> &'static str {
            "evidence"
        }

        fn check(&self, event: &AdmittedEvent) -> Result<(), String> {
            match event.event.payload.get("evidence_type") {
                Some(Value::String(_)) => Ok(()),
                _ => Err("evidence_type must be a string".into()),
            }
        }
    }

    #[test]
    fn contract_violation_is_an_audited_schema_rejection() {
        let (gate, ledger) = gate();
        let gate = gate.with_payload_contract(Box::new(NeedsEvidenceType));

        let mut bad = envelope("A", "e0", 0, None);
        bad["payload"] = json!({"evidence_type": 7});
        seal_envelope(&mut bad).unwrap();

        let admission = gate.admit(&bad).unwrap();
        let rejection = admission.rejection().unwrap();
        assert_eq!(rejection.reason, RejectionReason::SchemaViolation);
        assert!(rejection.detail.contains("payload (evidence)"));

        let audit = ledger.entries_of(ACTION_EVENT_REJECTED).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].entry_id, rejection.audit_entry_id);

        // Nothing stored: the corrected event takes the same sequence.
        assert!(gate.admit(&envelope("A", "e0", 0, None)).unwrap().is_accepted());
    }
}
