use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use bastion_gate::AdmittedEvent;
use bastion_ledger::{LedgerEntry, LedgerWriter, NewEntry};
use bastion_types::time::format_rfc3339;
use bastion_types::{Actor, Subject};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CorrelationConfig;
use crate::dedup;
use crate::error::CorrelationError;
use crate::incident::{Incident, Transition};
use crate::signal::Signal;
use crate::stage::IncidentStage;

pub const ACTION_INCIDENT_CREATED: &str = "incident_created";
pub const ACTION_EVIDENCE_ADDED: &str = "incident_evidence_added";
pub const ACTION_STAGE_ADVANCED: &str = "incident_stage_advanced";
pub const ACTION_CONTRADICTION_APPLIED: &str = "incident_contradiction_applied";

/// Result of correlating one signal.
#[derive(Clone, Debug, PartialEq)]
pub enum Correlation {
    /// No incident exists and the signal would not open one.
    Ignored,
    /// The event is already part of this incident.
    Duplicate { incident_id: Uuid },
    /// A new incident was opened.
    Created {
        incident_id: Uuid,
        stage: IncidentStage,
        confidence: f64,
    },
    /// An existing incident absorbed the signal.
    Updated {
        incident_id: Uuid,
        transition: Transition,
    },
}

impl Correlation {
    pub fn incident_id(&self) -> Option<Uuid> {
        match self {
            Self::Ignored => None,
            Self::Duplicate { incident_id }
            | Self::Created { incident_id, .. }
            | Self::Updated { incident_id, .. } => Some(*incident_id),
        }
    }
}

/// Incidents sharing one dedup key, oldest first.
type Shard = Arc<Mutex<Vec<Incident>>>;

/// Turns signals into incidents and records every change in the ledger.
///
/// Updates for one dedup key are serialized; different keys proceed in
/// parallel.
pub struct CorrelationEngine {
    config: CorrelationConfig,
    ledger: Arc<dyn LedgerWriter>,
    shards: RwLock<HashMap<String, Shard>>,
}

impl CorrelationEngine {
    pub fn new(
        config: CorrelationConfig,
        ledger: Arc<dyn LedgerWriter>,
    ) -> Result<Self, CorrelationError> {
        config.validate()?;
        Ok(Self {
            config,
            ledger,
            shards: RwLock::new(HashMap::new()),
        })
    }

    /// Rebuild an engine from the incident entries of an existing ledger.
    ///
    /// `signal_for` returns the signal of an event named in the trail;
    /// events it cannot supply are skipped. Each incident keeps its recorded
    /// id, and its stage and confidence are the last values the ledger holds.
    pub fn restore<F>(
        config: CorrelationConfig,
        ledger: Arc<dyn LedgerWriter>,
        entries: &[LedgerEntry],
        mut signal_for: F,
    ) -> Result<Self, CorrelationError>
    where
        F: FnMut(&str) -> Option<Signal>,
    {
        let engine = Self::new(config, ledger)?;

        let mut order = Vec::new();
        let mut trails: HashMap<Uuid, RecordedTrail> = HashMap::new();
        for entry in entries {
            let action = entry.action_type.as_str();
            let text = |key: &str| entry.payload.get(key).and_then(Value::as_str);
            let number = |key: &str| entry.payload.get(key).and_then(Value::as_f64);
            let stage = |key: &str| text(key).and_then(IncidentStage::parse);
            let Some(incident_id) = text("incident_id").and_then(|s| Uuid::parse_str(s).ok()) else {
                continue;
            };

            if action == ACTION_INCIDENT_CREATED && !trails.contains_key(&incident_id) {
                order.push(incident_id);
                trails.insert(incident_id, RecordedTrail::default());
            }
            let Some(trail) = trails.get_mut(&incident_id) else {
                continue;
            };
            let event_id = text("event_id").unwrap_or_default().to_string();
            match action {
                ACTION_INCIDENT_CREATED => {
                    trail.events.push(event_id);
                    trail.stage = stage("stage");
                    trail.confidence = number("confidence");
                }
                ACTION_EVIDENCE_ADDED => {
                    trail.events.push(event_id);
                    trail.confidence = number("confidence").or(trail.confidence);
                }
                ACTION_STAGE_ADVANCED => {
                    trail.stage = stage("to_stage").or(trail.stage);
                }
                ACTION_CONTRADICTION_APPLIED => {
                    trail.events.push(event_id);
                    trail.confidence = number("confidence_after").or(trail.confidence);
                }
                _ => {}
            }
        }

        let mut restored = 0usize;
        for incident_id in order {
            let Some(trail) = trails.remove(&incident_id) else {
                continue;
            };
            let mut signals = Vec::with_capacity(trail.events.len());
            for event_id in &trail.events {
                match signal_for(event_id) {
                    Some(signal) => signals.push(signal),
                    None => warn!(%incident_id, event_id = %event_id, "event missing from store; skipped"),
                }
            }
            let Some(first) = signals.first() else {
                warn!(%incident_id, "no events left for incident; not restored");
                continue;
            };

            let mut incident = Incident::open(first);
            incident.incident_id = incident_id;
            for signal in &signals {
                incident.apply(signal, &engine.config);
            }
            if let Some(stage) = trail.stage {
                incident.stage = stage;
            }
            if let Some(confidence) = trail.confidence {
                incident.confidence = confidence;
            }

            let shard = engine.shard(&incident.dedup_key)?;
            shard
                .lock()
                .map_err(|_| CorrelationError::LockPoisoned)?
                .push(incident);
            restored += 1;
        }

        info!(incidents = restored, "correlation state restored from ledger");
        Ok(engine)
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Correlate an event the gate has admitted.
    pub fn correlate_event(&self, event: &AdmittedEvent) -> Result<Correlation, CorrelationError> {
        self.correlate(&Signal::from_admitted(event)?)
    }

    /// Correlate one signal.
    ///
    /// The incident is only updated once every ledger entry for the change
    /// has been written.
    pub fn correlate(&self, signal: &Signal) -> Result<Correlation, CorrelationError> {
        let key = signal.dedup_key();
        let shard = self.shard(&key)?;
        let mut incidents = shard.lock().map_err(|_| CorrelationError::LockPoisoned)?;

        if let Some(existing) = incidents.iter().find(|i| i.contains_event(&signal.event_id)) {
            debug!(
                event_id = %signal.event_id,
                incident_id = %existing.incident_id,
                "event already correlated"
            );
            return Ok(Correlation::Duplicate {
                incident_id: existing.incident_id,
            });
        }

        let window = self.config.dedup_window;
        let open = incidents
            .iter()
            .rposition(|i| dedup::within_window(signal.observed_at, i.first_observed_at, window));

        match open {
            Some(index) => {
                let mut updated = incidents[index].clone();
                let transition = updated.apply(signal, &self.config);
                let incident_id = updated.incident_id;

                if let Transition::Evidence { from, to, .. } = transition {
                    // Two facts: the evidence lands even if the stage entry fails.
                    self.record_evidence(&updated, signal, &transition)?;
                    if from != to {
                        let mut evidence_only = updated.clone();
                        evidence_only.stage = from;
                        incidents[index] = evidence_only;
                        self.record_stage_advance(&updated, signal, &transition)?;
                    }
                } else {
                    self.record_contradiction(&updated, signal, &transition)?;
                }
                incidents[index] = updated;
                Ok(Correlation::Updated {
                    incident_id,
                    transition,
                })
            }
            None if Incident::would_open(signal, &self.config) => {
                let mut incident = Incident::open(signal);
                incident.apply(signal, &self.config);
                self.record_created(&incident, signal)?;

                info!(
                    incident_id = %incident.incident_id,
                    dedup_key = %incident.dedup_key,
                    stage = %incident.stage,
                    confidence = incident.confidence,
                    "incident created"
                );
                let created = Correlation::Created {
                    incident_id: incident.incident_id,
                    stage: incident.stage,
                    confidence: incident.confidence,
                };
                incidents.push(incident);
                Ok(created)
            }
            None => {
                debug!(event_id = %signal.event_id, dedup_key = %key, "signal ignored");
                Ok(Correlation::Ignored)
            }
        }
    }

    /// Snapshot of one incident.
    pub fn incident(&self, incident_id: &Uuid) -> Result<Option<Incident>, CorrelationError> {
        Ok(self
            .incidents()?
            .into_iter()
            .find(|i| &i.incident_id == incident_id))
    }

    /// Snapshot of every incident, ordered by first observation.
    pub fn incidents(&self) -> Result<Vec<Incident>, CorrelationError> {
        let shards: Vec<Shard> = self
            .shards
            .read()
            .map_err(|_| CorrelationError::LockPoisoned)?
            .values()
            .cloned()
            .collect();

        let mut out = Vec::new();
        for shard in shards {
            let incidents = shard.lock().map_err(|_| CorrelationError::LockPoisoned)?;
            out.extend(incidents.iter().cloned());
        }
        out.sort_by(|a, b| {
            a.first_observed_at
                .cmp(&b.first_observed_at)
                .then(a.incident_id.cmp(&b.incident_id))
        });
        Ok(out)
    }

    fn shard(&self, key: &str) -> Result<Shard, CorrelationError> {
        if let Some(shard) = self
            .shards
            .read()
            .map_err(|_| CorrelationError::LockPoisoned)?
            .get(key)
        {
            return Ok(shard.clone());
        }
        let mut shards = self.shards.write().map_err(|_| CorrelationError::LockPoisoned)?;
        Ok(shards.entry(key.to_string()).or_default().clone())
    }

    fn entry(&self, action_type: &str, incident: &Incident, signal: &Signal) -> NewEntry {
        NewEntry::new(
            self.config.component.clone(),
            self.config.component_instance_id.clone(),
            action_type,
            Subject::incident(incident.incident_id.to_string()),
            Actor::component(self.config.component.clone()),
        )
        .field("incident_id", incident.incident_id.to_string())
        .field("event_id", signal.event_id.clone())
        .field("evidence_type", signal.evidence_type.clone())
    }

    fn record_created(&self, incident: &Incident, signal: &Signal) -> Result<(), CorrelationError> {
        self.ledger.append(
            self.entry(ACTION_INCIDENT_CREATED, incident, signal)
                .field("dedup_key", incident.dedup_key.clone())
                .field("machine_id", incident.machine_id.clone())
                .field("stage", incident.stage.as_str())
                .field("confidence", incident.confidence)
                .field("first_observed_at", format_rfc3339(&incident.first_observed_at)),
        )?;
        Ok(())
    }

    fn record_evidence(
        &self,
        incident: &Incident,
        signal: &Signal,
        transition: &Transition,
    ) -> Result<(), CorrelationError> {
        if let Transition::Evidence {
            from,
            contribution,
            confidence,
            ..
        } = *transition
        {
            self.ledger.append(
                self.entry(ACTION_EVIDENCE_ADDED, incident, signal)
                    .field("contribution", contribution)
                    .field("confidence", confidence)
                    .field("stage", from.as_str())
                    .field("evidence_count", incident.evidence.len()),
            )?;
            debug!(
                incident_id = %incident.incident_id,
                event_id = %signal.event_id,
                contribution,
                confidence,
                "evidence added"
            );
        }
        Ok(())
    }

    fn record_stage_advance(
        &self,
        incident: &Incident,
        signal: &Signal,
        transition: &Transition,
    ) -> Result<(), CorrelationError> {
        if let Transition::Evidence {
            from,
            to,
            confidence,
            ..
        } = *transition
        {
            self.ledger.append(
                self.entry(ACTION_STAGE_ADVANCED, incident, signal)
                    .field("from_stage", from.as_str())
                    .field("to_stage", to.as_str())
                    .field("confidence", confidence),
            )?;
            info!(
                incident_id = %incident.incident_id,
                from = %from,
                to = %to,
                confidence,
                "incident stage advanced"
            );
        }
        Ok(())
    }

    fn record_contradiction(
        &self,
        incident: &Incident,
        signal: &Signal,
        transition: &Transition,
    ) -> Result<(), CorrelationError> {
        if let Transition::Contradiction {
            kind,
            stage,
            before,
            after,
        } = *transition
        {
            self.ledger.append(
                self.entry(ACTION_CONTRADICTION_APPLIED, incident, signal)
                    .field("contradiction", kind.as_str())
                    .field("confidence_before", before)
                    .field("confidence_after", after)
                    .field("stage", stage.as_str()),
            )?;
            warn!(
                incident_id = %incident.incident_id,
                event_id = %signal.event_id,
                contradiction = %kind,
                confidence_before = before,
                confidence_after = after,
                "contradiction applied"
            );
        }
        Ok(())
    }
}

/// What the ledger says about one incident, in order.
#[derive(Debug, Default)]
struct RecordedTrail {
    events: Vec<String>,
    stage: Option<IncidentStage>,
    confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_ledger::{InMemoryLedger, LedgerReader};
    use bastion_types::Payload;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::{json, Value};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn signal(event_id: &str, offset_secs: i64, component: &str, payload: Value) -> Signal {
        let payload: Payload = serde_json::from_value(payload).unwrap();
        Signal::from_parts(
            event_id,
            "m-1",
            component,
            t0() + Duration::seconds(offset_secs),
            &payload,
        )
        .unwrap()
    }

    fn engine() -> (CorrelationEngine, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::ephemeral());
        let engine = CorrelationEngine::new(CorrelationConfig::default(), ledger.clone()).unwrap();
        (engine, ledger)
    }

    #[test]
    fn invalid_config_is_rejected() {
        let ledger = Arc::new(InMemoryLedger::ephemeral());
        let config = CorrelationConfig::default().with_contradiction_decay(2.0);
        assert!(CorrelationEngine::new(config, ledger).is_err());
    }

    #[test]
    fn confidence_scenario_with_contradiction() {
        let (engine, ledger) = engine();

        let created = engine
            .correlate(&signal("e1", 0, "dpi", json!({"evidence_type": "DPI_FLOW"})))
            .unwrap();
        let incident_id = created.incident_id().unwrap();
        assert_eq!(
            created,
            Correlation::Created {
                incident_id,
                stage: IncidentStage::Suspicious,
                confidence: 20.0,
            }
        );

        let second = engine
            .correlate(&signal(
                "e2",
                10,
                "linux_agent",
                json!({"evidence_type": "PROCESS_ACTIVITY"}),
            ))
            .unwrap();
        assert!(matches!(
            second,
            Correlation::Updated {
                transition: Transition::Evidence {
                    to: IncidentStage::Probable,
                    ..
                },
                ..
            }
        ));

        engine
            .correlate(&signal(
                "e3",
                20,
                "health_monitor",
                json!({"evidence_type": "HEALTH_STATUS", "status": "HEALTHY"}),
            ))
            .unwrap();

        let incident = engine.incident(&incident_id).unwrap().unwrap();
        assert!((incident.confidence - 31.5).abs() < 1e-9);
        assert_eq!(incident.stage, IncidentStage::Probable);

        let actions: Vec<String> = ledger
            .read_all()
            .unwrap()
            .into_iter()
            .map(|e| e.action_type)
            .collect();
        assert_eq!(
            actions,
            vec![
                ACTION_INCIDENT_CREATED,
                ACTION_EVIDENCE_ADDED,
                ACTION_STAGE_ADVANCED,
                ACTION_CONTRADICTION_APPLIED,
            ]
        );
    }

    #[test]
    fn same_machine_and_process_within_window_dedups() {
        let (engine, _) = engine();
        let payload = json!({"evidence_type": "PROCESS_ACTIVITY", "process_id": "777"});
        let a = engine.correlate(&signal("e1", 0, "linux_agent", payload.clone())).unwrap();
        let b = engine.correlate(&signal("e2", 1800, "linux_agent", payload)).unwrap();

        assert_eq!(a.incident_id(), b.incident_id());
        let incidents = engine.incidents().unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].evidence.len(), 2);
        assert_eq!(incidents[0].dedup_key, "m-1:777");
    }

    #[test]
    fn different_process_opens_separate_incident() {
        let (engine, _) = engine();
        engine
            .correlate(&signal("e1", 0, "linux_agent", json!({"evidence_type": "PROCESS_ACTIVITY", "process_id": "1"})))
            .unwrap();
        engine
            .correlate(&signal("e2", 0, "linux_agent", json!({"evidence_type": "PROCESS_ACTIVITY", "process_id": "2"})))
            .unwrap();
        assert_eq!(engine.incidents().unwrap().len(), 2);
    }

    #[test]
    fn observation_outside_window_opens_new_incident() {
        let (engine, _) = engine();
        let payload = json!({"evidence_type": "DPI_FLOW"});
        let a = engine.correlate(&signal("e1", 0, "dpi", payload.clone())).unwrap();
        let b = engine.correlate(&signal("e2", 3601, "dpi", payload)).unwrap();
        assert_ne!(a.incident_id(), b.incident_id());
        assert_eq!(engine.incidents().unwrap().len(), 2);
    }

    #[test]
    fn repeated_event_is_a_no_op() {
        let (engine, ledger) = engine();
        let s = signal("e1", 0, "dpi", json!({"evidence_type": "DPI_FLOW"}));
        let first = engine.correlate(&s).unwrap();
        let entries = ledger.entry_count().unwrap();

        let again = engine.correlate(&s).unwrap();
        assert_eq!(
            again,
            Correlation::Duplicate {
                incident_id: first.incident_id().unwrap()
            }
        );
        assert_eq!(ledger.entry_count().unwrap(), entries);
        assert_eq!(engine.incidents().unwrap()[0].confidence, 20.0);
    }

    #[test]
    fn benign_signal_without_incident_is_ignored() {
        let (engine, ledger) = engine();
        let outcome = engine
            .correlate(&signal("e1", 0, "dpi", json!({"evidence_type": "DPI_FLOW", "verdict": "BENIGN"})))
            .unwrap();
        assert_eq!(outcome, Correlation::Ignored);
        assert!(engine.incidents().unwrap().is_empty());
        assert_eq!(ledger.entry_count().unwrap(), 0);
    }

    #[test]
    fn every_entry_names_the_incident() {
        let (engine, ledger) = engine();
        let created = engine
            .correlate(&signal("e1", 0, "dpi", json!({"evidence_type": "DPI_FLOW"})))
            .unwrap();
        let id = created.incident_id().unwrap().to_string();
        for entry in ledger.read_all().unwrap() {
            assert_eq!(entry.subject, Subject::incident(id.clone()));
            assert_eq!(entry.component, "correlation-engine");
        }
    }

    #[test]
    fn parallel_keys_do_not_interfere() {
        let (engine, _) = engine();
        let engine = Arc::new(engine);
        let handles: Vec<_> = (0..4)
            .map(|pid| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for n in 0..5 {
                        let s = signal(
                            &format!("e-{pid}-{n}"),
                            n,
                            "linux_agent",
                            json!({"evidence_type": "FILE_ACTIVITY", "process_id": pid.to_string()}),
                        );
                        engine.correlate(&s).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let incidents = engine.incidents().unwrap();
        assert_eq!(incidents.len(), 4);
        assert!(incidents.iter().all(|i| i.evidence.len() == 5));
        assert!(incidents.iter().all(|i| i.confidence == 75.0));
    }

    /// Accepts `budget` appends, then fails every write.
    struct FailingLedger {
        inner: InMemoryLedger,
        budget: std::sync::atomic::AtomicUsize,
    }

    impl FailingLedger {
        fn after(budget: usize) -> Self {
            Self {
                inner: InMemoryLedger::ephemeral(),
                budget: std::sync::atomic::AtomicUsize::new(budget),
            }
        }
    }

    impl LedgerWriter for FailingLedger {
        fn append(&self, entry: NewEntry) -> Result<LedgerEntry, bastion_ledger::LedgerError> {
            use std::sync::atomic::Ordering;
            if self
                .budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                return Err(bastion_ledger::LedgerError::Write {
                    path: "ledger.jsonl".into(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.append(entry)
        }
    }

    #[test]
    fn failed_stage_entry_leaves_recorded_evidence_only() {
        let ledger = Arc::new(FailingLedger::after(2));
        let engine = CorrelationEngine::new(CorrelationConfig::default(), ledger.clone()).unwrap();
        engine
            .correlate(&signal("e1", 0, "dpi", json!({"evidence_type": "DPI_FLOW"})))
            .unwrap();

        let err = engine
            .correlate(&signal("e2", 10, "linux_agent", json!({"evidence_type": "PROCESS_ACTIVITY"})))
            .unwrap_err();
        assert!(matches!(err, CorrelationError::Ledger(_)));

        let recorded = ledger.inner.read_all().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1].action_type, ACTION_EVIDENCE_ADDED);

        let incident = &engine.incidents().unwrap()[0];
        assert_eq!(incident.evidence.len(), 2);
        assert_eq!(incident.confidence, 35.0);
        assert_eq!(incident.stage, IncidentStage::Suspicious);
    }

    #[test]
    fn failed_evidence_entry_changes_nothing() {
        let ledger = Arc::new(FailingLedger::after(1));
        let engine = CorrelationEngine::new(CorrelationConfig::default(), ledger.clone()).unwrap();
        engine
            .correlate(&signal("e1", 0, "dpi", json!({"evidence_type": "DPI_FLOW"})))
            .unwrap();
        assert!(engine
            .correlate(&signal("e2", 10, "dpi", json!({"evidence_type": "DPI_FLOW"})))
            .is_err());

        let incident = &engine.incidents().unwrap()[0];
        assert_eq!(incident.evidence.len(), 1);
        assert_eq!(incident.confidence, 20.0);
    }

    #[test]
    fn restored_engine_continues_the_same_incident() {
        let (first, ledger) = engine();
        let payload = json!({"evidence_type": "FILE_ACTIVITY", "process_id": "9001"});
        let seen = [
            signal("e1", 0, "linux_agent", payload.clone()),
            signal("e2", 600, "linux_agent", payload.clone()),
            signal("e3", 900, "dpi", json!({"evidence_type": "DPI_FLOW", "process_id": "9001"})),
        ];
        for s in &seen {
            first.correlate(s).unwrap();
        }
        let before = first.incidents().unwrap();

        let by_id: HashMap<String, Signal> =
            seen.iter().map(|s| (s.event_id.clone(), s.clone())).collect();
        let restored = CorrelationEngine::restore(
            CorrelationConfig::default(),
            ledger.clone(),
            &ledger.read_all().unwrap(),
            |id| by_id.get(id).cloned(),
        )
        .unwrap();

        let after = restored.incidents().unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].incident_id, before[0].incident_id);
        assert_eq!(after[0].stage, before[0].stage);
        assert_eq!(after[0].confidence, before[0].confidence);
        assert_eq!(after[0].evidence.len(), 3);

        assert_eq!(
            restored.correlate(&seen[0]).unwrap(),
            Correlation::Duplicate {
                incident_id: before[0].incident_id
            }
        );
        let next = restored
            .correlate(&signal("e4", 1200, "linux_agent", payload))
            .unwrap();
        assert_eq!(next.incident_id(), Some(before[0].incident_id));
    }

    #[test]
    fn restore_skips_events_it_cannot_find() {
        let (first, ledger) = engine();
        first
            .correlate(&signal("e1", 0, "dpi", json!({"evidence_type": "DPI_FLOW"})))
            .unwrap();
        let restored = CorrelationEngine::restore(
            CorrelationConfig::default(),
            ledger.clone(),
            &ledger.read_all().unwrap(),
            |_| None,
        )
        .unwrap();
        assert!(restored.incidents().unwrap().is_empty());
    }
}
