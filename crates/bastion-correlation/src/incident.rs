use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::confidence;
use crate::config::CorrelationConfig;
use crate::contradiction::{self, ContradictionKind};
use crate::signal::{Facets, Signal, Source};
use crate::stage::IncidentStage;

/// Weak reference to an event that contributed to an incident.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub event_id: String,
    pub component: String,
    pub evidence_type: String,
    pub source: Source,
    pub facets: Facets,
    #[serde(with = "bastion_types::time::rfc3339")]
    pub observed_at: DateTime<Utc>,
    /// Confidence this evidence added. Zero for contradicting signals.
    pub contribution: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub contradiction: Option<ContradictionKind>,
}

impl EvidenceRef {
    pub fn from_signal(
        signal: &Signal,
        contribution: f64,
        contradiction: Option<ContradictionKind>,
    ) -> Self {
        Self {
            event_id: signal.event_id.clone(),
            component: signal.component.clone(),
            evidence_type: signal.evidence_type.clone(),
            source: signal.source,
            facets: signal.facets.clone(),
            observed_at: signal.observed_at,
            contribution,
            contradiction,
        }
    }

    /// Evidence pointing toward an incident rather than away from one.
    pub fn is_incriminating(&self) -> bool {
        self.contradiction.is_none()
            && (self.contribution > 0.0 || self.facets.verdict.is_some_and(|v| v.is_incriminating()))
    }
}

/// What applying one signal did to an incident.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Transition {
    /// Evidence was added; `from == to` when the stage held.
    Evidence {
        from: IncidentStage,
        to: IncidentStage,
        contribution: f64,
        confidence: f64,
    },
    /// A contradiction rule fired and confidence decayed.
    Contradiction {
        kind: ContradictionKind,
        stage: IncidentStage,
        before: f64,
        after: f64,
    },
}

impl Transition {
    pub fn stage_changed(&self) -> bool {
        matches!(self, Self::Evidence { from, to, .. } if from != to)
    }
}

/// A correlated incident. Owned by the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: Uuid,
    pub stage: IncidentStage,
    pub confidence: f64,
    pub dedup_key: String,
    pub machine_id: String,
    pub evidence: Vec<EvidenceRef>,
    #[serde(with = "bastion_types::time::rfc3339")]
    pub first_observed_at: DateTime<Utc>,
    #[serde(with = "bastion_types::time::rfc3339")]
    pub last_observed_at: DateTime<Utc>,
    /// Number of contradiction decays applied.
    pub contradictions: u32,
}

impl Incident {
    /// A CLEAN incident anchored at the signal's observation time.
    pub fn open(signal: &Signal) -> Self {
        Self {
            incident_id: Uuid::new_v4(),
            stage: IncidentStage::Clean,
            confidence: confidence::MIN_CONFIDENCE,
            dedup_key: signal.dedup_key(),
            machine_id: signal.machine_id.clone(),
            evidence: Vec::new(),
            first_observed_at: signal.observed_at,
            last_observed_at: signal.observed_at,
            contradictions: 0,
        }
    }

    /// Whether `signal` would move a fresh incident out of CLEAN.
    pub fn would_open(signal: &Signal, config: &CorrelationConfig) -> bool {
        !signal.facets.is_exculpatory()
            && confidence::signal_confidence(config, &signal.evidence_type) > 0.0
    }

    pub fn contains_event(&self, event_id: &str) -> bool {
        self.evidence.iter().any(|e| e.event_id == event_id)
    }

    /// Apply one signal: detect contradictions, update confidence, and step
    /// the stage at most once.
    pub fn apply(&mut self, signal: &Signal, config: &CorrelationConfig) -> Transition {
        let frozen = config.freeze_confidence_when_confirmed && self.stage.is_terminal();

        let transition = match contradiction::detect(signal, &self.evidence) {
            Some(kind) => {
                let before = self.confidence;
                if !frozen {
                    self.confidence = confidence::decay(before, config.contradiction_decay);
                }
                self.contradictions += 1;
                self.evidence.push(EvidenceRef::from_signal(signal, 0.0, Some(kind)));
                Transition::Contradiction {
                    kind,
                    stage: self.stage,
                    before,
                    after: self.confidence,
                }
            }
            None => {
                let contribution = if frozen || signal.facets.is_exculpatory() {
                    0.0
                } else {
                    confidence::signal_confidence(config, &signal.evidence_type)
                };
                let from = self.stage;
                self.confidence = confidence::accumulate(self.confidence, contribution);
                self.stage = from.step_toward(confidence::stage_for(self.confidence, config));
                self.evidence
                    .push(EvidenceRef::from_signal(signal, contribution, None));
                Transition::Evidence {
                    from,
                    to: self.stage,
                    contribution,
                    confidence: self.confidence,
                }
            }
        };

        self.first_observed_at = self.first_observed_at.min(signal.observed_at);
        self.last_observed_at = self.last_observed_at.max(signal.observed_at);
        transition
    }
}
