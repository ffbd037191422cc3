use std::fmt;

use serde::{Deserialize, Serialize};

use crate::incident::EvidenceRef;
use crate::signal::{Activity, Signal, Source, Timing};

/// The fixed set of contradiction rules, in evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContradictionKind {
    /// Host reports suspicious while the network reports benign, or the reverse.
    HostVsNetwork,
    /// Execution was seen but its timing is ordinary.
    ExecutionWithoutTimingAnomaly,
    /// Persistence was seen but nothing is running.
    PersistenceWithoutActivity,
    /// A deception asset fired but no artifact was found.
    DeceptionWithoutArtifact,
    /// An explicit healthy or benign signal against suspicious evidence.
    ExculpatorySignal,
}

impl ContradictionKind {
    pub const ALL: [ContradictionKind; 5] = [
        Self::HostVsNetwork,
        Self::ExecutionWithoutTimingAnomaly,
        Self::PersistenceWithoutActivity,
        Self::DeceptionWithoutArtifact,
        Self::ExculpatorySignal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostVsNetwork => "HOST_VS_NETWORK",
            Self::ExecutionWithoutTimingAnomaly => "EXECUTION_WITHOUT_TIMING_ANOMALY",
            Self::PersistenceWithoutActivity => "PERSISTENCE_WITHOUT_ACTIVITY",
            Self::DeceptionWithoutArtifact => "DECEPTION_WITHOUT_ARTIFACT",
            Self::ExculpatorySignal => "EXCULPATORY_SIGNAL",
        }
    }

    fn matches(self, signal: &Signal, evidence: &[EvidenceRef]) -> bool {
        let facets = &signal.facets;
        match self {
            Self::HostVsNetwork => {
                let opposite = match signal.source {
                    Source::Host => Source::Network,
                    Source::Network => Source::Host,
                    _ => return false,
                };
                facets.is_exculpatory()
                    && evidence.iter().any(|e| {
                        e.source == opposite
                            && e.facets.verdict.is_some_and(|v| v.is_incriminating())
                    })
            }
            Self::ExecutionWithoutTimingAnomaly => {
                facets.timing == Some(Timing::Ordinary)
                    && (facets.execution || evidence.iter().any(|e| e.facets.execution))
            }
            Self::PersistenceWithoutActivity => {
                facets.activity == Some(Activity::None)
                    && (facets.persistence || evidence.iter().any(|e| e.facets.persistence))
            }
            Self::DeceptionWithoutArtifact => {
                facets.artifact_found == Some(false)
                    && (is_deception(signal.source, &signal.evidence_type)
                        || evidence
                            .iter()
                            .any(|e| is_deception(e.source, &e.evidence_type)))
            }
            Self::ExculpatorySignal => {
                facets.is_exculpatory() && evidence.iter().any(EvidenceRef::is_incriminating)
            }
        }
    }
}

impl fmt::Display for ContradictionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_deception(source: Source, evidence_type: &str) -> bool {
    source == Source::Deception || evidence_type == "DECEPTION"
}

/// First rule the signal trips against the incident's evidence, if any.
///
/// A signal cannot contradict an incident with no evidence.
pub fn detect(signal: &Signal, evidence: &[EvidenceRef]) -> Option<ContradictionKind> {
    if evidence.is_empty() {
        return None;
    }
    ContradictionKind::ALL
        .into_iter()
        .find(|rule| rule.matches(signal, evidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_types::Payload;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn signal(component: &str, payload: Value) -> Signal {
        let payload: Payload = serde_json::from_value(payload).unwrap();
        Signal::from_parts("e-new", "m-1", component, Utc::now(), &payload).unwrap()
    }

    fn evidence(component: &str, payload: Value) -> EvidenceRef {
        EvidenceRef::from_signal(&signal(component, payload), 10.0, None)
    }

    #[test]
    fn host_suspicious_vs_network_benign() {
        let existing = [evidence(
            "linux_agent",
            json!({"evidence_type": "PROCESS_ACTIVITY", "threat_level": "SUSPICIOUS"}),
        )];
        let incoming = signal("dpi", json!({"evidence_type": "DPI_FLOW", "threat_level": "BENIGN"}));
        assert_eq!(detect(&incoming, &existing), Some(ContradictionKind::HostVsNetwork));
    }

    #[test]
    fn ordinary_timing_against_execution() {
        let existing = [evidence(
            "linux_agent",
            json!({"evidence_type": "PROCESS_ACTIVITY", "execution": true}),
        )];
        let incoming = signal(
            "linux_agent",
            json!({"evidence_type": "PROCESS_ACTIVITY", "timing": "ORDINARY"}),
        );
        assert_eq!(
            detect(&incoming, &existing),
            Some(ContradictionKind::ExecutionWithoutTimingAnomaly)
        );
    }

    #[test]
    fn no_activity_against_persistence() {
        let existing = [evidence(
            "linux_agent",
            json!({"evidence_type": "FILE_ACTIVITY", "persistence": true}),
        )];
        let incoming = signal(
            "linux_agent",
            json!({"evidence_type": "PROCESS_ACTIVITY", "activity": "NONE"}),
        );
        assert_eq!(
            detect(&incoming, &existing),
            Some(ContradictionKind::PersistenceWithoutActivity)
        );
    }

    #[test]
    fn deception_without_artifact() {
        let existing = [evidence("deception", json!({"evidence_type": "DECEPTION"}))];
        let incoming = signal(
            "linux_agent",
            json!({"evidence_type": "FILE_ACTIVITY", "artifact_found": false}),
        );
        assert_eq!(
            detect(&incoming, &existing),
            Some(ContradictionKind::DeceptionWithoutArtifact)
        );
    }

    #[test]
    fn healthy_status_against_suspicious_evidence() {
        let existing = [evidence("dpi", json!({"evidence_type": "DPI_FLOW"}))];
        let incoming = signal(
            "health_monitor",
            json!({"evidence_type": "HEALTH_STATUS", "status": "HEALTHY"}),
        );
        assert_eq!(detect(&incoming, &existing), Some(ContradictionKind::ExculpatorySignal));
    }

    #[test]
    fn nothing_contradicts_an_empty_incident() {
        let incoming = signal("dpi", json!({"evidence_type": "DPI_FLOW", "verdict": "BENIGN"}));
        assert_eq!(detect(&incoming, &[]), None);
    }

    #[test]
    fn corroborating_signal_is_not_a_contradiction() {
        let existing = [evidence("dpi", json!({"evidence_type": "DPI_FLOW"}))];
        let incoming = signal(
            "linux_agent",
            json!({"evidence_type": "PROCESS_ACTIVITY", "timing": "ANOMALOUS", "execution": true}),
        );
        assert_eq!(detect(&incoming, &existing), None);
    }
}
