use serde::Serialize;

use crate::config::CorrelationConfig;
use crate::confidence::MIN_CONFIDENCE;
use crate::incident::Incident;
use crate::signal::Signal;
use crate::stage::IncidentStage;

/// Final state of a replayed signal sequence.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReplayOutcome {
    pub stage: IncidentStage,
    pub confidence: f64,
    pub evidence: usize,
    pub contradictions: u32,
}

/// Run `signals` through a single fresh incident, with the same rules the
/// engine applies, and report where it ends up.
///
/// Dedup keys and windows are ignored: every signal lands on one incident.
/// Repeated event ids are skipped.
pub fn replay<'a, I>(signals: I, config: &CorrelationConfig) -> ReplayOutcome
where
    I: IntoIterator<Item = &'a Signal>,
{
    let mut incident: Option<Incident> = None;
    for signal in signals {
        match incident.as_mut() {
            Some(open) if open.contains_event(&signal.event_id) => {}
            Some(open) => {
                open.apply(signal, config);
            }
            None if Incident::would_open(signal, config) => {
                let mut fresh = Incident::open(signal);
                fresh.apply(signal, config);
                incident = Some(fresh);
            }
            None => {}
        }
    }

    match incident {
        Some(i) => ReplayOutcome {
            stage: i.stage,
            confidence: i.confidence,
            evidence: i.evidence.len(),
            contradictions: i.contradictions,
        },
        None => ReplayOutcome {
            stage: IncidentStage::Clean,
            confidence: MIN_CONFIDENCE,
            evidence: 0,
            contradictions: 0,
        },
    }
}
