//! Offline corruption scan of a stored event stream.

use bastion_crypto::{ChainError, HashChainVerifier};
use serde::Serialize;

use crate::store::StoredEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    SequenceGap,
    ChainBreak,
    HashMismatch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CorruptionFinding {
    pub kind: FindingKind,
    pub sequence: u64,
    pub event_id: String,
    pub detail: String,
}

/// What a scan found. Empty findings means the stream is intact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CorruptionReport {
    pub component_instance_id: String,
    pub events_checked: usize,
    pub findings: Vec<CorruptionFinding>,
}

impl CorruptionReport {
    pub fn is_corrupted(&self) -> bool {
        !self.findings.is_empty()
    }
}

/// Scan events (sorted by sequence) for gaps and chain breaks.
pub fn scan(component_instance_id: &str, events: &[StoredEvent]) -> CorruptionReport {
    let mut findings = Vec::new();

    if let Some(first) = events.first() {
        if first.sequence != 0 {
            findings.push(CorruptionFinding {
                kind: FindingKind::SequenceGap,
                sequence: first.sequence,
                event_id: first.event_id.clone(),
                detail: format!("stream starts at sequence={} instead of 0", first.sequence),
            });
        }
    }
    for pair in events.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.sequence != prev.sequence + 1 {
            findings.push(CorruptionFinding {
                kind: FindingKind::SequenceGap,
                sequence: prev.sequence,
                event_id: next.event_id.clone(),
                detail: format!(
                    "sequence gap: sequence={}, next_sequence={}, gap={}",
                    prev.sequence,
                    next.sequence,
                    next.sequence.saturating_sub(prev.sequence + 1)
                ),
            });
        }
    }

    let anchor = events.first().filter(|e| e.sequence != 0).and_then(|e| e.prev_hash);
    if let Err(err) = HashChainVerifier::verify_from(events, anchor) {
        let event = &events[err.index()];
        let kind = match err {
            ChainError::HashMismatch { .. } | ChainError::Unencodable { .. } => {
                FindingKind::HashMismatch
            }
            _ => FindingKind::ChainBreak,
        };
        findings.push(CorruptionFinding {
            kind,
            sequence: event.sequence,
            event_id: event.event_id.clone(),
            detail: err.to_string(),
        });
    }

    CorruptionReport {
        component_instance_id: component_instance_id.to_string(),
        events_checked: events.len(),
        findings,
    }
}
