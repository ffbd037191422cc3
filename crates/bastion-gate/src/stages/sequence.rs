use crate::error::GateError;
use crate::event::AdmittedEvent;
use crate::rejection::RejectionReason;
use crate::stage::{EventIndex, GateStage, StageDecision};

/// Enforces strictly consecutive sequence numbers per component instance.
///
/// Sequence 0 requires an empty history; sequence N > 0 requires the highest
/// admitted sequence to be exactly N-1. A jump past `gap_bound` is flagged as
/// probable corruption rather than an ordinary gap.
pub struct SequenceStage {
    gap_bound: u64,
}

impl SequenceStage {
    pub fn new(gap_bound: u64) -> Self {
        Self { gap_bound }
    }
}

impl GateStage for SequenceStage {
    fn name(&self) -> &str {
        "sequence"
    }

    fn evaluate(
        &self,
        candidate: &AdmittedEvent,
        index: &dyn EventIndex,
    ) -> Result<StageDecision, GateError> {
        let instance = candidate.component_instance_id();
        let sequence = candidate.sequence();
        let max = index.max_sequence(instance);

        // Next expected sequence; 0 for an empty history.
        let expected = max.map_or(0, |m| m.saturating_add(1));
        if sequence == expected {
            return Ok(StageDecision::Pass);
        }

        let detail = match max {
            Some(m) if sequence <= m => {
                if index.hash_at(instance, sequence).is_some() {
                    format!("duplicate sequence {sequence} for component_instance_id {instance}")
                } else {
                    format!(
                        "sequence regression: sequence={sequence} <= max_sequence={m} for component_instance_id={instance}"
                    )
                }
            }
            Some(m) => format!(
                "sequence gap: sequence={sequence}, max_sequence={m} for component_instance_id={instance}"
            ),
            None => format!(
                "sequence={sequence} for component_instance_id={instance} but no previous events (expected 0)"
            ),
        };

        let gap = sequence.saturating_sub(expected);
        if sequence > expected && gap >= self.gap_bound {
            return Ok(StageDecision::Fail {
                reason: RejectionReason::IntegrityViolation,
                detail: format!("{detail}, gap={} (potential corruption)", gap + 1),
                corruption_suspected: true,
            });
        }

        Ok(StageDecision::fail(RejectionReason::IntegrityViolation, detail))
    }
}
