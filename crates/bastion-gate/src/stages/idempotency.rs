use crate::error::GateError;
use crate::event::AdmittedEvent;
use crate::rejection::RejectionReason;
use crate::stage::{EventIndex, GateStage, StageDecision};

/// Rejects an `event_id` that was already admitted.
pub struct IdempotencyStage;

impl GateStage for IdempotencyStage {
    fn name(&self) -> &str {
        "idempotency"
    }

    fn evaluate(
        &self,
        candidate: &AdmittedEvent,
        index: &dyn EventIndex,
    ) -> Result<StageDecision, GateError> {
        if index.contains(candidate.event_id()) {
            return Ok(StageDecision::fail(
                RejectionReason::DuplicateEvent,
                format!("event_id {} already exists", candidate.event_id()),
            ));
        }
        Ok(StageDecision::Pass)
    }
}
