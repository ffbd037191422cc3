use crate::error::GateError;
use crate::event::{envelope_hash, AdmittedEvent};
use crate::rejection::RejectionReason;
use crate::stage::{EventIndex, GateStage, StageDecision};

/// The declared `hash_sha256` must equal the hash of the envelope itself.
pub struct SelfHashStage;

impl GateStage for SelfHashStage {
    fn name(&self) -> &str {
        "self_hash"
    }

    fn evaluate(
        &self,
        candidate: &AdmittedEvent,
        _index: &dyn EventIndex,
    ) -> Result<StageDecision, GateError> {
        let computed = envelope_hash(&candidate.envelope)
            .map_err(|e| GateError::stage(self.name(), e.to_string()))?;
        let declared = candidate.declared_hash();
        if computed != declared {
            return Ok(StageDecision::fail(
                RejectionReason::HashMismatch,
                format!("declared hash_sha256={declared}, computed={computed}"),
            ));
        }
        Ok(StageDecision::Pass)
    }
}
