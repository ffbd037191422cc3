use crate::error::GateError;
use crate::event::AdmittedEvent;
use crate::rejection::RejectionReason;
use crate::stage::{EventIndex, GateStage, StageDecision};

/// Hash-chain continuity: `prev_hash_sha256` is absent exactly for sequence 0
/// and otherwise equals the stored hash of event N-1.
pub struct ChainStage;

impl GateStage for ChainStage {
    fn name(&self) -> &str {
        "chain"
    }

    fn evaluate(
        &self,
        candidate: &AdmittedEvent,
        index: &dyn EventIndex,
    ) -> Result<StageDecision, GateError> {
        let instance = candidate.component_instance_id();
        let sequence = candidate.sequence();

        if sequence == 0 {
            return Ok(match candidate.prev_hash() {
                None => StageDecision::Pass,
                Some(prev) => StageDecision::fail(
                    RejectionReason::IntegrityViolation,
                    format!("first event (sequence=0) must not carry prev_hash_sha256, found {prev}"),
                ),
            });
        }

        let Some(prev) = candidate.prev_hash() else {
            return Ok(StageDecision::fail(
                RejectionReason::IntegrityViolation,
                format!("event with sequence={sequence} must carry prev_hash_sha256"),
            ));
        };

        match index.hash_at(instance, sequence - 1) {
            None => Ok(StageDecision::fail(
                RejectionReason::IntegrityViolation,
                format!(
                    "previous event sequence={} not found for component_instance_id={instance}",
                    sequence - 1
                ),
            )),
            Some(stored) if stored != prev => Ok(StageDecision::fail(
                RejectionReason::IntegrityViolation,
                format!(
                    "hash chain broken: prev_hash_sha256={prev} does not match sequence={} hash={stored}",
                    sequence - 1
                ),
            )),
            Some(_) => Ok(StageDecision::Pass),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{candidate, FakeIndex};
    use bastion_types::Sha256Digest;

    fn index_with(seq: u64, hash: Sha256Digest) -> FakeIndex {
        let mut index = FakeIndex::default();
        index.hashes.insert(seq, hash);
        index
    }

    #[test]
    fn genesis_without_prev_passes() {
        let decision = ChainStage.evaluate(&candidate(0, None), &FakeIndex::default()).unwrap();
        assert!(decision.is_pass());
    }

    #[test]
    fn genesis_with_prev_fails() {
        let prev = Some(Sha256Digest::of(b"x"));
        let decision = ChainStage.evaluate(&candidate(0, prev), &FakeIndex::default()).unwrap();
        assert!(decision.is_fail());
    }

    #[test]
    fn matching_prev_passes() {
        let h = Sha256Digest::of(b"zero");
        let decision = ChainStage.evaluate(&candidate(1, Some(h)), &index_with(0, h)).unwrap();
        assert!(decision.is_pass());
    }

    #[test]
    fn mismatched_prev_fails() {
        let index = index_with(0, Sha256Digest::of(b"zero"));
        let decision = ChainStage
            .evaluate(&candidate(1, Some(Sha256Digest::of(b"other"))), &index)
            .unwrap();
        assert!(matches!(
            decision,
            StageDecision::Fail { reason: RejectionReason::IntegrityViolation, .. }
        ));
    }

    #[test]
    fn missing_prev_fails() {
        let index = index_with(0, Sha256Digest::of(b"zero"));
        assert!(ChainStage.evaluate(&candidate(1, None), &index).unwrap().is_fail());
    }
}
