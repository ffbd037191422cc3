use bastion_types::Sha256Digest;

use crate::error::GateError;
use crate::event::AdmittedEvent;
use crate::rejection::RejectionReason;

// ---------------------------------------------------------------------------
// StageDecision
// ---------------------------------------------------------------------------

/// The outcome of a single gate stage evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageDecision {
    /// The stage passed; proceed to the next stage.
    Pass,
    /// The stage failed; the event is rejected.
    Fail {
        reason: RejectionReason,
        detail: String,
        corruption_suspected: bool,
    },
}

impl StageDecision {
    pub fn fail(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self::Fail {
            reason,
            detail: detail.into(),
            corruption_suspected: false,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }
}

// ---------------------------------------------------------------------------
// EventIndex
// ---------------------------------------------------------------------------

/// Read view over previously admitted events that the stages consult.
pub trait EventIndex {
    fn contains(&self, event_id: &str) -> bool;

    /// Highest admitted sequence for a component instance.
    fn max_sequence(&self, component_instance_id: &str) -> Option<u64>;

    /// Declared hash of the admitted event at `sequence`.
    fn hash_at(&self, component_instance_id: &str, sequence: u64) -> Option<Sha256Digest>;
}

// ---------------------------------------------------------------------------
// GateStage trait
// ---------------------------------------------------------------------------

/// A single check in the admission pipeline.
///
/// Stages run in order against an event that has already passed schema
/// validation. The trait is object-safe and `Send + Sync` so stages can be
/// stored in a `Vec<Box<dyn GateStage>>`.
pub trait GateStage: Send + Sync {
    /// Human-readable name of this stage (e.g., "idempotency", "sequence").
    fn name(&self) -> &str;

    /// Evaluate the candidate event against the admitted history.
    fn evaluate(
        &self,
        candidate: &AdmittedEvent,
        index: &dyn EventIndex,
    ) -> Result<StageDecision, GateError>;
}
