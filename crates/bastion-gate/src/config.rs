use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the integrity gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// A sequence jump larger than this is reported as probable corruption.
    pub sequence_gap_bound: u64,
    /// How far `observed_at` may lie after `ingested_at` (producer clock skew).
    pub max_clock_skew: Duration,
    /// Oldest acceptable observation relative to `ingested_at`.
    pub max_event_age: Duration,
    /// Arrivals later than this are admitted but flagged `late_arrival`.
    pub late_arrival_after: Duration,
    /// Component name written on rejection audit entries.
    pub component: String,
    /// Instance id written on rejection audit entries.
    pub component_instance_id: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            sequence_gap_bound: 1000,
            max_clock_skew: Duration::from_secs(5),
            max_event_age: Duration::from_secs(30 * 24 * 3600),
            late_arrival_after: Duration::from_secs(3600),
            component: "integrity-gate".into(),
            component_instance_id: "integrity-gate-0".into(),
        }
    }
}

impl GateConfig {
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.component_instance_id = id.into();
        self
    }

    pub fn with_sequence_gap_bound(mut self, bound: u64) -> Self {
        self.sequence_gap_bound = bound;
        self
    }
}
