use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CorrelationError;

/// Evidence types with a built-in default weight.
pub const DEFAULT_WEIGHTS: [(&str, f64); 8] = [
    ("CORRELATION_PATTERN", 10.0),
    ("PROCESS_ACTIVITY", 15.0),
    ("FILE_ACTIVITY", 15.0),
    ("NETWORK_INTENT", 12.0),
    ("DPI_FLOW", 20.0),
    ("DNS_QUERY", 8.0),
    ("DECEPTION", 25.0),
    ("AI_SIGNAL", 18.0),
];

/// Configuration for the correlation engine. Built once, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Confidence added per signal, by evidence type.
    pub weights: BTreeMap<String, f64>,
    /// Weight for evidence types missing from `weights`.
    pub default_weight: f64,
    /// Confidence at which an incident becomes PROBABLE.
    pub probable_threshold: f64,
    /// Confidence at which an incident becomes CONFIRMED.
    pub confirmed_threshold: f64,
    /// Fraction of confidence removed by a contradiction.
    pub contradiction_decay: f64,
    /// Observations within this distance of an incident's first observation
    /// attach to it.
    pub dedup_window: Duration,
    /// Stop changing confidence once an incident is CONFIRMED.
    pub freeze_confidence_when_confirmed: bool,
    /// Component name on ledger entries.
    pub component: String,
    /// Instance id on ledger entries.
    pub component_instance_id: String,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            weights: DEFAULT_WEIGHTS
                .iter()
                .map(|(name, weight)| (name.to_string(), *weight))
                .collect(),
            default_weight: 10.0,
            probable_threshold: 30.0,
            confirmed_threshold: 70.0,
            contradiction_decay: 0.1,
            dedup_window: Duration::from_secs(3600),
            freeze_confidence_when_confirmed: false,
            component: "correlation-engine".into(),
            component_instance_id: "correlation-engine-0".into(),
        }
    }
}

impl CorrelationConfig {
    /// Weight of one signal of `evidence_type`.
    pub fn weight_for(&self, evidence_type: &str) -> f64 {
        self.weights
            .get(evidence_type)
            .copied()
            .unwrap_or(self.default_weight)
    }

    pub fn with_weight(mut self, evidence_type: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(evidence_type.into(), weight);
        self
    }

    pub fn with_thresholds(mut self, probable: f64, confirmed: f64) -> Self {
        self.probable_threshold = probable;
        self.confirmed_threshold = confirmed;
        self
    }

    pub fn with_contradiction_decay(mut self, decay: f64) -> Self {
        self.contradiction_decay = decay;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    pub fn with_frozen_confirmed_confidence(mut self, freeze: bool) -> Self {
        self.freeze_confidence_when_confirmed = freeze;
        self
    }

    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.component_instance_id = id.into();
        self
    }

    /// Check that every value is in range.
    pub fn validate(&self) -> Result<(), CorrelationError> {
        let in_range = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);

        for (name, weight) in &self.weights {
            if !in_range(*weight) {
                return Err(CorrelationError::Config(format!(
                    "weight for {name} must be within [0, 100], got {weight}"
                )));
            }
        }
        if !in_range(self.default_weight) {
            return Err(CorrelationError::Config(format!(
                "default weight must be within [0, 100], got {}",
                self.default_weight
            )));
        }
        if !(in_range(self.probable_threshold)
            && in_range(self.confirmed_threshold)
            && self.probable_threshold > 0.0
            && self.probable_threshold < self.confirmed_threshold)
        {
            return Err(CorrelationError::Config(format!(
                "thresholds must satisfy 0 < probable < confirmed <= 100, got probable={} confirmed={}",
                self.probable_threshold, self.confirmed_threshold
            )));
        }
        if !(self.contradiction_decay.is_finite() && (0.0..=1.0).contains(&self.contradiction_decay)) {
            return Err(CorrelationError::Config(format!(
                "contradiction decay must be within [0, 1], got {}",
                self.contradiction_decay
            )));
        }
        if self.dedup_window.is_zero() {
            return Err(CorrelationError::Config("dedup window must be positive".into()));
        }
        Ok(())
    }
}
