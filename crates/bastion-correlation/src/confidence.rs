//! Confidence arithmetic. Every function here is pure and keeps its result
//! within [0, 100].

use crate::config::CorrelationConfig;
use crate::stage::IncidentStage;

pub const MIN_CONFIDENCE: f64 = 0.0;
pub const MAX_CONFIDENCE: f64 = 100.0;

/// Clamp to [0, 100]. NaN maps to 0.
pub fn clamp(confidence: f64) -> f64 {
    if confidence.is_nan() {
        return MIN_CONFIDENCE;
    }
    confidence.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

/// Contribution of a single signal of `evidence_type`.
pub fn signal_confidence(config: &CorrelationConfig, evidence_type: &str) -> f64 {
    clamp(config.weight_for(evidence_type))
}

/// Add a contribution, saturating at 100.
pub fn accumulate(current: f64, contribution: f64) -> f64 {
    clamp(current + contribution)
}

/// Multiply by `1 - decay`.
pub fn decay(current: f64, decay: f64) -> f64 {
    clamp(current * (1.0 - decay))
}

/// The stage a confidence value maps to, ignoring the transition guard.
pub fn stage_for(confidence: f64, config: &CorrelationConfig) -> IncidentStage {
    if confidence >= config.confirmed_threshold {
        IncidentStage::Confirmed
    } else if confidence >= config.probable_threshold {
        IncidentStage::Probable
    } else if confidence > MIN_CONFIDENCE {
        IncidentStage::Suspicious
    } else {
        IncidentStage::Clean
    }
}
