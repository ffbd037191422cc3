use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use bastion_correlation::CorrelationConfig;
use bastion_gate::GateConfig;

const WEIGHT_PREFIX: &str = "BASTION_SIGNAL_WEIGHT_";

/// Process configuration. Read once at startup and passed down; never re-read.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub ledger_path: PathBuf,
    pub key_dir: PathBuf,
    pub event_store_path: PathBuf,
    pub custody_path: PathBuf,
    pub gate: GateConfig,
    pub correlation: CorrelationConfig,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Build from `BASTION_*` variables. Unknown variables are ignored;
    /// malformed values are errors.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> anyhow::Result<Self> {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.starts_with("BASTION_"))
            .collect();

        let data_dir = PathBuf::from(
            vars.get("BASTION_DATA_DIR")
                .map(String::as_str)
                .unwrap_or("bastion-data"),
        );
        let path = |name: &str, default: &str| {
            vars.get(name)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(default))
        };

        let mut gate = GateConfig::default();
        if let Some(bound) = parse::<u64>(&vars, "BASTION_SEQUENCE_GAP_BOUND")? {
            if bound == 0 {
                bail!("BASTION_SEQUENCE_GAP_BOUND must be positive");
            }
            gate = gate.with_sequence_gap_bound(bound);
        }

        let mut correlation = CorrelationConfig::default();
        for (name, value) in vars.range(WEIGHT_PREFIX.to_string()..) {
            let Some(evidence_type) = name.strip_prefix(WEIGHT_PREFIX) else {
                break;
            };
            let weight: f64 = value
                .parse()
                .with_context(|| format!("{name}={value:?} is not a number"))?;
            correlation = correlation.with_weight(evidence_type, weight);
        }
        if let Some(probable) = parse::<f64>(&vars, "BASTION_CONFIDENCE_THRESHOLD_PROBABLE")? {
            correlation.probable_threshold = probable;
        }
        if let Some(confirmed) = parse::<f64>(&vars, "BASTION_CONFIDENCE_THRESHOLD_CONFIRMED")? {
            correlation.confirmed_threshold = confirmed;
        }
        if let Some(decay) = parse::<f64>(&vars, "BASTION_CONTRADICTION_DECAY")? {
            correlation = correlation.with_contradiction_decay(decay);
        }
        if let Some(secs) = parse::<u64>(&vars, "BASTION_DEDUP_WINDOW_SECS")? {
            correlation = correlation.with_dedup_window(Duration::from_secs(secs));
        }
        if let Some(freeze) = parse::<bool>(&vars, "BASTION_FREEZE_CONFIRMED_CONFIDENCE")? {
            correlation = correlation.with_frozen_confirmed_confidence(freeze);
        }
        correlation.validate()?;

        Ok(Self {
            ledger_path: path("BASTION_LEDGER_PATH", "ledger.jsonl"),
            key_dir: path("BASTION_KEY_DIR", "keys"),
            event_store_path: path("BASTION_EVENT_STORE_PATH", "events.jsonl"),
            custody_path: path("BASTION_CUSTODY_PATH", "custody.jsonl"),
            gate,
            correlation,
        })
    }
}

fn parse<T>(vars: &BTreeMap<String, String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    vars.get(name)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("invalid {name}={value:?}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> anyhow::Result<Settings> {
        Settings::from_vars(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn defaults_live_under_data_dir() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.ledger_path, PathBuf::from("bastion-data/ledger.jsonl"));
        assert_eq!(s.key_dir, PathBuf::from("bastion-data/keys"));
        assert_eq!(s.gate, GateConfig::default());
        assert_eq!(s.correlation, CorrelationConfig::default());
    }

    #[test]
    fn explicit_paths_override_data_dir() {
        let s = settings(&[
            ("BASTION_DATA_DIR", "/var/lib/bastion"),
            ("BASTION_LEDGER_PATH", "/srv/ledger.jsonl"),
        ])
        .unwrap();
        assert_eq!(s.ledger_path, PathBuf::from("/srv/ledger.jsonl"));
        assert_eq!(s.event_store_path, PathBuf::from("/var/lib/bastion/events.jsonl"));
    }

    #[test]
    fn weights_and_thresholds_are_read() {
        let s = settings(&[
            ("BASTION_SIGNAL_WEIGHT_DPI_FLOW", "25"),
            ("BASTION_SIGNAL_WEIGHT_USB_INSERT", "5.5"),
            ("BASTION_CONFIDENCE_THRESHOLD_PROBABLE", "40"),
            ("BASTION_CONFIDENCE_THRESHOLD_CONFIRMED", "80"),
            ("BASTION_DEDUP_WINDOW_SECS", "600"),
            ("BASTION_FREEZE_CONFIRMED_CONFIDENCE", "true"),
            ("BASTION_SEQUENCE_GAP_BOUND", "50"),
        ])
        .unwrap();
        assert_eq!(s.correlation.weight_for("DPI_FLOW"), 25.0);
        assert_eq!(s.correlation.weight_for("USB_INSERT"), 5.5);
        assert_eq!(s.correlation.probable_threshold, 40.0);
        assert_eq!(s.correlation.confirmed_threshold, 80.0);
        assert_eq!(s.correlation.dedup_window, Duration::from_secs(600));
        assert!(s.correlation.freeze_confidence_when_confirmed);
        assert_eq!(s.gate.sequence_gap_bound, 50);
    }

    #[test]
    fn malformed_values_fail_startup() {
        assert!(settings(&[("BASTION_CONTRADICTION_DECAY", "lots")]).is_err());
        assert!(settings(&[("BASTION_SIGNAL_WEIGHT_DPI_FLOW", "-3")]).is_err());
        assert!(settings(&[("BASTION_SEQUENCE_GAP_BOUND", "0")]).is_err());
        assert!(settings(&[
            ("BASTION_CONFIDENCE_THRESHOLD_PROBABLE", "90"),
            ("BASTION_CONFIDENCE_THRESHOLD_CONFIRMED", "80"),
        ])
        .is_err());
    }

    #[test]
    fn unrelated_variables_are_ignored() {
        assert!(settings(&[("HOME", "/root"), ("PATH", "/bin")]).is_ok());
    }
}
