//! Signals: the correlation view of an admitted event.
//!
//! The engine reads these payload keys and nothing else:
//!
//! | key              | type                                   | required |
//! |------------------|----------------------------------------|----------|
//! | `evidence_type`  | upper-case identifier                  | no; defaults to `CORRELATION_PATTERN` |
//! | `process_id`     | string or non-negative integer         | no       |
//! | `source`         | `host`, `network`, `deception`, `health`, `ai` | no |
//! | `verdict`        | `SUSPICIOUS`, `MALICIOUS`, `BENIGN`    | no       |
//! | `threat_level`   | same values as `verdict`               | no       |
//! | `timing`         | `ORDINARY`, `ANOMALOUS`                | no       |
//! | `activity`       | `ONGOING`, `NONE`                      | no       |
//! | `artifact_found` | bool                                   | no       |
//! | `execution`      | bool                                   | no       |
//! | `persistence`    | bool                                   | no       |
//! | `status`         | string; `HEALTHY` is exculpatory       | no       |
//!
//! A present key with the wrong type or an unknown value is an error.
//! [`SignalContract`] applies the same checks inside the gate's schema step,
//! so such events are rejected and audited before they reach the engine.

use bastion_gate::{AdmittedEvent, PayloadContract, StoredEvent};
use bastion_types::time::parse_rfc3339;
use bastion_types::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CorrelationError;

/// Evidence type of a payload that names none.
pub const DEFAULT_EVIDENCE_TYPE: &str = "CORRELATION_PATTERN";

/// Which side of the deployment produced a signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Host,
    Network,
    Deception,
    Health,
    Ai,
    Other,
}

impl Source {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "host" => Some(Self::Host),
            "network" => Some(Self::Network),
            "deception" => Some(Self::Deception),
            "health" => Some(Self::Health),
            "ai" => Some(Self::Ai),
            _ => None,
        }
    }

    /// Source implied by the producing component when the payload is silent.
    pub fn for_component(component: &str) -> Self {
        match component {
            "linux_agent" | "linux-agent" | "windows_agent" | "windows-agent" => Self::Host,
            "dpi" | "dpi_probe" | "dpi-probe" | "dpi-advanced" => Self::Network,
            "deception" => Self::Deception,
            "health_monitor" | "health-monitor" => Self::Health,
            _ => Self::Other,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Suspicious,
    Malicious,
    Benign,
}

impl Verdict {
    pub fn is_incriminating(self) -> bool {
        matches!(self, Self::Suspicious | Self::Malicious)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Timing {
    Ordinary,
    Anomalous,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Activity {
    Ongoing,
    None,
}

/// Immutable facts extracted from a payload at admission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facets {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timing: Option<Timing>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub activity: Option<Activity>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub artifact_found: Option<bool>,
    #[serde(default)]
    pub execution: bool,
    #[serde(default)]
    pub persistence: bool,
    #[serde(default)]
    pub healthy: bool,
}

impl Facets {
    /// The signal itself argues against an incident.
    pub fn is_exculpatory(&self) -> bool {
        self.healthy || self.verdict == Some(Verdict::Benign)
    }
}

/// One correlatable observation.
#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    pub event_id: String,
    pub machine_id: String,
    pub component: String,
    pub process_id: Option<String>,
    pub evidence_type: String,
    pub source: Source,
    pub facets: Facets,
    pub observed_at: DateTime<Utc>,
}

impl Signal {
    /// Build a signal from an event the gate has admitted.
    pub fn from_admitted(event: &AdmittedEvent) -> Result<Self, CorrelationError> {
        Self::from_parts(
            &event.event.event_id,
            &event.event.machine_id,
            &event.event.component,
            event.observed_at,
            &event.event.payload,
        )
    }

    /// Rebuild the signal of an event from its stored envelope.
    pub fn from_stored(event: &StoredEvent) -> Result<Self, CorrelationError> {
        let envelope = &event.envelope;
        let text = |key: &str| envelope.get(key).and_then(Value::as_str).unwrap_or_default();
        let observed_at = parse_rfc3339(text("observed_at"))
            .map_err(|e| CorrelationError::signal(&event.event_id, format!("observed_at: {e}")))?;
        let payload: Payload = match envelope.get("payload") {
            Some(p) => serde_json::from_value(p.clone())
                .map_err(|e| CorrelationError::signal(&event.event_id, format!("payload: {e}")))?,
            None => Payload::new(),
        };
        Self::from_parts(
            &event.event_id,
            text("machine_id"),
            text("component"),
            observed_at,
            &payload,
        )
    }

    pub fn from_parts(
        event_id: &str,
        machine_id: &str,
        component: &str,
        observed_at: DateTime<Utc>,
        payload: &Payload,
    ) -> Result<Self, CorrelationError> {
        let fields = Fields { event_id, payload };

        let evidence_type = fields
            .string("evidence_type")?
            .unwrap_or_else(|| DEFAULT_EVIDENCE_TYPE.to_string());
        if evidence_type.is_empty()
            || !evidence_type
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(CorrelationError::signal(
                event_id,
                format!("evidence_type '{evidence_type}' is not an upper-case identifier"),
            ));
        }

        let source = match fields.string("source")? {
            Some(s) => Source::parse(&s).ok_or_else(|| {
                CorrelationError::signal(event_id, format!("unknown source '{s}'"))
            })?,
            None => Source::for_component(component),
        };

        let verdict = fields.choice("verdict", parse_verdict)?;
        let threat_level = fields.choice("threat_level", parse_verdict)?;
        let verdict = match (verdict, threat_level) {
            (Some(a), Some(b)) if a != b => {
                return Err(CorrelationError::signal(
                    event_id,
                    "verdict and threat_level disagree",
                ))
            }
            (a, b) => a.or(b),
        };

        let facets = Facets {
            verdict,
            timing: fields.choice("timing", |s| match s {
                "ORDINARY" => Some(Timing::Ordinary),
                "ANOMALOUS" => Some(Timing::Anomalous),
                _ => None,
            })?,
            activity: fields.choice("activity", |s| match s {
                "ONGOING" => Some(Activity::Ongoing),
                "NONE" => Some(Activity::None),
                _ => None,
            })?,
            artifact_found: fields.flag("artifact_found")?,
            execution: fields.flag("execution")?.unwrap_or(false),
            persistence: fields.flag("persistence")?.unwrap_or(false),
            healthy: fields.string("status")?.as_deref() == Some("HEALTHY"),
        };

        Ok(Self {
            event_id: event_id.to_string(),
            machine_id: machine_id.to_string(),
            component: component.to_string(),
            process_id: fields.process_id()?,
            evidence_type,
            source,
            facets,
            observed_at,
        })
    }

    /// `machine_id:process_id`, or `machine_id` alone.
    pub fn dedup_key(&self) -> String {
        crate::dedup::dedup_key(&self.machine_id, self.process_id.as_deref())
    }
}

/// The payload key contract as a gate check.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignalContract;

impl SignalContract {
    fn check_payload(&self, event_id: &str, payload: &Payload) -> Result<(), String> {
        Signal::from_parts(event_id, "", "", DateTime::<Utc>::UNIX_EPOCH, payload)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

impl PayloadContract for SignalContract {
    fn name(&self) -> &'static str {
        "signal"
    }

    fn check(&self, event: &AdmittedEvent) -> Result<(), String> {
        self.check_payload(event.event_id(), &event.event.payload)
    }
}

fn parse_verdict(value: &str) -> Option<Verdict> {
    match value {
        "SUSPICIOUS" => Some(Verdict::Suspicious),
        "MALICIOUS" => Some(Verdict::Malicious),
        "BENIGN" => Some(Verdict::Benign),
        _ => None,
    }
}

/// Typed access to payload keys with contract errors.
struct Fields<'a> {
    event_id: &'a str,
    payload: &'a Payload,
}

impl Fields<'_> {
    fn error(&self, key: &str, expected: &str) -> CorrelationError {
        CorrelationError::signal(self.event_id, format!("{key} must be {expected}"))
    }

    fn string(&self, key: &str) -> Result<Option<String>, CorrelationError> {
        match self.payload.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.error(key, "a string")),
        }
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, CorrelationError> {
        match self.payload.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(self.error(key, "a bool")),
        }
    }

    fn choice<T>(
        &self,
        key: &str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<Option<T>, CorrelationError> {
        match self.string(key)? {
            None => Ok(None),
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| CorrelationError::signal(self.event_id, format!("unknown {key} '{s}'"))),
        }
    }

    fn process_id(&self) -> Result<Option<String>, CorrelationError> {
        match self.payload.get("process_id") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) if n.is_u64() => Ok(Some(n.to_string())),
            Some(_) => Err(self.error("process_id", "a string or non-negative integer")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        serde_json::from_value(value).unwrap()
    }

    fn signal(component: &str, value: Value) -> Result<Signal, CorrelationError> {
        Signal::from_parts("e-1", "m-1", component, Utc::now(), &payload(value))
    }

    #[test]
    fn minimal_payload() {
        let s = signal("dpi", json!({"evidence_type": "DPI_FLOW"})).unwrap();
        assert_eq!(s.evidence_type, "DPI_FLOW");
        assert_eq!(s.source, Source::Network);
        assert_eq!(s.process_id, None);
        assert_eq!(s.facets, Facets::default());
        assert_eq!(s.dedup_key(), "m-1");
    }

    #[test]
    fn process_id_feeds_dedup_key() {
        let s = signal("linux_agent", json!({"evidence_type": "PROCESS_ACTIVITY", "process_id": 4242}))
            .unwrap();
        assert_eq!(s.process_id.as_deref(), Some("4242"));
        assert_eq!(s.dedup_key(), "m-1:4242");
    }

    #[test]
    fn missing_evidence_type_defaults_to_correlation_pattern() {
        let s = signal("linux_agent", json!({"process_id": "12"})).unwrap();
        assert_eq!(s.evidence_type, DEFAULT_EVIDENCE_TYPE);
        assert_eq!(s.dedup_key(), "m-1:12");
    }

    #[test]
    fn contract_reports_the_signal_error() {
        let bad = payload(json!({"verdict": "PROBABLY_FINE"}));
        let detail = SignalContract.check_payload("e-9", &bad).unwrap_err();
        assert!(detail.contains("verdict"), "{detail}");
        let good = payload(json!({"timing": "ANOMALOUS"}));
        assert!(SignalContract.check_payload("e-9", &good).is_ok());
    }

    #[test]
    fn lower_case_evidence_type_is_rejected() {
        assert!(signal("dpi", json!({"evidence_type": "dpi_flow"})).is_err());
    }

    #[test]
    fn unknown_enum_values_are_rejected() {
        assert!(signal("dpi", json!({"evidence_type": "DPI_FLOW", "verdict": "MAYBE"})).is_err());
        assert!(signal("dpi", json!({"evidence_type": "DPI_FLOW", "source": "satellite"})).is_err());
        assert!(signal("dpi", json!({"evidence_type": "DPI_FLOW", "execution": "yes"})).is_err());
    }

    #[test]
    fn threat_level_is_read_as_verdict() {
        let s = signal("dpi", json!({"evidence_type": "DPI_FLOW", "threat_level": "BENIGN"})).unwrap();
        assert_eq!(s.facets.verdict, Some(Verdict::Benign));
        assert!(s.facets.is_exculpatory());
    }

    #[test]
    fn conflicting_verdicts_are_rejected() {
        let err = signal(
            "dpi",
            json!({"evidence_type": "DPI_FLOW", "verdict": "BENIGN", "threat_level": "MALICIOUS"}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("disagree"));
    }

    #[test]
    fn explicit_source_overrides_component() {
        let s = signal("dpi", json!({"evidence_type": "AI_SIGNAL", "source": "ai"})).unwrap();
        assert_eq!(s.source, Source::Ai);
    }

    #[test]
    fn healthy_status_is_exculpatory() {
        let s = signal("health_monitor", json!({"evidence_type": "HEALTH", "status": "HEALTHY"}))
            .unwrap();
        assert!(s.facets.healthy);
        assert_eq!(s.source, Source::Health);
    }
}
