//! Schema completeness and timestamp sanity: the first gate check.

use bastion_types::time::parse_rfc3339;
use serde_json::Value;

use crate::config::GateConfig;
use crate::event::{AdmittedEvent, RawEvent};

/// A consumer's rules for the `payload` object, checked as part of the schema
/// step so that violations are rejected and audited like any other schema
/// failure.
pub trait PayloadContract: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Err` carries the rejection detail.
    fn check(&self, event: &AdmittedEvent) -> Result<(), String>;
}

/// Validate the envelope and build the typed candidate, or explain why not.
pub fn validate(envelope: &Value, config: &GateConfig) -> Result<AdmittedEvent, String> {
    if !envelope.is_object() {
        return Err("envelope must be a JSON object".into());
    }

    let event: RawEvent =
        serde_json::from_value(envelope.clone()).map_err(|e| e.to_string())?;

    let required = [
        ("event_id", &event.event_id),
        ("machine_id", &event.machine_id),
        ("component", &event.component),
        ("component_instance_id", &event.component_instance_id),
        ("identity.hostname", &event.identity.hostname),
        ("identity.boot_id", &event.identity.boot_id),
        ("identity.agent_version", &event.identity.agent_version),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(format!("{field} must not be empty"));
        }
    }

    let observed_at = parse_rfc3339(&event.observed_at).map_err(|e| format!("observed_at: {e}"))?;
    let ingested_at = parse_rfc3339(&event.ingested_at).map_err(|e| format!("ingested_at: {e}"))?;

    let diff_ms = (ingested_at - observed_at).num_milliseconds();
    let skew_ms = config.max_clock_skew.as_millis() as i64;
    if diff_ms < -skew_ms {
        return Err(format!(
            "observed_at is {:.3}s after ingested_at (tolerance {}s)",
            -diff_ms as f64 / 1000.0,
            config.max_clock_skew.as_secs()
        ));
    }
    if diff_ms > config.max_event_age.as_millis() as i64 {
        return Err(format!(
            "observed_at is {:.1} days before ingested_at (limit {} days)",
            diff_ms as f64 / 86_400_000.0,
            config.max_event_age.as_secs() / 86_400
        ));
    }

    let late_arrival = diff_ms > config.late_arrival_after.as_millis() as i64;
    Ok(AdmittedEvent {
        event,
        envelope: envelope.clone(),
        observed_at,
        ingested_at,
        arrival_latency_secs: diff_ms / 1000,
        late_arrival,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(observed: &str, ingested: &str) -> Value {
        json!({
            "event_id": "e-0",
            "machine_id": "m-1",
            "component": "linux-agent",
            "component_instance_id": "agent-1",
            "observed_at": observed,
            "ingested_at": ingested,
            "sequence": 0,
            "payload": {},
            "identity": {"hostname": "h", "boot_id": "b", "agent_version": "1.0"},
            "integrity": {"hash_sha256": "a".repeat(64), "prev_hash_sha256": null}
        })
    }

    fn check(env: &Value) -> Result<AdmittedEvent, String> {
        validate(env, &GateConfig::default())
    }

    #[test]
    fn well_formed_envelope_passes() {
        let ok = check(&envelope("2025-01-01T00:00:00Z", "2025-01-01T00:00:02Z")).unwrap();
        assert_eq!(ok.arrival_latency_secs, 2);
        assert!(!ok.late_arrival);
    }

    #[test]
    fn missing_field_fails() {
        let mut env = envelope("2025-01-01T00:00:00Z", "2025-01-01T00:00:00Z");
        env.as_object_mut().unwrap().remove("machine_id");
        assert!(check(&env).unwrap_err().contains("machine_id"));
    }

    #[test]
    fn empty_identifier_fails() {
        let mut env = envelope("2025-01-01T00:00:00Z", "2025-01-01T00:00:00Z");
        env["identity"]["boot_id"] = json!(" ");
        assert!(check(&env).unwrap_err().contains("identity.boot_id"));
    }

    #[test]
    fn uppercase_hash_fails() {
        let mut env = envelope("2025-01-01T00:00:00Z", "2025-01-01T00:00:00Z");
        env["integrity"]["hash_sha256"] = json!("A".repeat(64));
        assert!(check(&env).is_err());
    }

    #[test]
    fn unknown_field_fails() {
        let mut env = envelope("2025-01-01T00:00:00Z", "2025-01-01T00:00:00Z");
        env["extra"] = json!(1);
        assert!(check(&env).is_err());
    }

    #[test]
    fn future_observation_beyond_skew_fails() {
        assert!(check(&envelope("2025-01-01T00:00:10Z", "2025-01-01T00:00:00Z")).is_err());
        assert!(check(&envelope("2025-01-01T00:00:04Z", "2025-01-01T00:00:00Z")).is_ok());
    }

    #[test]
    fn observation_older_than_thirty_days_fails() {
        assert!(check(&envelope("2025-01-01T00:00:00Z", "2025-02-15T00:00:00Z")).is_err());
    }

    #[test]
    fn late_arrival_is_flagged() {
        let ok = check(&envelope("2025-01-01T00:00:00Z", "2025-01-01T02:00:00Z")).unwrap();
        assert!(ok.late_arrival);
        assert_eq!(ok.arrival_latency_secs, 7200);
    }

    struct NeedsKind;

    impl PayloadContract for NeedsKind {
        fn name(&self) -> &'static str {
            "needs-kind"
        }

        fn check(&self, event: &AdmittedEvent) -> Result<(), String> {
            match event.event.payload.get("kind") {
                Some(_) => Ok(()),
                None => Err("kind is required".into()),
            }
        }
    }

    #[test]
    fn payload_contract_sees_the_candidate() {
        let ok = check(&envelope("2025-01-01T00:00:00Z", "2025-01-01T00:00:00Z")).unwrap();
        assert_eq!(NeedsKind.check(&ok).unwrap_err(), "kind is required");
    }

    #[test]
    fn unparsable_timestamp_fails() {
        assert!(check(&envelope("last tuesday", "2025-01-01T00:00:00Z"))
            .unwrap_err()
            .contains("observed_at"));
    }
}
