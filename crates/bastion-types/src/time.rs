use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::TypeError;

/// Current UTC time truncated to microseconds.
///
/// Ledger timestamps are hashed in their serialized form, so they are kept at
/// a fixed precision that survives a serialize/parse round trip unchanged.
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Parse an RFC 3339 timestamp and normalize it to UTC.
pub fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, TypeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TypeError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// Format as RFC 3339 with microsecond precision and a `Z` suffix.
pub fn format_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Serde adapter writing timestamps with [`format_rfc3339`].
///
/// Use as `#[serde(with = "bastion_types::time::rfc3339")]`.
pub mod rfc3339 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_rfc3339(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_rfc3339(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_normalized_to_utc() {
        let ts = parse_rfc3339("2025-03-01T12:00:00+02:00").unwrap();
        assert_eq!(format_rfc3339(&ts), "2025-03-01T10:00:00.000000Z");
    }

    #[test]
    fn garbage_is_rejected() {
        let err = parse_rfc3339("yesterday").unwrap_err();
        assert!(matches!(err, TypeError::InvalidTimestamp { .. }));
    }

    #[test]
    fn now_survives_serde_roundtrip() {
        let now = now_utc();
        let json = serde_json::to_string(&now).unwrap();
        let back: DateTime<Utc> = serde_json::from_str(&json).unwrap();
        assert_eq!(now, back);
        assert_eq!(json, serde_json::to_string(&back).unwrap());
    }
}
