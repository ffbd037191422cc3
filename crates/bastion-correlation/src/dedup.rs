use std::time::Duration;

use chrono::{DateTime, Utc};

/// Logical identity of an incident: `machine_id:process_id` when a process
/// is known, otherwise the machine alone.
pub fn dedup_key(machine_id: &str, process_id: Option<&str>) -> String {
    match process_id {
        Some(pid) if !pid.is_empty() => format!("{machine_id}:{pid}"),
        _ => machine_id.to_string(),
    }
}

/// Whether an observation falls within `window` of an incident's first
/// observation, in either direction.
pub fn within_window(
    observed_at: DateTime<Utc>,
    first_observed_at: DateTime<Utc>,
    window: Duration,
) -> bool {
    let diff_ms = (observed_at - first_observed_at).num_milliseconds().unsigned_abs();
    u128::from(diff_ms) <= window.as_millis()
}
