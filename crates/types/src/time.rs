//! Timestamp helpers. Everything in this workspace is UTC milliseconds since epoch.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in UTC milliseconds, clamped to 0 rather than panicking if
/// the system clock is somehow before the epoch (matches the teacher's defensive
/// `network::time::safe_system_timestamp_ns` pattern, scaled to milliseconds).
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
