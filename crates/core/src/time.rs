use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Every timestamp in the task lifecycle (enqueue, create, exec start/finish) is
/// expressed in this unit, matching the envelope headers the agent sends.
pub fn current_unix_milli() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_millis() as i64
}
