//! Small helpers shared by the store clients and the queue.

/// Longest error body kept in a message
const MAX_ERROR_CHARS: usize = 180;

/// Trim an error body and cap it for logs and `last_error`.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(MAX_ERROR_CHARS).collect()
}

/// Wall-clock time as Unix milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
