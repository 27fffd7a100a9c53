/// Small shared helpers.
///
/// This module contains:
/// - Time helpers
///
/// IMPORTANT:
/// - No room or session business logic should live here.
/// - This module must remain lightweight and deterministic.
///

/// Returns the current Unix timestamp in milliseconds.
///
/// This function is used across the relay for:
/// - Join acknowledgement timestamps
/// - Position update timestamps when the client omits one
/// - Event timing in logs
///
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
