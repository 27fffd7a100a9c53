use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use once_cell::sync::Lazy;

/// Global runtime metrics for the relay.
///
/// Purpose:
/// - Track connection lifecycle (opened / closed / evicted)
/// - Track room membership churn
/// - Track throughput (received / forwarded messages)
/// - Track protocol problems (parse errors, unknown kinds)
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Connection level
    pub connections_opened: AtomicUsize,
    pub connections_closed: AtomicUsize,
    pub evictions: AtomicUsize,

    // Rooms
    pub joins: AtomicUsize,

    // Throughput
    pub messages_received: AtomicUsize,
    pub messages_forwarded: AtomicUsize,

    pub parse_errors: AtomicUsize,
    pub unknown_messages: AtomicUsize,
    pub dropped_sends: AtomicUsize,
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
