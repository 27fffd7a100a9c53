use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::time::{Duration, interval};
use tokio_tungstenite::tungstenite::{Bytes, Message};

use crate::metrics::METRICS;
use crate::registry::Registry;

/// How often every connection is probed.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// ============================================================
/// LivenessSupervisor
/// ============================================================
///
/// Periodically probes every connection and evicts the silent ones.
///
/// Responsibilities:
/// - Send a ping frame to each responsive connection every period
/// - Evict any connection that answered nothing for a full period
///
/// Behavior:
/// - Two-tick scheme: a sweep clears each connection's alive flag
///   and probes it; any pong re-sets the flag. A connection found
///   already cleared on the next sweep never answered and is torn
///   down. Worst-case removal is therefore two periods after the
///   peer went silent.
/// - Unjoined connections are probed and evicted the same way, so
///   a client that connects and never speaks cannot linger.
pub struct LivenessSupervisor {
    registry: Arc<Registry>,
    period: Duration,
}

impl LivenessSupervisor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_interval(registry, PROBE_INTERVAL)
    }

    pub fn with_interval(registry: Arc<Registry>, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Runs sweeps forever. The first tick fires immediately; it
    /// only disarms fresh connections, so nothing is evicted before
    /// it had a full period to answer a probe.
    pub async fn run(self) {
        let mut ticks = interval(self.period);
        loop {
            ticks.tick().await;
            self.sweep().await;
        }
    }

    /// One probe/evict pass over every connection.
    pub async fn sweep(&self) {
        for conn in self.registry.connections().await {
            if conn.disarm() {
                // Answered since the last sweep; probe again.
                conn.try_send(Message::Ping(Bytes::new()));
                continue;
            }

            if conn.begin_close() {
                METRICS.evictions.fetch_add(1, Ordering::Relaxed);
                match conn.identity() {
                    Some(id) => log::info!(
                        "[LIVENESS] evicting conn={} room={} member={}",
                        conn.id,
                        id.room,
                        id.member
                    ),
                    None => log::info!("[LIVENESS] evicting unjoined conn={}", conn.id),
                }
            }
            self.registry.detach(&conn).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Identity, RelayConnection, next_conn_id};
    use tokio::sync::mpsc;

    fn make_conn() -> (Arc<RelayConnection>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(RelayConnection::new(next_conn_id(), tx));
        (conn, rx)
    }

    #[tokio::test]
    async fn sweep_probes_responsive_connection() {
        let registry = Arc::new(Registry::new());
        let (conn, mut rx) = make_conn();
        registry.attach(conn.clone()).await;

        let supervisor = LivenessSupervisor::new(registry.clone());
        supervisor.sweep().await;

        assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));
        assert!(!conn.is_closing());
        assert_eq!(registry.total_connections().await, 1);
    }

    #[tokio::test]
    async fn second_silent_sweep_evicts() {
        let registry = Arc::new(Registry::new());
        let (conn, mut rx) = make_conn();
        registry.attach(conn.clone()).await;
        conn.set_identity(Identity {
            room: "t1".into(),
            member: "ada".into(),
        });
        registry.register(&conn, "t1", "ada").await;

        let supervisor = LivenessSupervisor::new(registry.clone());
        supervisor.sweep().await;
        assert!(!conn.is_closing());

        supervisor.sweep().await;
        assert!(conn.is_closing());
        assert_eq!(registry.total_connections().await, 0);
        assert_eq!(registry.room_size("t1").await, None);

        // Exactly one probe went out; the eviction sweep sends none.
        assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pong_between_sweeps_keeps_connection_alive() {
        let registry = Arc::new(Registry::new());
        let (conn, mut rx) = make_conn();
        registry.attach(conn.clone()).await;

        let supervisor = LivenessSupervisor::new(registry.clone());
        for _ in 0..3 {
            supervisor.sweep().await;
            conn.mark_alive();
        }

        assert!(!conn.is_closing());
        assert_eq!(registry.total_connections().await, 1);
        for _ in 0..3 {
            assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_evicts_silent_connection_within_two_periods() {
        let registry = Arc::new(Registry::new());
        let (conn, mut rx) = make_conn();
        registry.attach(conn.clone()).await;

        let supervisor =
            LivenessSupervisor::with_interval(registry.clone(), Duration::from_secs(30));
        tokio::spawn(supervisor.run());

        // The immediate tick only disarms and probes; one period in,
        // the connection is still there.
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(!conn.is_closing());
        assert_eq!(registry.total_connections().await, 1);

        // The second tick finds the probe unanswered and evicts.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));
        assert!(conn.is_closing());
        assert_eq!(registry.total_connections().await, 0);
    }
}
