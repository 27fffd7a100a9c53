use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::Config;
use crate::metrics::METRICS;
use crate::registry::{OUTBOUND_QUEUE, Registry, RelayConnection, next_conn_id};
use crate::router;

/// How often the stats summary is logged.
pub const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// ============================================================
/// RelayServer
/// ============================================================
///
/// Owns the TCP listener and spawns one task per accepted client.
///
/// Responsibilities:
/// - Accept TCP connections and upgrade them to WebSocket
/// - Wire each connection into the shared registry
/// - Keep accepting regardless of individual connection failures
///
/// GUARANTEES:
/// - The accept loop never exits voluntarily
/// - A failing connection never affects its neighbors
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl RelayServer {
    /// Binds the listener. Port 0 binds an ephemeral port, which
    /// [`local_addr`](Self::local_addr) reports back.
    pub async fn bind(config: &Config, registry: Arc<Registry>) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr).await?;
        log::info!("[SERVER] listening on {}", listener.local_addr()?);
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts clients forever.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    // Transient accept errors (fd pressure, resets)
                    log::warn!("[SERVER] accept failed: {}", e);
                    sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let registry = self.registry.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, registry).await {
                    log::debug!("[SERVER] connection from {} ended: {}", peer, e);
                }
            });
        }
    }
}

/// Runs a single client connection to completion.
///
/// This function:
/// - Performs the WebSocket handshake
/// - Registers the connection for liveness probing
/// - Spawns the writer task draining the outbound queue
/// - Reads frames until the peer leaves or the close signal fires
///
/// RESPONSIBILITIES:
/// - Connection lifecycle and teardown
/// - Frame-type dispatch
///
/// NOT RESPONSIBLE FOR:
/// - Message semantics (router responsibility)
/// - Probe scheduling (liveness supervisor responsibility)
///
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut write, mut read) = ws.split();

    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
    let conn = Arc::new(RelayConnection::new(next_conn_id(), tx));
    registry.attach(conn.clone()).await;
    log::info!("[SERVER] conn={} accepted from {}", conn.id, peer);

    // ------------------------------------------------------------
    // WRITER TASK
    // ------------------------------------------------------------
    // Purpose:
    // - Drain the outbound queue into the socket
    // - Send a close frame and stop when the close signal fires
    // - Latch the close signal itself when the socket dies
    let writer = tokio::spawn({
        let conn = conn.clone();
        async move {
            loop {
                tokio::select! {
                    maybe = rx.recv() => {
                        match maybe {
                            Some(msg) => {
                                if write.send(msg).await.is_err() {
                                    conn.begin_close();
                                    break;
                                }
                            }
                            None => break,
                        }
                    }

                    _ = conn.wait_close() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    });

    // ------------------------------------------------------------
    // READ LOOP
    // ------------------------------------------------------------
    loop {
        tokio::select! {
            // Evicted, superseded, or writer died
            _ = conn.wait_close() => break,

            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        router::handle_text(&registry, &conn, &text).await;
                    }

                    // Probe answered
                    Some(Ok(Message::Pong(_))) => conn.mark_alive(),

                    // The protocol layer queues the pong reply itself
                    Some(Ok(Message::Ping(_))) => {}

                    Some(Ok(Message::Close(_))) => {
                        log::debug!("[SERVER] conn={} sent close", conn.id);
                        break;
                    }

                    // Binary and raw frames carry nothing we route
                    Some(Ok(_)) => {}

                    Some(Err(e)) => {
                        log::debug!("[SERVER] conn={} read error: {}", conn.id, e);
                        break;
                    }

                    None => break,
                }
            }
        }
    }

    // ------------------------------------------------------------
    // TEARDOWN
    // ------------------------------------------------------------
    conn.begin_close();
    if registry.detach(&conn).await {
        log::info!("[SERVER] conn={} closed", conn.id);
    }
    let _ = writer.await;
    Ok(())
}

/// Logs a periodic one-line summary of relay state and throughput.
///
/// Counters are process totals; the in/out figures additionally
/// show the delta since the previous line.
pub async fn run_stats(registry: Arc<Registry>, period: Duration) {
    let mut last_received = 0;
    let mut last_forwarded = 0;
    loop {
        sleep(period).await;

        let received = METRICS.messages_received.load(Ordering::Relaxed);
        let forwarded = METRICS.messages_forwarded.load(Ordering::Relaxed);
        log::info!(
            "[STATS] rooms={} members={} connections={} in={} (+{}) out={} (+{}) joins={} opened={} closed={} evicted={} dropped={} parse_err={} unknown={}",
            registry.room_count().await,
            registry.total_members().await,
            registry.total_connections().await,
            received,
            received - last_received,
            forwarded,
            forwarded - last_forwarded,
            METRICS.joins.load(Ordering::Relaxed),
            METRICS.connections_opened.load(Ordering::Relaxed),
            METRICS.connections_closed.load(Ordering::Relaxed),
            METRICS.evictions.load(Ordering::Relaxed),
            METRICS.dropped_sends.load(Ordering::Relaxed),
            METRICS.parse_errors.load(Ordering::Relaxed),
            METRICS.unknown_messages.load(Ordering::Relaxed),
        );
        last_received = received;
        last_forwarded = forwarded;
    }
}
