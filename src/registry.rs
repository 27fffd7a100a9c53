use std::collections::HashMap;
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};

use crate::metrics::METRICS;

/// Capacity of each connection's outbound queue.
///
/// A client that stops draining its socket fills this queue; further
/// sends to it are dropped instead of stalling the sender's task.
pub const OUTBOUND_QUEUE: usize = 256;

/// Monotonic connection identifier, unique for the process lifetime.
pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Room and member name a connection was bound to by its join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub room: String,
    pub member: String,
}

/// ============================================================
/// RelayConnection
/// ============================================================
///
/// Per-connection state shared between the socket tasks, the
/// registry and the liveness supervisor.
///
/// Responsibilities:
/// - Hold the outbound queue feeding the socket writer task
/// - Remember the identity bound by the first join
/// - Track probe responses for dead-peer detection
/// - Carry the close signal that tears both socket tasks down
///
/// Design constraints:
/// - Sending must never block or error into the caller's path
/// - Identity is write-once; a second join cannot rebind it
pub struct RelayConnection {
    pub id: ConnId,

    /// Queue drained by the socket writer task.
    outbound: mpsc::Sender<Message>,

    /// Cleared by each liveness sweep, re-set by any pong.
    alive: AtomicBool,

    /// Latched once teardown has been decided, by either side.
    close_flag: AtomicBool,
    closed: tokio::sync::Notify,

    identity: OnceLock<Identity>,
}

impl RelayConnection {
    pub fn new(id: ConnId, outbound: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            outbound,
            alive: AtomicBool::new(true),
            close_flag: AtomicBool::new(false),
            closed: tokio::sync::Notify::new(),
            identity: OnceLock::new(),
        }
    }

    /// Enqueues a frame for this connection without blocking.
    ///
    /// Behavior:
    /// - Uses non-blocking `try_send`
    /// - Drops the frame if the queue is full or the writer is gone
    ///
    /// Returns whether the frame was actually enqueued.
    pub fn try_send(&self, msg: Message) -> bool {
        match self.outbound.try_send(msg) {
            Ok(()) => true,
            Err(_) => {
                METRICS.dropped_sends.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Records a probe response.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Consumes the alive flag for one sweep.
    ///
    /// Returns the flag value before clearing: `false` means the
    /// connection answered nothing since the previous sweep and is
    /// due for eviction.
    pub fn disarm(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Binds the room/member identity. Only the first call wins.
    pub fn set_identity(&self, identity: Identity) -> bool {
        self.identity.set(identity).is_ok()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    /// Latches the close signal and wakes both socket tasks.
    ///
    /// Returns true for the caller that actually initiated the
    /// close, false when it was already underway.
    pub fn begin_close(&self) -> bool {
        let first = !self.close_flag.swap(true, Ordering::SeqCst);
        if first {
            self.closed.notify_waiters();
        }
        first
    }

    pub fn is_closing(&self) -> bool {
        self.close_flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`begin_close`] has been called.
    ///
    /// Safe against the signal firing between registration and the
    /// flag check; a latched flag resolves immediately.
    pub async fn wait_close(&self) {
        let notified = self.closed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.close_flag.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

#[derive(Default)]
struct Tables {
    /// Every live connection, joined or not. Liveness probes all of
    /// them; a client that never joins still gets evicted.
    connections: HashMap<ConnId, Arc<RelayConnection>>,

    /// room -> member -> connection. Rooms exist only while they
    /// have members.
    rooms: HashMap<String, HashMap<String, Arc<RelayConnection>>>,
}

/// ============================================================
/// Registry
/// ============================================================
///
/// Shared connection and room state for the whole relay.
///
/// Responsibilities:
/// - Track every accepted connection for liveness probing
/// - Map room/member names to connections for forwarding
/// - Fan a frame out to a room without blocking on any receiver
///
/// Locking:
/// - One mutex over both tables. Every critical section is a map
///   operation or a snapshot; actual socket I/O happens after the
///   lock is released.
#[derive(Default)]
pub struct Registry {
    tables: Mutex<Tables>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a freshly accepted connection to the liveness table.
    pub async fn attach(&self, conn: Arc<RelayConnection>) {
        let mut t = self.tables.lock().await;
        t.connections.insert(conn.id, conn);
        drop(t);
        METRICS.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Places a connection in a room under a member name.
    ///
    /// Behavior:
    /// - Creates the room on first join
    /// - Returns the connection previously holding the same name,
    ///   if any, so the caller can retire it
    pub async fn register(
        &self,
        conn: &Arc<RelayConnection>,
        room: &str,
        member: &str,
    ) -> Option<Arc<RelayConnection>> {
        let mut t = self.tables.lock().await;
        let superseded = t
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(member.to_string(), conn.clone());
        drop(t);
        METRICS.joins.fetch_add(1, Ordering::Relaxed);
        superseded.filter(|old| old.id != conn.id)
    }

    /// Removes a connection from both tables.
    ///
    /// Behavior:
    /// - Room removal is owner-checked: if the member slot is held
    ///   by a different connection (the name was taken over), the
    ///   slot is left alone
    /// - Dropping the last member destroys the room
    ///
    /// Returns true only for the call that actually removed the
    /// connection, so teardown bookkeeping runs once.
    pub async fn detach(&self, conn: &RelayConnection) -> bool {
        let mut t = self.tables.lock().await;
        let removed = t.connections.remove(&conn.id).is_some();

        if let Some(identity) = conn.identity() {
            if let Some(members) = t.rooms.get_mut(&identity.room) {
                let owns_slot = members
                    .get(&identity.member)
                    .is_some_and(|held| held.id == conn.id);
                if owns_slot {
                    members.remove(&identity.member);
                }
                if members.is_empty() {
                    t.rooms.remove(&identity.room);
                }
            }
        }
        drop(t);

        if removed {
            METRICS.connections_closed.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Fans a text frame out to every room member except the sender.
    ///
    /// The member list is snapshotted under the lock; the sends run
    /// after it is released so a slow receiver cannot hold the
    /// registry. A full or closed receiver queue drops that copy
    /// only.
    ///
    /// Returns the number of members the frame was enqueued for.
    pub async fn broadcast(&self, room: &str, exclude: ConnId, text: Utf8Bytes) -> usize {
        let targets: Vec<Arc<RelayConnection>> = {
            let t = self.tables.lock().await;
            match t.rooms.get(room) {
                Some(members) => members
                    .values()
                    .filter(|c| c.id != exclude)
                    .cloned()
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for target in targets {
            if target.try_send(Message::Text(text.clone())) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Snapshot of every live connection, for the liveness sweep.
    pub async fn connections(&self) -> Vec<Arc<RelayConnection>> {
        self.tables.lock().await.connections.values().cloned().collect()
    }

    pub async fn room_size(&self, room: &str) -> Option<usize> {
        self.tables.lock().await.rooms.get(room).map(|m| m.len())
    }

    pub async fn room_count(&self) -> usize {
        self.tables.lock().await.rooms.len()
    }

    pub async fn total_members(&self) -> usize {
        self.tables.lock().await.rooms.values().map(|m| m.len()).sum()
    }

    pub async fn total_connections(&self) -> usize {
        self.tables.lock().await.connections.len()
    }
}
