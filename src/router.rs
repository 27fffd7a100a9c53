use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};

use crate::metrics::METRICS;
use crate::protocol::{
    ClientEnvelope, JoinAck, PositionBroadcast, ServerEnvelope, UpgradeBroadcast,
};
use crate::registry::{Identity, Registry, RelayConnection};
use crate::util::now_ms;

/// Handles one text frame from a client.
///
/// Routing:
/// - `join` binds the connection to a room and member name
/// - `position` / `upgrade` fan out to room peers with the sender
///   identity stamped in
/// - unknown kinds and unparseable frames are counted and dropped;
///   neither ends the connection
///
/// IMPORTANT:
/// - Frames from a connection that never joined are dropped. There
///   is nothing to stamp on them and no room to send them to.
pub async fn handle_text(registry: &Arc<Registry>, conn: &Arc<RelayConnection>, text: &str) {
    METRICS.messages_received.fetch_add(1, Ordering::Relaxed);

    let envelope = match serde_json::from_str::<ClientEnvelope>(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            METRICS.parse_errors.fetch_add(1, Ordering::Relaxed);
            log::warn!("[ROUTER] unparseable frame from conn={}: {}", conn.id, e);
            return;
        }
    };

    match envelope {
        ClientEnvelope::Join(join) => {
            if join.room.trim().is_empty() || join.member.trim().is_empty() {
                log::warn!("[ROUTER] conn={} join with blank identifiers", conn.id);
                return;
            }

            let identity = Identity {
                room: join.room.clone(),
                member: join.member.clone(),
            };
            if !conn.set_identity(identity) {
                // Already joined; the binding is final.
                log::debug!("[ROUTER] conn={} repeated join ignored", conn.id);
                return;
            }

            if let Some(old) = registry.register(conn, &join.room, &join.member).await {
                // Same name joined again from elsewhere. The newcomer
                // owns the slot; retire the stale connection so it
                // does not linger as a half-dead reader.
                log::info!(
                    "[ROUTER] room={} member={} taken over, closing conn={}",
                    join.room,
                    join.member,
                    old.id
                );
                old.begin_close();
            }

            let ack = ServerEnvelope::Joined(JoinAck {
                room: join.room.clone(),
                member: join.member.clone(),
                ts: now_ms(),
            });
            if let Some(text) = encode(&ack) {
                conn.try_send(Message::Text(text));
            }
            log::info!(
                "[ROUTER] conn={} joined room={} as member={}",
                conn.id,
                join.room,
                join.member
            );
        }

        ClientEnvelope::Position(update) => {
            let Some(identity) = conn.identity() else {
                log::debug!("[ROUTER] conn={} position before join dropped", conn.id);
                return;
            };

            let out = ServerEnvelope::Position(PositionBroadcast {
                member: identity.member.clone(),
                x: update.x,
                y: update.y,
                vx: update.vx,
                vy: update.vy,
                ts: update.ts.unwrap_or_else(now_ms),
            });
            if let Some(text) = encode(&out) {
                let delivered = registry.broadcast(&identity.room, conn.id, text).await;
                METRICS.messages_forwarded.fetch_add(delivered, Ordering::Relaxed);
            }
        }

        ClientEnvelope::Upgrade(toggle) => {
            let Some(identity) = conn.identity() else {
                log::debug!("[ROUTER] conn={} upgrade before join dropped", conn.id);
                return;
            };

            let out = ServerEnvelope::Upgrade(UpgradeBroadcast {
                member: identity.member.clone(),
                target: toggle.target,
                active: toggle.active,
            });
            if let Some(text) = encode(&out) {
                let delivered = registry.broadcast(&identity.room, conn.id, text).await;
                METRICS.messages_forwarded.fetch_add(delivered, Ordering::Relaxed);
            }
        }

        ClientEnvelope::Unknown => {
            METRICS.unknown_messages.fetch_add(1, Ordering::Relaxed);
            log::debug!("[ROUTER] conn={} unknown message kind ignored", conn.id);
        }
    }
}

fn encode(envelope: &ServerEnvelope) -> Option<Utf8Bytes> {
    match serde_json::to_string(envelope) {
        Ok(json) => Some(json.into()),
        Err(e) => {
            log::error!("[ROUTER] failed to encode outbound frame: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnId, next_conn_id};
    use tokio::sync::mpsc;

    fn make_conn() -> (Arc<RelayConnection>, mpsc::Receiver<Message>, ConnId) {
        let (tx, rx) = mpsc::channel(8);
        let id = next_conn_id();
        (Arc::new(RelayConnection::new(id, tx)), rx, id)
    }

    fn recv_json(rx: &mut mpsc::Receiver<Message>) -> serde_json::Value {
        match rx.try_recv().expect("expected a frame") {
            Message::Text(t) => serde_json::from_str(&t).expect("frame is json"),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    async fn join(
        registry: &Arc<Registry>,
        conn: &Arc<RelayConnection>,
        room: &str,
        member: &str,
    ) {
        let frame = format!(r#"{{"type":"join","room":"{}","member":"{}"}}"#, room, member);
        handle_text(registry, conn, &frame).await;
    }

    #[tokio::test]
    async fn join_binds_identity_and_acks() {
        let registry = Arc::new(Registry::new());
        let (conn, mut rx, _) = make_conn();

        join(&registry, &conn, "t1", "ada").await;

        let identity = conn.identity().expect("identity bound");
        assert_eq!(identity.room, "t1");
        assert_eq!(identity.member, "ada");
        assert_eq!(registry.room_size("t1").await, Some(1));

        let ack = recv_json(&mut rx);
        assert_eq!(ack["type"], "joined");
        assert_eq!(ack["room"], "t1");
        assert_eq!(ack["member"], "ada");
        assert!(ack["ts"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn blank_join_is_ignored() {
        let registry = Arc::new(Registry::new());
        let (conn, mut rx, _) = make_conn();

        handle_text(&registry, &conn, r#"{"type":"join","room":"","member":"ada"}"#).await;
        handle_text(&registry, &conn, r#"{"type":"join","room":"t1","member":"  "}"#).await;

        assert!(conn.identity().is_none());
        assert_eq!(registry.room_count().await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_join_is_ignored() {
        let registry = Arc::new(Registry::new());
        let (conn, mut rx, _) = make_conn();

        join(&registry, &conn, "t1", "ada").await;
        join(&registry, &conn, "t2", "eve").await;

        let identity = conn.identity().unwrap();
        assert_eq!(identity.room, "t1");
        assert_eq!(identity.member, "ada");
        assert_eq!(registry.room_size("t2").await, None);

        // Only the first join produced an ack.
        assert_eq!(recv_json(&mut rx)["room"], "t1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn position_fans_out_with_sender_stamp() {
        let registry = Arc::new(Registry::new());
        let (a, mut a_rx, _) = make_conn();
        let (b, mut b_rx, _) = make_conn();
        let (c, mut c_rx, _) = make_conn();
        join(&registry, &a, "t1", "ada").await;
        join(&registry, &b, "t1", "ben").await;
        join(&registry, &c, "t1", "cat").await;
        // Drain acks.
        let _ = (a_rx.try_recv(), b_rx.try_recv(), c_rx.try_recv());

        handle_text(
            &registry,
            &a,
            r#"{"type":"position","x":10.0,"y":20.0,"vx":1.5,"ts":777}"#,
        )
        .await;

        for rx in [&mut b_rx, &mut c_rx] {
            let frame = recv_json(rx);
            assert_eq!(frame["type"], "position");
            assert_eq!(frame["member"], "ada");
            assert_eq!(frame["x"], 10.0);
            assert_eq!(frame["y"], 20.0);
            assert_eq!(frame["vx"], 1.5);
            assert_eq!(frame["vy"], 0.0);
            assert_eq!(frame["ts"], 777);
        }
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_ts_is_stamped_by_relay() {
        let registry = Arc::new(Registry::new());
        let (a, _a_rx, _) = make_conn();
        let (b, mut b_rx, _) = make_conn();
        join(&registry, &a, "t1", "ada").await;
        join(&registry, &b, "t1", "ben").await;
        let _ = b_rx.try_recv();

        handle_text(&registry, &a, r#"{"type":"position","x":1.0,"y":2.0}"#).await;

        let frame = recv_json(&mut b_rx);
        assert!(frame["ts"].as_i64().unwrap() > 1_704_067_200_000);
    }

    #[tokio::test]
    async fn position_before_join_is_dropped() {
        let registry = Arc::new(Registry::new());
        let (conn, mut rx, _) = make_conn();

        handle_text(&registry, &conn, r#"{"type":"position","x":1.0,"y":2.0}"#).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn upgrade_fans_out_with_sender_stamp() {
        let registry = Arc::new(Registry::new());
        let (a, _a_rx, _) = make_conn();
        let (b, mut b_rx, _) = make_conn();
        join(&registry, &a, "t1", "ada").await;
        join(&registry, &b, "t1", "ben").await;
        let _ = b_rx.try_recv();

        handle_text(
            &registry,
            &a,
            r#"{"type":"upgrade","target":"booster","active":true}"#,
        )
        .await;

        let frame = recv_json(&mut b_rx);
        assert_eq!(frame["type"], "upgrade");
        assert_eq!(frame["member"], "ada");
        assert_eq!(frame["target"], "booster");
        assert_eq!(frame["active"], true);
    }

    #[tokio::test]
    async fn takeover_retires_previous_connection() {
        let registry = Arc::new(Registry::new());
        let (old, mut old_rx, _) = make_conn();
        let (new, mut new_rx, _) = make_conn();

        join(&registry, &old, "t1", "ada").await;
        let _ = old_rx.try_recv();
        join(&registry, &new, "t1", "ada").await;

        assert!(old.is_closing());
        assert!(!new.is_closing());
        assert_eq!(registry.room_size("t1").await, Some(1));
        assert_eq!(recv_json(&mut new_rx)["type"], "joined");
    }

    #[tokio::test]
    async fn bad_frames_do_not_end_the_session() {
        let registry = Arc::new(Registry::new());
        let (conn, mut rx, _) = make_conn();

        handle_text(&registry, &conn, "{this is not json").await;
        handle_text(&registry, &conn, r#"{"type":"emote","name":"wave"}"#).await;
        handle_text(&registry, &conn, r#"{"type":"position","x":"ten","y":2}"#).await;

        // The connection is still usable afterwards.
        join(&registry, &conn, "t1", "ada").await;
        assert_eq!(recv_json(&mut rx)["type"], "joined");
    }
}
