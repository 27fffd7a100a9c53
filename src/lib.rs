// ============================================================
// TaskOrbit WebSocket Relay
// Rooms, peer forwarding, liveness probing, spatial placement
// ============================================================

pub mod config;
pub mod liveness;
pub mod metrics;
pub mod placement;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod util;
