use serde::{Deserialize, Serialize};

/// Message envelope for everything a client may send to the relay.
///
/// The `type` field selects the variant and is used for routing
/// (e.g. "join", "position", "upgrade").
///
/// DESIGN NOTES:
/// - Unrecognized values of `type` deserialize into `Unknown` instead
///   of failing, so a newer client cannot kill its own connection by
///   sending a kind this build does not understand.
/// - Structurally invalid JSON still fails to parse and is counted
///   separately from unknown kinds.
///
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEnvelope {
    Join(JoinRequest),
    Position(PositionUpdate),
    Upgrade(UpgradeToggle),

    /// Any `type` value this build does not know.
    #[serde(other)]
    Unknown,
}

/// Message envelope for everything the relay sends to clients.
///
/// The `type` field is automatically added by serde and mirrors the
/// inbound vocabulary ("joined", "position", "upgrade").
///
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEnvelope {
    Joined(JoinAck),
    Position(PositionBroadcast),
    Upgrade(UpgradeBroadcast),
}

// ------------------------------------------------------------
// Join request
// ------------------------------------------------------------
//
// First message a client must send. Binds the connection to a
// room and a member name for its whole lifetime.
//
// IMPORTANT:
// - Both fields must be non-empty; the relay ignores join
//   requests with blank identifiers.
// - A second join on the same connection is ignored.
//
#[derive(Debug, Deserialize, Clone)]
pub struct JoinRequest {
    /// Room identifier chosen by the client
    pub room: String,

    /// Member name, unique within the room
    pub member: String,
}

// ------------------------------------------------------------
// Position update
// ------------------------------------------------------------
//
// Continuous movement sample forwarded verbatim to room peers.
//
// The relay never inspects or clamps coordinates; it only stamps
// the sender identity and fills in a timestamp when missing.
//
#[derive(Debug, Deserialize, Clone)]
pub struct PositionUpdate {
    /// Absolute x coordinate in world units
    pub x: f64,

    /// Absolute y coordinate in world units
    pub y: f64,

    /// Velocity x component, defaults to 0 when omitted
    #[serde(default)]
    pub vx: f64,

    /// Velocity y component, defaults to 0 when omitted
    #[serde(default)]
    pub vy: f64,

    /// Client-side timestamp in milliseconds since Unix epoch.
    ///
    /// When absent the relay stamps its own clock at forward time.
    pub ts: Option<i64>,
}

// ------------------------------------------------------------
// Activity flag toggle
// ------------------------------------------------------------
//
// Marks a named target as active or inactive for the sender.
// The relay treats `target` as an opaque label.
//
#[derive(Debug, Deserialize, Clone)]
pub struct UpgradeToggle {
    /// Name of the thing being toggled
    pub target: String,

    /// New state of the flag
    pub active: bool,
}

// ------------------------------------------------------------
// Join acknowledgement
// ------------------------------------------------------------
//
// Sent only to the joining client, confirming the identity the
// relay bound to the connection.
//
#[derive(Debug, Serialize, Clone)]
pub struct JoinAck {
    /// Room the connection was placed in
    pub room: String,

    /// Member name the relay will stamp on forwarded traffic
    pub member: String,

    /// Server timestamp of the join in milliseconds
    pub ts: i64,
}

// ------------------------------------------------------------
// Position broadcast
// ------------------------------------------------------------
//
// A peer's position update with the sender identity stamped in.
// Receivers must never trust a member field supplied by the
// sender; this struct is built exclusively from relay state.
//
#[derive(Debug, Serialize, Clone)]
pub struct PositionBroadcast {
    /// Member name of the sender
    pub member: String,

    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,

    /// Sender timestamp, or the relay clock when the sender
    /// omitted one
    pub ts: i64,
}

// ------------------------------------------------------------
// Activity flag broadcast
// ------------------------------------------------------------
//
#[derive(Debug, Serialize, Clone)]
pub struct UpgradeBroadcast {
    /// Member name of the sender
    pub member: String,

    pub target: String,
    pub active: bool,
}
