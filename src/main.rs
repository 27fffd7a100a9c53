// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// This is the main runtime for the session relay.
//
// Responsibilities:
// - Initialize logging
// - Load configuration from the environment
// - Start the liveness supervisor and the stats reporter
// - Run the WebSocket accept loop until the listener fails
//
use std::sync::Arc;

use taskorbit_websocket_relay::config::Config;
use taskorbit_websocket_relay::liveness::LivenessSupervisor;
use taskorbit_websocket_relay::registry::Registry;
use taskorbit_websocket_relay::server::{RelayServer, STATS_INTERVAL, run_stats};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::from_env();
    let registry = Arc::new(Registry::new());

    // --------------------------------------------------------
    // Background loops
    //
    // Liveness probing and the stats line tick on their own;
    // neither blocks, or is blocked by, message routing.
    // --------------------------------------------------------
    tokio::spawn(LivenessSupervisor::new(registry.clone()).run());
    tokio::spawn(run_stats(registry.clone(), STATS_INTERVAL));

    // --------------------------------------------------------
    // Accept loop
    //
    // A bind failure is fatal: nothing can be served without
    // the listener. Everything after bind runs forever.
    // --------------------------------------------------------
    let server = RelayServer::bind(&config, registry).await?;
    server.run().await
}
