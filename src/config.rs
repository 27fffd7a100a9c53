// ------------------------------------------------------------
// Runtime configuration
// ------------------------------------------------------------
//
// The relay is configured entirely from the environment.
//
// It defines:
// - The TCP port the WebSocket listener binds to
//
// Notes:
// - An unset or unparseable port falls back to the default so a
//   bare `cargo run` always comes up on a known port.
//

/// Port used when `RELAY_PORT` is unset or invalid.
pub const DEFAULT_PORT: u16 = 8080;

/// Environment variable holding the listen port.
pub const PORT_ENV: &str = "RELAY_PORT";

#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the WebSocket listener binds to
    pub port: u16,
}

impl Config {
    /// Load the configuration from the process environment.
    pub fn from_env() -> Self {
        Config {
            port: parse_port(std::env::var(PORT_ENV).ok().as_deref()),
        }
    }
}

/// Parse a port value, falling back to [`DEFAULT_PORT`] when the
/// variable is absent or not a valid u16.
fn parse_port(raw: Option<&str>) -> u16 {
    match raw {
        Some(s) => match s.trim().parse::<u16>() {
            Ok(p) => p,
            Err(_) => {
                log::warn!("[CONFIG] invalid {}={:?}, using {}", PORT_ENV, s, DEFAULT_PORT);
                DEFAULT_PORT
            }
        },
        None => DEFAULT_PORT,
    }
}
