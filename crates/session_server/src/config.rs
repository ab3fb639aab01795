//! Server configuration types and defaults.
//!
//! The binary resolves its TOML file and command-line overrides into a
//! [`ServerConfig`] before constructing any server component.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default port the listener binds to.
pub const DEFAULT_PORT: u16 = 19299;

/// Resolved configuration for the session server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Preferred listen address. Falls back to all interfaces on the same
    /// port when binding here fails.
    pub bind_address: SocketAddr,

    /// A session not heard from for longer than this is evicted
    pub session_timeout: Duration,

    /// How often the timeout sweeper scans sessions
    pub sweep_interval: Duration,

    /// Directory holding one `<steamID>.dat` record per player
    pub player_data_dir: PathBuf,

    /// Directory scanned for extension packages; also the root of every
    /// extension's data directory
    pub extensions_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            session_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(2),
            player_data_dir: PathBuf::from("player-data"),
            extensions_dir: PathBuf::from("extensions"),
        }
    }
}
