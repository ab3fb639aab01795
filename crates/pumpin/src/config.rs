//! Configuration management for the pumpin server.
//!
//! Settings are read from a TOML file (written out with defaults when
//! missing), overridden by command-line flags, validated, and finally
//! resolved into the library-level [`ServerConfig`].

use crate::cli::CliArgs;
use serde::{Deserialize, Serialize};
use session_server::config::DEFAULT_PORT;
use session_server::ServerConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub extensions: ExtensionSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Listener and session lifetime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// IP address to listen on
    pub bind_ip: String,
    /// TCP port to listen on
    pub port: u16,
    /// Seconds of silence after which a session is evicted
    pub session_timeout_secs: u64,
    /// Seconds between timeout sweeps
    pub sweep_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            session_timeout_secs: 10,
            sweep_interval_secs: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding per-player `.dat` records
    pub player_data_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            player_data_dir: "player-data".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionSettings {
    /// Directory scanned for extension packages
    pub directory: String,
    /// Whether to load every package found in `directory` on startup
    pub auto_load: bool,
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            directory: "extensions".to_string(),
            auto_load: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is created
    /// at `path` and the defaults are returned.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            Ok(toml::from_str(&content)?)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file settings.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(bind_ip) = &args.bind_ip {
            self.server.bind_ip = bind_ip.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if args.no_extensions {
            self.extensions.auto_load = false;
        }
    }

    /// Checks the configuration for values the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_ip.parse::<IpAddr>().is_err() {
            return Err(format!("Invalid bind IP: {}", self.server.bind_ip));
        }
        if self.server.session_timeout_secs == 0 {
            return Err("Session timeout must be at least one second".to_string());
        }
        if self.server.sweep_interval_secs == 0 {
            return Err("Sweep interval must be at least one second".to_string());
        }
        if self.storage.player_data_dir.is_empty() {
            return Err("Player data directory cannot be empty".to_string());
        }
        if self.extensions.directory.is_empty() {
            return Err("Extension directory cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    /// Resolves the settings into the session server's configuration.
    pub fn to_server_config(&self) -> anyhow::Result<ServerConfig> {
        let ip: IpAddr = self.server.bind_ip.parse()?;
        Ok(ServerConfig {
            bind_address: SocketAddr::new(ip, self.server.port),
            session_timeout: Duration::from_secs(self.server.session_timeout_secs),
            sweep_interval: Duration::from_secs(self.server.sweep_interval_secs),
            player_data_dir: PathBuf::from(&self.storage.player_data_dir),
            extensions_dir: PathBuf::from(&self.extensions.directory),
        })
    }
}
