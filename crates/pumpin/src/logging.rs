//! Logging setup.
//!
//! `RUST_LOG` takes precedence over the configured level. Besides the
//! console output every event is also offered to loaded extensions through
//! an [`ExtensionLogLayer`].

use crate::config::LoggingSettings;
use extension_system::{ExtensionLogLayer, LogForwarder};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. Returns the forwarder the extension
/// registry has to be attached to once it exists.
pub fn setup_logging(config: &LoggingSettings) -> anyhow::Result<LogForwarder> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let forwarder = LogForwarder::new();
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(ExtensionLogLayer::new(forwarder.clone()));

    if config.json_format {
        registry
            .with(fmt::layer().json().with_file(false).with_line_number(false))
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(forwarder)
}
