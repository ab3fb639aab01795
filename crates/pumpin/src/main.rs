//! pumpin server entry point.
//!
//! Loads configuration, installs logging, builds the shared server context
//! and the extension registry, then runs the listener, the operator console
//! and signal handling until shutdown.

mod cli;
mod config;
mod console;
mod logging;
mod signals;

use anyhow::Context as _;
use cli::CliArgs;
use config::AppConfig;
use console::{Console, ConsoleExit};
use extension_system::{ExtensionManager, NativeLoader};
use session_server::{CoreServerApi, ServerContext, SessionServer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long shutdown waits for the listener task to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// The running server process: configuration, listener and extensions.
pub struct Application {
    config: AppConfig,
    server: Arc<SessionServer>,
    extensions: Arc<ExtensionManager>,
}

impl Application {
    /// Builds the application from command-line arguments.
    ///
    /// Loads (or creates) the configuration file, applies the CLI overrides,
    /// installs logging and wires the shared context into the listener and
    /// the extension registry. Nothing is bound or loaded yet.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Returns
    ///
    /// The ready-to-run application, or an error if the configuration is
    /// unreadable or invalid or logging could not be installed.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        // Configuration first; logging depends on it.
        let mut config = AppConfig::load_from_file(&args.config_path)
            .await
            .with_context(|| format!("Failed to load {}", args.config_path.display()))?;
        config.apply_overrides(&args);
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

        let forwarder = logging::setup_logging(&config.logging)?;

        let server_config = config.to_server_config()?;
        let context = Arc::new(ServerContext::new(&server_config));
        let api = Arc::new(CoreServerApi::new(context.clone()));
        let extensions = Arc::new(ExtensionManager::new(
            Arc::new(NativeLoader),
            api,
            server_config.extensions_dir.clone(),
        ));
        forwarder.attach(&extensions);

        let server = Arc::new(SessionServer::with_context(server_config, context));

        info!("🚀 pumpin server v{}", env!("CARGO_PKG_VERSION"));
        info!(
            "📂 Config: {} | Extensions: {} | Player data: {}",
            args.config_path.display(),
            config.extensions.directory,
            config.storage.player_data_dir
        );

        Ok(Self {
            config,
            server,
            extensions,
        })
    }

    /// Loads extensions, starts the listener and runs the operator console
    /// until `stop` or a termination signal, then shuts everything down.
    ///
    /// A listener that fails to start is logged; the console keeps running.
    ///
    /// # Returns
    ///
    /// `Ok(())` after a clean shutdown, or an error if signal handling could
    /// not be installed.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        let server_config = self.server.config();
        info!("  🌐 Listen: {}", server_config.bind_address);
        info!(
            "  ⏱️ Session timeout: {:?} (swept every {:?})",
            server_config.session_timeout, server_config.sweep_interval
        );

        if self.config.extensions.auto_load {
            self.extensions.load_all();
        } else {
            info!("Extension auto-load disabled");
        }

        // A listener failure is logged; the console and extensions keep running.
        let server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!("❌ Server error: {}", e);
                }
            })
        };

        let console = Console::new(self.server.context(), self.extensions.clone());
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());

        info!("✅ pumpin server is running. Type 'help' for commands, Ctrl+C to stop.");

        tokio::select! {
            result = signals::shutdown_signal() => {
                if let Err(e) = result {
                    warn!("Signal handling failed: {}", e);
                }
            }
            exit = console.run(stdin) => match exit {
                Ok(ConsoleExit::Stop) => {}
                Ok(ConsoleExit::Closed) => {
                    info!("Console input closed; waiting for a termination signal");
                    signals::shutdown_signal().await?;
                }
                Err(e) => {
                    error!("❌ {}", e);
                    signals::shutdown_signal().await?;
                }
            },
        }

        self.shutdown(server_handle).await;
        Ok(())
    }

    async fn shutdown(&self, server_handle: tokio::task::JoinHandle<()>) {
        info!("🛑 Shutting down...");
        self.extensions.disable_all();
        self.server.shutdown();

        if tokio::time::timeout(SHUTDOWN_GRACE, server_handle).await.is_err() {
            warn!("Listener did not stop within {:?}", SHUTDOWN_GRACE);
        }
        info!("👋 pumpin server stopped");
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    let code = match Application::new(args).await {
        Ok(app) => match app.run().await {
            Ok(()) => 0,
            Err(e) => {
                error!("❌ Application error: {:?}", e);
                1
            }
        },
        Err(e) => {
            eprintln!("❌ Failed to start application: {e:?}");
            1
        }
    };

    // The stdin reader thread would otherwise keep the runtime alive.
    std::process::exit(code);
}
