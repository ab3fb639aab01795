//! The session server.
//!
//! Owns the listening socket and the shutdown channel, and drives the serial
//! accept loop against a shared [`ServerContext`].

use super::handlers::handle_connection;
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::ServerError;
use crate::sweeper::spawn_timeout_sweeper;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Pending-connection backlog of the listening socket.
const LISTEN_BACKLOG: i32 = 50;

/// The protocol dispatcher.
///
/// Connections are handled one at a time: each accepted connection is read,
/// applied and answered before the next `accept`. A stalled client therefore
/// holds up the listener until it closes its side.
pub struct SessionServer {
    /// Server configuration settings
    config: ServerConfig,

    /// State shared with the sweeper, the facade and the console
    context: Arc<ServerContext>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl SessionServer {
    /// Creates a server with a fresh context built from `config`.
    pub fn new(config: ServerConfig) -> Self {
        let context = Arc::new(ServerContext::new(&config));
        Self::with_context(config, context)
    }

    /// Creates a server around an existing context.
    pub fn with_context(config: ServerConfig, context: Arc<ServerContext>) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            config,
            context,
            shutdown_sender,
        }
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.context.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Starts the sweeper, binds the listener and serves until shutdown.
    ///
    /// A bind failure on the configured address falls back to all interfaces
    /// on the same port; if that fails too the error is returned and only
    /// the listener is lost.
    ///
    /// # Returns
    ///
    /// `Ok(())` once [`shutdown`](Self::shutdown) stops the accept loop, or a
    /// [`ServerError::Network`] if no address could be bound.
    pub async fn start(&self) -> Result<(), ServerError> {
        spawn_timeout_sweeper(
            self.context.clone(),
            self.config.sweep_interval,
            self.config.session_timeout,
            self.shutdown_sender.subscribe(),
        );

        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Binds the configured address, falling back to `0.0.0.0:<port>`.
    ///
    /// The socket is created with `SO_REUSEADDR` and a backlog of 50 before
    /// it is handed to tokio.
    ///
    /// # Returns
    ///
    /// The bound listener, or the error from the fallback address when both
    /// attempts fail.
    pub fn bind(&self) -> Result<TcpListener, ServerError> {
        let preferred = self.config.bind_address;
        match bind_listener(preferred) {
            Ok(listener) => Ok(listener),
            Err(e) => {
                let fallback = SocketAddr::from(([0, 0, 0, 0], preferred.port()));
                warn!("⚠️ Could not bind to {} ({}). Falling back to {}", preferred, e, fallback);
                bind_listener(fallback)
            }
        }
    }

    /// Runs the accept loop on `listener` until [`shutdown`](Self::shutdown).
    ///
    /// # Arguments
    ///
    /// * `listener` - An already bound listener, usually from [`bind`](Self::bind).
    ///   Tests pass one bound to an ephemeral port.
    ///
    /// # Returns
    ///
    /// `Ok(())` after the shutdown signal. Per-connection failures are logged
    /// and never end the loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener
            .local_addr()
            .map_err(|e| ServerError::Network(format!("Listener has no local address: {e}")))?;
        info!("🚀 Session server listening on {}", local);

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        if let Err(e) = handle_connection(stream, addr.ip(), &self.context).await {
                            warn!("Error handling client {}: {}", addr.ip(), e);
                        }
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                _ = shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("🔒 Listener on {} closed", local);
        Ok(())
    }

    /// Signals the accept loop and the sweeper to stop.
    pub fn shutdown(&self) {
        info!("🛑 Shutting down session server...");
        let _ = self.shutdown_sender.send(());
    }
}

fn bind_listener(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
    socket.set_reuse_address(true).ok();

    socket
        .bind(&addr.into())
        .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

    let std_listener: StdTcpListener = socket.into();
    std_listener
        .set_nonblocking(true)
        .map_err(|e| ServerError::Network(format!("Failed to set non-blocking: {e}")))?;

    TcpListener::from_std(std_listener)
        .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))
}
