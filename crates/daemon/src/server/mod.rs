//! WebSocket server.
//!
//! [`TermServer`] accepts TCP connections, upgrades them to WebSocket and
//! hands each one to a connection handler running on its own task. The
//! request path selects the endpoint; unknown paths are refused during the
//! handshake.

mod connection;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::session::SessionRegistry;

pub use connection::handle_connection;

/// Server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not accepting connections.
    Stopped,
    /// Accepting connections.
    Running,
    /// Destroying sessions before stopping.
    ShuttingDown,
}

/// WebSocket server exposing the command and status endpoints.
pub struct TermServer {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    channel_capacity: usize,
    state: Arc<RwLock<ServerState>>,
}

impl TermServer {
    /// Binds the listener to the configured address.
    pub async fn bind(config: &Config, registry: Arc<SessionRegistry>) -> Result<Self> {
        let addr = config
            .server
            .socket_addr()
            .context("Invalid listen address")?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        Ok(Self {
            listener,
            registry,
            channel_capacity: config.session.channel_capacity,
            state: Arc::new(RwLock::new(ServerState::Stopped)),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Returns the current state.
    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accepts connections until `shutdown` is cancelled, then destroys
    /// every session.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != ServerState::Stopped {
                anyhow::bail!("Server is already running");
            }
            *state = ServerState::Running;
        }

        info!(addr = ?self.listener.local_addr().ok(), "Server running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Server received shutdown signal");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Accepted connection");
                        let registry = Arc::clone(&self.registry);
                        let capacity = self.channel_capacity;
                        let token = shutdown.child_token();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, registry, capacity, token).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                },
            }
        }

        *self.state.write().await = ServerState::ShuttingDown;
        self.registry.shutdown().await;
        *self.state.write().await = ServerState::Stopped;

        info!("Server stopped");
        Ok(())
    }
}
