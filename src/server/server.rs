//! # Server
//!
//! Owns the listener, the channel/extension registries, and the set of
//! live connections. Registries are explicit instances handed to the
//! server before it starts; each accepted socket gets fresh channel and
//! hub instances stamped from them, so nothing is shared process-wide.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::channels::ext::ExtensionChannelSpec;
use crate::channels::system::SystemChannelSpec;
use crate::error::{ProtocolError, Result};
use crate::protocol::channel::{Channel, ChannelSpec};
use crate::protocol::extension::{ExtensionHub, ExtensionSpec};
use crate::room::broadcast::{BroadcastCoordinator, ConnectionMap};
use crate::room::ZoneView;
use crate::server::connection::{self, Connection, ConnectionParams};

/// Lifecycle notifications for embedders. Handshake failures produce no
/// event; such a connection never existed.
#[derive(Clone)]
pub enum ServerEvent {
    Connected(Arc<Connection>),
    Disconnected(Arc<Connection>),
}

/// The protocol server.
pub struct Server {
    config: Arc<ServerConfig>,
    zone: Arc<dyn ZoneView>,
    channel_specs: Vec<Arc<dyn ChannelSpec>>,
    extension_specs: Vec<Arc<dyn ExtensionSpec>>,
    connections: ConnectionMap,
    events: broadcast::Sender<ServerEvent>,
    next_id: AtomicI32,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Server {
    /// Creates a server with the default system and extension channels
    /// registered. The zone view is the read-only window into the
    /// embedder's room model.
    pub fn new(config: ServerConfig, zone: Arc<dyn ZoneView>) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (events, _) = broadcast::channel(64);
        Self {
            config: Arc::new(config),
            zone,
            channel_specs: vec![
                Arc::new(SystemChannelSpec::new()),
                Arc::new(ExtensionChannelSpec::new()),
            ],
            extension_specs: Vec::new(),
            connections: Arc::new(RwLock::new(HashMap::new())),
            events,
            next_id: AtomicI32::new(1),
            shutdown_tx,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
        }
    }

    /// Registers a channel spec, replacing any spec with the same id.
    /// Must be called before [`Server::start`].
    pub fn register_channel(&mut self, spec: impl ChannelSpec) {
        let id = spec.channel_id();
        self.channel_specs.retain(|s| s.channel_id() != id);
        self.channel_specs.push(Arc::new(spec));
    }

    /// Registers an extension hub spec. Every connection gets its own hub
    /// instance; inbound extension messages are offered to all of them.
    pub fn register_extension(&mut self, spec: impl ExtensionSpec) {
        self.extension_specs.push(Arc::new(spec));
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Subscribes to connect/disconnect events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// A coordinator wired to this server's live-connection set.
    pub fn coordinator(&self) -> BroadcastCoordinator {
        BroadcastCoordinator::new(Arc::clone(&self.connections), Arc::clone(&self.zone))
    }

    /// Snapshot of the live connections.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let map = match self.connections.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.values().cloned().collect()
    }

    /// The live connection with the given id.
    pub fn connection(&self, id: i32) -> Option<Arc<Connection>> {
        let map = match self.connections.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(&id).cloned()
    }

    /// Signals the accept loop to begin a graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!(address = %self.config.bind_address, "Listening");
        self.serve(listener).await
    }

    /// Serves on an already-bound listener until shutdown. Useful when
    /// the caller needs the ephemeral port before accepting.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = {
            let mut slot = match self.shutdown_rx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take().ok_or_else(|| {
                ProtocolError::ConfigError("server was already started".into())
            })?
        };

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Waiting for connections to close...");
                    self.drain_connections().await;
                    return Ok(());
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.accept(stream, addr),
                        Err(e) => error!(error = %e, "Error accepting connection"),
                    }
                }
            }
        }
    }

    fn accept(self: &Arc<Self>, stream: tokio::net::TcpStream, addr: std::net::SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let params = ConnectionParams {
            id,
            config: Arc::clone(&self.config),
            channels: self
                .channel_specs
                .iter()
                .map(|spec| Channel::from_spec(spec.as_ref()))
                .collect(),
            extensions: self
                .extension_specs
                .iter()
                .map(|spec| ExtensionHub::from_spec(spec.as_ref()))
                .collect(),
        };
        let connections = Arc::clone(&self.connections);
        let events = self.events.clone();

        tokio::spawn(async move {
            match connection::establish(stream, addr, params).await {
                Ok((conn, driver)) => {
                    insert(&connections, id, Arc::clone(&conn));
                    let _ = events.send(ServerEvent::Connected(Arc::clone(&conn)));
                    driver.run().await;
                    remove(&connections, id);
                    let _ = events.send(ServerEvent::Disconnected(conn));
                }
                // Per the lifecycle contract this client never connected,
                // so no disconnect event fires.
                Err(e) => warn!(peer = %addr, error = %e, "Handshake failed"),
            }
        });
    }

    /// Asks every live connection to close and waits, bounded, for the
    /// drivers to drain the set.
    async fn drain_connections(&self) {
        for conn in self.connections() {
            conn.disconnect();
        }

        let timeout = tokio::time::sleep(self.config.shutdown_timeout);
        tokio::pin!(timeout);
        loop {
            tokio::select! {
                _ = &mut timeout => {
                    warn!("Shutdown timeout reached, forcing exit");
                    return;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    let remaining = self.connections().len();
                    if remaining == 0 {
                        info!("All connections closed, shutting down");
                        return;
                    }
                    info!(connections = remaining, "Waiting for connections to close");
                }
            }
        }
    }
}

fn insert(connections: &ConnectionMap, id: i32, conn: Arc<Connection>) {
    let mut map = match connections.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    map.insert(id, conn);
}

fn remove(connections: &ConnectionMap, id: i32) {
    let mut map = match connections.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    map.remove(&id);
}
