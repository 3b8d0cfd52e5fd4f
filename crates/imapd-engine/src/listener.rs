//! TCP accept loop and connection supervision.
//!
//! [`Server`] binds a listener, admits connections under a semaphore so
//! the configured ceiling holds even under accept bursts, spawns one task
//! per connection, and fans a shutdown signal out to every task through a
//! watch channel. Each live connection is tracked in a registry keyed by
//! a monotonically assigned id, so logs can correlate a connection's whole
//! lifetime.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore, watch};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::handler::ImapHandler;

/// Live-connection bookkeeping shared between the accept loop and tasks.
#[derive(Debug, Default)]
struct ConnectionRegistry {
    next_id: AtomicU64,
    peers: Mutex<HashMap<u64, SocketAddr>>,
}

impl ConnectionRegistry {
    async fn register(&self, peer: SocketAddr) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.peers.lock().await.insert(id, peer);
        id
    }

    async fn deregister(&self, id: u64) {
        self.peers.lock().await.remove(&id);
    }

    async fn live(&self) -> usize {
        self.peers.lock().await.len()
    }
}

/// The listening server: accept loop plus connection supervision.
pub struct Server<H> {
    config: ServerConfig,
    handler: Arc<H>,
    registry: Arc<ConnectionRegistry>,
    permits: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<H: ImapHandler> Server<H> {
    /// Creates a server over `handler` with the given configuration.
    #[must_use]
    pub fn new(config: ServerConfig, handler: Arc<H>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            handler,
            registry: Arc::new(ConnectionRegistry::default()),
            permits,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Returns a handle that triggers graceful shutdown when invoked.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Binds the configured address and serves until shut down.
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!(addr = %addr, max_connections = self.config.max_connections, "listening");
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            // Hold a permit before accepting so the ceiling also bounds
            // the accept backlog we are willing to take on.
            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => {
                    // The semaphore is never closed while the server runs.
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => return Ok(()),
                    }
                }
                _ = shutdown.changed() => break,
            };
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };
            self.spawn_connection(stream, peer, permit).await;
        }
        // Every connection task holds a permit until it finishes, so
        // reclaiming the full set means all BYEs have been flushed.
        let live = self.registry.live().await;
        info!(live, "listener stopping, draining connections");
        let all = u32::try_from(self.config.max_connections).unwrap_or(u32::MAX);
        let _drained = self.permits.acquire_many(all).await;
        info!("all connections drained");
        Ok(())
    }

    async fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        let id = self.registry.register(peer).await;
        let live = self.registry.live().await;
        info!(id, peer = %peer, live, "connection accepted");

        let connection = Connection::new(
            stream,
            peer.to_string(),
            &self.config,
            Arc::clone(&self.handler),
            self.shutdown_rx.clone(),
        );
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            if let Err(err) = connection.run().await {
                error!(id, peer = %peer, error = %err, "connection failed");
            }
            registry.deregister(id).await;
            drop(permit);
        });
    }
}

/// Cloneable handle that signals graceful shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Signals every connection and the accept loop to stop.
    pub fn shutdown(&self) {
        // Receivers may already be gone during teardown.
        let _ = self.tx.send(true);
    }
}
