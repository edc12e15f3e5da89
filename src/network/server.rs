//! Handshake server
//!
//! Accepts peers and admits only those whose schema hash equals ours.
//! Admitted peers must send a heartbeat at least every
//! `IDLE_HEARTBEATS` heartbeat intervals or they are dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::connection::{Connection, ConnectionError, ConnectionHandle};
use super::NetworkConfig;
use crate::protocol::{error_codes, Message, PeerInfo};
use crate::schema::SchemaHash;

/// Heartbeat intervals a peer may stay silent before it is dropped.
/// A zero heartbeat interval disables the idle timeout.
pub const IDLE_HEARTBEATS: u32 = 3;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Started {
        bind_addr: SocketAddr,
    },
    /// A peer passed the schema check
    PeerAccepted {
        addr: SocketAddr,
        peer: PeerInfo,
    },
    /// A peer failed the handshake, usually with a different schema hash
    PeerRejected {
        addr: SocketAddr,
        reason: String,
    },
    PeerDisconnected {
        addr: SocketAddr,
        reason: String,
    },
    Stopped,
}

/// An admitted peer
#[derive(Debug, Clone)]
pub struct PeerSession {
    pub addr: SocketAddr,
    pub peer: PeerInfo,
    pub handle: ConnectionHandle,
}

/// Handshake server
pub struct Server {
    config: NetworkConfig,
    local: PeerInfo,
    schema_hash: SchemaHash,
    peers: Arc<RwLock<HashMap<SocketAddr, PeerSession>>>,
    event_tx: mpsc::Sender<ServerEvent>,
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
    running: Arc<RwLock<bool>>,
}

impl Server {
    pub fn new(config: NetworkConfig, local: PeerInfo, schema_hash: SchemaHash) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            local,
            schema_hash,
            peers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            accept_task: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    pub fn schema_hash(&self) -> SchemaHash {
        self.schema_hash
    }

    /// Bind and start accepting peers; returns the bound address
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(ServerError::AlreadyRunning);
            }
        }

        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        tracing::info!(
            "Server listening on {} (schema hash {})",
            local_addr,
            self.schema_hash
        );

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        let _ = self
            .event_tx
            .send(ServerEvent::Started {
                bind_addr: local_addr,
            })
            .await;

        let peers = self.peers.clone();
        let event_tx = self.event_tx.clone();
        let local = self.local.clone();
        let schema_hash = self.schema_hash;
        let running = self.running.clone();
        let handshake_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let idle_timeout =
            Duration::from_millis(self.config.heartbeat_interval_ms) * IDLE_HEARTBEATS;

        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::debug!("New connection from {}", addr);

                                let ctx = PeerContext {
                                    peers: peers.clone(),
                                    event_tx: event_tx.clone(),
                                    local: local.clone(),
                                    schema_hash,
                                    handshake_timeout,
                                    idle_timeout,
                                };

                                tokio::spawn(async move {
                                    if let Err(e) = handle_peer(stream, addr, ctx).await {
                                        tracing::warn!("Peer {} error: {}", addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            let mut running = running.write().await;
            *running = false;

            let _ = event_tx.send(ServerEvent::Stopped).await;
        });
        self.accept_task = Some(accept_task);

        Ok(local_addr)
    }

    /// Stop accepting and disconnect every peer
    ///
    /// Returns once the listener is closed, so `start` may be called again.
    pub async fn stop(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(ServerError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Accept task ended abnormally: {}", e);
            }
        }
        *self.running.write().await = false;

        let peers = self.peers.read().await;
        for session in peers.values().filter(|s| s.handle.is_connected()) {
            let _ = session
                .handle
                .send(Message::Disconnect {
                    reason: "Server shutting down".to_string(),
                })
                .await;
        }

        Ok(())
    }

    /// Currently admitted peers
    pub async fn peers(&self) -> Vec<PeerSession> {
        let peers = self.peers.read().await;
        peers.values().cloned().collect()
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

struct PeerContext {
    peers: Arc<RwLock<HashMap<SocketAddr, PeerSession>>>,
    event_tx: mpsc::Sender<ServerEvent>,
    local: PeerInfo,
    schema_hash: SchemaHash,
    handshake_timeout: Duration,
    idle_timeout: Duration,
}

async fn handle_peer(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: PeerContext,
) -> Result<(), ConnectionError> {
    let mut conn = Connection::new(stream, addr);

    let handshake = tokio::time::timeout(
        ctx.handshake_timeout,
        conn.handshake_server(&ctx.local, ctx.schema_hash),
    )
    .await
    .unwrap_or(Err(ConnectionError::Timeout));

    let peer = match handshake {
        Ok(peer) => peer,
        Err(e) => {
            tracing::warn!("Rejected peer {}: {}", addr, e);
            let _ = ctx
                .event_tx
                .send(ServerEvent::PeerRejected {
                    addr,
                    reason: e.to_string(),
                })
                .await;
            return Err(e);
        }
    };

    let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(64);
    let handle = ConnectionHandle::new(msg_tx);

    {
        let mut peers = ctx.peers.write().await;
        peers.insert(
            addr,
            PeerSession {
                addr,
                peer: peer.clone(),
                handle: handle.clone(),
            },
        );
    }

    let _ = ctx
        .event_tx
        .send(ServerEvent::PeerAccepted { addr, peer })
        .await;

    let disconnect_reason = loop {
        let idle_left = ctx.idle_timeout.saturating_sub(conn.idle_time());

        tokio::select! {
            result = conn.recv() => {
                match result {
                    Ok(Some(frame)) => match frame.message {
                        Message::Disconnect { reason } => break reason,
                        Message::Heartbeat { timestamp } => {
                            if let Err(e) = conn.send(&Message::HeartbeatAck { timestamp }).await {
                                break format!("Send error: {}", e);
                            }
                        }
                        other => {
                            tracing::warn!("Unexpected message {:#x} from {}", other.type_id(), addr);
                            let _ = conn.send(&Message::Error {
                                code: error_codes::UNEXPECTED_MESSAGE,
                                message: format!("Unexpected message type {:#x}", other.type_id()),
                            }).await;
                        }
                    },
                    Ok(None) => break "Connection closed".to_string(),
                    Err(e) => break format!("Error: {}", e),
                }
            }

            Some(message) = msg_rx.recv() => {
                let closing = matches!(message, Message::Disconnect { .. });
                if let Err(e) = conn.send(&message).await {
                    break format!("Send error: {}", e);
                }
                if closing {
                    break "Server shutting down".to_string();
                }
            }

            _ = tokio::time::sleep(idle_left), if !ctx.idle_timeout.is_zero() => {
                if conn.idle_time() >= ctx.idle_timeout {
                    tracing::warn!("Peer {} silent for {:?}, dropping", addr, conn.idle_time());
                    break "Idle timeout".to_string();
                }
            }
        }
    };

    handle.mark_disconnected();

    {
        let mut peers = ctx.peers.write().await;
        peers.remove(&addr);
    }

    tracing::info!("Peer {} disconnected: {}", addr, disconnect_reason);
    let _ = ctx
        .event_tx
        .send(ServerEvent::PeerDisconnected {
            addr,
            reason: disconnect_reason,
        })
        .await;

    Ok(())
}
