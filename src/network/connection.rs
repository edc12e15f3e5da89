//! Connection handling
//!
//! Manages one peer connection:
//! - Message encoding/decoding
//! - The schema hash handshake
//! - Heartbeats and idle tracking

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::protocol::{CodecError, Decoder, Encoder, Frame, Message, PeerInfo};
use crate::schema::SchemaHash;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    #[error("Connection closed")]
    Closed,

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Schema hash mismatch: local={local}, remote={remote}")]
    HashMismatch {
        local: SchemaHash,
        remote: SchemaHash,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Send channel closed")]
    SendChannelClosed,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// State of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connection established, awaiting handshake
    Connecting,
    /// Handshake complete, schemas agree
    Connected,
    /// Connection is closing gracefully
    Closing,
    /// Connection has been closed
    Closed,
}

/// A connection to a remote peer
pub struct Connection {
    remote_addr: SocketAddr,
    stream: TcpStream,
    encoder: Encoder,
    decoder: Decoder,
    read_buf: BytesMut,
    write_buf: BytesMut,
    /// Remote peer info (populated after handshake)
    remote_peer: Option<PeerInfo>,
    state: ConnectionState,
    last_activity: Instant,
}

impl Connection {
    /// Create a new connection from an established TCP stream
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            stream,
            encoder: Encoder::new(),
            decoder: Decoder::new(),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            remote_peer: None,
            state: ConnectionState::Connecting,
            last_activity: Instant::now(),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the remote peer info (if handshake completed)
    pub fn remote_peer(&self) -> Option<&PeerInfo> {
        self.remote_peer.as_ref()
    }

    /// Server side: wait for Hello and accept it only if the hashes match
    pub async fn handshake_server(
        &mut self,
        local: &PeerInfo,
        schema_hash: SchemaHash,
    ) -> ConnectionResult<PeerInfo> {
        let frame = self.recv().await?.ok_or_else(|| {
            ConnectionError::HandshakeFailed("Connection closed during handshake".to_string())
        })?;

        let (remote_hash, remote_peer) = match frame.message {
            Message::Hello {
                schema_hash: remote,
                peer,
            } => (remote, peer),
            other => {
                return Err(ConnectionError::UnexpectedMessage(format!(
                    "expected Hello, got {:#x}",
                    other.type_id()
                )));
            }
        };

        if remote_hash != schema_hash {
            self.send(&Message::HelloAck {
                schema_hash,
                peer: local.clone(),
                accepted: false,
                reason: Some(format!(
                    "Schema hash mismatch: expected {}, got {}",
                    schema_hash, remote_hash
                )),
            })
            .await?;

            return Err(ConnectionError::HashMismatch {
                local: schema_hash,
                remote: remote_hash,
            });
        }

        self.send(&Message::HelloAck {
            schema_hash,
            peer: local.clone(),
            accepted: true,
            reason: None,
        })
        .await?;

        self.state = ConnectionState::Connected;
        tracing::info!(
            "Handshake complete with {} ({}, {})",
            remote_peer.name,
            remote_peer.role,
            self.remote_addr
        );
        self.remote_peer = Some(remote_peer.clone());

        Ok(remote_peer)
    }

    /// Client side: send Hello and wait for the verdict
    pub async fn handshake_client(
        &mut self,
        local: &PeerInfo,
        schema_hash: SchemaHash,
    ) -> ConnectionResult<PeerInfo> {
        self.send(&Message::Hello {
            schema_hash,
            peer: local.clone(),
        })
        .await?;

        let frame = self.recv().await?.ok_or_else(|| {
            ConnectionError::HandshakeFailed("Connection closed during handshake".to_string())
        })?;

        match frame.message {
            Message::HelloAck {
                schema_hash: remote_hash,
                peer,
                accepted,
                reason,
            } => {
                if remote_hash != schema_hash {
                    return Err(ConnectionError::HashMismatch {
                        local: schema_hash,
                        remote: remote_hash,
                    });
                }

                if !accepted {
                    return Err(ConnectionError::HandshakeFailed(
                        reason.unwrap_or_else(|| "Connection rejected".to_string()),
                    ));
                }

                self.state = ConnectionState::Connected;
                tracing::info!(
                    "Handshake complete with {} ({}, {})",
                    peer.name,
                    peer.role,
                    self.remote_addr
                );
                self.remote_peer = Some(peer.clone());

                Ok(peer)
            }
            other => Err(ConnectionError::UnexpectedMessage(format!(
                "expected HelloAck, got {:#x}",
                other.type_id()
            ))),
        }
    }

    /// Send a message
    pub async fn send(&mut self, message: &Message) -> ConnectionResult<()> {
        self.write_buf.clear();
        self.encoder.encode(message, &mut self.write_buf)?;

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.last_activity = Instant::now();
        Ok(())
    }

    /// Receive a message, `None` on a clean close
    pub async fn recv(&mut self) -> ConnectionResult<Option<Frame>> {
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.read_buf)? {
                self.last_activity = Instant::now();
                return Ok(Some(frame));
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                } else {
                    return Err(ConnectionError::Closed);
                }
            }

            self.read_buf.extend_from_slice(&buf[..n]);
        }
    }

    /// Try to receive a message with a timeout
    pub async fn recv_timeout(&mut self, timeout: Duration) -> ConnectionResult<Option<Frame>> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Send a heartbeat and wait for its acknowledgement
    pub async fn ping(&mut self, timeout: Duration) -> ConnectionResult<Duration> {
        let timestamp = unix_micros();
        let start = Instant::now();

        self.send(&Message::Heartbeat { timestamp }).await?;

        let frame = self
            .recv_timeout(timeout)
            .await?
            .ok_or(ConnectionError::Closed)?;

        match frame.message {
            Message::HeartbeatAck { timestamp: ts } if ts == timestamp => Ok(start.elapsed()),
            other => Err(ConnectionError::UnexpectedMessage(format!(
                "expected HeartbeatAck, got {:#x}",
                other.type_id()
            ))),
        }
    }

    /// Close the connection gracefully
    pub async fn close(&mut self, reason: &str) -> ConnectionResult<()> {
        self.state = ConnectionState::Closing;

        self.send(&Message::Disconnect {
            reason: reason.to_string(),
        })
        .await?;

        self.stream.shutdown().await?;
        self.state = ConnectionState::Closed;

        Ok(())
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// Time since a frame was last sent or received
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }
}

fn unix_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// A handle for sending messages to a connection owned by another task
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<Message>,
    connected: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<Message>) -> Self {
        Self {
            sender,
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Queue a message for the connection task
    pub async fn send(&self, message: Message) -> ConnectionResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }

        self.sender
            .send(message)
            .await
            .map_err(|_| ConnectionError::SendChannelClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Role;
    use tokio::net::TcpListener;

    fn peer(name: &str, role: Role) -> PeerInfo {
        PeerInfo::new(format!("{}-id", name), name.to_string(), role)
    }

    async fn pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let client = client.unwrap();
        let (server, client_addr) = server.unwrap();
        (Connection::new(client, addr), Connection::new(server, client_addr))
    }

    #[tokio::test]
    async fn test_handshake_matching_hash() {
        let (mut client, mut server) = pair().await;
        let hash = SchemaHash(877728986);
        let toon = peer("toon", Role::Client);
        let district = peer("district", Role::Ai);

        let (client_result, server_result) = tokio::join!(
            client.handshake_client(&toon, hash),
            server.handshake_server(&district, hash),
        );

        assert_eq!(client_result.unwrap().name, "district");
        assert_eq!(server_result.unwrap().role, Role::Client);
        assert!(client.is_active());
        assert!(server.is_active());
        assert_eq!(server.remote_peer().unwrap().name, "toon");
    }

    #[tokio::test]
    async fn test_handshake_hash_mismatch() {
        let (mut client, mut server) = pair().await;
        let toon = peer("toon", Role::Client);
        let district = peer("district", Role::Ai);

        let (client_result, server_result) = tokio::join!(
            client.handshake_client(&toon, SchemaHash(1)),
            server.handshake_server(&district, SchemaHash(2)),
        );

        assert!(matches!(
            server_result,
            Err(ConnectionError::HashMismatch {
                local: SchemaHash(2),
                remote: SchemaHash(1)
            })
        ));
        assert!(matches!(
            client_result,
            Err(ConnectionError::HashMismatch {
                local: SchemaHash(1),
                remote: SchemaHash(2)
            })
        ));
        assert!(!client.is_active());
        assert_eq!(server.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_server_rejects_non_hello() {
        let (mut client, mut server) = pair().await;

        client.send(&Message::Heartbeat { timestamp: 1 }).await.unwrap();
        let result = server
            .handshake_server(&peer("district", Role::Ai), SchemaHash(1))
            .await;
        assert!(matches!(result, Err(ConnectionError::UnexpectedMessage(_))));
    }

    #[tokio::test]
    async fn test_recv_after_close() {
        let (mut client, mut server) = pair().await;

        client.close("done").await.unwrap();
        let frame = server.recv().await.unwrap().unwrap();
        assert_eq!(
            frame.message,
            Message::Disconnect {
                reason: "done".to_string()
            }
        );
        assert!(server.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_handle_after_disconnect() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(tx);
        assert!(handle.is_connected());
        handle.mark_disconnected();
        assert!(!handle.is_connected());
        assert!(matches!(
            handle.send(Message::Heartbeat { timestamp: 0 }).await,
            Err(ConnectionError::Closed)
        ));
    }
}
