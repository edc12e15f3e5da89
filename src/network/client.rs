//! Handshake client
//!
//! Connects to a server and proves it runs the same schema.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};

use super::connection::{Connection, ConnectionError};
use super::NetworkConfig;
use crate::protocol::PeerInfo;
use crate::schema::SchemaHash;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection timeout")]
    Timeout,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Handshake client
pub struct Client {
    config: NetworkConfig,
    local: PeerInfo,
    schema_hash: SchemaHash,
    connection: Mutex<Option<Connection>>,
    server_peer: RwLock<Option<PeerInfo>>,
}

impl Client {
    pub fn new(config: NetworkConfig, local: PeerInfo, schema_hash: SchemaHash) -> Self {
        Self {
            config,
            local,
            schema_hash,
            connection: Mutex::new(None),
            server_peer: RwLock::new(None),
        }
    }

    /// Connect and run the handshake; returns the server's identity
    pub async fn connect(&self, server_addr: SocketAddr) -> ClientResult<PeerInfo> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Err(ClientError::AlreadyConnected);
        }

        tracing::info!(
            "Connecting to {} with schema hash {}",
            server_addr,
            self.schema_hash
        );

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(server_addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ClientError::Io(e)),
            Err(_) => return Err(ClientError::Timeout),
        };

        let mut conn = Connection::new(stream, server_addr);
        let server_peer =
            match tokio::time::timeout(timeout, conn.handshake_client(&self.local, self.schema_hash))
                .await
            {
                Ok(result) => result?,
                Err(_) => return Err(ClientError::Timeout),
            };

        *self.server_peer.write().await = Some(server_peer.clone());
        *connection = Some(conn);

        Ok(server_peer)
    }

    /// Round-trip a heartbeat
    pub async fn ping(&self) -> ClientResult<Duration> {
        let mut connection = self.connection.lock().await;
        let conn = connection.as_mut().ok_or(ClientError::NotConnected)?;
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        Ok(conn.ping(timeout).await?)
    }

    /// Close the connection gracefully
    pub async fn disconnect(&self) -> ClientResult<()> {
        let mut connection = self.connection.lock().await;
        let mut conn = connection.take().ok_or(ClientError::NotConnected)?;
        *self.server_peer.write().await = None;

        conn.close("Client disconnect").await?;
        tracing::info!("Disconnected from {}", conn.remote_addr());
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Identity of the server, once connected
    pub async fn server_peer(&self) -> Option<PeerInfo> {
        self.server_peer.read().await.clone()
    }

    pub fn schema_hash(&self) -> SchemaHash {
        self.schema_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Role;

    #[tokio::test]
    async fn test_not_connected() {
        let client = Client::new(
            NetworkConfig::default(),
            PeerInfo::new("id".to_string(), "toon".to_string(), Role::Client),
            SchemaHash(1),
        );
        assert!(!client.is_connected().await);
        assert!(client.server_peer().await.is_none());
        assert!(matches!(client.ping().await, Err(ClientError::NotConnected)));
        assert!(matches!(client.disconnect().await, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Client::new(
            NetworkConfig::default(),
            PeerInfo::new("id".to_string(), "toon".to_string(), Role::Client),
            SchemaHash(1),
        );
        assert!(client.connect(addr).await.is_err());
        assert!(!client.is_connected().await);
    }
}
