//! Network module - Schema compatibility handshake over TCP
//!
//! Provides:
//! - Server that accepts peers and rejects those with a different schema hash
//! - Client that connects and proves its schema hash
//! - Connection handling shared by both

mod client;
mod connection;
mod server;

pub use client::*;
pub use connection::*;
pub use server::*;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    pub port: u16,
    /// Interface to bind to
    pub bind_address: String,
    /// Connection and handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Heartbeat interval in milliseconds, the unit of the server's idle timeout
    pub heartbeat_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::protocol::DEFAULT_PORT,
            bind_address: "0.0.0.0".to_string(),
            connect_timeout_ms: 5000,
            heartbeat_interval_ms: 1000,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }
}
