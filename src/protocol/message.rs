//! Protocol message definitions

use serde::{Deserialize, Serialize};

use crate::schema::{Role, SchemaHash};

/// Identity a process announces during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Unique process identifier
    pub peer_id: String,
    /// Human-readable name
    pub name: String,
    /// Which manifest projection the process loaded
    pub role: Role,
}

impl PeerInfo {
    pub fn new(peer_id: String, name: String, role: Role) -> Self {
        Self {
            peer_id,
            name,
            role,
        }
    }
}

/// All protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Sent by the connecting side first
    Hello {
        schema_hash: SchemaHash,
        peer: PeerInfo,
    },

    /// Answer to Hello; `accepted` is false when the hashes differ
    HelloAck {
        schema_hash: SchemaHash,
        peer: PeerInfo,
        accepted: bool,
        reason: Option<String>,
    },

    Heartbeat {
        timestamp: u64,
    },

    HeartbeatAck {
        timestamp: u64,
    },

    /// Graceful disconnect
    Disconnect {
        reason: String,
    },

    Error {
        code: u32,
        message: String,
    },
}

impl Message {
    /// Get the message type identifier
    pub fn type_id(&self) -> u8 {
        match self {
            Message::Hello { .. } => 0x01,
            Message::HelloAck { .. } => 0x02,
            Message::Heartbeat { .. } => 0xF0,
            Message::HeartbeatAck { .. } => 0xF1,
            Message::Disconnect { .. } => 0xFE,
            Message::Error { .. } => 0xFF,
        }
    }
}

/// Error codes for the Error message
///
/// Schema mismatches are reported through a rejecting `HelloAck`, not here.
pub mod error_codes {
    pub const UNEXPECTED_MESSAGE: u32 = 2;
}
