//! Protocol module - Wire format for the schema compatibility handshake
//!
//! Frames are:
//! - 4 bytes magic
//! - 1 byte message type
//! - 4 bytes payload length (big-endian)
//! - 4 bytes sequence number (big-endian)
//! - Variable length payload

mod codec;
mod message;

pub use codec::*;
pub use message::*;

/// Default port for the handshake listener
pub const DEFAULT_PORT: u16 = 7199;

/// Magic bytes for protocol identification
pub const MAGIC_BYTES: [u8; 4] = [0x44, 0x43, 0x4D, 0x46]; // "DCMF"
