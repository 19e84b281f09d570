//! Overlay wire protocol.
//!
//! This crate defines the frames exchanged between overlay nodes and between
//! a client and the portal: queries, query responses, point-to-point data
//! messages and streamed response chunks.
//!
//! All messages are length-prefixed binary with big-endian integers. Strings
//! travel as `u32 len + bytes` (UTF-8).

use errors::ProtocolError;

pub mod errors;
pub mod frame;
pub mod header;
pub mod messages;
pub mod types;
mod wire;

/// The Serializable trait is used to serialize and deserialize protocol
/// messages.\
/// This trait is implemented by every frame, message and wire data type.
pub trait Serializable {
    /// Serializes the protocol message to a byte array.
    fn as_bytes(&self) -> Vec<u8>;

    /// Deserializes the protocol message from a byte array.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError>
    where
        Self: Sized;
}
