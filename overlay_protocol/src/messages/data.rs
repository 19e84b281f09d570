//! Out-of-band data messages and streamed response chunks.

use std::io::Cursor;

use crate::errors::ProtocolError;
use crate::wire::{get_blob, get_string, get_u32, get_u8, put_bytes, put_string};
use crate::Serializable;

/// A point-to-point payload relayed through the overlay.
///
/// ### Fields
/// - `message_id`: Sender-chosen id, for log correlation only.
/// - `source`: Node (or client) id that originated the message.
/// - `destination`: Node id the payload is addressed to.
/// - `data`: Opaque bytes.
#[derive(Debug, PartialEq, Clone)]
pub struct DataMessage {
    pub message_id: String,
    pub source: String,
    pub destination: String,
    pub data: Vec<u8>,
}

impl DataMessage {
    pub fn new(
        message_id: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            source: source.into(),
            destination: destination.into(),
            data,
        }
    }
}

impl Serializable for DataMessage {
    /// ```md
    /// 0    8    16   24   32
    /// +----+----+----+----+
    /// |   message_id_len  |
    /// +----+----+----+----+
    /// |     message_id    |
    /// +----+----+----+----+
    /// |     source_len    |
    /// +----+----+----+----+
    /// |       source      |
    /// +----+----+----+----+
    /// |  destination_len  |
    /// +----+----+----+----+
    /// |    destination    |
    /// +----+----+----+----+
    /// |      data_len     |
    /// +----+----+----+----+
    /// |        data       |
    /// +----+----+----+----+
    /// ```
    /// Serializes the `DataMessage` into a byte vector.
    fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        put_string(&mut bytes, &self.message_id);
        put_string(&mut bytes, &self.source);
        put_string(&mut bytes, &self.destination);
        put_bytes(&mut bytes, &self.data);

        bytes
    }

    /// Deserializes a byte vector into a `DataMessage`.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError>
    where
        Self: Sized,
    {
        let mut cursor = Cursor::new(bytes);

        let message_id = get_string(&mut cursor)?;
        let source = get_string(&mut cursor)?;
        let destination = get_string(&mut cursor)?;
        let data = get_blob(&mut cursor)?;

        Ok(DataMessage {
            message_id,
            source,
            destination,
            data,
        })
    }
}

/// One chunk of a streamed response. The concatenated `data` of a chunk
/// sequence is a serialized `QueryResponse` payload; the final chunk is
/// flagged with `is_last`.
#[derive(Debug, PartialEq, Clone)]
pub struct DataChunk {
    pub chunk_id: u32,
    pub data: Vec<u8>,
    pub is_last: bool,
}

impl Serializable for DataChunk {
    /// ```md
    /// 0    8    16   24   32
    /// +----+----+----+----+
    /// |      chunk_id     |
    /// +----+----+----+----+
    /// |      data_len     |
    /// +----+----+----+----+
    /// |        data       |
    /// +----+----+----+----+
    /// |last|
    /// +----+
    /// ```
    /// Serializes the `DataChunk` into a byte vector.
    fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        bytes.extend(&self.chunk_id.to_be_bytes());
        put_bytes(&mut bytes, &self.data);
        bytes.push(self.is_last as u8);

        bytes
    }

    /// Deserializes a byte vector into a `DataChunk`.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError>
    where
        Self: Sized,
    {
        let mut cursor = Cursor::new(bytes);

        let chunk_id = get_u32(&mut cursor)?;
        let data = get_blob(&mut cursor)?;
        let is_last = get_u8(&mut cursor)? != 0;

        Ok(DataChunk {
            chunk_id,
            data,
            is_last,
        })
    }
}
