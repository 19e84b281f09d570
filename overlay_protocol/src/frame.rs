//! Frames carried on an overlay TCP stream.
//!
//! A frame is a fixed header (opcode + payload length) followed by the
//! serialized message payload. `read_frame` is the single blocking reader
//! used by both the inbound server and the outbound stubs.

use std::io::Read;

use crate::errors::ProtocolError;
use crate::header::{FrameHeader, Opcode, HEADER_SIZE};
use crate::messages::data::{DataChunk, DataMessage};
use crate::messages::query::QueryRequest;
use crate::messages::response::QueryResponse;
use crate::Serializable;

/// A complete protocol frame.
///
/// ### Variants
///
/// * `Query` - A unary query.
/// * `Response` - The answer to a unary query.
/// * `Data` - A fire-and-forget data message.
/// * `DataAck` - Empty acknowledgement of a data message.
/// * `StreamQuery` - A query whose response is streamed back in chunks.
/// * `Chunk` - One chunk of a streamed response.
#[derive(Debug, PartialEq, Clone)]
pub enum Frame {
    Query(QueryRequest),
    Response(QueryResponse),
    Data(DataMessage),
    DataAck,
    StreamQuery(QueryRequest),
    Chunk(DataChunk),
}

impl Frame {
    fn opcode(&self) -> Opcode {
        match self {
            Frame::Query(_) => Opcode::Query,
            Frame::Response(_) => Opcode::Response,
            Frame::Data(_) => Opcode::Data,
            Frame::DataAck => Opcode::DataAck,
            Frame::StreamQuery(_) => Opcode::StreamQuery,
            Frame::Chunk(_) => Opcode::Chunk,
        }
    }
}

impl Serializable for Frame {
    /// ```md
    /// 0    8    16   24   32
    /// +----+----+----+----+
    /// | op |   length
    /// +----+----+----+----+
    ///      |   payload...
    /// +----+----+----+----+
    /// ```
    /// Serializes the frame into a byte vector.
    fn as_bytes(&self) -> Vec<u8> {
        let payload = match self {
            Frame::Query(query) => query.as_bytes(),
            Frame::Response(response) => response.as_bytes(),
            Frame::Data(message) => message.as_bytes(),
            Frame::DataAck => Vec::new(),
            Frame::StreamQuery(query) => query.as_bytes(),
            Frame::Chunk(chunk) => chunk.as_bytes(),
        };

        let header = FrameHeader {
            opcode: self.opcode(),
            length: payload.len() as u32,
        };

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&header.as_bytes());
        bytes.extend_from_slice(&payload);

        bytes
    }

    /// Deserializes a frame from a byte slice.
    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated);
        }

        let header = FrameHeader::from_bytes(&bytes[..HEADER_SIZE])?;
        let payload = bytes
            .get(HEADER_SIZE..HEADER_SIZE + header.length as usize)
            .ok_or(ProtocolError::Truncated)?;

        Frame::decode(header.opcode, payload)
    }
}

impl Frame {
    fn decode(opcode: Opcode, payload: &[u8]) -> Result<Self, ProtocolError> {
        let frame = match opcode {
            Opcode::Query => Frame::Query(QueryRequest::from_bytes(payload)?),
            Opcode::Response => Frame::Response(QueryResponse::from_bytes(payload)?),
            Opcode::Data => Frame::Data(DataMessage::from_bytes(payload)?),
            Opcode::DataAck => Frame::DataAck,
            Opcode::StreamQuery => Frame::StreamQuery(QueryRequest::from_bytes(payload)?),
            Opcode::Chunk => Frame::Chunk(DataChunk::from_bytes(payload)?),
        };
        Ok(frame)
    }
}

/// Reads exactly one frame from a blocking reader.
///
/// Returns `Ok(None)` when the stream reaches EOF on a frame boundary, the
/// normal end of a connection.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>, ProtocolError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        match reader.read(&mut header_bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(ProtocolError::Truncated),
            Ok(n) => filled += n,
            Err(_) => return Err(ProtocolError::Truncated),
        }
    }

    let header = FrameHeader::from_bytes(&header_bytes)?;

    let mut payload = vec![0u8; header.length as usize];
    reader
        .read_exact(&mut payload)
        .map_err(|_| ProtocolError::Truncated)?;

    Frame::decode(header.opcode, &payload).map(Some)
}
