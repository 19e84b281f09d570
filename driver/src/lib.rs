//! Outbound stub for one overlay node.
//!
//! `OverlayClient` hides the transport behind four calls: unary `query`,
//! fire-and-forget `send_data`, server-streamed `stream`, and the
//! best-effort `is_connected` probe. A successfully used stream is parked
//! for reuse by the next call on this stub; any transport error drops it
//! and the next call redials.

use std::io::Write;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use overlay_protocol::frame::{read_frame, Frame};
use overlay_protocol::messages::data::{DataChunk, DataMessage};
use overlay_protocol::messages::query::QueryRequest;
use overlay_protocol::messages::response::QueryResponse;
use overlay_protocol::Serializable;
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum ClientError {
    AddrError,
    ConnectionError,
    TimeoutError,
    IoError(std::io::Error),
    ProtocolError(overlay_protocol::errors::ProtocolError),
    /// The peer answered with a frame this call did not expect.
    UnexpectedFrame,
    /// The peer closed the stream mid-call.
    Disconnected,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::AddrError => write!(f, "could not resolve node address"),
            ClientError::ConnectionError => write!(f, "could not connect to node"),
            ClientError::TimeoutError => write!(f, "timed out talking to node"),
            ClientError::IoError(e) => write!(f, "I/O error: {}", e),
            ClientError::ProtocolError(e) => write!(f, "protocol error: {}", e),
            ClientError::UnexpectedFrame => write!(f, "unexpected frame from node"),
            ClientError::Disconnected => write!(f, "node closed the connection"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::IoError(err)
    }
}

impl From<overlay_protocol::errors::ProtocolError> for ClientError {
    fn from(err: overlay_protocol::errors::ProtocolError) -> Self {
        ClientError::ProtocolError(err)
    }
}

/// A stub for one remote node.
pub struct OverlayClient {
    addr: SocketAddr,
    io_timeout: Duration,
    parked: Mutex<Option<TcpStream>>,
}

impl OverlayClient {
    /// Creates a stub for the node at `host:port` without dialing it.
    ///
    /// Peers may come up later than this process; the first `is_connected`
    /// or call-site dial picks them up.
    pub fn new(host: &str, port: u16) -> Result<Self, ClientError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|_| ClientError::AddrError)?
            .next()
            .ok_or(ClientError::AddrError)?;

        Ok(Self {
            addr,
            io_timeout: DEFAULT_IO_TIMEOUT,
            parked: Mutex::new(None),
        })
    }

    /// Creates a stub and dials it eagerly. Used by client tooling that
    /// wants connection failures surfaced up front.
    pub fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        let client = Self::new(host, port)?;
        let stream = client.dial()?;
        client.park(stream);
        Ok(client)
    }

    /// Overrides the per-call read/write timeout.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn dial(&self) -> Result<TcpStream, ClientError> {
        let stream = TcpStream::connect_timeout(&self.addr, CONNECT_TIMEOUT)
            .map_err(|_| ClientError::ConnectionError)?;
        stream
            .set_read_timeout(Some(self.io_timeout))
            .map_err(|_| ClientError::TimeoutError)?;
        stream
            .set_write_timeout(Some(self.io_timeout))
            .map_err(|_| ClientError::TimeoutError)?;
        Ok(stream)
    }

    fn take_parked(&self) -> Option<TcpStream> {
        self.parked.lock().ok().and_then(|mut slot| slot.take())
    }

    fn park(&self, stream: TcpStream) {
        if let Ok(mut slot) = self.parked.lock() {
            *slot = Some(stream);
        }
    }

    /// Best-effort connectivity probe: a parked stream counts as connected;
    /// otherwise one dial is attempted and the stream parked for the next
    /// call. Callers still tolerate failure of the call itself.
    pub fn is_connected(&self) -> bool {
        if let Ok(slot) = self.parked.lock() {
            if slot.is_some() {
                return true;
            }
        }
        match self.dial() {
            Ok(stream) => {
                self.park(stream);
                true
            }
            Err(_) => false,
        }
    }

    /// Runs one round trip (write a frame, read one frame back) on a parked
    /// or fresh stream. On any transport error with a reused stream, redials
    /// once and retries; errors on a fresh stream are final.
    fn round_trip(&self, frame: &Frame) -> Result<Frame, ClientError> {
        if let Some(stream) = self.take_parked() {
            match Self::exchange(stream, frame) {
                Ok((reply, stream)) => {
                    self.park(stream);
                    return Ok(reply);
                }
                // Parked stream had gone stale; fall through to a fresh dial.
                Err(_) => {}
            }
        }

        let stream = self.dial()?;
        let (reply, stream) = Self::exchange(stream, frame)?;
        self.park(stream);
        Ok(reply)
    }

    fn exchange(mut stream: TcpStream, frame: &Frame) -> Result<(Frame, TcpStream), ClientError> {
        stream.write_all(&frame.as_bytes())?;
        stream.flush()?;
        let reply = read_frame(&mut stream)?.ok_or(ClientError::Disconnected)?;
        Ok((reply, stream))
    }

    /// Sends a unary query and waits for its response.
    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse, ClientError> {
        match self.round_trip(&Frame::Query(request.clone()))? {
            Frame::Response(response) => Ok(response),
            _ => Err(ClientError::UnexpectedFrame),
        }
    }

    /// Sends a data message and waits for the empty ack.
    pub fn send(&self, message: &DataMessage) -> Result<(), ClientError> {
        match self.round_trip(&Frame::Data(message.clone()))? {
            Frame::DataAck => Ok(()),
            _ => Err(ClientError::UnexpectedFrame),
        }
    }

    /// Convenience wrapper over [`send`](Self::send) that stamps a fresh
    /// message id.
    pub fn send_bytes(&self, source: &str, destination: &str, data: Vec<u8>) -> Result<(), ClientError> {
        let message = DataMessage::new(Uuid::new_v4().to_string(), source, destination, data);
        self.send(&message)
    }

    /// Sends a streamed query; `chunk_handler` observes each chunk as it
    /// arrives. Returns the reassembled response.
    pub fn stream<F>(
        &self,
        request: &QueryRequest,
        mut chunk_handler: F,
    ) -> Result<QueryResponse, ClientError>
    where
        F: FnMut(&DataChunk),
    {
        // Streamed calls own their connection for the whole chunk sequence.
        let mut stream = match self.take_parked() {
            Some(stream) => stream,
            None => self.dial()?,
        };

        let frame = Frame::StreamQuery(request.clone());
        stream.write_all(&frame.as_bytes())?;
        stream.flush()?;

        let mut payload = Vec::new();
        loop {
            let chunk = match read_frame(&mut stream)? {
                Some(Frame::Chunk(chunk)) => chunk,
                Some(_) => return Err(ClientError::UnexpectedFrame),
                None => return Err(ClientError::Disconnected),
            };

            chunk_handler(&chunk);
            payload.extend_from_slice(&chunk.data);

            if chunk.is_last {
                break;
            }
        }
        self.park(stream);

        QueryResponse::from_bytes(&payload).map_err(ClientError::from)
    }
}
