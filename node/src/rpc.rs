//! Inbound RPC server.
//!
//! One listener thread accepts connections; every connection gets its own
//! thread running a frame loop, so a query handler that blocks on
//! downstream calls never starves other inbound calls. Handlers are
//! registered after construction, which is what lets the engine own the
//! server while the server calls back into the engine.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use logger::{Color, Logger};
use overlay_protocol::frame::{read_frame, Frame};
use overlay_protocol::messages::data::{DataChunk, DataMessage};
use overlay_protocol::messages::query::QueryRequest;
use overlay_protocol::messages::response::QueryResponse;
use overlay_protocol::Serializable;

use crate::errors::NodeError;

pub type QueryHandler = Arc<dyn Fn(QueryRequest) -> QueryResponse + Send + Sync>;
pub type DataHandler = Arc<dyn Fn(DataMessage) + Send + Sync>;

const STREAM_CHUNK_SIZE: usize = 1024;

pub struct RpcServer {
    address: String,
    logger: Logger,
    running: AtomicBool,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    on_query: Mutex<Option<QueryHandler>>,
    on_data: Mutex<Option<DataHandler>>,
}

impl RpcServer {
    pub fn new(address: String, logger: Logger) -> Self {
        RpcServer {
            address,
            logger,
            running: AtomicBool::new(false),
            accept_thread: Mutex::new(None),
            on_query: Mutex::new(None),
            on_data: Mutex::new(None),
        }
    }

    /// Installs the unary query handler.
    pub fn on_query(&self, handler: QueryHandler) {
        if let Ok(mut slot) = self.on_query.lock() {
            *slot = Some(handler);
        }
    }

    /// Installs the data message handler.
    pub fn on_data(&self, handler: DataHandler) {
        if let Ok(mut slot) = self.on_data.lock() {
            *slot = Some(handler);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Binds the listener and starts the accept loop. Returns once the
    /// socket is bound, so callers may dial immediately after.
    pub fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        let listener = TcpListener::bind(&self.address)
            .map_err(|e| NodeError::ServerError(format!("bind {} failed: {}", self.address, e)))?;

        self.running.store(true, Ordering::SeqCst);

        let server = Arc::clone(self);
        let handle = thread::spawn(move || {
            for stream in listener.incoming() {
                if !server.is_running() {
                    break;
                }
                match stream {
                    Ok(stream) => {
                        let server = Arc::clone(&server);
                        thread::spawn(move || server.handle_connection(stream));
                    }
                    Err(e) => {
                        server
                            .logger
                            .error(&format!("accept failed: {}", e))
                            .ok();
                    }
                }
            }
        });

        *self.accept_thread.lock()? = Some(handle);
        self.logger
            .info(&format!("RPC server listening on {}", self.address), Color::Green)
            .ok();
        Ok(())
    }

    /// Stops accepting. A loopback connect nudges the accept loop so it
    /// observes the flag without waiting for the next real connection.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Ok(addr) = self.address.parse() {
            TcpStream::connect_timeout(&addr, Duration::from_millis(200)).ok();
        }

        if let Ok(mut slot) = self.accept_thread.lock() {
            if let Some(handle) = slot.take() {
                handle.join().ok();
            }
        }
        self.logger.info("RPC server stopped", Color::Yellow).ok();
    }

    fn query_handler(&self) -> Option<QueryHandler> {
        self.on_query.lock().ok().and_then(|slot| slot.clone())
    }

    fn data_handler(&self) -> Option<DataHandler> {
        self.on_data.lock().ok().and_then(|slot| slot.clone())
    }

    fn handle_connection(&self, mut stream: TcpStream) {
        loop {
            let frame = match read_frame(&mut stream) {
                Ok(Some(frame)) => frame,
                // Clean EOF: the peer is done with this connection.
                Ok(None) => break,
                Err(e) => {
                    self.logger
                        .debug(&format!("dropping connection on bad frame: {}", e))
                        .ok();
                    break;
                }
            };

            let ok = match frame {
                Frame::Query(request) => self.answer_query(&mut stream, request),
                Frame::StreamQuery(request) => self.answer_stream(&mut stream, request),
                Frame::Data(message) => {
                    if let Some(handler) = self.data_handler() {
                        handler(message);
                    }
                    write_frame(&mut stream, &Frame::DataAck)
                }
                other => {
                    self.logger
                        .warn(&format!("unexpected inbound frame: {:?}", other))
                        .ok();
                    break;
                }
            };

            if !ok {
                break;
            }
        }
    }

    fn run_query(&self, request: QueryRequest) -> QueryResponse {
        match self.query_handler() {
            Some(handler) => handler(request),
            None => QueryResponse::failure(
                request.query_id,
                "RPC failed: no query handler registered",
            ),
        }
    }

    fn answer_query(&self, stream: &mut TcpStream, request: QueryRequest) -> bool {
        let response = self.run_query(request);
        write_frame(stream, &Frame::Response(response))
    }

    fn answer_stream(&self, stream: &mut TcpStream, request: QueryRequest) -> bool {
        let response = self.run_query(request);
        let payload = response.as_bytes();

        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&[]]
        } else {
            payload.chunks(STREAM_CHUNK_SIZE).collect()
        };

        let last = chunks.len() - 1;
        for (i, data) in chunks.into_iter().enumerate() {
            let frame = Frame::Chunk(DataChunk {
                chunk_id: i as u32,
                data: data.to_vec(),
                is_last: i == last,
            });
            if !write_frame(stream, &frame) {
                return false;
            }
        }
        true
    }
}

fn write_frame(stream: &mut TcpStream, frame: &Frame) -> bool {
    stream.write_all(&frame.as_bytes()).is_ok() && stream.flush().is_ok()
}
