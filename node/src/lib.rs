// Local modules first
pub mod cache;
pub mod codec;
pub mod config;
pub mod errors;
pub mod forwarding;
mod request_handler;
pub mod rpc;
pub mod store;
pub mod timing;

// Standard libraries
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

// External libraries
use driver::OverlayClient;
use logger::{Color, Logger};
use overlay_protocol::messages::data::DataMessage;
use overlay_protocol::messages::query::QueryRequest;
use overlay_protocol::messages::response::QueryResponse;

use cache::{CacheError, ResultCache, DEFAULT_CAPACITY};
use codec::CacheCodec;
use config::OverlayConfig;
use errors::NodeError;
use forwarding::ForwardingQueue;
use rpc::RpcServer;
use store::LocalStore;
use timing::TimingLedger;

/// How long an intermediate node keeps a memoized result.
pub const INTERMEDIATE_TTL_MS: i32 = 5_000;
/// How long the portal keeps a memoized result.
pub const PORTAL_TTL_MS: i32 = 10_000;

const FORWARDING_QUEUE_CAPACITY: usize = 256;
const HEX_DUMP_BYTES: usize = 16;

/// One worker of the query overlay.
///
/// A node owns its subset of the crash dataset, answers queries over it,
/// forwards queries along its configured outbound edges, and memoizes the
/// merged results it produces. Every node in the overlay runs this same
/// engine; the portal additionally relays out-of-band data messages through
/// a background queue.
pub struct Node {
    pub(crate) id: String,
    pub(crate) config: OverlayConfig,
    is_portal: bool,
    pub(crate) store: LocalStore,
    pub(crate) cache: ResultCache,
    pub(crate) ledger: TimingLedger,
    pub(crate) peers: HashMap<String, OverlayClient>,
    server: Arc<RpcServer>,
    forwarding: Option<ForwardingQueue>,
    pub(crate) seen_queries: Mutex<HashMap<String, Instant>>,
    pub(crate) logger: Logger,
    work_dir: PathBuf,
}

impl Node {
    /// Creates a new overlay node instance.
    ///
    /// # Purpose
    /// This function materializes everything one node needs before it can
    /// serve: its local row store (from a CSV file when one is given), its
    /// named result-cache region, the timing ledger, and one outbound stub
    /// per configured peer. The inbound server is created but not started;
    /// call [`Node::start`] for that.
    ///
    /// # Parameters
    /// - `id: &str`
    ///   - The node identifier; must name a process entry in `config`.
    /// - `config: OverlayConfig`
    ///   - The full overlay topology. Every node loads the same file and
    ///     derives its own role from it (portal, authoritative borough,
    ///     outbound edges).
    /// - `csv: Option<&Path>`
    ///   - Crash dataset to ingest. A missing or malformed file is logged
    ///     and the node starts with an empty store; it is not fatal.
    /// - `work_dir: &Path`
    ///   - Directory under which the node keeps its log file and its cache
    ///     region image.
    ///
    /// # Returns
    /// - `Ok(Arc<Node>)` with a fully initialized engine.
    /// - `Err(NodeError)` when the id is unknown, the config is
    ///   inconsistent, or the logger cannot be created.
    ///
    /// # Behavior
    /// - Peer dial failures are logged and non-fatal; peers may come up
    ///   later and `is_connected` re-probes them on every query.
    /// - A cache region that cannot be backed by a file degrades to an
    ///   in-process map with identical semantics.
    /// - The portal role is derived from the config: the portal is the one
    ///   process no other process forwards to.
    pub fn new(
        id: &str,
        config: OverlayConfig,
        csv: Option<&Path>,
        work_dir: &Path,
    ) -> Result<Arc<Node>, NodeError> {
        let process = config.node(id)?.clone();
        let logger = Logger::new(&work_dir.join("logs"), id)?.with_console_echo();

        let store = LocalStore::new();
        if let Some(csv_path) = csv {
            match store.load_csv(csv_path) {
                Ok(rows) => {
                    logger
                        .info(
                            &format!("loaded {} rows from {}", rows, csv_path.display()),
                            Color::Green,
                        )
                        .ok();
                }
                Err(e) => {
                    logger
                        .error(&format!(
                            "could not load {}: {} .. starting with empty store",
                            csv_path.display(),
                            e
                        ))
                        .ok();
                }
            }
        }

        let cache_name = format!("result_cache_{}_{}", id, process.port);
        let cache = ResultCache::open(&cache_name, DEFAULT_CAPACITY, &work_dir.join("cache"));
        if cache.is_degraded() {
            logger
                .warn("cache region unavailable, using process-local cache")
                .ok();
        }

        let mut peers = HashMap::new();
        for peer_id in &process.connections {
            let peer = config.node(peer_id)?;
            match OverlayClient::new(&peer.host, peer.port) {
                Ok(stub) => {
                    if !stub.is_connected() {
                        logger
                            .warn(&format!(
                                "peer {} at {}:{} not reachable yet",
                                peer_id, peer.host, peer.port
                            ))
                            .ok();
                    }
                    peers.insert(peer_id.clone(), stub);
                }
                Err(e) => {
                    logger
                        .error(&format!("cannot resolve peer {}: {}", peer_id, e))
                        .ok();
                }
            }
        }

        let is_portal = config.portal_id().as_deref() == Some(id);
        let server = Arc::new(RpcServer::new(
            format!("{}:{}", process.host, process.port),
            logger.clone(),
        ));
        let forwarding = is_portal.then(|| ForwardingQueue::new(FORWARDING_QUEUE_CAPACITY));

        Ok(Arc::new(Node {
            id: id.to_string(),
            config,
            is_portal,
            store,
            cache,
            ledger: TimingLedger::new(),
            peers,
            server,
            forwarding,
            seen_queries: Mutex::new(HashMap::new()),
            logger,
            work_dir: work_dir.to_path_buf(),
        }))
    }

    /// Registers the inbound handlers and starts serving.
    ///
    /// Handlers capture a `Weak` back-reference to the engine: the engine
    /// owns the server, the server calls back into the engine, and the weak
    /// edge keeps that cycle from leaking. Returns once the listener is
    /// bound.
    pub fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        let weak = Arc::downgrade(self);
        self.server.on_query(Arc::new(move |request: QueryRequest| {
            match weak.upgrade() {
                Some(node) => request_handler::handle_query(&node, request),
                None => QueryResponse::failure(request.query_id, "RPC failed: node is shutting down"),
            }
        }));

        let weak = Arc::downgrade(self);
        self.server.on_data(Arc::new(move |message: DataMessage| {
            if let Some(node) = weak.upgrade() {
                node.handle_data(message);
            }
        }));

        if let Some(queue) = &self.forwarding {
            let weak: Weak<Node> = Arc::downgrade(self);
            queue.start(
                Arc::new(move |message: &DataMessage| match weak.upgrade() {
                    Some(node) => node.relay_to_peer(message),
                    None => Err("node is shutting down".to_string()),
                }),
                self.logger.clone(),
            );
        }

        self.server.start()?;
        self.logger
            .info(
                &format!(
                    "Node {} started ({}, {} peers, {} local rows)",
                    self.id,
                    if self.is_portal { "portal" } else { "worker" },
                    self.peers.len(),
                    self.store.len()
                ),
                Color::Green,
            )
            .ok();
        Ok(())
    }

    /// Stops serving. Peer stubs are dropped with the engine; the cache
    /// region image stays on disk for the next run.
    pub fn stop(&self) {
        self.server.stop();
        if let Some(queue) = &self.forwarding {
            queue.stop();
        }
        if !self.ledger.is_empty() {
            self.logger
                .warn(&format!(
                    "{} queries still in the timing ledger at shutdown",
                    self.ledger.len()
                ))
                .ok();
        }
        self.logger
            .info(&format!("Node {} stopped", self.id), Color::Yellow)
            .ok();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_portal(&self) -> bool {
        self.is_portal
    }

    pub fn is_running(&self) -> bool {
        self.server.is_running()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Drops every memoized result. Mostly a startup aid for tooling that
    /// reuses a work directory.
    pub fn clear_cache(&self) -> Result<(), CacheError> {
        self.cache.clear()
    }

    /// Seeds a few synthetic rows for this node's borough. Used when the
    /// node starts without a dataset file; the portal owns no borough and
    /// seeds nothing.
    pub fn seed_demo(&self) -> Result<usize, NodeError> {
        let Some(borough) = self.config.node(&self.id)?.borough() else {
            return Ok(0);
        };
        let rows = self.store.seed_demo(borough)?;
        self.logger
            .info(
                &format!("seeded {} demo rows for {}", rows, borough),
                Color::Blue,
            )
            .ok();
        Ok(rows)
    }

    pub(crate) fn codec(&self) -> CacheCodec {
        if self.is_portal {
            CacheCodec::HeaderPrefixed
        } else {
            CacheCodec::Plain
        }
    }

    pub(crate) fn cache_ttl_ms(&self) -> i32 {
        if self.is_portal {
            PORTAL_TTL_MS
        } else {
            INTERMEDIATE_TTL_MS
        }
    }

    /// Handles one inbound data message: deliver locally, or relay.
    ///
    /// The portal hands relays to its forwarding queue so the RPC thread
    /// never waits on a slow downstream send; other nodes relay inline.
    /// A destination that is neither this node nor a known peer is logged
    /// and dropped, which on a leaf covers every foreign destination.
    fn handle_data(&self, message: DataMessage) {
        if message.destination == self.id {
            self.process_local_data(&message);
            return;
        }

        if self.is_portal {
            if let Some(queue) = &self.forwarding {
                if !queue.push(message.clone()) {
                    self.logger
                        .warn(&format!(
                            "forwarding queue full, dropping data message {} for {}",
                            message.message_id, message.destination
                        ))
                        .ok();
                }
                return;
            }
        }

        if self.peers.contains_key(&message.destination) {
            if let Err(reason) = self.relay_to_peer(&message) {
                self.logger
                    .warn(&format!(
                        "cannot forward data message {} to {}: {}",
                        message.message_id, message.destination, reason
                    ))
                    .ok();
            }
        } else {
            self.logger
                .error(&format!(
                    "cannot forward data message {}: unknown destination {}",
                    message.message_id, message.destination
                ))
                .ok();
        }
    }

    /// Local delivery. Kept as a separate extension point; the default just
    /// logs the sender and a short hex dump.
    fn process_local_data(&self, message: &DataMessage) {
        let dump: Vec<String> = message
            .data
            .iter()
            .take(HEX_DUMP_BYTES)
            .map(|b| format!("{:02x}", b))
            .collect();
        self.logger
            .info(
                &format!(
                    "data message {} from {} ({} bytes): {}",
                    message.message_id,
                    message.source,
                    message.data.len(),
                    dump.join(" ")
                ),
                Color::Magenta,
            )
            .ok();
    }

    fn relay_to_peer(&self, message: &DataMessage) -> Result<(), String> {
        let stub = self
            .peers
            .get(&message.destination)
            .ok_or_else(|| format!("no route to {}", message.destination))?;
        if !stub.is_connected() {
            return Err(format!("peer {} not connected", message.destination));
        }
        stub.send(message).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn work_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("overlay_node_test_{}", tag));
        fs::remove_dir_all(&dir).ok();
        dir
    }

    fn pair_config() -> OverlayConfig {
        OverlayConfig::parse(
            r#"{ "processes": {
                "A": { "host": "127.0.0.1", "port": 39921, "connections": ["B"], "data_subset": "portal" },
                "B": { "host": "127.0.0.1", "port": 39922, "connections": [], "data_subset": "BROOKLYN" }
            } }"#,
        )
        .expect("config")
    }

    #[test]
    fn test_new_derives_roles_from_config() {
        let portal = Node::new("A", pair_config(), None, &work_dir("roles_a")).expect("node");
        let worker = Node::new("B", pair_config(), None, &work_dir("roles_b")).expect("node");

        assert!(portal.is_portal());
        assert_eq!(portal.codec(), CacheCodec::HeaderPrefixed);
        assert_eq!(portal.cache_ttl_ms(), PORTAL_TTL_MS);

        assert!(!worker.is_portal());
        assert_eq!(worker.codec(), CacheCodec::Plain);
        assert_eq!(worker.cache_ttl_ms(), INTERMEDIATE_TTL_MS);
    }

    #[test]
    fn test_new_rejects_unknown_id() {
        let result = Node::new("Z", pair_config(), None, &work_dir("unknown_id"));

        assert!(result.is_err());
    }

    #[test]
    fn test_missing_csv_is_not_fatal() {
        let node = Node::new(
            "A",
            pair_config(),
            Some(Path::new("/no/such/file.csv")),
            &work_dir("missing_csv"),
        )
        .expect("node");

        assert!(node.store().is_empty());
    }

    #[test]
    fn test_data_message_for_unknown_destination_is_dropped() {
        // B is a leaf; any foreign destination is an error path, but never
        // a panic or a hang.
        let node = Node::new("B", pair_config(), None, &work_dir("leaf_drop")).expect("node");

        node.handle_data(DataMessage::new("m-1", "A", "NOWHERE", vec![1, 2, 3]));
        node.handle_data(DataMessage::new("m-2", "A", "B", vec![4, 5, 6]));
    }
}
