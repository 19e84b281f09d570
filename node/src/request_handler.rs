//! Per-query request handling.
//!
//! Every inbound query walks the same phases: duplicate suppression, cache
//! lookup, local evaluation, forward decision, fan-out, merge, cache store,
//! finalize. The ledger is stamped at every phase boundary and the
//! serialized ledger travels back inside the response.

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use overlay_protocol::messages::query::QueryRequest;
use overlay_protocol::messages::response::QueryResponse;

use crate::Node;

/// Verbs that fan out to every connected peer. `get_all` also forwards;
/// `get_by_borough` instead walks toward its single authoritative owner.
const FORWARDED_VERBS: [&str; 7] = [
    "get_by_street",
    "get_by_key",
    "get_by_prefix",
    "get_by_date_range",
    "get_crashes_with_injuries",
    "get_crashes_with_fatalities",
    "get_by_time",
];

/// How long an already-seen query id keeps suppressing re-arrivals. The
/// overlay is a diamond, so fan-out verbs reach some nodes twice; the
/// window must outlive one whole query including its slowest hop.
const SEEN_QUERY_WINDOW: Duration = Duration::from_secs(10);

/// The cache key for a query. Must be byte-identical across nodes for equal
/// `(verb, params)` so co-located caches hit symmetrically.
pub(crate) fn cache_key(verb: &str, params: &[String]) -> String {
    let mut key = format!("query_{}", verb);
    for param in params {
        key.push('_');
        key.push_str(param);
    }
    key
}

fn empty_success(query_id: &str, message: impl Into<String>) -> QueryResponse {
    QueryResponse {
        query_id: query_id.to_string(),
        success: true,
        message: message.into(),
        entries: Vec::new(),
        timing_data: String::new(),
    }
}

/// Records the query id; returns true when it arrived once already inside
/// the window (the second leg of the diamond, or a retransmit).
fn is_duplicate(node: &Node, query_id: &str) -> bool {
    let Ok(mut seen) = node.seen_queries.lock() else {
        return false;
    };
    let now = Instant::now();
    seen.retain(|_, stamp| now.duration_since(*stamp) < SEEN_QUERY_WINDOW);

    if seen.contains_key(query_id) {
        true
    } else {
        seen.insert(query_id.to_string(), now);
        false
    }
}

/// Local evaluation plus the forward decision, in one place because the
/// borough verb couples them: the authoritative owner answers and stops the
/// walk, everyone else contributes nothing and relays toward the owner.
fn evaluate_and_route(node: &Node, request: &QueryRequest) -> (QueryResponse, Vec<String>) {
    let verb = request.verb.as_str();
    let all_peers: Vec<String> = node.peers.keys().cloned().collect();

    if verb == "get_by_borough" {
        let Some(borough) = request.params.first() else {
            // No parameter: let the evaluator produce the failure message.
            return (node.store.evaluate(request), Vec::new());
        };

        let owner = node.config.authoritative_for(borough);
        if owner.as_deref() == Some(node.id.as_str()) {
            // Borough ownership is disjoint; the owner's rows are the whole
            // answer and the query stops here.
            return (node.store.evaluate(request), Vec::new());
        }

        let targets = match owner {
            Some(owner_id) if node.peers.contains_key(&owner_id) => vec![owner_id],
            _ => all_peers,
        };
        let local = empty_success(
            &request.query_id,
            format!("No local results for borough {}", borough),
        );
        return (local, targets);
    }

    let local = node.store.evaluate(request);
    let targets = if verb == "get_all" || FORWARDED_VERBS.contains(&verb) {
        all_peers
    } else {
        // Unknown verbs and non-forwarding verbs stay local.
        Vec::new()
    };
    (local, targets)
}

/// Runs the full per-query state machine on `node`.
pub(crate) fn handle_query(node: &Arc<Node>, request: QueryRequest) -> QueryResponse {
    let query_id = request.query_id.clone();
    node.ledger.start(&query_id, &node.id);

    if is_duplicate(node, &query_id) {
        node.logger
            .debug(&format!("duplicate arrival of query {} ignored", query_id))
            .ok();
        node.ledger.end(&query_id, "Total_Processing");
        let mut response =
            empty_success(&query_id, format!("Duplicate query {} ignored", query_id));
        response.timing_data = node.ledger.serialize(&query_id);
        node.ledger.clear(&query_id);
        return response;
    }

    // CacheKey + CacheLookup.
    let key = cache_key(&request.verb, &request.params);
    let cached = node.cache.get(&key);
    node.ledger.end(&query_id, "Cache_Access");

    if let Some(payload) = cached {
        match node.codec().decode(&payload) {
            Ok(hit) => {
                node.logger
                    .debug(&format!("cache hit for {} ({} entries)", key, hit.entries.len()))
                    .ok();
                node.ledger.end(&query_id, "Total_Processing");
                let mut response = QueryResponse {
                    query_id: query_id.clone(),
                    success: true,
                    message: "From cache".to_string(),
                    entries: hit.entries,
                    timing_data: String::new(),
                };
                response.timing_data = node.ledger.serialize(&query_id);
                node.ledger.clear(&query_id);
                return response;
            }
            Err(e) => {
                // A payload we cannot read is as good as a miss.
                node.logger
                    .warn(&format!("discarding unreadable cache entry {}: {}", key, e))
                    .ok();
                node.cache.remove(&key).ok();
            }
        }
    }

    // LocalEval + ForwardDecision.
    let (local, targets) = evaluate_and_route(node, &request);
    node.ledger.end(&query_id, "Local_Processing");

    if !local.success {
        // Failures are never cached and never forwarded.
        node.ledger.end(&query_id, "Total_Processing");
        let mut response = local;
        response.timing_data = node.ledger.serialize(&query_id);
        node.ledger.clear(&query_id);
        return response;
    }

    // FanOut: only peers that currently look reachable; everyone else
    // simply contributes nothing.
    let connected: Vec<String> = targets
        .into_iter()
        .filter(|peer_id| {
            node.peers
                .get(peer_id)
                .map(|stub| stub.is_connected())
                .unwrap_or(false)
        })
        .collect();

    let attempted_fan_out = !connected.is_empty();
    let mut entries = local.entries;
    let mut downstream_successes = 0usize;

    if attempted_fan_out {
        let (tx, rx) = mpsc::channel();
        for peer_id in connected {
            let node_ref = Arc::clone(node);
            let tx = tx.clone();
            let request = request.clone();
            // The store lock is long released here; peer calls run on their
            // own threads and may take a full downstream walk each.
            thread::spawn(move || {
                let result = match node_ref.peers.get(&peer_id) {
                    Some(stub) => stub.query(&request).map_err(|e| e.to_string()),
                    None => Err("peer stub missing".to_string()),
                };
                tx.send((peer_id, result)).ok();
            });
        }
        drop(tx);

        // Merge in arrival order.
        for (peer_id, result) in rx {
            node.ledger
                .end(&query_id, &format!("Query_To_{}", peer_id));
            match result {
                Ok(response) if response.success => {
                    downstream_successes += 1;
                    if !response.timing_data.is_empty() {
                        node.ledger.attach_downstream(&query_id, &response.timing_data);
                    }
                    entries.extend(response.entries);
                }
                Ok(response) => {
                    node.logger
                        .warn(&format!(
                            "peer {} answered query {} with failure: {}",
                            peer_id, query_id, response.message
                        ))
                        .ok();
                }
                Err(e) => {
                    node.logger
                        .warn(&format!(
                            "query {} to peer {} failed: {}",
                            query_id, peer_id, e
                        ))
                        .ok();
                }
            }
        }
        node.ledger.end(&query_id, "Downstream_Queries");
    }

    let message = if attempted_fan_out {
        format!(
            "Combined results from Process {} and {} downstream processes",
            node.id, downstream_successes
        )
    } else {
        local.message
    };

    let mut response = QueryResponse {
        query_id: query_id.clone(),
        success: true,
        message,
        entries,
        timing_data: String::new(),
    };

    // CacheStore: successes only.
    let payload = node.codec().encode(&response);
    if let Err(e) = node.cache.put(&key, payload, node.cache_ttl_ms()) {
        node.logger
            .warn(&format!("could not cache result for {}: {}", key, e))
            .ok();
    }

    // Finalize.
    node.ledger.end(&query_id, "Total_Processing");
    response.timing_data = node.ledger.serialize(&query_id);
    node.ledger.clear(&query_id);
    response
}
