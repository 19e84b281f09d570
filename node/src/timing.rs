//! Per-query phase timing.
//!
//! Each query gets one ledger entry on its hosting node: a stopwatch anchor
//! plus named phase readings. Every `end` measures elapsed-since-anchor,
//! not the length of a matching interval; phases are "how long since the
//! query began", which is the published meaning of the numbers and must not
//! be changed to interval timing.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Instant;

struct LedgerEntry {
    node_id: String,
    anchor: Instant,
    /// Phase readings in first-recorded order; re-recording a phase
    /// overwrites its value in place.
    phases: Vec<(String, f64)>,
    downstream: Vec<String>,
}

/// Thread-safe, per-node timing ledger keyed by query id.
pub struct TimingLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl Default for TimingLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingLedger {
    pub fn new() -> Self {
        TimingLedger {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records the hosting node and anchors the stopwatch to now. Calling
    /// again for the same query id starts the entry over.
    pub fn start(&self, query_id: &str, node_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                query_id.to_string(),
                LedgerEntry {
                    node_id: node_id.to_string(),
                    anchor: Instant::now(),
                    phases: Vec::new(),
                    downstream: Vec::new(),
                },
            );
        }
    }

    /// Records elapsed-since-anchor under `phase`. Unknown query ids are
    /// ignored (there is no anchor to measure from).
    pub fn end(&self, query_id: &str, phase: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(entry) = entries.get_mut(query_id) {
                let seconds = entry.anchor.elapsed().as_secs_f64();
                match entry.phases.iter_mut().find(|(name, _)| name == phase) {
                    Some((_, value)) => *value = seconds,
                    None => entry.phases.push((phase.to_string(), seconds)),
                }
            }
        }
    }

    /// Appends an opaque timing blob received from a downstream node.
    pub fn attach_downstream(&self, query_id: &str, blob: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(entry) = entries.get_mut(query_id) {
                entry.downstream.push(blob.to_string());
            }
        }
    }

    /// Renders the entry as the human-readable block included in responses:
    /// a `[Process <id>]` header, one line per phase, then the downstream
    /// blobs verbatim.
    pub fn serialize(&self, query_id: &str) -> String {
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return String::new(),
        };
        let Some(entry) = entries.get(query_id) else {
            return String::new();
        };

        let mut out = String::new();
        let _ = writeln!(out, "  [Process {}]", entry.node_id);
        for (phase, seconds) in &entry.phases {
            let _ = writeln!(out, "    {:<20}: {:.6} seconds", phase, seconds);
        }
        for blob in &entry.downstream {
            out.push_str(blob);
        }
        out
    }

    /// Forgets the entry for `query_id`.
    pub fn clear(&self, query_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(query_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
