//! Overlay configuration.
//!
//! The overlay is a fixed directed graph loaded from a JSON file. Each
//! process entry carries its endpoint, its outbound `connections`, and the
//! `data_subset` (borough) it is authoritative for. The `overlay` edge list
//! is informational only; the authoritative edges are the per-node
//! `connections`.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Marker subset for the portal process, which owns no borough.
const PORTAL_SUBSET: &str = "portal";
/// The subset that also catches every borough no other node claims.
const CATCH_ALL_SUBSET: &str = "STATEN ISLAND";

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    ParseError(String),
    /// A `connections` entry names a process that does not exist.
    UnknownPeer { node: String, peer: String },
    /// The requested node id is not present in the config.
    UnknownNode(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "could not read config: {}", e),
            ConfigError::ParseError(msg) => write!(f, "could not parse config: {}", msg),
            ConfigError::UnknownPeer { node, peer } => {
                write!(f, "process {} lists unknown peer {}", node, peer)
            }
            ConfigError::UnknownNode(id) => write!(f, "process {} not present in config", id),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// One process entry of the overlay config.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub connections: Vec<String>,
    #[serde(default)]
    pub data_subset: String,
}

impl ProcessConfig {
    /// The borough this process is authoritative for, if any. The portal
    /// marker and an empty subset both mean "none".
    pub fn borough(&self) -> Option<&str> {
        if self.data_subset.is_empty() || self.data_subset.eq_ignore_ascii_case(PORTAL_SUBSET) {
            None
        } else {
            Some(&self.data_subset)
        }
    }
}

/// The full overlay topology.
#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    pub processes: HashMap<String, ProcessConfig>,
    #[serde(default)]
    pub overlay: Vec<String>,
}

impl OverlayConfig {
    /// Loads and validates an overlay config from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parses and validates an overlay config from a JSON string.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: OverlayConfig =
            serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        for (id, process) in &config.processes {
            for peer in &process.connections {
                if !config.processes.contains_key(peer) {
                    return Err(ConfigError::UnknownPeer {
                        node: id.clone(),
                        peer: peer.clone(),
                    });
                }
            }
        }

        Ok(config)
    }

    /// Returns the entry for `id`, or an error naming it.
    pub fn node(&self, id: &str) -> Result<&ProcessConfig, ConfigError> {
        self.processes
            .get(id)
            .ok_or_else(|| ConfigError::UnknownNode(id.to_string()))
    }

    /// The portal is the process no other process forwards to. When the
    /// graph is malformed and several qualify, the smallest id wins so
    /// every node derives the same answer.
    pub fn portal_id(&self) -> Option<String> {
        let mut candidates: Vec<&String> = self
            .processes
            .keys()
            .filter(|id| {
                !self
                    .processes
                    .values()
                    .any(|p| p.connections.iter().any(|c| c == *id))
            })
            .collect();
        candidates.sort();
        candidates.first().map(|id| (*id).to_string())
    }

    /// The node authoritative for `borough`: exact subset match first,
    /// otherwise the catch-all node. Borough comparison is
    /// case-insensitive.
    pub fn authoritative_for(&self, borough: &str) -> Option<String> {
        let mut ids: Vec<&String> = self.processes.keys().collect();
        ids.sort();

        for id in &ids {
            if let Some(subset) = self.processes[*id].borough() {
                if subset.eq_ignore_ascii_case(borough) {
                    return Some((*id).to_string());
                }
            }
        }

        for id in &ids {
            if self.processes[*id]
                .data_subset
                .eq_ignore_ascii_case(CATCH_ALL_SUBSET)
            {
                return Some((*id).to_string());
            }
        }

        None
    }
}
