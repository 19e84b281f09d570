//! In-memory, read-mostly row store owned by one node.
//!
//! Rows live as `DataEntry` values keyed by string; crash records ingested
//! from CSV are stored under synthetic `crash_<i>` keys. The store is safe
//! under concurrent readers and one writer; every operation clones what it
//! returns so the store mutex is never held across an RPC.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use overlay_protocol::types::{CrashRecord, DataEntry, DataValue};

pub mod csv_load;
pub mod errors;
pub mod evaluate;

use errors::StoreError;

pub struct LocalStore {
    entries: Mutex<HashMap<String, DataEntry>>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    /// Creates a new, empty `LocalStore`.
    pub fn new() -> Self {
        LocalStore {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Upserts an entry by key. Last writer wins.
    pub fn store(&self, entry: DataEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockError)?;
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    /// Convenience upsert stamping the current wall-clock time.
    pub fn store_value(&self, key: &str, value: DataValue) -> Result<(), StoreError> {
        self.store(DataEntry::new(key, value, Utc::now().timestamp_millis()))
    }

    /// Returns a copy of the entry under `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<DataEntry>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::LockError)?;
        Ok(entries.get(key).cloned())
    }

    /// Removes the entry under `key`; returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::LockError)?;
        Ok(entries.remove(key).is_some())
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seeds a handful of synthetic crash records for `borough`, used when a
    /// node starts without a dataset file.
    pub fn seed_demo(&self, borough: &str) -> Result<usize, StoreError> {
        let rows = [
            ("08:15", "ATLANTIC AVENUE", "4TH AVENUE", 1, 0),
            ("13:40", "BROADWAY", "CANAL STREET", 0, 0),
            ("22:05", "QUEENS BOULEVARD", "51ST AVENUE", 2, 1),
        ];

        for (i, (time, on_street, cross_street, injured, killed)) in rows.iter().enumerate() {
            let record = CrashRecord {
                date: format!("01/{:02}/2021", i + 10),
                time: time.to_string(),
                borough: borough.to_string(),
                on_street: on_street.to_string(),
                cross_street: cross_street.to_string(),
                injured: *injured,
                killed: *killed,
                ..Default::default()
            };
            self.store_value(&format!("crash_{}", i), DataValue::Crash(record))?;
        }

        Ok(rows.len())
    }

    pub(crate) fn snapshot(&self) -> Result<Vec<DataEntry>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::LockError)?;
        Ok(entries.values().cloned().collect())
    }
}
