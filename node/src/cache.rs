//! Keyed, TTL-bounded cache of serialized query results.
//!
//! The cache is a named region: a byte image on disk that co-located node
//! instances reopen and share. Every operation runs under the single region
//! mutex; mutations rewrite the whole image so a partial write can never
//! corrupt a previously valid one. If the backing file cannot be created or
//! written the cache degrades to an identical in-memory map and callers
//! cannot tell the difference.
//!
//! Image layout, all integers big-endian:
//!
//! ```md
//! u32 n_entries
//! n_entries x {
//!     u32 key_len, key_bytes,
//!     u32 val_len, val_bytes,
//!     i64 inserted_at (wall-clock ms),
//!     i32 ttl_ms
//! }
//! ```
//!
//! Freshness is measured against a monotonic anchor, never the wall clock;
//! the wall-clock `inserted_at` only travels inside the image so a
//! reopening instance can back-date its anchors.

use std::collections::HashMap;
use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;

pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

#[derive(Debug)]
pub enum CacheError {
    /// The serialized image would not fit the region.
    CapacityExceeded { needed: usize, capacity: usize },
    /// Error related to lock acquisition.
    LockError,
}

impl Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::CapacityExceeded { needed, capacity } => write!(
                f,
                "cache image of {} bytes exceeds region capacity of {} bytes",
                needed, capacity
            ),
            CacheError::LockError => write!(f, "Failed to acquire cache lock"),
        }
    }
}

impl std::error::Error for CacheError {}

#[derive(Clone)]
struct CacheRecord {
    payload: Vec<u8>,
    inserted_at: i64,
    ttl_ms: i32,
    anchor: Instant,
}

impl CacheRecord {
    fn is_fresh(&self) -> bool {
        self.ttl_ms == 0 || self.anchor.elapsed().as_millis() <= self.ttl_ms as u128
    }
}

struct CacheState {
    entries: HashMap<String, CacheRecord>,
    backing: Option<PathBuf>,
    /// (mtime, size) of the image we last read or wrote.
    last_sync: Option<(SystemTime, u64)>,
}

/// A named, TTL-bounded key → bytes map.
pub struct ResultCache {
    name: String,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ResultCache {
    /// Opens (or creates) the named region under `region_dir`. Never fails:
    /// when the region file cannot be set up the cache silently becomes
    /// process-local.
    pub fn open(name: &str, capacity: usize, region_dir: &Path) -> Self {
        let mut state = CacheState {
            entries: HashMap::new(),
            backing: None,
            last_sync: None,
        };

        if fs::create_dir_all(region_dir).is_ok() {
            let path = region_dir.join(format!("{}.cache", name));
            let created = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .is_ok();
            if created {
                if let Ok(raw) = fs::read(&path) {
                    if !raw.is_empty() {
                        if let Some(entries) = parse_image(&raw) {
                            state.entries = entries;
                        }
                    }
                    state.last_sync = image_stamp(&path);
                    state.backing = Some(path);
                }
            }
        }

        ResultCache {
            name: name.to_string(),
            capacity,
            state: Mutex::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the cache fell back to a process-local map.
    pub fn is_degraded(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.backing.is_none())
            .unwrap_or(true)
    }

    /// Returns the payload under `key` iff the entry exists and is fresh.
    /// The first `get` after expiry drops the entry.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut state = self.state.lock().ok()?;
        refresh(&mut state);

        let expired = match state.entries.get(key) {
            Some(record) if record.is_fresh() => return Some(record.payload.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            // Evict lazily; the image is rewritten on the next mutation.
            state.entries.remove(key);
        }
        None
    }

    /// Overwrites any prior entry under `key`. `ttl_ms == 0` means no
    /// expiry. Fails without touching the existing image when the new image
    /// would exceed the region capacity.
    pub fn put(&self, key: &str, payload: Vec<u8>, ttl_ms: i32) -> Result<(), CacheError> {
        let mut state = self.state.lock().map_err(|_| CacheError::LockError)?;
        refresh(&mut state);

        let mut needed = 4 + entry_size(key, &payload);
        for (existing_key, record) in &state.entries {
            if existing_key != key {
                needed += entry_size(existing_key, &record.payload);
            }
        }
        if needed > self.capacity {
            return Err(CacheError::CapacityExceeded {
                needed,
                capacity: self.capacity,
            });
        }

        state.entries.insert(
            key.to_string(),
            CacheRecord {
                payload,
                inserted_at: Utc::now().timestamp_millis(),
                ttl_ms,
                anchor: Instant::now(),
            },
        );
        write_image(&mut state);
        Ok(())
    }

    /// Drops the entry under `key`.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut state = self.state.lock().map_err(|_| CacheError::LockError)?;
        refresh(&mut state);
        state.entries.remove(key);
        write_image(&mut state);
        Ok(())
    }

    /// Drops all entries.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock().map_err(|_| CacheError::LockError)?;
        state.entries.clear();
        write_image(&mut state);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn entry_size(key: &str, payload: &[u8]) -> usize {
    4 + key.len() + 4 + payload.len() + 8 + 4
}

fn image_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Re-reads the image when another instance has rewritten it since we last
/// touched it.
fn refresh(state: &mut CacheState) {
    let Some(path) = state.backing.clone() else {
        return;
    };

    let stamp = image_stamp(&path);
    if stamp.is_none() || stamp == state.last_sync {
        return;
    }

    match fs::read(&path) {
        Ok(raw) => {
            if raw.is_empty() {
                state.entries.clear();
            } else if let Some(entries) = parse_image(&raw) {
                state.entries = entries;
            }
            state.last_sync = stamp;
        }
        Err(_) => {
            // The region vanished under us: degrade, keep what we have.
            state.backing = None;
        }
    }
}

fn write_image(state: &mut CacheState) {
    let Some(path) = state.backing.clone() else {
        return;
    };

    let image = serialize_image(&state.entries);
    match fs::write(&path, image) {
        Ok(()) => state.last_sync = image_stamp(&path),
        Err(_) => state.backing = None,
    }
}

fn serialize_image(entries: &HashMap<String, CacheRecord>) -> Vec<u8> {
    let mut image = Vec::new();
    image.extend(&(entries.len() as u32).to_be_bytes());
    for (key, record) in entries {
        image.extend(&(key.len() as u32).to_be_bytes());
        image.extend(key.as_bytes());
        image.extend(&(record.payload.len() as u32).to_be_bytes());
        image.extend(&record.payload);
        image.extend(&record.inserted_at.to_be_bytes());
        image.extend(&record.ttl_ms.to_be_bytes());
    }
    image
}

fn parse_image(raw: &[u8]) -> Option<HashMap<String, CacheRecord>> {
    let now_ms = Utc::now().timestamp_millis();
    let now = Instant::now();
    let mut offset = 0usize;

    let n_entries = read_u32(raw, &mut offset)? as usize;
    let mut entries = HashMap::with_capacity(n_entries);

    for _ in 0..n_entries {
        let key_len = read_u32(raw, &mut offset)? as usize;
        let key = String::from_utf8(read_slice(raw, &mut offset, key_len)?.to_vec()).ok()?;
        let val_len = read_u32(raw, &mut offset)? as usize;
        let payload = read_slice(raw, &mut offset, val_len)?.to_vec();
        let inserted_at = i64::from_be_bytes(read_slice(raw, &mut offset, 8)?.try_into().ok()?);
        let ttl_ms = i32::from_be_bytes(read_slice(raw, &mut offset, 4)?.try_into().ok()?);

        // Back-date the monotonic anchor by the entry's wall-clock age so
        // freshness keeps counting from the original insertion.
        let age_ms = (now_ms - inserted_at).max(0) as u64;
        let anchor = now
            .checked_sub(Duration::from_millis(age_ms))
            .unwrap_or(now);

        entries.insert(
            key,
            CacheRecord {
                payload,
                inserted_at,
                ttl_ms,
                anchor,
            },
        );
    }

    Some(entries)
}

fn read_u32(raw: &[u8], offset: &mut usize) -> Option<u32> {
    let slice = read_slice(raw, offset, 4)?;
    Some(u32::from_be_bytes(slice.try_into().ok()?))
}

fn read_slice<'a>(raw: &'a [u8], offset: &mut usize, len: usize) -> Option<&'a [u8]> {
    let slice = raw.get(*offset..*offset + len)?;
    *offset += len;
    Some(slice)
}
