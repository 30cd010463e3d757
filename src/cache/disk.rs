//! Persistent, byte-budgeted response cache.
//!
//! Each entry is one file under the cache root, named after the SHA-256 of
//! its key:
//!
//! ```text
//! <hex>.entry = MAGIC | header length (u32 LE) | JSON header | body
//! ```
//!
//! The header holds the full key and the [`CacheMetadata`]. An in-memory
//! index (key → size, last use) is rebuilt from the directory on open,
//! ordered by file modification time, so recency survives restarts.
//!
//! # Concurrency
//!
//! Reads and writes for one key are serialized by a striped lock. Size
//! accounting and eviction run under the index lock, so an eviction scan
//! never races an insertion. Victims whose stripe is busy are skipped
//! rather than waited on, which keeps lock order acyclic.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{CacheEntry, CacheKey, CacheMetadata, ResponseStore};
use crate::telemetry;
use crate::{CourierError, Result};

/// Default byte budget for the response cache (300 MiB).
pub const DEFAULT_DISK_BUDGET: u64 = 300 * 1024 * 1024;

const MAGIC: &[u8; 4] = b"CRC1";
const ENTRY_EXT: &str = "entry";
const TMP_EXT: &str = "tmp";
const STRIPES: usize = 16;

#[derive(Serialize, Deserialize)]
struct EntryHeader {
    key: CacheKey,
    metadata: CacheMetadata,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size: u64,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Index {
    entries: HashMap<CacheKey, IndexEntry>,
    total: u64,
    clock: u64,
}

impl Index {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn forget(&mut self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.total = self.total.saturating_sub(entry.size);
                true
            }
            None => false,
        }
    }
}

/// Disk-backed response cache.
///
/// Total resident size never exceeds the budget once a [`put`](Self::put)
/// returns. An entry larger than the whole budget is declined.
pub struct DiskCache {
    root: PathBuf,
    budget: u64,
    index: Mutex<Index>,
    stripes: Vec<Mutex<()>>,
}

impl DiskCache {
    /// Open (or create) a cache rooted at `root` with a `budget` in bytes.
    ///
    /// Existing entries are indexed; unreadable files and leftovers from
    /// interrupted writes are deleted. If the directory holds more than
    /// `budget`, the oldest entries are evicted.
    pub fn open(root: impl Into<PathBuf>, budget: u64) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            CourierError::Cache(format!(
                "failed to create cache dir {}: {e}",
                root.display()
            ))
        })?;

        let cache = Self {
            index: Mutex::new(scan(&root)?),
            root,
            budget,
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        };

        {
            let mut index = lock(&cache.index);
            cache.evict(&mut index, 0, None, None);
            debug!(
                root = %cache.root.display(),
                entries = index.entries.len(),
                bytes = index.total,
                budget,
                "disk cache opened"
            );
        }
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Bytes currently on disk, headers included.
    pub fn total_size(&self) -> u64 {
        lock(&self.index).total
    }

    pub fn len(&self) -> usize {
        lock(&self.index).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        lock(&self.index).entries.contains_key(key)
    }

    fn stripe_of(&self, key: &CacheKey) -> usize {
        let digest = key_digest(key);
        usize::from(digest[0]) % STRIPES
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root
            .join(format!("{}.{ENTRY_EXT}", hex::encode(key_digest(key))))
    }

    /// Drop `key` from the index and disk. Caller holds the key's stripe.
    fn discard(&self, key: &CacheKey, path: &Path) -> bool {
        let known = lock(&self.index).forget(key);
        remove_file(path);
        known
    }

    /// Evict least recently used entries until `incoming` more bytes fit.
    ///
    /// `keep` is never chosen as a victim; `held` is the stripe the caller
    /// already holds. Returns whether the incoming bytes now fit.
    fn evict(
        &self,
        index: &mut Index,
        incoming: u64,
        keep: Option<&CacheKey>,
        held: Option<usize>,
    ) -> bool {
        let fits = |index: &Index| index.total.saturating_add(incoming) <= self.budget;
        if fits(index) {
            return true;
        }

        let mut victims: Vec<(CacheKey, u64)> = index
            .entries
            .iter()
            .filter(|(k, _)| Some(*k) != keep)
            .map(|(k, e)| (k.clone(), e.last_used))
            .collect();
        victims.sort_by_key(|(_, last_used)| *last_used);

        for (victim, _) in victims {
            if fits(index) {
                break;
            }
            let stripe = self.stripe_of(&victim);
            let _guard = if Some(stripe) == held {
                None
            } else {
                match self.stripes[stripe].try_lock() {
                    Ok(guard) => Some(guard),
                    Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
                    Err(TryLockError::WouldBlock) => continue,
                }
            };

            let path = self.path_for(&victim);
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!(key = %victim, error = %e, "failed to evict cache entry");
                continue;
            }
            index.forget(&victim);
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(1);
            debug!(key = %victim, total = index.total, "evicted cache entry");
        }

        fits(index)
    }

    /// Account for and write an encoded entry. Caller holds `stripe`.
    fn store_locked(&self, key: &CacheKey, stripe: usize, encoded: &[u8]) -> Result<bool> {
        let size = encoded.len() as u64;
        let path = self.path_for(key);

        if size > self.budget {
            self.discard(key, &path);
            debug!(key = %key, size, budget = self.budget, "entry exceeds cache budget, not stored");
            return Ok(false);
        }

        {
            let mut index = lock(&self.index);
            index.forget(key);
            if !self.evict(&mut index, size, Some(key), Some(stripe)) {
                drop(index);
                remove_file(&path);
                debug!(key = %key, size, "no room for entry after eviction, not stored");
                return Ok(false);
            }
            let last_used = index.tick();
            index.entries.insert(key.clone(), IndexEntry { size, last_used });
            index.total += size;
        }

        if let Err(e) = write_atomic(&path, encoded) {
            self.discard(key, &path);
            return Err(e);
        }
        debug!(key = %key, size, "stored cache entry");
        Ok(true)
    }
}

impl ResponseStore for DiskCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let _guard = lock(&self.stripes[self.stripe_of(key)]);
        {
            let mut index = lock(&self.index);
            let tick = index.tick();
            match index.entries.get_mut(key) {
                Some(entry) => entry.last_used = tick,
                None => return Ok(None),
            }
        }

        let path = self.path_for(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                lock(&self.index).forget(key);
                return Ok(None);
            }
            Err(e) => {
                return Err(CourierError::Cache(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        match decode(Bytes::from(raw)) {
            Ok((header, data)) if header.key == *key => {
                // Recency on disk is only used to order the index on reopen.
                if let Ok(file) = File::options().write(true).open(&path) {
                    let _ = file.set_modified(SystemTime::now());
                }
                Ok(Some(CacheEntry {
                    data,
                    metadata: header.metadata,
                }))
            }
            Ok(_) => {
                warn!(key = %key, "cache file holds a different key, discarding");
                self.discard(key, &path);
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "corrupt cache entry, discarding");
                self.discard(key, &path);
                Ok(None)
            }
        }
    }

    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<bool> {
        let encoded = encode(key, entry)?;
        let stripe = self.stripe_of(key);
        let _guard = lock(&self.stripes[stripe]);
        self.store_locked(key, stripe, &encoded)
    }

    /// The key's stripe is held from the read through the file replace.
    fn update_metadata(&self, key: &CacheKey, metadata: &CacheMetadata) -> Result<()> {
        let stripe = self.stripe_of(key);
        let _guard = lock(&self.stripes[stripe]);
        if !self.contains(key) {
            return Ok(());
        }

        let path = self.path_for(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                lock(&self.index).forget(key);
                return Ok(());
            }
            Err(e) => {
                return Err(CourierError::Cache(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        let data = match decode(Bytes::from(raw)) {
            Ok((header, data)) if header.key == *key => data,
            _ => {
                warn!(key = %key, "unreadable cache entry on refresh, discarding");
                self.discard(key, &path);
                return Ok(());
            }
        };

        let encoded = encode(key, &CacheEntry::new(data, metadata.clone()))?;
        self.store_locked(key, stripe, &encoded)?;
        debug!(key = %key, "refreshed cache metadata");
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool> {
        let _guard = lock(&self.stripes[self.stripe_of(key)]);
        Ok(self.discard(key, &self.path_for(key)))
    }

    fn clear(&self) -> Result<()> {
        let _guards: Vec<_> = self.stripes.iter().map(lock).collect();
        let mut index = lock(&self.index);
        for key in index.entries.keys() {
            remove_file(&self.path_for(key));
        }
        index.entries.clear();
        index.total = 0;
        Ok(())
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("root", &self.root)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// File format
// ============================================================================

fn key_digest(key: &CacheKey) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key.method().as_bytes());
    hasher.update(b" ");
    hasher.update(key.url().as_bytes());
    hasher.finalize().into()
}

fn encode(key: &CacheKey, entry: &CacheEntry) -> Result<Vec<u8>> {
    let header = serde_json::to_vec(&EntryHeader {
        key: key.clone(),
        metadata: entry.metadata.clone(),
    })
    .map_err(|e| CourierError::Cache(format!("failed to encode cache header: {e}")))?;
    let header_len = u32::try_from(header.len())
        .map_err(|_| CourierError::Cache("cache header too large".into()))?;

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + entry.data.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&entry.data);
    Ok(out)
}

fn decode(raw: Bytes) -> Result<(EntryHeader, Bytes)> {
    let prefix = MAGIC.len() + 4;
    if raw.len() < prefix || &raw[..MAGIC.len()] != MAGIC {
        return Err(CourierError::Cache("bad cache file magic".into()));
    }
    let header_len = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
    let body_start = prefix
        .checked_add(header_len)
        .filter(|end| *end <= raw.len())
        .ok_or_else(|| CourierError::Cache("truncated cache header".into()))?;
    let header: EntryHeader = serde_json::from_slice(&raw[prefix..body_start])
        .map_err(|e| CourierError::Cache(format!("bad cache header: {e}")))?;
    Ok((header, raw.slice(body_start..)))
}

fn read_header(path: &Path) -> Result<EntryHeader> {
    let mut file = File::open(path)?;
    let mut prefix = [0u8; 8];
    file.read_exact(&mut prefix)?;
    if &prefix[..4] != MAGIC {
        return Err(CourierError::Cache("bad cache file magic".into()));
    }
    let header_len = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
    let mut header = vec![0u8; header_len];
    file.read_exact(&mut header)?;
    serde_json::from_slice(&header)
        .map_err(|e| CourierError::Cache(format!("bad cache header: {e}")))
}

/// Write via tmp + rename so readers never see a partial entry.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension(TMP_EXT);
    fs::write(&tmp_path, data).map_err(|e| {
        CourierError::Cache(format!(
            "failed to write cache file {}: {e}",
            tmp_path.display()
        ))
    })?;
    fs::rename(&tmp_path, path).map_err(|e| {
        remove_file(&tmp_path);
        CourierError::Cache(format!(
            "failed to rename cache file {} → {}: {e}",
            tmp_path.display(),
            path.display()
        ))
    })
}

fn remove_file(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove cache file");
    }
}

/// Index every readable entry under `root`, oldest modification first.
fn scan(root: &Path) -> Result<Index> {
    let mut found = Vec::new();
    let dir = fs::read_dir(root).map_err(|e| {
        CourierError::Cache(format!("failed to read cache dir {}: {e}", root.display()))
    })?;

    for dirent in dir {
        let dirent = dirent?;
        let path = dirent.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some(TMP_EXT) => remove_file(&path),
            Some(ENTRY_EXT) => match read_header(&path) {
                Ok(header) => {
                    let meta = dirent.metadata()?;
                    let modified = meta.modified().unwrap_or(UNIX_EPOCH);
                    found.push((header.key, meta.len(), modified));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable cache file, deleting");
                    remove_file(&path);
                }
            },
            _ => {}
        }
    }

    found.sort_by_key(|(_, _, modified)| *modified);
    let mut index = Index::default();
    for (key, size, _) in found {
        let last_used = index.tick();
        index.total += size;
        if let Some(old) = index.entries.insert(key, IndexEntry { size, last_used }) {
            index.total -= old.size;
        }
    }
    Ok(index)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
