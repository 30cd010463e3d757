//! Caching subsystem.
//!
//! Two independent caches:
//!
//! - [`DiskCache`]: persistent, byte-budgeted store of raw response bodies
//!   keyed by `(method, url)`. Consulted before every network call and
//!   reloaded from disk on startup.
//!
//! - [`ImageCache`]: in-memory LRU of decoded images keyed by URL and
//!   requested bounds. Rebuilt every process lifetime from the disk cache's
//!   raw bytes.

pub mod disk;
pub mod headers;
pub mod image;

pub use disk::DiskCache;
pub use headers::{CacheControl, CacheMetadata, parse_cache_headers};
pub use image::ImageCache;

use std::fmt;

use bytes::Bytes;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::transport::NetworkResponse;

/// Cache identity of a request: `(method, fully resolved url)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    method: String,
    url: String,
}

impl CacheKey {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method: method.as_str().to_string(),
            url: url.into(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored response body with its freshness metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub data: Bytes,
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    pub fn new(data: impl Into<Bytes>, metadata: CacheMetadata) -> Self {
        Self {
            data: data.into(),
            metadata,
        }
    }

    /// The entry as a `200` response served from the cache.
    pub fn to_response(&self) -> NetworkResponse {
        let mut response = NetworkResponse::new(200, self.metadata.header_map(), self.data.clone());
        response.from_cache = true;
        response
    }
}

/// Storage beneath the dispatcher's response cache.
///
/// Implementations must be safe to call from several worker threads at once.
pub trait ResponseStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Store an entry. `Ok(false)` means the store declined it (too large
    /// for the budget); that is not an error.
    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<bool>;

    /// Replace an entry's metadata, keeping its body.
    ///
    /// The default is a plain `get` then `put`. Stores that lock per key
    /// override it to hold the lock across both.
    fn update_metadata(&self, key: &CacheKey, metadata: &CacheMetadata) -> Result<()> {
        if let Some(mut entry) = self.get(key)? {
            entry.metadata = metadata.clone();
            self.put(key, &entry)?;
        }
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<bool>;

    fn clear(&self) -> Result<()>;
}

/// A store that keeps nothing. Used when the cache directory is unusable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl ResponseStore for NoCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(None)
    }

    fn put(&self, _key: &CacheKey, _entry: &CacheEntry) -> Result<bool> {
        Ok(false)
    }

    fn remove(&self, _key: &CacheKey) -> Result<bool> {
        Ok(false)
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_identity_is_method_and_url() {
        let a = CacheKey::new(Method::GET, "http://h/a");
        assert_eq!(a, CacheKey::new(Method::GET, "http://h/a"));
        assert_ne!(a, CacheKey::new(Method::POST, "http://h/a"));
        assert_eq!(a.to_string(), "GET http://h/a");
    }

    #[test]
    fn no_cache_declines_everything() {
        let key = CacheKey::new(Method::GET, "http://h");
        let entry = CacheEntry::new(&b"x"[..], CacheMetadata::default());
        assert!(!NoCache.put(&key, &entry).unwrap());
        assert!(NoCache.get(&key).unwrap().is_none());
    }

    #[test]
    fn entry_replays_stored_headers() {
        let metadata = CacheMetadata {
            headers: vec![("content-type".into(), "application/json".into())],
            ..CacheMetadata::default()
        };
        let response = CacheEntry::new(&b"{}"[..], metadata).to_response();
        assert!(response.from_cache);
        assert_eq!(response.headers.get("content-type").unwrap(), "application/json");
    }
}
