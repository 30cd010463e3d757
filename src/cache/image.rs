//! In-memory cache of decoded images.
//!
//! Bounded by an estimated memory footprint (width × height × bytes per
//! pixel) rather than entry count. Least recently used images are evicted
//! first. Concurrent lookups of the same missing key share one load.

use std::future::Future;
use std::sync::Arc;

use image::DynamicImage;
use moka::future::Cache;
use moka::policy::EvictionPolicy;

use crate::Result;

/// Default memory budget for decoded images (64 MiB).
pub const DEFAULT_IMAGE_BUDGET: u64 = 64 * 1024 * 1024;

/// LRU cache of decoded images keyed by URL and requested bounds.
#[derive(Clone)]
pub struct ImageCache {
    cache: Cache<String, Arc<DynamicImage>>,
    budget: u64,
}

impl ImageCache {
    /// Create an image cache holding at most `budget` bytes of pixels.
    pub fn new(budget: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(budget)
            .weigher(|_key: &String, image: &Arc<DynamicImage>| {
                u32::try_from(footprint(image)).unwrap_or(u32::MAX)
            })
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { cache, budget }
    }

    /// Cache key for `url` decoded within the given bounds.
    pub fn key(url: &str, max_width: Option<u32>, max_height: Option<u32>) -> String {
        format!(
            "#W{}#H{}{url}",
            max_width.unwrap_or(0),
            max_height.unwrap_or(0)
        )
    }

    pub async fn get(&self, key: &str) -> Option<Arc<DynamicImage>> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: impl Into<String>, image: Arc<DynamicImage>) {
        self.cache.insert(key.into(), image).await;
    }

    /// Return the cached image, or run `load` once for all concurrent
    /// callers of the same key. Failures are not cached.
    pub async fn get_or_load<F>(&self, key: impl Into<String>, load: F) -> Result<Arc<DynamicImage>>
    where
        F: Future<Output = Result<Arc<DynamicImage>>>,
    {
        self.cache
            .try_get_with(key.into(), load)
            .await
            .map_err(|e| (*e).clone())
    }

    pub async fn remove(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Estimated bytes held. Eventually consistent; call
    /// [`run_pending_tasks`](Self::run_pending_tasks) first for an exact figure.
    pub fn weighted_size(&self) -> u64 {
        self.cache.weighted_size()
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("budget", &self.budget)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

/// Estimated memory held by a decoded image.
pub fn footprint(image: &DynamicImage) -> u64 {
    u64::from(image.width())
        * u64::from(image.height())
        * u64::from(image.color().bytes_per_pixel())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CourierError;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn solid(width: u32, height: u32) -> Arc<DynamicImage> {
        Arc::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            Rgba([1, 2, 3, 255]),
        )))
    }

    #[test]
    fn footprint_counts_pixels() {
        assert_eq!(footprint(&solid(10, 5)), 10 * 5 * 4);
    }

    #[test]
    fn key_includes_bounds() {
        assert_eq!(ImageCache::key("http://h/a.png", Some(40), None), "#W40#H0http://h/a.png");
        assert_ne!(
            ImageCache::key("http://h/a.png", None, None),
            ImageCache::key("http://h/a.png", Some(1), None)
        );
    }

    #[tokio::test]
    async fn least_recently_used_is_evicted() {
        // room for two 10x10 RGBA images
        let cache = ImageCache::new(800);
        cache.insert("a", solid(10, 10)).await;
        cache.insert("b", solid(10, 10)).await;
        cache.run_pending_tasks().await;
        assert!(cache.get("a").await.is_some());
        cache.run_pending_tasks().await;

        cache.insert("c", solid(10, 10)).await;
        cache.run_pending_tasks().await;

        assert!(cache.weighted_size() <= 800);
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("c").await.is_some());
        assert!(cache.get("b").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_loads_are_coalesced() {
        let cache = ImageCache::new(DEFAULT_IMAGE_BUDGET);
        let calls = Arc::new(AtomicUsize::new(0));

        let load = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(solid(2, 2))
        };
        let (a, b) = tokio::join!(
            cache.get_or_load("k", load(calls.clone())),
            cache.get_or_load("k", load(calls.clone())),
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = ImageCache::new(DEFAULT_IMAGE_BUDGET);
        let err = cache
            .get_or_load("k", async { Err(CourierError::Parse("bad".into())) })
            .await
            .unwrap_err();
        assert_eq!(err, CourierError::Parse("bad".into()));
        assert!(cache.get_or_load("k", async { Ok(solid(1, 1)) }).await.is_ok());
    }
}
