//! The request pipeline run by workers.
//!
//! ```text
//! lookup ── fresh ──────────────────────────────► parse
//!    │      soft-stale ──► serve cached + background revalidate
//!    │
//!    └─ miss / expired ──► transport (conditional if validators known)
//!                              │ 304 ──► cached bytes, refreshed metadata
//!                              │ 2xx ──► store (unless no-store) ──► parse
//!                              └ other ► Status error
//! ```
//!
//! Cache faults never fail a request: a read error is a miss and a write
//! error is logged. Parse failures leave the stored bytes in place.

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use reqwest::Method;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::cache::headers::now_millis;
use crate::cache::{
    CacheEntry, CacheKey, CacheMetadata, ImageCache, ResponseStore, parse_cache_headers,
};
use crate::delivery::Delivery;
use crate::parser::{ImageParser, ResponseParser};
use crate::request::FireRequest;
use crate::telemetry;
use crate::transport::{NetworkResponse, Transport};
use crate::{CourierError, Result};

/// Longest server message carried in a [`CourierError::Status`].
const STATUS_MESSAGE_LIMIT: usize = 512;

/// State shared by the dispatcher and every in-flight request.
pub(crate) struct Shared {
    pub(crate) cache: Arc<dyn ResponseStore>,
    pub(crate) images: ImageCache,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) delivery: Arc<dyn Delivery>,
    pub(crate) user_agent: String,
    pub(crate) app_version: String,
    /// Worker pool handle, for background revalidation.
    pub(crate) workers: Handle,
}

/// Perform `request` and parse the response, recording metrics.
pub(crate) async fn execute<T: Send + 'static>(
    shared: &Arc<Shared>,
    request: &FireRequest,
    parser: &dyn ResponseParser<Output = T>,
) -> Result<T> {
    let start = Instant::now();
    let method = request.method().to_string();

    let result = match perform(shared, request).await {
        Ok(response) => {
            let parsed = parser.parse(&response);
            metrics::histogram!(
                telemetry::REQUEST_DURATION_SECONDS,
                "method" => method.clone(),
                "source" => source_label(&response),
            )
            .record(start.elapsed().as_secs_f64());
            parsed
        }
        Err(e) => Err(e),
    };

    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(telemetry::REQUESTS_TOTAL, "method" => method, "status" => status)
        .increment(1);

    match &result {
        Ok(_) => debug!(method = %request.method(), url = request.url(), "request completed"),
        Err(e) => debug!(method = %request.method(), url = request.url(), error = %e, "request failed"),
    }
    result
}

/// Obtain a successful response for `request` from the cache or network.
pub(crate) async fn perform(shared: &Arc<Shared>, request: &FireRequest) -> Result<NetworkResponse> {
    let key = request.cache_key();
    let method = request.method().to_string();
    let cached = if request.is_cacheable() {
        lookup(shared.cache.as_ref(), &key)
    } else {
        None
    };

    let now = now_millis();
    if let Some(entry) = &cached
        && !entry.metadata.is_expired(now)
    {
        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "method" => method).increment(1);
        if entry.metadata.refresh_needed(now) {
            debug!(key = %key, "serving soft-expired entry, revalidating");
            let shared_bg = Arc::clone(shared);
            let request_bg = request.clone();
            let metadata = entry.metadata.clone();
            shared.workers.spawn(async move {
                revalidate(&shared_bg, &request_bg, metadata).await;
            });
        }
        return Ok(entry.to_response());
    }
    if request.is_cacheable() {
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "method" => method).increment(1);
    }

    let validators = cached
        .as_ref()
        .map(|e| &e.metadata)
        .filter(|m| m.has_validators());
    let response = shared
        .transport
        .execute(request.to_transport(&shared.user_agent, validators))
        .await?;

    if response.status == 304
        && let Some(entry) = cached
    {
        return Ok(not_modified(shared.cache.as_ref(), &key, entry, &response));
    }
    if !response.is_success() {
        return Err(status_error(&response));
    }
    if request.is_cacheable() {
        store(shared.cache.as_ref(), &key, &response);
    }
    Ok(response)
}

/// Refresh a soft-expired entry without a caller waiting on it.
async fn revalidate(shared: &Arc<Shared>, request: &FireRequest, metadata: CacheMetadata) {
    let key = request.cache_key();
    let validators = Some(&metadata).filter(|m| m.has_validators());
    let wire = request.to_transport(&shared.user_agent, validators);

    match shared.transport.execute(wire).await {
        Ok(response) if response.status == 304 => {
            if let Some(fresh) = parse_cache_headers(&response.headers, now_millis()) {
                let refreshed = metadata.refreshed(fresh);
                if let Err(e) = shared.cache.update_metadata(&key, &refreshed) {
                    warn!(key = %key, error = %e, "failed to refresh cache metadata");
                }
            }
        }
        Ok(response) if response.is_success() => store(shared.cache.as_ref(), &key, &response),
        Ok(response) => debug!(key = %key, status = response.status, "revalidation rejected"),
        Err(e) => debug!(key = %key, error = %e, "revalidation failed"),
    }
}

/// Decode `url` into an image within the given bounds, through both caches.
pub(crate) async fn load_image(
    shared: &Arc<Shared>,
    url: &str,
    max_width: Option<u32>,
    max_height: Option<u32>,
) -> Result<Arc<DynamicImage>> {
    let parser = ImageParser::new(max_width, max_height);
    let key = ImageCache::key(url, parser.max_width, parser.max_height);

    if let Some(image) = shared.images.get(&key).await {
        metrics::counter!(telemetry::IMAGE_CACHE_HITS_TOTAL).increment(1);
        return Ok(image);
    }
    metrics::counter!(telemetry::IMAGE_CACHE_MISSES_TOTAL).increment(1);

    let request = FireRequest::new(Method::GET, url, None);
    shared
        .images
        .get_or_load(key, async {
            execute(shared, &request, &parser).await.map(Arc::new)
        })
        .await
}

fn lookup(cache: &dyn ResponseStore, key: &CacheKey) -> Option<CacheEntry> {
    match cache.get(key) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(key = %key, error = %e, "cache read failed, treating as miss");
            None
        }
    }
}

fn store(cache: &dyn ResponseStore, key: &CacheKey, response: &NetworkResponse) {
    let Some(metadata) = parse_cache_headers(&response.headers, now_millis()) else {
        // no-store: drop anything stored under this key
        if let Err(e) = cache.remove(key) {
            warn!(key = %key, error = %e, "failed to drop uncacheable entry");
        }
        return;
    };

    match cache.put(key, &CacheEntry::new(response.data.clone(), metadata)) {
        Ok(true) => {}
        Ok(false) => debug!(key = %key, size = response.data.len(), "cache declined entry"),
        Err(e) => warn!(key = %key, error = %e, "cache write failed"),
    }
}

fn not_modified(
    cache: &dyn ResponseStore,
    key: &CacheKey,
    entry: CacheEntry,
    response: &NetworkResponse,
) -> NetworkResponse {
    let entry = match parse_cache_headers(&response.headers, now_millis()) {
        Some(fresh) => {
            let refreshed = CacheEntry {
                metadata: entry.metadata.refreshed(fresh),
                data: entry.data,
            };
            if let Err(e) = cache.update_metadata(key, &refreshed.metadata) {
                warn!(key = %key, error = %e, "failed to refresh cache metadata");
            }
            refreshed
        }
        None => {
            if let Err(e) = cache.remove(key) {
                warn!(key = %key, error = %e, "failed to drop uncacheable entry");
            }
            entry
        }
    };
    debug!(key = %key, "not modified, serving cached body");

    let mut served = entry.to_response();
    served.from_cache = false;
    served.not_modified = true;
    served
}

fn status_error(response: &NetworkResponse) -> CourierError {
    let text = String::from_utf8_lossy(&response.data);
    let message = match text.char_indices().nth(STATUS_MESSAGE_LIMIT) {
        Some((end, _)) => format!("{}…", &text[..end]),
        None => text.into_owned(),
    };
    CourierError::Status {
        status: response.status,
        message,
    }
}

fn source_label(response: &NetworkResponse) -> &'static str {
    if response.not_modified {
        "not_modified"
    } else if response.from_cache {
        "cache"
    } else {
        "network"
    }
}
