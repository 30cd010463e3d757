//! Telemetry metric name constants.
//!
//! Centralised metric names for courier operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `courier_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `method` — HTTP method (e.g. "GET", "POST")
//! - `status` — outcome: "ok" or "error"
//! - `source` — where a response came from: "network", "cache" or "not_modified"

/// Total requests dispatched.
///
/// Labels: `method`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "courier_requests_total";

/// Request duration in seconds, from dispatch to parsed result.
///
/// Labels: `method`, `source`.
pub const REQUEST_DURATION_SECONDS: &str = "courier_request_duration_seconds";

/// Total response cache hits served without revalidation.
///
/// Labels: `method`.
pub const CACHE_HITS_TOTAL: &str = "courier_cache_hits_total";

/// Total response cache misses, including expired entries.
///
/// Labels: `method`.
pub const CACHE_MISSES_TOTAL: &str = "courier_cache_misses_total";

/// Total entries evicted from the disk cache to stay within budget.
pub const CACHE_EVICTIONS_TOTAL: &str = "courier_cache_evictions_total";

/// Total decoded images served from memory.
pub const IMAGE_CACHE_HITS_TOTAL: &str = "courier_image_cache_hits_total";

/// Total image lookups that had to decode.
pub const IMAGE_CACHE_MISSES_TOTAL: &str = "courier_image_cache_misses_total";
