//! Freshness metadata derived from HTTP response headers.
//!
//! Every stored response carries two expiry instants:
//!
//! - `soft_expires`: until then the entry is served without touching the
//!   network. After it, the cached bytes are still delivered but a
//!   background revalidation is started.
//! - `expires`: after it, the entry must be revalidated before use.
//!
//! A response without any freshness headers expires immediately; it is
//! still stored so a later request can revalidate with its validators.

use chrono::{DateTime, Utc};
use reqwest::header::{
    CACHE_CONTROL, DATE, ETAG, EXPIRES, HeaderMap, HeaderName, HeaderValue, LAST_MODIFIED,
};
use serde::{Deserialize, Serialize};

/// Parsed `Cache-Control` directives the cache acts on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub max_age: Option<u64>,
    pub stale_while_revalidate: Option<u64>,
    pub no_cache: bool,
    pub no_store: bool,
    pub must_revalidate: bool,
}

impl CacheControl {
    pub fn parse(header: &str) -> Self {
        let mut control = Self::default();
        for directive in header.split(',') {
            let directive = directive.trim().to_ascii_lowercase();
            match directive.as_str() {
                "no-cache" => control.no_cache = true,
                "no-store" => control.no_store = true,
                "must-revalidate" | "proxy-revalidate" => control.must_revalidate = true,
                _ => {
                    if let Some(seconds) = directive.strip_prefix("max-age=") {
                        control.max_age = seconds.trim_matches('"').parse().ok();
                    } else if let Some(seconds) = directive.strip_prefix("stale-while-revalidate=")
                    {
                        control.stale_while_revalidate = seconds.trim_matches('"').parse().ok();
                    }
                }
            }
        }
        control
    }

    fn is_present(&self) -> bool {
        *self != Self::default()
    }
}

/// Validators and expiry instants stored alongside a cached body.
///
/// Instants are Unix epoch milliseconds; `0` means "unknown".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub etag: Option<String>,
    /// Raw `Last-Modified` value, echoed back in `If-Modified-Since`.
    pub last_modified: Option<String>,
    pub server_date: i64,
    pub soft_expires: i64,
    pub expires: i64,
    /// Response headers replayed on a cache hit.
    pub headers: Vec<(String, String)>,
}

impl CacheMetadata {
    /// The entry must be revalidated before it is used.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires <= now
    }

    /// The entry may be served, but should be refreshed in the background.
    pub fn refresh_needed(&self, now: i64) -> bool {
        self.soft_expires <= now
    }

    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// Stored headers as a `HeaderMap`. Headers that no longer parse are
    /// skipped.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    /// Apply a `304 Not Modified` answer: new expiry instants, and any
    /// header the server resent replaces the stored one.
    pub fn refreshed(&self, fresh: CacheMetadata) -> CacheMetadata {
        let mut headers = self.headers.clone();
        for (name, value) in fresh.headers {
            headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
            headers.push((name, value));
        }
        CacheMetadata {
            etag: fresh.etag.or_else(|| self.etag.clone()),
            last_modified: fresh.last_modified.or_else(|| self.last_modified.clone()),
            server_date: fresh.server_date,
            soft_expires: fresh.soft_expires,
            expires: fresh.expires,
            headers,
        }
    }
}

/// Current time in Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Derive cache metadata from response headers at local time `now`.
///
/// Returns `None` when the response must not be stored (`no-store`).
pub fn parse_cache_headers(headers: &HeaderMap, now: i64) -> Option<CacheMetadata> {
    let text = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let control = headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(",");
    let control = CacheControl::parse(&control);
    if control.no_store {
        return None;
    }

    let server_date = text(DATE).and_then(|d| parse_http_date(&d)).unwrap_or(0);
    let server_expires = text(EXPIRES).and_then(|d| parse_http_date(&d)).unwrap_or(0);

    let (soft_expires, expires) = if control.is_present() {
        let max_age = if control.no_cache {
            0
        } else {
            control.max_age.unwrap_or(0)
        };
        let soft = now.saturating_add(seconds_to_millis(max_age));
        let hard = if control.must_revalidate || control.no_cache {
            soft
        } else {
            soft.saturating_add(seconds_to_millis(
                control.stale_while_revalidate.unwrap_or(0),
            ))
        };
        (soft, hard)
    } else if server_date > 0 && server_expires >= server_date {
        let soft = now.saturating_add(server_expires - server_date);
        (soft, soft)
    } else {
        (0, 0)
    };

    let stored = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    Some(CacheMetadata {
        etag: text(ETAG),
        last_modified: text(LAST_MODIFIED),
        server_date,
        soft_expires,
        expires,
        headers: stored,
    })
}

/// Parse an RFC 7231 HTTP date into epoch milliseconds.
pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.timestamp_millis())
}

fn seconds_to_millis(seconds: u64) -> i64 {
    i64::try_from(seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        map
    }

    #[test]
    fn control_directives() {
        let control = CacheControl::parse("public, Max-Age=60, stale-while-revalidate=30");
        assert_eq!(control.max_age, Some(60));
        assert_eq!(control.stale_while_revalidate, Some(30));
        assert!(!control.no_store);
    }

    #[test]
    fn no_store_is_never_cached() {
        assert!(parse_cache_headers(&headers(&[("cache-control", "no-store")]), NOW).is_none());
    }

    #[test]
    fn max_age_sets_soft_and_hard_expiry() {
        let meta = parse_cache_headers(
            &headers(&[("cache-control", "max-age=60, stale-while-revalidate=30")]),
            NOW,
        )
        .unwrap();
        assert_eq!(meta.soft_expires, NOW + 60_000);
        assert_eq!(meta.expires, NOW + 90_000);
        assert!(!meta.refresh_needed(NOW + 59_000));
        assert!(meta.refresh_needed(NOW + 61_000));
        assert!(!meta.is_expired(NOW + 61_000));
        assert!(meta.is_expired(NOW + 91_000));
    }

    #[test]
    fn must_revalidate_drops_grace_period() {
        let meta = parse_cache_headers(
            &headers(&[(
                "cache-control",
                "max-age=10, stale-while-revalidate=30, must-revalidate",
            )]),
            NOW,
        )
        .unwrap();
        assert_eq!(meta.expires, meta.soft_expires);
    }

    #[test]
    fn no_cache_is_stored_but_stale() {
        let meta = parse_cache_headers(
            &headers(&[("cache-control", "no-cache"), ("etag", "\"abc\"")]),
            NOW,
        )
        .unwrap();
        assert!(meta.is_expired(NOW));
        assert_eq!(meta.etag.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn expires_is_relative_to_server_date() {
        let meta = parse_cache_headers(
            &headers(&[
                ("date", "Tue, 15 Nov 1994 08:00:00 GMT"),
                ("expires", "Tue, 15 Nov 1994 08:05:00 GMT"),
            ]),
            NOW,
        )
        .unwrap();
        assert_eq!(meta.soft_expires, NOW + 300_000);
        assert_eq!(meta.expires, NOW + 300_000);
    }

    #[test]
    fn no_freshness_headers_expire_immediately() {
        let meta = parse_cache_headers(
            &headers(&[("last-modified", "Tue, 15 Nov 1994 08:12:31 GMT")]),
            NOW,
        )
        .unwrap();
        assert!(meta.is_expired(NOW));
        assert!(meta.has_validators());
    }

    #[test]
    fn refreshed_keeps_old_validators_and_replaces_headers() {
        let old = CacheMetadata {
            etag: Some("\"v1\"".into()),
            headers: vec![
                ("content-type".into(), "text/plain; charset=ISO-8859-1".into()),
                ("x-old".into(), "1".into()),
            ],
            ..CacheMetadata::default()
        };
        let fresh = CacheMetadata {
            soft_expires: NOW + 1,
            expires: NOW + 2,
            headers: vec![("X-Old".into(), "2".into())],
            ..CacheMetadata::default()
        };
        let merged = old.refreshed(fresh);
        assert_eq!(merged.etag.as_deref(), Some("\"v1\""));
        assert_eq!(merged.expires, NOW + 2);
        let map = merged.header_map();
        assert_eq!(map.get("x-old").unwrap(), "2");
        assert_eq!(
            map.get("content-type").unwrap(),
            "text/plain; charset=ISO-8859-1"
        );
    }
}
