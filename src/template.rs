//! Skeleton path resolution and query-string building.
//!
//! A skeleton path is a sequence of `/segment` and `/{{ name }}` tokens:
//!
//! ```rust
//! # use courier::{template, Params};
//! let path = template::resolve_path("/user/{{ id }}/posts", Some(&Params::from([("id", "42")])));
//! assert_eq!(path, "/user/42/posts");
//! ```
//!
//! Paths that do not follow that grammar are returned verbatim, which lets
//! static paths (`/v1/search?x=1`, `/`) pass through untouched. Placeholder
//! keys and values must be identifiers (`[A-Za-z0-9_]+` after trimming);
//! pairs that are not leave their placeholder unresolved in the output.
//!
//! Query pairs are `application/x-www-form-urlencoded`: reserved bytes are
//! percent-encoded and a space becomes `+`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::warn;

use crate::{Charset, Params};

// Character classes are ASCII-only: `\w` and `\s` would admit Unicode.
static SKELETON_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:/(?:\{\{(?-u:\s)*[A-Za-z0-9_]+(?-u:\s)*\}\}|[A-Za-z0-9_]+-*[A-Za-z0-9_]*))+$",
    )
    .expect("static regex")
});

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(?-u:\s)*([A-Za-z0-9_]+)(?-u:\s)*\}\}").expect("static regex")
});

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static regex"));

/// Outcome of resolving a skeleton path, including which placeholder pairs
/// were rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub path: String,
    /// Keys (as supplied) whose key or value failed identifier validation.
    pub rejected: Vec<String>,
}

/// Outcome of encoding a parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedPairs {
    /// `k1=v1&k2=v2`, without a leading separator.
    pub encoded: String,
    /// Keys dropped because they could not be encoded in the charset.
    pub skipped: Vec<String>,
}

impl EncodedPairs {
    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }
}

/// Whether `skeleton` follows the `/segment` / `/{{name}}` grammar.
pub fn is_skeleton_path(skeleton: &str) -> bool {
    SKELETON_PATH.is_match(skeleton)
}

/// Fill the placeholders of `skeleton` from `placeholders`.
pub fn resolve_path(skeleton: &str, placeholders: Option<&Params>) -> String {
    resolve_path_report(skeleton, placeholders).path
}

/// Like [`resolve_path`], also reporting rejected placeholder pairs.
pub fn resolve_path_report(skeleton: &str, placeholders: Option<&Params>) -> ResolvedPath {
    let Some(placeholders) = placeholders.filter(|p| !p.is_empty()) else {
        return ResolvedPath {
            path: skeleton.to_string(),
            rejected: Vec::new(),
        };
    };
    if !is_skeleton_path(skeleton) {
        return ResolvedPath {
            path: skeleton.to_string(),
            rejected: Vec::new(),
        };
    }

    let mut values: HashMap<&str, &str> = HashMap::new();
    let mut rejected = Vec::new();
    for (key, value) in placeholders.iter() {
        let (trimmed_key, trimmed_value) = (key.trim(), value.trim());
        if IDENTIFIER.is_match(trimmed_key) && IDENTIFIER.is_match(trimmed_value) {
            values.entry(trimmed_key).or_insert(trimmed_value);
        } else {
            rejected.push(key.to_string());
        }
    }

    let path = PLACEHOLDER
        .replace_all(skeleton, |caps: &Captures<'_>| match values.get(&caps[1]) {
            Some(value) => (*value).to_string(),
            None => caps[0].to_string(),
        })
        .into_owned();

    ResolvedPath { path, rejected }
}

/// Form-encode `params` in `charset`, dropping pairs that cannot be encoded.
///
/// Dropped pairs are logged and reported; the remaining pairs keep their
/// relative order.
pub fn encode_pairs(params: &Params, charset: Charset) -> EncodedPairs {
    let mut out = EncodedPairs::default();
    for (key, value) in params.iter() {
        match (charset.encode(key), charset.encode(value)) {
            (Some(k), Some(v)) => {
                if !out.encoded.is_empty() {
                    out.encoded.push('&');
                }
                out.encoded
                    .extend(url::form_urlencoded::byte_serialize(&k));
                out.encoded.push('=');
                out.encoded
                    .extend(url::form_urlencoded::byte_serialize(&v));
            }
            _ => {
                warn!(key, charset = %charset, "dropping parameter that cannot be encoded");
                out.skipped.push(key.to_string());
            }
        }
    }
    out
}

/// Append encoded `params` to `url`, using `?` or `&` depending on whether
/// `url` already carries a query.
pub fn append_query(url: &str, params: &Params, charset: Charset) -> String {
    let pairs = encode_pairs(params, charset);
    if pairs.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{}", pairs.encoded)
}

/// `base + path`, followed by the encoded query when `query` is non-empty.
pub fn build_url(base: &str, path: &str, query: Option<&Params>, charset: Charset) -> String {
    let url = format!("{base}{path}");
    match query {
        Some(query) if !query.is_empty() => append_query(&url, query, charset),
        _ => url,
    }
}
