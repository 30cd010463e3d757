//! Dispatchable requests.
//!
//! [`FireRequest::new`] applies the parameter placement policy:
//!
//! - `GET`: parameters are appended to the URL as a query string and the
//!   request has no body.
//! - any other method: parameters become an
//!   `application/x-www-form-urlencoded` body and the URL is untouched.
//!
//! A parameter that cannot be encoded is dropped (and logged); the request
//! is still built from the rest.

use std::fmt;

use bytes::Bytes;
use reqwest::Method;

use crate::cache::{CacheKey, CacheMetadata};
use crate::multipart::MultipartBody;
use crate::transport::TransportRequest;
use crate::{Charset, Params, template};

/// Request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// URL-encoded form fields.
    Form { charset: Charset, encoded: String },
    Multipart(MultipartBody),
}

impl Body {
    pub fn content_type(&self) -> String {
        match self {
            Body::Form { charset, .. } => {
                format!("application/x-www-form-urlencoded; charset={charset}")
            }
            Body::Multipart(body) => body.content_type().to_string(),
        }
    }

    pub fn bytes(&self) -> Bytes {
        match self {
            Body::Form { encoded, .. } => Bytes::from(encoded.clone()),
            Body::Multipart(body) => body.bytes().clone(),
        }
    }
}

/// A unit of dispatchable work.
///
/// Cache identity is `(method, url)`; two requests with the same method
/// and resolved URL share a cache entry.
#[derive(Clone)]
pub struct FireRequest {
    method: Method,
    url: String,
    body: Option<Body>,
    auth_token: Option<String>,
    headers: Option<Params>,
    cacheable: bool,
    skipped: Vec<String>,
}

impl FireRequest {
    /// Build a request, placing `params` according to `method`. UTF-8 is
    /// used to encode parameters.
    pub fn new(method: Method, url: impl Into<String>, params: Option<&Params>) -> Self {
        Self::with_charset(method, url, params, Charset::Utf8)
    }

    /// Build a request, encoding `params` in `charset`.
    pub fn with_charset(
        method: Method,
        url: impl Into<String>,
        params: Option<&Params>,
        charset: Charset,
    ) -> Self {
        let mut url = url.into();
        let mut body = None;
        let mut skipped = Vec::new();

        if let Some(params) = params.filter(|p| !p.is_empty()) {
            let pairs = template::encode_pairs(params, charset);
            skipped = pairs.skipped;
            if pairs.encoded.is_empty() {
                // every pair was dropped
            } else if method == Method::GET {
                let separator = if url.contains('?') { '&' } else { '?' };
                url = format!("{url}{separator}{}", pairs.encoded);
            } else {
                body = Some(Body::Form {
                    charset,
                    encoded: pairs.encoded,
                });
            }
        }

        Self {
            cacheable: is_cacheable_method(&method),
            method,
            url,
            body,
            auth_token: None,
            headers: None,
            skipped,
        }
    }

    /// A request carrying a multipart body. Never cached.
    pub fn multipart(method: Method, url: impl Into<String>, body: MultipartBody) -> Self {
        Self {
            cacheable: false,
            method,
            url: url.into(),
            body: Some(Body::Multipart(body)),
            auth_token: None,
            headers: None,
            skipped: Vec::new(),
        }
    }

    /// Send `Authorization: Bearer <token>` with the default headers.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Send exactly these headers instead of the defaults.
    pub fn headers(mut self, headers: Params) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Opt this request in or out of the response cache. `GET` and `HEAD`
    /// are cached by default, other methods are not.
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Parameter keys dropped because they could not be encoded.
    pub fn skipped_params(&self) -> &[String] {
        &self.skipped
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.method.clone(), self.url.clone())
    }

    /// Headers this request will send, before body and cache headers.
    ///
    /// Explicit headers are used verbatim. Otherwise the defaults are the
    /// process user agent plus `Authorization` when a token is set.
    pub fn resolve_headers(&self, user_agent: &str) -> Params {
        if let Some(headers) = &self.headers {
            return headers.clone();
        }
        let mut headers = Params::new().with("User-Agent", user_agent);
        if let Some(token) = &self.auth_token {
            headers.insert("Authorization", format!("Bearer {token}"));
        }
        headers
    }

    /// Wire form of this request. `validators` are the cached entry's
    /// validators for a conditional request.
    pub(crate) fn to_transport(
        &self,
        user_agent: &str,
        validators: Option<&CacheMetadata>,
    ) -> TransportRequest {
        let mut headers: Vec<(String, String)> = self
            .resolve_headers(user_agent)
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let has = |headers: &[(String, String)], name: &str| {
            headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
        };

        if let Some(body) = &self.body
            && !has(&headers, "content-type")
        {
            headers.push(("Content-Type".into(), body.content_type()));
        }
        if let Some(meta) = validators {
            if let Some(etag) = &meta.etag {
                headers.push(("If-None-Match".into(), etag.clone()));
            }
            if let Some(last_modified) = &meta.last_modified {
                headers.push(("If-Modified-Since".into(), last_modified.clone()));
            }
        }

        TransportRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers,
            body: self.body.as_ref().map(Body::bytes),
        }
    }
}

fn is_cacheable_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

impl fmt::Debug for FireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FireRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("body", &self.body.as_ref().map(|b| b.content_type()))
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("cacheable", &self.cacheable)
            .finish()
    }
}
