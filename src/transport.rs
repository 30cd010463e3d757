//! HTTP transport seam.
//!
//! The dispatcher never talks to the network directly; it hands a fully
//! prepared [`TransportRequest`] to a [`Transport`] and gets back status,
//! headers and body bytes. [`ReqwestTransport`] is the default; tests and
//! embedders can supply their own.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};

use crate::{CourierError, Result};

/// A request ready to go on the wire.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    /// Header pairs in the order they should be sent.
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl TransportRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response handed to parsers.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub data: Bytes,
    /// The server answered `304` and `data` came from the cache.
    pub not_modified: bool,
    /// Served from the response cache without a network round-trip.
    pub from_cache: bool,
}

impl NetworkResponse {
    pub fn new(status: u16, headers: HeaderMap, data: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            data: data.into(),
            not_modified: false,
            from_cache: false,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes a single HTTP exchange.
///
/// Implementations return every status code as a response; only failures
/// to complete the exchange (connect, TLS, timeout, body read) are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<NetworkResponse>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    /// Build a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CourierError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Wrap an already configured client.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<NetworkResponse> {
        let mut builder = self.http.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let data = response.bytes().await?;

        Ok(NetworkResponse::new(status, headers, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str, headers: Vec<(String, String)>) -> TransportRequest {
        TransportRequest {
            method: Method::GET,
            url: url.to_string(),
            headers,
            body: None,
        }
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = request("http://h", vec![("User-Agent".into(), "App/1".into())]);
        assert_eq!(req.header("user-agent"), Some("App/1"));
        assert_eq!(req.header("accept"), None);
    }

    #[test]
    fn success_is_2xx_only() {
        assert!(NetworkResponse::new(204, HeaderMap::new(), "").is_success());
        assert!(!NetworkResponse::new(304, HeaderMap::new(), "").is_success());
        assert!(!NetworkResponse::new(199, HeaderMap::new(), "").is_success());
    }

    #[tokio::test]
    async fn malformed_request_is_not_a_transport_error() {
        let transport = ReqwestTransport::new(Duration::from_secs(1)).unwrap();
        let err = transport
            .execute(request("not a url", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::InvalidRequest(_)), "{err:?}");

        let err = transport
            .execute(request(
                "http://127.0.0.1:1",
                vec![("bad header".into(), "v".into())],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::InvalidRequest(_)), "{err:?}");
    }
}
