//! HTTP transport.
//!
//! The client only needs "send this request, give me status, headers and
//! body". [`Transport`] is that seam; [`HttpTransport`] implements it on top
//! of blocking reqwest (feature `remote`, enabled by default).

use serde_json::Value;

use crate::error::TransportError;
use crate::types::Method;

#[cfg(feature = "remote")]
use crate::types::ClientOptions;

/// A request as the core builds it.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Query parameters, already encoded as strings.
    pub query: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            body: None,
        }
    }
}

/// Raw response returned by a transport.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names as received; lookups are case-insensitive.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of a header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header, in order received.
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Sends requests. Implementations own retries, timeouts and TLS; the core
/// calls `send` exactly once per link invocation.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by `reqwest::blocking`.
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "remote")]
impl HttpTransport {
    /// Build a transport forwarding the headers and timeout from `options`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if a header is malformed or the underlying
    /// client cannot be constructed.
    pub fn new(options: &ClientOptions) -> Result<Self, TransportError> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in &options.headers {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::new(&options.base_url, format!("invalid header name {name}"))
                    .with_source(e)
            })?;
            let value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                TransportError::new(&options.base_url, format!("invalid value for {name}"))
                    .with_source(e)
            })?;
            headers.insert(name, value);
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(options.timeout)
            .default_headers(headers)
            .build()
            .map_err(|source| {
                TransportError::new(&options.base_url, "cannot build HTTP client")
                    .with_source(source)
            })?;

        Ok(Self { client })
    }
}

#[cfg(feature = "remote")]
impl Transport for HttpTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportError::new(&request.url, "invalid method").with_source(e))?;

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .map_err(|source| {
                TransportError::new(&request.url, source.to_string()).with_source(source)
            })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response
            .text()
            .map_err(|source| {
                TransportError::new(&request.url, source.to_string()).with_source(source)
            })?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
