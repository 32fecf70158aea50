use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::http::ranges::RangeSet;

/// HTTP request methods.
///
/// Routes are registered per method; a route without a method matches any
/// of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options, used for CORS preflight
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// TRACE - Message loop-back test
    TRACE,
    /// CONNECT - Tunnel establishment
    CONNECT,
    /// Any other token, such as the WebDAV methods
    Other(String),
}

/// Represents a parsed HTTP request from a client.
///
/// The session only parses the request head; `body` stays empty until a
/// handler reads it through [`Session::read`](crate::session::Session::read).
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request target, including any query string (e.g., "/index.html?x=1")
    pub path: String,
    /// HTTP version (typically "HTTP/1.1")
    pub version: String,
    /// Request headers as key-value pairs, names as sent by the client
    pub headers: HashMap<String, String>,
    /// Request body, filled by a body read
    pub body: Vec<u8>,
    /// Capture groups of the pattern route that matched, group 0 excluded
    pub captures: Vec<String>,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    path: Option<String>,
    version: Option<String>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Method {
    /// Parses an HTTP method from a string.
    ///
    /// # Arguments
    ///
    /// * `s` - String representation of the method (case-sensitive, typically uppercase)
    ///
    /// # Returns
    ///
    /// `Some(Method)` if the string matches a known method, `None` otherwise.
    ///
    /// # Example
    ///
    /// ```
    /// # use portcullis::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            "TRACE" => Some(Method::TRACE),
            "CONNECT" => Some(Method::CONNECT),
            _ => None,
        }
    }

    /// Parses a request-line method: a known method, or any other valid
    /// token as [`Method::Other`].
    ///
    /// ```
    /// # use portcullis::http::request::Method;
    /// assert_eq!(Method::parse("PROPFIND"), Some(Method::Other("PROPFIND".into())));
    /// assert_eq!(Method::parse("G(T"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(known) = Self::from_str(s) {
            return Some(known);
        }
        let is_token = !s.is_empty() && s.bytes().all(is_tchar);
        is_token.then(|| Method::Other(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::TRACE => "TRACE",
            Method::CONNECT => "CONNECT",
            Method::Other(token) => token,
        }
    }
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            path: None,
            version: None,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            path: self.path.ok_or("path missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            body: self.body,
            captures: Vec::new(),
        })
    }
}

impl Request {
    /// Retrieves a header value by name, ignoring ASCII case.
    ///
    /// # Arguments
    ///
    /// * `key` - Header name to look up
    ///
    /// # Returns
    ///
    /// `Some(&str)` with the header value if present, `None` otherwise.
    pub fn header(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.headers.get(key) {
            return Some(v.as_str());
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// True if a comma separated header contains `token` (case-insensitive).
    pub fn header_has_token(&self, key: &str, token: &str) -> bool {
        self.header(key)
            .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    }

    /// The declared Content-Length, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// True if the body uses chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        self.header_has_token("Transfer-Encoding", "chunked")
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is sent.
    /// HTTP/1.0 defaults to close unless `Connection: keep-alive` is sent.
    pub fn keep_alive(&self) -> bool {
        if self.header_has_token("Connection", "close") {
            return false;
        }
        if self.version.eq_ignore_ascii_case("HTTP/1.0") {
            return self.header_has_token("Connection", "keep-alive");
        }
        true
    }

    /// True if the client sent `Expect: 100-continue`.
    pub fn expects_continue(&self) -> bool {
        self.header("Expect")
            .map(|v| v.trim().eq_ignore_ascii_case("100-continue"))
            .unwrap_or(false)
    }

    /// True if this is a WebSocket upgrade request.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.method == Method::GET
            && self.header_has_token("Connection", "upgrade")
            && self.header_has_token("Upgrade", "websocket")
            && self.header("Sec-WebSocket-Key").is_some()
    }

    /// The Origin header, empty when absent.
    pub fn origin(&self) -> &str {
        self.header("Origin").unwrap_or("")
    }

    /// Parsed Range header.
    ///
    /// `Ok(None)` when the request carries no Range header,
    /// `Err(Error::InvalidRange)` when it is malformed.
    pub fn ranges(&self) -> Result<Option<RangeSet>> {
        match self.header("Range") {
            None => Ok(None),
            Some(raw) => RangeSet::parse(raw).map(Some).ok_or(Error::InvalidRange),
        }
    }

    /// The request path without query string or fragment.
    pub fn path_only(&self) -> &str {
        let end = self.path.find(['?', '#']).unwrap_or(self.path.len());
        &self.path[..end]
    }

    /// Decoded query parameters.
    pub fn query(&self) -> HashMap<String, String> {
        url::Url::parse("http://localhost")
            .and_then(|base| base.join(&self.path))
            .map(|u| u.query_pairs().into_owned().collect())
            .unwrap_or_default()
    }
}
