//! Cross-origin resource sharing.
//!
//! A route opts into CORS by carrying [`CorsSettings`]. The session then adds
//! the `Access-Control-*` headers to every final response of that route, and
//! the router can synthesize an `OPTIONS` preflight route for it.

use std::fmt;
use std::sync::Arc;

use crate::http::request::{Method, Request};
use crate::http::response::Response;

pub type OriginSelector = Arc<dyn Fn(&str) -> String + Send + Sync>;
pub type ListSelector = Arc<dyn Fn(&[String]) -> Vec<String> + Send + Sync>;

#[derive(Clone)]
pub struct CorsSettings {
    /// Maps the request's Origin (empty when absent) to the allowed origin.
    pub allowed_origin: OriginSelector,
    /// Maps the requested methods to the allowed ones.
    pub method_allow_selection: ListSelector,
    /// Maps the requested headers to the allowed ones.
    pub header_allow_selection: ListSelector,
    pub expose_headers: Vec<String>,
    pub allow_credentials: Option<bool>,
    /// Register an `OPTIONS` route answering preflight requests.
    pub generate_preflight: bool,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            // Requests with credentials cannot use a wildcard origin.
            allowed_origin: Arc::new(|origin| {
                if origin.is_empty() {
                    "*".to_string()
                } else {
                    origin.to_string()
                }
            }),
            method_allow_selection: Arc::new(|requested| {
                if requested.is_empty() {
                    Vec::new()
                } else {
                    vec!["GET".to_string()]
                }
            }),
            header_allow_selection: Arc::new(|requested| requested.to_vec()),
            expose_headers: Vec::new(),
            allow_credentials: None,
            generate_preflight: false,
        }
    }
}

impl fmt::Debug for CorsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorsSettings")
            .field("expose_headers", &self.expose_headers)
            .field("allow_credentials", &self.allow_credentials)
            .field("generate_preflight", &self.generate_preflight)
            .finish_non_exhaustive()
    }
}

impl CorsSettings {
    /// Allows everything the client asks for on a route serving `method`:
    /// the request's Origin (or `*`), the requested headers (or `*`), the
    /// route's own method, and credentials. Generates a preflight route.
    pub fn permissive(method: Method) -> Self {
        let method = method.as_str().to_string();
        Self {
            allowed_origin: Arc::new(|origin| {
                if origin.is_empty() {
                    "*".to_string()
                } else {
                    origin.to_string()
                }
            }),
            method_allow_selection: Arc::new(move |_| vec![method.clone()]),
            header_allow_selection: Arc::new(|requested| {
                if requested.is_empty() {
                    vec!["*".to_string()]
                } else {
                    requested.to_vec()
                }
            }),
            expose_headers: Vec::new(),
            allow_credentials: Some(true),
            generate_preflight: true,
        }
    }

    pub fn with_preflight(mut self, enabled: bool) -> Self {
        self.generate_preflight = enabled;
        self
    }

    /// The `Access-Control-*` headers for a response to `req`.
    pub fn headers_for(&self, req: &Request) -> Vec<(String, String)> {
        let requested_methods = split_list(req.header("Access-Control-Request-Method"));
        let requested_headers = split_list(req.header("Access-Control-Request-Headers"));

        let mut out = vec![(
            "Access-Control-Allow-Origin".to_string(),
            (self.allowed_origin)(req.origin()),
        )];

        let methods = (self.method_allow_selection)(&requested_methods);
        if !methods.is_empty() {
            out.push(("Access-Control-Allow-Methods".to_string(), methods.join(",")));
        }

        let headers = (self.header_allow_selection)(&requested_headers);
        if !headers.is_empty() {
            out.push(("Access-Control-Allow-Headers".to_string(), headers.join(",")));
        }

        if let Some(credentials) = self.allow_credentials {
            out.push((
                "Access-Control-Allow-Credentials".to_string(),
                credentials.to_string(),
            ));
        }

        if !self.expose_headers.is_empty() {
            out.push((
                "Access-Control-Expose-Headers".to_string(),
                self.expose_headers.join(","),
            ));
        }

        out
    }

    pub fn apply(&self, req: &Request, resp: &mut Response) {
        for (k, v) in self.headers_for(req) {
            resp.set_header(k, v);
        }
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
