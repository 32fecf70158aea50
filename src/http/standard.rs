//! Canned responses for status codes the engine produces on its own
//! (404 for unrouted paths, 400 for malformed requests, 500 for failed
//! handlers, ...). Embedders implement [`StandardResponseProvider`] to brand
//! those pages.

use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

pub trait StandardResponseProvider: Send + Sync {
    /// Builds the response for `status`. `request` is absent when the
    /// request head could not be parsed.
    fn make_standard_response(
        &self,
        request: Option<&Request>,
        status: StatusCode,
        message: Option<&str>,
    ) -> Response;
}

/// Plain reason phrase pages, with the optional message appended. Messages
/// may echo request data, so the page is never served as HTML.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardTextResponseProvider;

impl StandardResponseProvider for StandardTextResponseProvider {
    fn make_standard_response(
        &self,
        _request: Option<&Request>,
        status: StatusCode,
        message: Option<&str>,
    ) -> Response {
        let builder = ResponseBuilder::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("X-Content-Type-Options", "nosniff");
        if status.forbids_body() {
            return builder.build();
        }
        let body = match message {
            Some(m) if !m.is_empty() => format!("{}: {}", status.reason_phrase(), m),
            _ => status.reason_phrase().to_string(),
        };
        builder.body(body.into_bytes()).build()
    }
}
