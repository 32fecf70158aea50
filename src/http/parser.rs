use crate::http::request::{Method, Request};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidVersion,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    HeaderTooLarge { limit: usize },
    Incomplete,
}

/// Parses a request head (request line and headers) from `buf`.
///
/// The body is never consumed here; the returned size covers the head and
/// its terminating blank line only. `limit` bounds the head size: a buffer
/// that grows past it without a complete head is rejected.
pub fn parse_request_head(buf: &[u8], limit: usize) -> Result<(Request, usize), ParseError> {
    // Look for header/body separator
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > limit => return Err(ParseError::HeaderTooLarge { limit }),
        None => return Err(ParseError::Incomplete),
    };
    if headers_end + 4 > limit {
        return Err(ParseError::HeaderTooLarge { limit });
    }

    let header_bytes = &buf[..headers_end];
    let headers_str = std::str::from_utf8(header_bytes)
        .map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::parse(method_str).ok_or(ParseError::InvalidMethod)?;
    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidVersion);
    }

    // Headers
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(ParseError::InvalidHeader)?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(ParseError::InvalidHeader);
        }

        // Repeated fields fold into one comma separated value.
        headers
            .entry(key.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value.trim());
            })
            .or_insert_with(|| value.trim().to_string());
    }

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body: Vec::new(),
        captures: Vec::new(),
    };

    if let Some(raw) = request.header("Content-Length") {
        raw.trim()
            .parse::<u64>()
            .map_err(|_| ParseError::InvalidContentLength)?;
    }

    Ok((request, headers_end + 4))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
}
