use std::fmt;
use std::sync::Arc;

use http::{Method, StatusCode};
use serde_json::Value;

use crate::media::MediaType;
use crate::server::request::HeaderVec;
use crate::stream::ValueStream;

/// Response body in one of the shapes the writer knows how to frame.
pub enum Body {
    Empty,
    /// A single value, encoded in full and written with a content-length.
    Value(Value),
    /// Raw bytes, written as-is with a content-length and no codec pass.
    Bytes(Vec<u8>),
    /// A backpressured stream of values, written as chunked frames.
    Stream(ValueStream),
}

impl Body {
    #[inline]
    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Value(v) => write!(f, "Value({v})"),
            Body::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A response under construction.
///
/// Mutable right up to the point the writer consumes it by value; once the
/// first byte reaches the transport there is no handle left to mutate.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderVec,
    pub content_type: Option<MediaType>,
    pub body: Body,
}

impl Response {
    pub fn status(status: StatusCode) -> Self {
        Response {
            status,
            headers: HeaderVec::new(),
            content_type: None,
            body: Body::Empty,
        }
    }

    pub fn ok() -> Self {
        Self::status(StatusCode::OK)
    }

    pub fn not_found() -> Self {
        Self::status(StatusCode::NOT_FOUND)
    }

    pub fn server_error() -> Self {
        Self::status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Synthesized 405 carrying every method the path does respond to.
    pub fn not_allowed(allowed: &[Method]) -> Self {
        let list = allowed
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        let mut resp = Self::status(StatusCode::METHOD_NOT_ALLOWED);
        resp.set_header("allow", list);
        resp
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.body = Body::Value(value);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn with_content_type(mut self, media: MediaType) -> Self {
        self.content_type = Some(media);
        self
    }

    #[inline]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Add or replace a header (case-insensitive on the name).
    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    /// Whether this response has committed to chunked transfer, either by
    /// carrying a streamed body or by an explicit transfer-encoding header.
    pub fn is_chunked(&self) -> bool {
        self.body.is_stream()
            || self
                .get_header("transfer-encoding")
                .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    }
}

/// The header block handed to the transport ahead of any body frames.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderVec,
}

impl ResponseHead {
    pub fn new(status: StatusCode) -> Self {
        ResponseHead {
            status,
            headers: HeaderVec::new(),
        }
    }

    pub fn set_header(&mut self, name: &str, value: String) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value));
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_allowed_lists_methods() {
        let resp = Response::not_allowed(&[Method::GET, Method::PUT]);
        assert_eq!(resp.status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.get_header("allow"), Some("GET, PUT"));
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut resp = Response::ok();
        resp.set_header("X-Trace", "a".to_string());
        resp.set_header("x-trace", "b".to_string());
        assert_eq!(resp.get_header("X-Trace"), Some("b"));
        assert_eq!(resp.headers.len(), 1);
    }

    #[test]
    fn test_chunked_detection_from_header() {
        let mut resp = Response::ok().with_value(serde_json::json!(1));
        assert!(!resp.is_chunked());
        resp.set_header("Transfer-Encoding", "chunked".to_string());
        assert!(resp.is_chunked());
    }
}
