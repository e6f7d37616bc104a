use std::sync::{Arc, Mutex};

use http::Method;
use smallvec::SmallVec;

use crate::ids::RequestId;
use crate::media::MediaType;
use crate::router::{ParamVec, RouteSpec};

/// Maximum inline headers before heap allocation.
/// Most requests have <=16 headers, keeping the hot path heap-free.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage for the hot path.
///
/// Header names use `Arc<str>` instead of `String` because names repeat
/// across requests (Content-Type, Connection, ...) and `Arc::clone()` is an
/// O(1) atomic increment; values remain per-request `String`s.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// A structured request as handed over by the transport layer.
///
/// Wire parsing happened upstream; this type carries the parsed method,
/// path, headers and query parameters plus the two pieces of state the
/// pipeline mutates while a request is in flight: the accumulating raw body
/// buffer and the reference to the matched route. Both sit behind mutexes
/// because the handler executes on a worker coroutine while the connection
/// coroutine may still be consuming body chunks.
///
/// Owned as `Arc<Request>` by the connection for the request's lifetime.
pub struct Request {
    pub id: RequestId,
    pub method: Method,
    pub path: String,
    pub headers: HeaderVec,
    pub query_params: ParamVec,
    content_type: Option<MediaType>,
    keep_alive: bool,
    body: Mutex<Vec<u8>>,
    matched: Mutex<Option<Arc<RouteSpec>>>,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Request {
            id: RequestId::new(),
            method,
            path: path.into(),
            headers: HeaderVec::new(),
            query_params: ParamVec::new(),
            content_type: None,
            keep_alive: true,
            body: Mutex::new(Vec::new()),
            matched: Mutex::new(None),
        }
    }

    /// Attach a header, updating the negotiated content type, keep-alive
    /// flag and request id for the headers that carry them.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "content-type" => self.content_type = Some(MediaType::parse(value)),
            "connection" => self.keep_alive = !value.eq_ignore_ascii_case("close"),
            "x-request-id" => self.id = RequestId::from_header_or_new(Some(value)),
            _ => {}
        }
        self.headers.push((Arc::from(lower.as_str()), value.to_string()));
        self
    }

    pub fn with_query_param(mut self, name: &str, value: &str) -> Self {
        self.query_params.push((Arc::from(name), value.to_string()));
        self
    }

    /// Get a header by name (case-insensitive per RFC 7230).
    #[inline]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Get a query parameter by name, last occurrence winning.
    #[inline]
    pub fn get_query_param(&self, name: &str) -> Option<&str> {
        self.query_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&MediaType> {
        self.content_type.as_ref()
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Append raw content to the body accumulator. Chunks that the body
    /// processor does not route to a named input or a part land here.
    pub fn append_content(&self, bytes: &[u8]) {
        self.body.lock().unwrap().extend_from_slice(bytes);
    }

    /// Snapshot of the accumulated raw body.
    pub fn body_bytes(&self) -> Vec<u8> {
        self.body.lock().unwrap().clone()
    }

    pub fn has_body(&self) -> bool {
        !self.body.lock().unwrap().is_empty()
    }

    /// Record the route this request matched; read back by the error
    /// classifier to find handler-scoped error routes.
    pub fn set_matched(&self, spec: Arc<RouteSpec>) {
        *self.matched.lock().unwrap() = Some(spec);
    }

    pub fn matched(&self) -> Option<Arc<RouteSpec>> {
        self.matched.lock().unwrap().clone()
    }
}
