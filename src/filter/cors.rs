use std::sync::Arc;

use http::{Method, StatusCode};

use crate::filter::core::{FilterChain, HttpFilter};
use crate::server::{Request, Response};
use crate::stream::ResponseStream;

/// CORS filter: answers preflight OPTIONS requests directly (the standard
/// short-circuit, no `proceed`) and stamps allow-origin headers onto
/// responses for other methods.
pub struct CorsFilter {
    allowed_origins: Vec<String>,
    allowed_headers: Vec<String>,
    allowed_methods: Vec<Method>,
}

impl CorsFilter {
    pub fn new(
        allowed_origins: Vec<String>,
        allowed_headers: Vec<String>,
        allowed_methods: Vec<Method>,
    ) -> Self {
        Self {
            allowed_origins,
            allowed_headers,
            allowed_methods,
        }
    }

    fn origin_header(&self, request: &Request) -> Option<String> {
        let origin = request.get_header("origin")?;
        if self.allowed_origins.iter().any(|o| o == "*") {
            Some("*".to_string())
        } else if self.allowed_origins.iter().any(|o| o == origin) {
            Some(origin.to_string())
        } else {
            None
        }
    }

    fn methods_header(&self) -> String {
        self.allowed_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Permissive defaults, suitable for development. Production deployments
/// should restrict origins via [`CorsFilter::new`].
impl Default for CorsFilter {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".into()],
            allowed_headers: vec!["Content-Type".into(), "Authorization".into()],
            allowed_methods: vec![
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::PATCH,
                Method::OPTIONS,
            ],
        }
    }
}

impl HttpFilter for CorsFilter {
    fn apply(&self, request: &Arc<Request>, chain: FilterChain) -> ResponseStream {
        let origin = self.origin_header(request);

        if request.method == Method::OPTIONS {
            let mut resp = Response::status(StatusCode::NO_CONTENT);
            if let Some(origin) = origin {
                resp.set_header("access-control-allow-origin", origin);
                resp.set_header("access-control-allow-methods", self.methods_header());
                resp.set_header(
                    "access-control-allow-headers",
                    self.allowed_headers.join(", "),
                );
            }
            return ResponseStream::ready(Ok(resp));
        }

        let downstream = chain.proceed(request);
        match origin {
            Some(origin) => downstream.map(move |result| {
                result.map(|mut resp| {
                    resp.set_header("access-control-allow-origin", origin);
                    resp
                })
            }),
            None => downstream,
        }
    }
}
