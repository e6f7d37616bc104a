use std::sync::Arc;
use std::time::Instant;

use tracing::{info, info_span, warn};

use crate::filter::core::{FilterChain, HttpFilter};
use crate::server::Request;
use crate::stream::ResponseStream;

/// Emits a span around request dispatch and logs the terminal status and
/// latency once the downstream stages resolve.
pub struct TracingFilter;

impl HttpFilter for TracingFilter {
    fn apply(&self, request: &Arc<Request>, chain: FilterChain) -> ResponseStream {
        let span = info_span!(
            "request",
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
        );
        let started = Instant::now();
        let downstream = {
            let _guard = span.enter();
            chain.proceed(request)
        };
        let request_id = request.id;
        downstream.map(move |result| {
            let latency_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(resp) => info!(
                    request_id = %request_id,
                    status = resp.status.as_u16(),
                    latency_ms,
                    "request complete"
                ),
                Err(err) => warn!(
                    request_id = %request_id,
                    error = %err,
                    latency_ms,
                    "request failed in pipeline"
                ),
            }
            result
        })
    }
}
