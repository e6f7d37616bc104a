//! # Executor Module
//!
//! Selects where a matched route runs and classifies what it returns.
//!
//! Handlers never run inline on the connection coroutine: a dedicated
//! [`WorkerPool`] chosen by the [`ExecutorSelector`] runs them when one is
//! configured for the route, and a freshly spawned coroutine stands in for
//! the connection's own loop otherwise. Either way the result is marshaled
//! back through a pending [`ResponseStream`], and failures complete that
//! stream rather than unwinding across coroutine boundaries.

use std::sync::Arc;

use http::StatusCode;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::binder::ArgumentBinder;
use crate::errors::PipelineError;
use crate::router::{RouteMatch, RouteOutcome, Router};
use crate::server::{Body, Request, Response};
use crate::stream::{response_channel, ResponseStream};
use crate::worker_pool::{ExecuteError, WorkerPool};

/// Chooses a dedicated executor for a route, keyed by whatever route
/// metadata the deployment cares about. `None` falls back to a spawned
/// coroutine on the connection's scheduler.
pub trait ExecutorSelector: Send + Sync {
    fn select(&self, route: &RouteMatch) -> Option<Arc<WorkerPool>>;
}

/// Selector that never dedicates a pool; every route takes the spawn
/// fallback.
pub struct DefaultExecutorSelector;

impl ExecutorSelector for DefaultExecutorSelector {
    fn select(&self, _route: &RouteMatch) -> Option<Arc<WorkerPool>> {
        None
    }
}

/// Runs matched routes off the calling coroutine and turns their outcomes
/// into concrete responses.
#[derive(Clone)]
pub struct ExecutionScheduler {
    selector: Arc<dyn ExecutorSelector>,
    router: Arc<dyn Router>,
    binder: Arc<dyn ArgumentBinder>,
    stack_size: usize,
}

impl ExecutionScheduler {
    pub fn new(
        selector: Arc<dyn ExecutorSelector>,
        router: Arc<dyn Router>,
        binder: Arc<dyn ArgumentBinder>,
        stack_size: usize,
    ) -> Self {
        ExecutionScheduler {
            selector,
            router,
            binder,
            stack_size,
        }
    }

    pub fn selector(&self) -> &Arc<dyn ExecutorSelector> {
        &self.selector
    }

    /// Submit the route for asynchronous execution and return the pending
    /// response. A saturated dedicated pool resolves the request with a
    /// 503 backpressure response instead of queueing.
    pub fn submit(&self, route: RouteMatch, request: Arc<Request>) -> ResponseStream {
        let (sink, stream) = response_channel();
        let pool = self.selector.select(&route);

        let router = Arc::clone(&self.router);
        let binder = Arc::clone(&self.binder);
        let job_sink = sink.clone();
        let request_id = request.id;
        let handler = route.handler_id().clone();
        let job = move || {
            info!(request_id = %request_id, handler = %handler, "handler execution start");
            let result = Self::run_route(route, &request, router.as_ref(), binder.as_ref());
            job_sink.complete(result);
        };

        match pool {
            Some(pool) => {
                debug!(pool = %pool.name(), "dispatching to dedicated executor");
                match pool.execute(Box::new(job)) {
                    Ok(()) => {}
                    Err(ExecuteError::Saturated) => {
                        info!(pool = %pool.name(), "backpressure applied, shedding request");
                        sink.complete(Ok(Self::backpressure_response(
                            "handler queue at capacity",
                        )));
                    }
                    Err(ExecuteError::Disconnected) => {
                        sink.complete(Ok(Self::backpressure_response(
                            "handler workers are not responding",
                        )));
                    }
                }
            }
            None => {
                let builder = may::coroutine::Builder::new().stack_size(self.stack_size);
                // SAFETY: Builder::spawn is unsafe per the may runtime's
                // requirements. The job is Send + 'static and resolves the
                // response sink instead of unwinding.
                #[allow(unsafe_code)]
                let spawned = unsafe { builder.spawn(job) };
                if let Err(e) = spawned {
                    sink.complete(Err(PipelineError::Handler(anyhow::anyhow!(
                        "failed to spawn execution coroutine: {e}"
                    ))));
                }
            }
        }

        stream
    }

    fn backpressure_response(message: &str) -> Response {
        Response::status(StatusCode::SERVICE_UNAVAILABLE).with_value(json!({ "error": message }))
    }

    fn run_route(
        route: RouteMatch,
        request: &Arc<Request>,
        router: &dyn Router,
        binder: &dyn ArgumentBinder,
    ) -> Result<Response, PipelineError> {
        let route = if route.is_executable() {
            route
        } else {
            binder.fulfill(route, request)
        };
        let outcome = route.execute(request)?;
        Ok(Self::classify(outcome, request, router, binder))
    }

    /// Turn a handler's return value into a response: nothing becomes an
    /// empty 200, a bare value a 200 with body, a stream a chunked 200. A
    /// full response with status >= 300 is re-mapped once through the
    /// status-route table so deployments can attach custom bodies to error
    /// statuses; the re-mapped result wins over the original.
    fn classify(
        outcome: RouteOutcome,
        request: &Arc<Request>,
        router: &dyn Router,
        binder: &dyn ArgumentBinder,
    ) -> Response {
        match outcome {
            RouteOutcome::None => Response::ok(),
            RouteOutcome::Value(v) => Response::ok().with_value(v),
            RouteOutcome::Stream(s) => Response::ok().with_body(Body::Stream(s)),
            RouteOutcome::Response(resp) => {
                if resp.status.as_u16() >= 300 {
                    if let Some(remapped) = Self::remap_status(&resp, request, router, binder) {
                        return remapped;
                    }
                }
                resp
            }
        }
    }

    /// Single remap, deliberately unbounded no further: a status route that
    /// itself returns another >= 300 response is taken at face value.
    fn remap_status(
        original: &Response,
        request: &Arc<Request>,
        router: &dyn Router,
        binder: &dyn ArgumentBinder,
    ) -> Option<Response> {
        let status = original.status;
        let m = router.route_status(status)?;
        let m = binder.fulfill(m, request);
        if !m.is_executable() {
            return None;
        }
        debug!(status = status.as_u16(), handler = %m.handler_id(), "re-mapping status through status route");
        match m.execute(request) {
            Ok(RouteOutcome::Response(r)) => Some(r),
            Ok(RouteOutcome::Value(v)) => Some(Response::status(status).with_value(v)),
            Ok(RouteOutcome::Stream(s)) => Some(Response::status(status).with_body(Body::Stream(s))),
            Ok(RouteOutcome::None) => None,
            Err(e) => {
                warn!(status = status.as_u16(), error = %e, "status route failed, keeping original response");
                None
            }
        }
    }
}
