use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::{Method, StatusCode};
use may::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::binder::{ArgumentBinder, DefaultBinder};
use crate::body::{BodyProcessor, BodyReceiver};
use crate::codec::CodecRegistry;
use crate::errors::{Classifier, ExceptionHandler, PipelineError, Recovery};
use crate::executor::{DefaultExecutorSelector, ExecutionScheduler, ExecutorSelector};
use crate::filter;
use crate::media::MediaType;
use crate::router::{RouteMatch, RouteOutcome, Router};
use crate::runtime_config::RuntimeConfig;
use crate::server::{Body, Channel, Request, Response, ResponseHead, ResponseWriter};
use crate::stream::ResponseStream;
use crate::worker_pool::{WorkerPool, WorkerPoolConfig};

/// Whether a method may carry a request body worth streaming.
pub fn permits_request_body(method: &Method) -> bool {
    matches!(
        method.as_str(),
        "POST" | "PUT" | "PATCH" | "DELETE" | "OPTIONS"
    )
}

enum Selected {
    Route(RouteMatch),
    Synthesized(Response),
}

/// The request-dispatch pipeline.
///
/// One instance serves every connection; per-request state lives entirely
/// in the call chain. [`dispatch`](Dispatcher::dispatch) runs on the
/// connection's coroutine and owns the request until a response is written
/// or the connection is closed:
///
/// 1. route selection with the strict fallback order (405 before 404,
///    status-route overrides before synthesized defaults, 415 after a
///    match);
/// 2. argument fulfillment, then incremental body consumption when the
///    route still needs body data;
/// 3. the filter chain, whose terminal stage submits the handler to the
///    execution scheduler;
/// 4. response writing with the connection-lifecycle policy;
/// 5. on any failure, the error classifier, which guarantees a terminal
///    write or an explicit close.
#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<dyn Router>,
    binder: Arc<dyn ArgumentBinder>,
    scheduler: ExecutionScheduler,
    writer: ResponseWriter,
    classifier: Classifier,
    encode_pool: Arc<WorkerPool>,
    config: RuntimeConfig,
}

impl Dispatcher {
    pub fn new(router: Arc<dyn Router>) -> Self {
        Self::with_config(router, RuntimeConfig::from_env())
    }

    pub fn with_config(router: Arc<dyn Router>, config: RuntimeConfig) -> Self {
        let binder: Arc<dyn ArgumentBinder> = Arc::new(DefaultBinder);
        let selector: Arc<dyn ExecutorSelector> = Arc::new(DefaultExecutorSelector);
        let encode_pool = Arc::new(WorkerPool::new(
            "encode",
            WorkerPoolConfig::default().with_workers(config.encode_workers),
        ));
        let scheduler = ExecutionScheduler::new(
            selector,
            Arc::clone(&router),
            Arc::clone(&binder),
            config.stack_size,
        );
        let writer = ResponseWriter::new(CodecRegistry::with_defaults(), Arc::clone(&encode_pool));
        let classifier = Classifier::new(Arc::clone(&router));
        Dispatcher {
            router,
            binder,
            scheduler,
            writer,
            classifier,
            encode_pool,
            config,
        }
    }

    /// Replace the argument binder.
    pub fn with_binder(mut self, binder: Arc<dyn ArgumentBinder>) -> Self {
        self.binder = Arc::clone(&binder);
        self.scheduler = ExecutionScheduler::new(
            Arc::clone(self.scheduler.selector()),
            Arc::clone(&self.router),
            binder,
            self.config.stack_size,
        );
        self
    }

    /// Replace the executor selector used to pick dedicated handler pools.
    pub fn with_selector(mut self, selector: Arc<dyn ExecutorSelector>) -> Self {
        self.scheduler = ExecutionScheduler::new(
            selector,
            Arc::clone(&self.router),
            Arc::clone(&self.binder),
            self.config.stack_size,
        );
        self
    }

    /// Replace the codec registry consulted by the response writer.
    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.writer = ResponseWriter::new(codecs, Arc::clone(&self.encode_pool));
        self
    }

    /// Register a fallback exception handler with the error classifier.
    pub fn register_exception_handler(&mut self, handler: Arc<dyn ExceptionHandler>) {
        self.classifier.register(handler);
    }

    /// Process one request to completion. Never panics the connection
    /// coroutine; every failure path ends in a write or a close.
    pub fn dispatch(
        &self,
        channel: &Arc<dyn Channel>,
        request: Arc<Request>,
        body: Option<BodyReceiver>,
    ) {
        debug!(
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            "matching route"
        );

        let route = match self.select_route(&request) {
            Selected::Route(m) => m,
            Selected::Synthesized(resp) => {
                self.respond_with(channel, &request, resp);
                return;
            }
        };

        info!(
            request_id = %request.id,
            handler = %route.handler_id(),
            "route matched"
        );
        request.set_matched(Arc::clone(route.spec()));
        let route = self.binder.fulfill(route, &request);

        if !route.is_executable() && permits_request_body(&request.method) {
            if let Some(body) = body {
                self.consume_body(channel, &request, route, body);
                return;
            }
        }
        self.execute_and_respond(channel, &request, route);
    }

    /// Route selection with the strict fallback ordering: method+path+
    /// predicate match, wrong-method probe (405), no-match (404), then the
    /// consumable-media-type check (415) on whatever route was selected.
    /// Status-route overrides win over synthesized defaults at every step.
    fn select_route(&self, request: &Request) -> Selected {
        let candidates = self.router.find(&request.method, &request.path);
        let found = candidates
            .into_iter()
            .find(|m| m.spec().matches_predicate(request));

        let route = match found {
            Some(r) => r,
            None => {
                let allowed = self.router.find_any(&request.path);
                if !allowed.is_empty() {
                    debug!(
                        request_id = %request.id,
                        method = %request.method,
                        path = %request.path,
                        ?allowed,
                        "method not allowed"
                    );
                    match self.router.route_status(StatusCode::METHOD_NOT_ALLOWED) {
                        Some(m) => m,
                        None => return Selected::Synthesized(Response::not_allowed(&allowed)),
                    }
                } else {
                    debug!(
                        request_id = %request.id,
                        method = %request.method,
                        path = %request.path,
                        "no route matched"
                    );
                    match self.router.route_status(StatusCode::NOT_FOUND) {
                        Some(m) => m,
                        None => return Selected::Synthesized(Response::not_found()),
                    }
                }
            }
        };

        if !route.accepts(request.content_type()) {
            debug!(
                request_id = %request.id,
                content_type = request.content_type().map(|m| m.as_str()),
                "matched route does not consume request media type"
            );
            return match self.router.route_status(StatusCode::UNSUPPORTED_MEDIA_TYPE) {
                Some(m) => Selected::Route(m),
                None => {
                    Selected::Synthesized(Response::status(StatusCode::UNSUPPORTED_MEDIA_TYPE))
                }
            };
        }

        Selected::Route(route)
    }

    /// Drive the body processor on this coroutine. The execution it
    /// eventually triggers is spawned off it, so the chunk loop stays free
    /// to feed an open part while the handler runs; dispatch returns only
    /// once that execution has resolved.
    fn consume_body(
        &self,
        channel: &Arc<dyn Channel>,
        request: &Arc<Request>,
        route: RouteMatch,
        body: BodyReceiver,
    ) {
        let processor = BodyProcessor::new(Arc::clone(request));
        let fired = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let execute = {
            let dispatcher = self.clone();
            let channel = Arc::clone(channel);
            let request = Arc::clone(request);
            let fired = Arc::clone(&fired);
            let done_fallback = done_tx.clone();
            move |route: RouteMatch| {
                fired.store(true, Ordering::SeqCst);
                let fallback_dispatcher = dispatcher.clone();
                let fallback_channel = Arc::clone(&channel);
                let stack_size = dispatcher.config.stack_size;
                let builder = may::coroutine::Builder::new().stack_size(stack_size);
                // SAFETY: Builder::spawn is unsafe per the may runtime's
                // requirements. The closure is Send + 'static and signals
                // completion over the done channel.
                #[allow(unsafe_code)]
                let spawned = unsafe {
                    builder.spawn(move || {
                        dispatcher.execute_and_respond(&channel, &request, route);
                        let _ = done_tx.send(());
                    })
                };
                if let Err(e) = spawned {
                    error!(error = %e, "failed to spawn execution coroutine");
                    fallback_dispatcher.write_default_error(fallback_channel.as_ref());
                    let _ = done_fallback.send(());
                }
            }
        };

        if let Err(e) = processor.run(body, route, execute) {
            self.handle_failure(channel, Some(request), e);
        }
        if fired.load(Ordering::SeqCst) {
            let _ = done_rx.recv();
        }
    }

    /// Run the filter chain with route execution as its terminal stage and
    /// write whatever resolves.
    fn execute_and_respond(
        &self,
        channel: &Arc<dyn Channel>,
        request: &Arc<Request>,
        route: RouteMatch,
    ) {
        let default_media = route.default_media();
        let filters = self.router.find_filters(request);
        let scheduler = self.scheduler.clone();
        let req = Arc::clone(request);
        let stream = filter::run(&filters, request, move || scheduler.submit(route, req));
        self.finish(channel, request, stream, default_media);
    }

    /// Synthesized fallback responses skip fulfillment and body processing
    /// but still pass through the filter chain and writer.
    fn respond_with(&self, channel: &Arc<dyn Channel>, request: &Arc<Request>, response: Response) {
        let filters = self.router.find_filters(request);
        let stream = filter::run(&filters, request, move || ResponseStream::ready(Ok(response)));
        self.finish(channel, request, stream, MediaType::Json);
    }

    fn finish(
        &self,
        channel: &Arc<dyn Channel>,
        request: &Arc<Request>,
        stream: ResponseStream,
        default_media: MediaType,
    ) {
        match stream.wait() {
            Ok(response) => {
                if let Err(e) =
                    self.writer
                        .write(channel.as_ref(), request, response, default_media)
                {
                    self.handle_failure(channel, Some(request), e);
                }
            }
            Err(e) => self.handle_failure(channel, Some(request), e),
        }
    }

    /// Entry point for every pipeline failure. Executes whatever recovery
    /// the classifier selects; if the recovery itself fails, or nothing is
    /// registered, writes the minimal default error response and
    /// force-closes the connection.
    pub fn handle_failure(
        &self,
        channel: &Arc<dyn Channel>,
        request: Option<&Arc<Request>>,
        error: PipelineError,
    ) {
        warn!(error = %error, "pipeline failure entering classifier");
        match self.classifier.classify(request.map(|r| r.as_ref()), &error) {
            Recovery::Route(m) => {
                let Some(request) = request else {
                    self.write_default_error(channel.as_ref());
                    return;
                };
                let m = self.binder.fulfill(m, request);
                let default_media = m.default_media();
                if !m.is_executable() {
                    error!(
                        error = %error,
                        handler = %m.handler_id(),
                        "error route not executable, writing default error response"
                    );
                    self.write_default_error(channel.as_ref());
                    return;
                }
                match m.execute(request) {
                    Ok(outcome) => {
                        let response = error_outcome_to_response(outcome);
                        if let Err(e2) = self.writer.write(
                            channel.as_ref(),
                            request,
                            response,
                            default_media,
                        ) {
                            error!(error = %e2, "error route response failed to write");
                            self.write_default_error(channel.as_ref());
                        }
                    }
                    Err(e2) => {
                        error!(
                            error = %e2,
                            "error route execution failed, falling back to default error handling"
                        );
                        self.write_default_error(channel.as_ref());
                    }
                }
            }
            Recovery::Handler(handler) => {
                let Some(request) = request else {
                    self.write_default_error(channel.as_ref());
                    return;
                };
                match handler.handle(request, &error) {
                    Ok(outcome) => {
                        let response = error_outcome_to_response(outcome);
                        if let Err(e2) = self.writer.write(
                            channel.as_ref(),
                            request,
                            response,
                            MediaType::Json,
                        ) {
                            error!(error = %e2, "exception handler response failed to write");
                            self.write_default_error(channel.as_ref());
                        }
                    }
                    Err(e2) => {
                        error!(
                            error = %e2,
                            "exception handler failed, falling back to default error handling"
                        );
                        self.write_default_error(channel.as_ref());
                    }
                }
            }
            Recovery::Default => {
                error!(error = %error, "unhandled pipeline failure");
                self.write_default_error(channel.as_ref());
            }
        }
    }

    /// The guaranteed terminal write: minimal 500, connection force-closed.
    fn write_default_error(&self, channel: &dyn Channel) {
        let mut head = ResponseHead::new(StatusCode::INTERNAL_SERVER_ERROR);
        head.set_header("content-length", "0".to_string());
        let _ = channel.write_full(head, Vec::new());
        channel.close();
    }
}

/// Map an error-route or exception-handler outcome onto a response: a full
/// response passes through, a bare value becomes a 500 carrying it, nothing
/// becomes an empty 500.
fn error_outcome_to_response(outcome: RouteOutcome) -> Response {
    match outcome {
        RouteOutcome::None => Response::server_error(),
        RouteOutcome::Response(r) => r,
        RouteOutcome::Value(v) => Response::server_error().with_value(v),
        RouteOutcome::Stream(s) => Response::server_error().with_body(Body::Stream(s)),
    }
}
