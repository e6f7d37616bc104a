use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::body::core::{BodyChunk, BodyReceiver, FieldChunk};
use crate::body::part::{self, PartSender};
use crate::errors::PipelineError;
use crate::media::MediaType;
use crate::router::{ArgumentSource, ArgumentSpec, ArgumentValue, RouteMatch};
use crate::server::Request;

/// Exactly-once guard for downstream execution. Overlapping triggers, such
/// as the route becoming executable on the same chunk that also turns out
/// to be terminal, race on the compare-and-set and only one wins.
#[derive(Debug, Default)]
pub struct ExecutionLatch(AtomicBool);

impl ExecutionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt the `false -> true` transition. True exactly once.
    pub fn try_fire(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn fired(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where the processor currently is in a request body's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    AwaitingData,
    AccumulatingPart,
    Executed,
}

/// Per-request state machine that consumes the body stream one credit at a
/// time and fulfils the route's remaining inputs until it can execute.
///
/// Chunk routing, in order:
/// - a named field while a part is open goes to that part when the names
///   match; a mismatch is a producer protocol violation and terminates the
///   stream as a completion;
/// - a named field with no part open binds a still-required input (opening
///   a [`part::Part`] for upload-typed inputs) or, if the route does not
///   need it, joins the raw body accumulator;
/// - raw data joins the accumulator;
/// - the terminal chunk binds the accumulated body to a still-unbound
///   body-sourced input.
///
/// After every chunk, if the route has become executable or the terminal
/// chunk was seen, the execution latch fires exactly once and the `execute`
/// continuation is invoked; otherwise the next chunk is pulled. Resuming the
/// pull is the only thing that advances the byte stream, so a slow handler
/// never causes unbounded buffering.
pub struct BodyProcessor {
    request: Arc<Request>,
    latch: ExecutionLatch,
    state: ProcessorState,
    current_part: Option<PartSender>,
}

impl BodyProcessor {
    pub fn new(request: Arc<Request>) -> Self {
        BodyProcessor {
            request,
            latch: ExecutionLatch::new(),
            state: ProcessorState::AwaitingData,
            current_part: None,
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn latch(&self) -> &ExecutionLatch {
        &self.latch
    }

    /// Consume the body stream, threading the progressively fulfilled
    /// `route` through, and invoke `execute` exactly once. The continuation
    /// must not block this coroutine: with a part open, the chunk loop is
    /// what feeds the executing handler.
    ///
    /// A producer that vanishes without a terminal chunk is a peer
    /// cancellation: open parts are released and the latch never fires.
    /// Binding failures are returned as pipeline errors for the caller to
    /// classify.
    pub fn run<F>(
        mut self,
        body: BodyReceiver,
        route: RouteMatch,
        execute: F,
    ) -> Result<(), PipelineError>
    where
        F: FnOnce(RouteMatch),
    {
        let mut route = route;
        let mut execute = Some(execute);

        loop {
            let Some(chunk) = body.pull() else {
                debug!(
                    request_id = %self.request.id,
                    "body producer gone before terminal chunk, releasing"
                );
                self.current_part = None;
                return Ok(());
            };

            let mut completed = false;
            match chunk {
                BodyChunk::Field(field) => {
                    completed = self.on_field(&mut route, field)?;
                }
                BodyChunk::Data(data) => {
                    self.request.append_content(&data);
                }
                BodyChunk::End => {
                    if !route.is_executable() {
                        route = self.bind_accumulated_body(route)?;
                    }
                    completed = true;
                }
            }

            if (route.is_executable() || completed) && self.latch.try_fire() {
                self.state = ProcessorState::Executed;
                debug!(
                    request_id = %self.request.id,
                    handler = %route.handler_id(),
                    "body fulfilled, invoking downstream execution"
                );
                if let Some(f) = execute.take() {
                    f(route.clone());
                }
            }

            if completed {
                self.current_part = None;
                return Ok(());
            }
        }
    }

    /// Route one named field chunk. Returns true when the stream must be
    /// treated as completed.
    fn on_field(
        &mut self,
        route: &mut RouteMatch,
        field: FieldChunk,
    ) -> Result<bool, PipelineError> {
        if let Some(open) = &self.current_part {
            if open.name() == field.name {
                let last = field.last;
                let delivered = if self.latch.fired() {
                    open.send(field.data)
                } else {
                    open.prime(field.data)
                };
                if delivered.is_err() {
                    // The part's consumer is gone; nothing left to feed.
                    debug!(part = %field.name, "part consumer gone, completing stream");
                    return Ok(true);
                }
                if last {
                    self.current_part = None;
                    if self.state == ProcessorState::AccumulatingPart {
                        self.state = ProcessorState::AwaitingData;
                    }
                }
                return Ok(false);
            }
            warn!(
                open_part = %open.name(),
                field = %field.name,
                "field arrived while another part is open, completing stream"
            );
            return Ok(true);
        }

        if self.latch.fired() {
            // Already executed and no part to feed: the producer is
            // violating the protocol, treat as completion.
            return Ok(true);
        }

        if let Some(input) = route.required_input(&field.name).cloned() {
            *route = self.bind_field(route, &input, field)?;
        } else {
            self.request.append_content(&field.data);
        }
        Ok(false)
    }

    fn bind_field(
        &mut self,
        route: &RouteMatch,
        input: &ArgumentSpec,
        field: FieldChunk,
    ) -> Result<RouteMatch, PipelineError> {
        if input.source == ArgumentSource::Upload && field.file {
            let (sender, part) = part::channel(&field.name);
            debug!(part = %field.name, "opened part for streaming upload");
            if sender.prime(field.data).is_err() {
                return Err(PipelineError::Unsatisfied(input.name.clone()));
            }
            let bound = route.fulfill(&field.name, ArgumentValue::Upload(Arc::new(part)));
            if field.last {
                // Single-slice upload: the part is already complete.
                drop(sender);
            } else {
                self.current_part = Some(sender);
                self.state = ProcessorState::AccumulatingPart;
            }
            Ok(bound)
        } else {
            let value = match String::from_utf8(field.data) {
                Ok(text) => ArgumentValue::Text(text),
                Err(raw) => ArgumentValue::Bytes(raw.into_bytes()),
            };
            Ok(route.fulfill(&field.name, value))
        }
    }

    /// Terminal chunk seen with an unbound body argument: bind whatever
    /// accumulated, converted per the request's content type.
    fn bind_accumulated_body(&self, route: RouteMatch) -> Result<RouteMatch, PipelineError> {
        let Some(input) = route.body_input().cloned() else {
            return Ok(route);
        };
        if route.bound(&input.name).is_some() || !self.request.has_body() {
            return Ok(route);
        }
        let bytes = self.request.body_bytes();
        let value = match self.request.content_type() {
            Some(MediaType::Json) => serde_json::from_slice(&bytes)
                .map(ArgumentValue::Json)
                .map_err(|_| PipelineError::Unsatisfied(input.name.clone()))?,
            Some(MediaType::Text) => match String::from_utf8(bytes) {
                Ok(text) => ArgumentValue::Text(text),
                Err(raw) => ArgumentValue::Bytes(raw.into_bytes()),
            },
            _ => ArgumentValue::Bytes(bytes),
        };
        Ok(route.fulfill(&input.name, value))
    }
}
