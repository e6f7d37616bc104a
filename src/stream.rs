//! Single-credit pull streams built on `may` channels.
//!
//! All chunk delivery in the pipeline (body consumption, part feeding and
//! streamed response production) follows the same flow-control discipline:
//! exactly one unit may be outstanding per stream, and the producer may only
//! send after the consumer has explicitly granted a credit for it. This
//! bounds memory use per request regardless of producer speed.
//!
//! The primitive is a pair of unbounded `may::sync::mpsc` channels used in
//! lockstep: a data channel and a credit channel flowing the other way.
//! [`CreditReceiver::pull`] grants one credit and then blocks for the unit;
//! [`CreditSender::send`] blocks for a credit before delivering. Dropping
//! either half is observed by the other side as stream termination.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use may::sync::mpsc;
use serde_json::Value;

use crate::errors::PipelineError;
use crate::server::Response;

/// Error returned when the other half of a credit stream has gone away.
#[derive(Debug, thiserror::Error)]
#[error("stream peer disconnected")]
pub struct Disconnected;

/// Producer half of a single-credit stream.
pub struct CreditSender<T> {
    data_tx: mpsc::Sender<T>,
    credit_rx: mpsc::Receiver<()>,
    primed: Arc<AtomicUsize>,
}

impl<T> CreditSender<T> {
    /// Deliver one unit, blocking until the consumer has granted a credit
    /// for it. Fails once the consumer is gone.
    pub fn send(&self, item: T) -> Result<(), Disconnected> {
        self.credit_rx.recv().map_err(|_| Disconnected)?;
        self.data_tx.send(item).map_err(|_| Disconnected)
    }

    /// Enqueue one unit without waiting for demand. Used to prime a stream
    /// whose consumer has not started pulling yet (a part bound before its
    /// route became executable); once the consumer is live, [`send`] keeps
    /// the one-unit-in-flight discipline.
    ///
    /// [`send`]: CreditSender::send
    pub fn push(&self, item: T) -> Result<(), Disconnected> {
        self.primed.fetch_add(1, Ordering::SeqCst);
        self.data_tx.send(item).map_err(|_| Disconnected)
    }
}

/// Consumer half of a single-credit stream.
pub struct CreditReceiver<T> {
    data_rx: mpsc::Receiver<T>,
    credit_tx: mpsc::Sender<()>,
    primed: Arc<AtomicUsize>,
}

impl<T> CreditReceiver<T> {
    /// Return the next unit, granting the producer a credit only when no
    /// primed unit is already in flight. `None` means the producer has
    /// terminated the stream (or vanished).
    pub fn pull(&self) -> Option<T> {
        if self.take_primed() {
            return self.data_rx.recv().ok();
        }
        self.credit_tx.send(()).ok()?;
        self.data_rx.recv().ok()
    }

    /// Consume one primed unit if any were pushed without demand.
    fn take_primed(&self) -> bool {
        self.primed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Create a connected single-credit stream pair.
pub fn credit_channel<T>() -> (CreditSender<T>, CreditReceiver<T>) {
    let (data_tx, data_rx) = mpsc::channel();
    let (credit_tx, credit_rx) = mpsc::channel();
    let primed = Arc::new(AtomicUsize::new(0));
    (
        CreditSender {
            data_tx,
            credit_rx,
            primed: Arc::clone(&primed),
        },
        CreditReceiver {
            data_rx,
            credit_tx,
            primed,
        },
    )
}

/// Item type for streamed response bodies: a value to encode, or a failure
/// that terminates the stream and routes through error handling.
pub type ValueResult = Result<Value, PipelineError>;

/// Producer half of a streamed response body.
pub type ValueSink = CreditSender<ValueResult>;

/// Backpressured stream of response body values, encoded frame-by-frame by
/// the response writer.
pub type ValueStream = CreditReceiver<ValueResult>;

/// Create a streamed-body channel pair.
pub fn value_channel() -> (ValueSink, ValueStream) {
    credit_channel()
}

/// Completion side of a pending response: whoever executes the route (or
/// short-circuits it) resolves the stream exactly once.
#[derive(Clone)]
pub struct ResponseSink {
    tx: mpsc::Sender<Result<Response, PipelineError>>,
}

impl ResponseSink {
    /// Resolve the pending response. Later resolutions are ignored.
    pub fn complete(&self, result: Result<Response, PipelineError>) {
        let _ = self.tx.send(result);
    }
}

/// A pending response produced by a filter stage or by route execution.
///
/// Exactly one element is ever emitted; completion with an error stands in
/// for the element, never accompanies one.
pub struct ResponseStream {
    rx: mpsc::Receiver<Result<Response, PipelineError>>,
}

impl ResponseStream {
    /// A stream that is already resolved.
    pub fn ready(result: Result<Response, PipelineError>) -> Self {
        let (sink, stream) = response_channel();
        sink.complete(result);
        stream
    }

    /// Block until the response is resolved. A producer that disappears
    /// without resolving is reported as a handler failure so that no
    /// request goes unanswered.
    pub fn wait(self) -> Result<Response, PipelineError> {
        self.rx.recv().unwrap_or_else(|_| {
            Err(PipelineError::Handler(anyhow::anyhow!(
                "execution completed without producing a response"
            )))
        })
    }

    /// Transform the resolution on a detached coroutine, yielding a new
    /// pending response. Used by filters that decorate downstream results.
    pub fn map<F>(self, f: F) -> ResponseStream
    where
        F: FnOnce(Result<Response, PipelineError>) -> Result<Response, PipelineError>
            + Send
            + 'static,
    {
        let (sink, out) = response_channel();
        let _ = may::go!(move || {
            sink.complete(f(self.wait()));
        });
        out
    }
}

/// Create a pending-response channel pair.
pub fn response_channel() -> (ResponseSink, ResponseStream) {
    let (tx, rx) = mpsc::channel();
    (ResponseSink { tx }, ResponseStream { rx })
}
