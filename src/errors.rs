//! Pipeline failure taxonomy and the error classifier.
//!
//! Every failure that can occur between route selection and the final byte
//! written is funnelled into [`PipelineError`]. The [`Classifier`] maps a
//! failure to a recovery action in a strict order:
//!
//! 1. an unsatisfiable required argument maps to the registered
//!    "bad request" status route, when one exists;
//! 2. any other failure is matched against an error route declared for the
//!    handler the request originally matched, then against a globally
//!    registered error route for that failure class;
//! 3. failing that, against the registered [`ExceptionHandler`]
//!    collaborators;
//! 4. failing that, the caller writes a minimal default error response and
//!    force-closes the connection.
//!
//! This is the single point where failures are guaranteed to terminate in a
//! response: no path may leave a request silently unanswered.

use std::sync::Arc;

use http::StatusCode;
use tracing::debug;

use crate::router::{RouteMatch, RouteOutcome, Router};
use crate::server::{ChannelError, Request};

/// Stable classification of a pipeline failure, used as the lookup key for
/// error routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required route argument was absent or unconvertible.
    Unsatisfied,
    /// The handler (or an error route / exception handler) failed.
    Handler,
    /// A response body could not be encoded.
    Codec,
    /// A filter advanced the chain past its terminal stage.
    ChainContract,
    /// A transport write failed while the channel was still writable.
    Write,
}

/// A failure occurring anywhere in the dispatch pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("required argument '{0}' could not be satisfied")]
    Unsatisfied(String),
    #[error("handler execution failed: {0}")]
    Handler(anyhow::Error),
    #[error("failed to encode response body: {0}")]
    Codec(String),
    #[error("filter chain proceed() invoked more than once per filter execution")]
    ChainContract,
    #[error("response write failed: {0}")]
    Write(#[source] ChannelError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Unsatisfied(_) => ErrorKind::Unsatisfied,
            PipelineError::Handler(_) => ErrorKind::Handler,
            PipelineError::Codec(_) => ErrorKind::Codec,
            PipelineError::ChainContract => ErrorKind::ChainContract,
            PipelineError::Write(_) => ErrorKind::Write,
        }
    }
}

/// Last-resort collaborator consulted when no error route matches a
/// failure. Analogous to a generically registered exception handler bean.
pub trait ExceptionHandler: Send + Sync {
    /// Whether this handler wants the given failure.
    fn can_handle(&self, error: &PipelineError) -> bool;
    /// Produce a recovery outcome for the failure.
    fn handle(&self, request: &Request, error: &PipelineError) -> anyhow::Result<RouteOutcome>;
}

/// The recovery the classifier selected for a failure. Executing it is the
/// dispatcher's job; a [`Recovery::Default`] means "write the minimal error
/// response and force-close".
pub enum Recovery {
    Route(RouteMatch),
    Handler(Arc<dyn ExceptionHandler>),
    Default,
}

/// Maps pipeline failures to recovery actions. Shares the read-only router
/// with the dispatcher; never mutates it.
#[derive(Clone)]
pub struct Classifier {
    router: Arc<dyn Router>,
    handlers: Vec<Arc<dyn ExceptionHandler>>,
}

impl Classifier {
    pub fn new(router: Arc<dyn Router>) -> Self {
        Classifier {
            router,
            handlers: Vec::new(),
        }
    }

    /// Register a fallback exception handler. Handlers are consulted in
    /// registration order.
    pub fn register(&mut self, handler: Arc<dyn ExceptionHandler>) {
        self.handlers.push(handler);
    }

    /// Select a recovery for `error`. `request` is absent only when the
    /// failure occurred before a request existed, in which case only the
    /// default recovery is possible.
    pub fn classify(&self, request: Option<&Request>, error: &PipelineError) -> Recovery {
        if matches!(error, PipelineError::Unsatisfied(_)) {
            if let Some(m) = self.router.route_status(StatusCode::BAD_REQUEST) {
                debug!(error = %error, "mapped unsatisfied argument to bad-request route");
                return Recovery::Route(m);
            }
        }

        if let Some(request) = request {
            let declaring = request.matched().map(|spec| spec.id.clone());
            let found = declaring
                .as_ref()
                .and_then(|id| self.router.route_error(Some(id), error))
                .or_else(|| self.router.route_error(None, error));
            if let Some(m) = found {
                debug!(error = %error, handler = %m.handler_id(), "matched error route");
                return Recovery::Route(m);
            }

            if let Some(h) = self.handlers.iter().find(|h| h.can_handle(error)) {
                return Recovery::Handler(Arc::clone(h));
            }
        }

        Recovery::Default
    }
}
