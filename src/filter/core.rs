use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::errors::PipelineError;
use crate::server::Request;
use crate::stream::ResponseStream;

/// A request-processing stage. Filters run outermost first; each receives
/// the request and the chain, and must either call
/// [`FilterChain::proceed`] exactly once or short-circuit by returning its
/// own response stream without proceeding.
pub trait HttpFilter: Send + Sync {
    fn apply(&self, request: &Arc<Request>, chain: FilterChain) -> ResponseStream;
}

/// An ordered, immutable list of filter stages plus a shared cursor.
///
/// The terminal stage, the actual route execution, is appended by
/// [`run`], so a chain built over N user filters performs exactly N+1 stage
/// advances per request. Advancing past the end means some filter invoked
/// `proceed` more than once; that is a chain-construction bug, reported as
/// a programming error rather than recovered per request.
#[derive(Clone)]
pub struct FilterChain {
    stages: Arc<[Arc<dyn HttpFilter>]>,
    position: Arc<AtomicUsize>,
}

impl FilterChain {
    /// Advance to the next stage and hand it the request.
    pub fn proceed(&self, request: &Arc<Request>) -> ResponseStream {
        let pos = self.position.fetch_add(1, Ordering::SeqCst);
        if pos >= self.stages.len() {
            error!(
                stages = self.stages.len(),
                "FilterChain::proceed invoked more than once per filter execution"
            );
            return ResponseStream::ready(Err(PipelineError::ChainContract));
        }
        self.stages[pos].apply(request, self.clone())
    }
}

/// Run the request through `filters` with `terminal`, the continuation
/// producing the already-built execution stream, appended as the innermost
/// stage. With no filters registered the terminal runs directly.
pub fn run<F>(
    filters: &[Arc<dyn HttpFilter>],
    request: &Arc<Request>,
    terminal: F,
) -> ResponseStream
where
    F: FnOnce() -> ResponseStream + Send + 'static,
{
    if filters.is_empty() {
        return terminal();
    }

    let mut stages: Vec<Arc<dyn HttpFilter>> = filters.to_vec();
    stages.push(Arc::new(TerminalStage::new(terminal)));
    let chain = FilterChain {
        stages: stages.into(),
        position: Arc::new(AtomicUsize::new(0)),
    };
    chain.proceed(request)
}

/// The automatically appended innermost stage: produces the execution
/// stream and never proceeds further.
struct TerminalStage {
    terminal: Mutex<Option<Box<dyn FnOnce() -> ResponseStream + Send>>>,
}

impl TerminalStage {
    fn new<F>(terminal: F) -> Self
    where
        F: FnOnce() -> ResponseStream + Send + 'static,
    {
        TerminalStage {
            terminal: Mutex::new(Some(Box::new(terminal))),
        }
    }
}

impl HttpFilter for TerminalStage {
    fn apply(&self, _request: &Arc<Request>, _chain: FilterChain) -> ResponseStream {
        match self.terminal.lock().unwrap().take() {
            Some(f) => f(),
            // Reaching the terminal twice implies a cursor over-advance
            // that the bounds check should already have caught.
            None => ResponseStream::ready(Err(PipelineError::ChainContract)),
        }
    }
}
