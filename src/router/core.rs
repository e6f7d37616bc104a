use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::{Method, StatusCode};
use serde_json::Value;
use smallvec::SmallVec;

use crate::body::Part;
use crate::errors::PipelineError;
use crate::filter::HttpFilter;
use crate::media::MediaType;
use crate::server::{Request, Response};
use crate::stream::ValueStream;

/// Maximum number of path parameters before heap allocation.
/// Most REST routes have <=4 (e.g. /users/{id}/posts/{post_id}).
pub const MAX_INLINE_PARAMS: usize = 8;

/// Stack-allocated parameter storage for the hot path.
///
/// Param names use `Arc<str>` because they come from the static route table
/// and `Arc::clone()` is an O(1) atomic increment; values are per-request.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Identity of a handler, standing in for the declaring type of the
/// original controller. Error routes can be scoped to one of these.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct HandlerId(Arc<str>);

impl HandlerId {
    pub fn new(name: &str) -> Self {
        HandlerId(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a declared route input is bound from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentSource {
    Path,
    Query,
    Header,
    /// A named multipart form field, bound as its buffered value.
    Field,
    /// A named multipart file field, bound as a streaming [`Part`].
    Upload,
    /// The accumulated raw request body.
    Body,
}

/// One declared input of a route.
#[derive(Debug, Clone)]
pub struct ArgumentSpec {
    pub name: String,
    pub source: ArgumentSource,
    pub required: bool,
}

/// A bound argument value as delivered to the handler.
#[derive(Debug, Clone)]
pub enum ArgumentValue {
    Text(String),
    Json(Value),
    Bytes(Vec<u8>),
    Upload(Arc<Part>),
}

impl ArgumentValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ArgumentValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ArgumentValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_upload(&self) -> Option<&Arc<Part>> {
        match self {
            ArgumentValue::Upload(p) => Some(p),
            _ => None,
        }
    }
}

/// Arguments a route executes with, keyed by declared input name.
pub type HandlerArgs = HashMap<String, ArgumentValue>;

/// What a handler produced. The execution scheduler classifies this into a
/// concrete [`Response`].
pub enum RouteOutcome {
    /// Nothing: an empty 200.
    None,
    /// A bare value: a 200 carrying it as the body.
    Value(Value),
    /// A full response. Statuses >= 300 are re-mapped once through the
    /// status-route table.
    Response(Response),
    /// A backpressured value stream, written as a chunked 200.
    Stream(ValueStream),
}

/// A route's executable core.
pub trait RouteHandler: Send + Sync {
    fn invoke(&self, request: &Request, args: &HandlerArgs) -> anyhow::Result<RouteOutcome>;
}

impl<F> RouteHandler for F
where
    F: Fn(&Request, &HandlerArgs) -> anyhow::Result<RouteOutcome> + Send + Sync,
{
    fn invoke(&self, request: &Request, args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        self(request, args)
    }
}

/// Extra match condition beyond method and path.
pub type RoutePredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Static description of one route: its handler plus everything the
/// pipeline needs for negotiation and argument fulfillment.
pub struct RouteSpec {
    pub id: HandlerId,
    pub method: Method,
    pub path_pattern: String,
    pub handler: Arc<dyn RouteHandler>,
    pub inputs: Vec<ArgumentSpec>,
    /// Media types the route consumes; empty means anything.
    pub consumes: Vec<MediaType>,
    /// Media types the route produces, in preference order. The first one
    /// is the default response media type.
    pub produces: Vec<MediaType>,
    pub predicate: Option<RoutePredicate>,
}

impl RouteSpec {
    pub fn new(
        method: Method,
        path_pattern: impl Into<String>,
        handler: impl RouteHandler + 'static,
    ) -> Self {
        let path_pattern = path_pattern.into();
        let id = HandlerId::new(&format!("{method} {path_pattern}"));
        RouteSpec {
            id,
            method,
            path_pattern,
            handler: Arc::new(handler),
            inputs: Vec::new(),
            consumes: Vec::new(),
            produces: Vec::new(),
            predicate: None,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.id = HandlerId::new(name);
        self
    }

    pub fn input(mut self, name: &str, source: ArgumentSource, required: bool) -> Self {
        self.inputs.push(ArgumentSpec {
            name: name.to_string(),
            source,
            required,
        });
        self
    }

    pub fn consumes(mut self, media: MediaType) -> Self {
        self.consumes.push(media);
        self
    }

    pub fn produces(mut self, media: MediaType) -> Self {
        self.produces.push(media);
        self
    }

    pub fn predicate(
        mut self,
        pred: impl Fn(&Request) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(pred));
        self
    }

    /// Whether the route consumes the given request content type. Routes
    /// with no declared consumable types accept anything, as do requests
    /// without a body content type.
    pub fn accepts(&self, content_type: Option<&MediaType>) -> bool {
        match content_type {
            None => true,
            Some(ct) => self.consumes.is_empty() || self.consumes.contains(ct),
        }
    }

    /// Default media type for responses from this route.
    pub fn default_media(&self) -> MediaType {
        self.produces.first().cloned().unwrap_or(MediaType::Json)
    }

    pub fn matches_predicate(&self, request: &Request) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(request))
    }
}

impl fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSpec")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path_pattern", &self.path_pattern)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

/// The binding of a request to a route plus its progressively fulfilled
/// arguments.
///
/// Immutable value-with-builder: [`fulfill`](RouteMatch::fulfill) returns a
/// new match with one more input bound and the caller threads the latest
/// value explicitly. Partially fulfilled states can therefore be discarded
/// on error without corrupting shared state.
#[derive(Clone)]
pub struct RouteMatch {
    spec: Arc<RouteSpec>,
    pub path_params: ParamVec,
    bound: HashMap<String, ArgumentValue>,
}

impl RouteMatch {
    pub fn new(spec: Arc<RouteSpec>, path_params: ParamVec) -> Self {
        RouteMatch {
            spec,
            path_params,
            bound: HashMap::new(),
        }
    }

    pub fn spec(&self) -> &Arc<RouteSpec> {
        &self.spec
    }

    pub fn handler_id(&self) -> &HandlerId {
        &self.spec.id
    }

    /// Get a path parameter by name, last occurrence winning.
    #[inline]
    pub fn get_path_param(&self, name: &str) -> Option<&str> {
        self.path_params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }

    /// The declared input with this name, if it is not yet bound.
    pub fn required_input(&self, name: &str) -> Option<&ArgumentSpec> {
        if self.bound.contains_key(name) {
            return None;
        }
        self.spec.inputs.iter().find(|a| a.name == name)
    }

    pub fn is_required_input(&self, name: &str) -> bool {
        self.required_input(name).is_some_and(|a| a.required)
    }

    /// The input designated to receive the accumulated raw body, if any.
    pub fn body_input(&self) -> Option<&ArgumentSpec> {
        self.spec
            .inputs
            .iter()
            .find(|a| a.source == ArgumentSource::Body)
    }

    /// True once every required input is bound.
    pub fn is_executable(&self) -> bool {
        self.spec
            .inputs
            .iter()
            .filter(|a| a.required)
            .all(|a| self.bound.contains_key(&a.name))
    }

    /// Copy-on-fulfill: a new match with one more input bound.
    #[must_use]
    pub fn fulfill(&self, name: &str, value: ArgumentValue) -> RouteMatch {
        let mut next = self.clone();
        next.bound.insert(name.to_string(), value);
        next
    }

    pub fn bound(&self, name: &str) -> Option<&ArgumentValue> {
        self.bound.get(name)
    }

    pub fn accepts(&self, content_type: Option<&MediaType>) -> bool {
        self.spec.accepts(content_type)
    }

    pub fn default_media(&self) -> MediaType {
        self.spec.default_media()
    }

    /// Invoke the handler with the bound arguments. Executing a match whose
    /// required inputs are not all bound is an unsatisfied-argument error,
    /// never a panic.
    pub fn execute(&self, request: &Request) -> Result<RouteOutcome, PipelineError> {
        if let Some(missing) = self
            .spec
            .inputs
            .iter()
            .find(|a| a.required && !self.bound.contains_key(&a.name))
        {
            return Err(PipelineError::Unsatisfied(missing.name.clone()));
        }
        self.spec
            .handler
            .invoke(request, &self.bound)
            .map_err(PipelineError::Handler)
    }
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMatch")
            .field("handler", &self.spec.id)
            .field("path_params", &self.path_params)
            .field("bound", &self.bound.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Lookup operations the pipeline requires from a route table. Construction
/// and compilation of the table are out of scope; the bundled
/// [`RouteTable`](crate::router::RouteTable) is a minimal implementation.
pub trait Router: Send + Sync {
    /// Candidate matches for method + path, in registration order.
    fn find(&self, method: &Method, path: &str) -> Vec<RouteMatch>;

    /// Every method that has a route matching this path.
    fn find_any(&self, path: &str) -> Vec<Method>;

    /// The registered override route for a status code, if any.
    fn route_status(&self, status: StatusCode) -> Option<RouteMatch>;

    /// The registered error route for this failure, scoped to `declaring`
    /// when given, global otherwise.
    fn route_error(&self, declaring: Option<&HandlerId>, error: &PipelineError)
        -> Option<RouteMatch>;

    /// Filters that apply to this request, outermost first.
    fn find_filters(&self, request: &Request) -> Vec<Arc<dyn HttpFilter>>;
}
