use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use regex::Regex;
use tracing::{debug, info};

use crate::errors::{ErrorKind, PipelineError};
use crate::filter::HttpFilter;
use crate::router::core::{HandlerId, ParamVec, RouteMatch, RouteSpec, Router};
use crate::server::Request;

struct CompiledRoute {
    spec: Arc<RouteSpec>,
    regex: Regex,
    param_names: Vec<Arc<str>>,
}

struct ErrorRoute {
    declaring: Option<HandlerId>,
    kind: ErrorKind,
    spec: Arc<RouteSpec>,
}

/// Minimal route registry implementing the [`Router`] lookup contract.
///
/// Path patterns use `{name}` segments compiled to regexes at registration
/// time; matching is a linear scan, which is plenty for the table sizes the
/// tests and small services use. Route-table sophistication is explicitly
/// not this crate's concern.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
    status_routes: HashMap<u16, Arc<RouteSpec>>,
    error_routes: Vec<ErrorRoute>,
    filters: Vec<Arc<dyn HttpFilter>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Patterns are compiled eagerly so a bad pattern
    /// fails at startup, not per request.
    pub fn route(&mut self, spec: RouteSpec) {
        let (regex, param_names) = Self::path_to_regex(&spec.path_pattern);
        info!(
            method = %spec.method,
            pattern = %spec.path_pattern,
            handler = %spec.id,
            "route registered"
        );
        self.routes.push(CompiledRoute {
            spec: Arc::new(spec),
            regex,
            param_names,
        });
    }

    /// Register an override route for a status code (404, 405, 415, 400...).
    pub fn status_route(&mut self, status: StatusCode, spec: RouteSpec) {
        self.status_routes.insert(status.as_u16(), Arc::new(spec));
    }

    /// Register an error route for a failure class, optionally scoped to
    /// the handler the failing request originally matched.
    pub fn error_route(&mut self, declaring: Option<HandlerId>, kind: ErrorKind, spec: RouteSpec) {
        self.error_routes.push(ErrorRoute {
            declaring,
            kind,
            spec: Arc::new(spec),
        });
    }

    /// Append a filter; filters run in registration order, outermost first.
    pub fn filter(&mut self, filter: Arc<dyn HttpFilter>) {
        self.filters.push(filter);
    }

    /// Convert a `{name}`-style path pattern to a regex plus the ordered
    /// parameter names.
    fn path_to_regex(path: &str) -> (Regex, Vec<Arc<str>>) {
        if path == "/" {
            #[allow(clippy::expect_used)]
            return (Regex::new(r"^/$").expect("static pattern"), Vec::new());
        }

        let mut pattern = String::with_capacity(path.len() + 5);
        pattern.push('^');
        let mut param_names = Vec::with_capacity(path.matches('{').count());

        for segment in path.split('/') {
            if segment.starts_with('{') && segment.ends_with('}') {
                param_names.push(Arc::from(
                    segment.trim_start_matches('{').trim_end_matches('}'),
                ));
                pattern.push_str("/([^/]+)");
            } else if !segment.is_empty() {
                pattern.push('/');
                pattern.push_str(&regex::escape(segment));
            }
        }

        pattern.push('$');
        #[allow(clippy::expect_used)]
        let regex = Regex::new(&pattern).expect("route pattern failed to compile");
        (regex, param_names)
    }

    fn match_route(&self, compiled: &CompiledRoute, path: &str) -> Option<RouteMatch> {
        let captures = compiled.regex.captures(path)?;
        let mut params = ParamVec::new();
        for (i, name) in compiled.param_names.iter().enumerate() {
            if let Some(m) = captures.get(i + 1) {
                params.push((Arc::clone(name), m.as_str().to_string()));
            }
        }
        Some(RouteMatch::new(Arc::clone(&compiled.spec), params))
    }
}

impl Router for RouteTable {
    fn find(&self, method: &Method, path: &str) -> Vec<RouteMatch> {
        debug!(method = %method, path = %path, "route match attempt");
        self.routes
            .iter()
            .filter(|c| &c.spec.method == method)
            .filter_map(|c| self.match_route(c, path))
            .collect()
    }

    fn find_any(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = Vec::new();
        for c in &self.routes {
            if c.regex.is_match(path) && !methods.contains(&c.spec.method) {
                methods.push(c.spec.method.clone());
            }
        }
        methods
    }

    fn route_status(&self, status: StatusCode) -> Option<RouteMatch> {
        self.status_routes
            .get(&status.as_u16())
            .map(|spec| RouteMatch::new(Arc::clone(spec), ParamVec::new()))
    }

    fn route_error(
        &self,
        declaring: Option<&HandlerId>,
        error: &PipelineError,
    ) -> Option<RouteMatch> {
        let kind = error.kind();
        self.error_routes
            .iter()
            .find(|e| e.kind == kind && e.declaring.as_ref() == declaring)
            .map(|e| RouteMatch::new(Arc::clone(&e.spec), ParamVec::new()))
    }

    fn find_filters(&self, _request: &Request) -> Vec<Arc<dyn HttpFilter>> {
        self.filters.clone()
    }
}
