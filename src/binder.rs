use crate::router::{ArgumentSource, ArgumentValue, RouteMatch};
use crate::server::Request;

/// Binds route inputs that are derivable without reading further body data:
/// path parameters, query parameters and headers. Body-sourced inputs are
/// the body stream processor's job.
pub trait ArgumentBinder: Send + Sync {
    /// Returns a match with every currently derivable input bound. Inputs
    /// that cannot be derived yet are left unbound, never errored here.
    fn fulfill(&self, route: RouteMatch, request: &Request) -> RouteMatch;
}

/// Default binder: path params from the match, query params and headers
/// from the request, all bound as text.
pub struct DefaultBinder;

impl ArgumentBinder for DefaultBinder {
    fn fulfill(&self, route: RouteMatch, request: &Request) -> RouteMatch {
        let inputs = route.spec().inputs.clone();
        let mut current = route;
        for input in inputs {
            if current.bound(&input.name).is_some() {
                continue;
            }
            let value = match input.source {
                ArgumentSource::Path => current.get_path_param(&input.name).map(str::to_string),
                ArgumentSource::Query => request.get_query_param(&input.name).map(str::to_string),
                ArgumentSource::Header => request.get_header(&input.name).map(str::to_string),
                // Field, Upload and Body arrive with the body stream.
                _ => None,
            };
            if let Some(v) = value {
                current = current.fulfill(&input.name, ArgumentValue::Text(v));
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{HandlerArgs, ParamVec, RouteOutcome, RouteSpec};
    use http::Method;
    use std::sync::Arc;

    fn noop(_: &Request, _: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::None)
    }

    #[test]
    fn test_binds_path_query_and_header_inputs() {
        let spec = RouteSpec::new(Method::GET, "/pets/{id}", noop)
            .input("id", ArgumentSource::Path, true)
            .input("limit", ArgumentSource::Query, false)
            .input("x-tenant", ArgumentSource::Header, true);
        let mut params = ParamVec::new();
        params.push((Arc::from("id"), "7".to_string()));
        let route = RouteMatch::new(Arc::new(spec), params);

        let request = Request::new(Method::GET, "/pets/7")
            .with_query_param("limit", "10")
            .with_header("X-Tenant", "acme");

        let fulfilled = DefaultBinder.fulfill(route, &request);
        assert!(fulfilled.is_executable());
        assert_eq!(fulfilled.bound("id").and_then(ArgumentValue::as_text), Some("7"));
        assert_eq!(
            fulfilled.bound("limit").and_then(ArgumentValue::as_text),
            Some("10")
        );
        assert_eq!(
            fulfilled.bound("x-tenant").and_then(ArgumentValue::as_text),
            Some("acme")
        );
    }

    #[test]
    fn test_body_inputs_are_left_for_the_stream_processor() {
        let spec = RouteSpec::new(Method::POST, "/pets", noop).input(
            "payload",
            ArgumentSource::Body,
            true,
        );
        let route = RouteMatch::new(Arc::new(spec), ParamVec::new());
        let request = Request::new(Method::POST, "/pets");

        let fulfilled = DefaultBinder.fulfill(route, &request);
        assert!(!fulfilled.is_executable());
        assert!(fulfilled.bound("payload").is_none());
    }
}
