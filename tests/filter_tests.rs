//! Filter chain contract: stage counting, short-circuiting, and the
//! proceed-exactly-once rule.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{full_responses, header, RecordingChannel};
use conveyor::dispatcher::Dispatcher;
use conveyor::filter::{CorsFilter, FilterChain, HttpFilter, TracingFilter};
use conveyor::router::{HandlerArgs, RouteOutcome, RouteSpec, RouteTable};
use conveyor::server::{Channel, Request, Response};
use conveyor::stream::ResponseStream;
use http::Method;
use serde_json::json;

struct CountingFilter {
    invocations: Arc<AtomicUsize>,
}

impl HttpFilter for CountingFilter {
    fn apply(&self, request: &Arc<Request>, chain: FilterChain) -> ResponseStream {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        chain.proceed(request)
    }
}

struct ShortCircuitFilter;

impl HttpFilter for ShortCircuitFilter {
    fn apply(&self, _request: &Arc<Request>, _chain: FilterChain) -> ResponseStream {
        ResponseStream::ready(Ok(Response::ok().with_value(json!({ "short": "circuit" }))))
    }
}

struct DoubleProceedFilter;

impl HttpFilter for DoubleProceedFilter {
    fn apply(&self, request: &Arc<Request>, chain: FilterChain) -> ResponseStream {
        let _first = chain.proceed(request);
        // Contract violation: a filter invocation may proceed only once.
        chain.proceed(request)
    }
}

fn run_request(table: RouteTable, request: Request) -> Arc<RecordingChannel> {
    common::setup();
    let dispatcher = Dispatcher::new(Arc::new(table));
    let recording = Arc::new(RecordingChannel::new());
    let channel: Arc<dyn Channel> = recording.clone();
    dispatcher.dispatch(&channel, Arc::new(request), None);
    recording
}

#[test]
fn test_chain_of_n_filters_performs_n_plus_one_stage_invocations() {
    let stage_invocations = Arc::new(AtomicUsize::new(0));
    let handler_invocations = Arc::clone(&stage_invocations);
    let handler = move |_req: &Request, _args: &HandlerArgs| -> anyhow::Result<RouteOutcome> {
        // The terminal stage is the route execution itself.
        handler_invocations.fetch_add(1, Ordering::SeqCst);
        Ok(RouteOutcome::None)
    };

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/pets", handler));
    for _ in 0..3 {
        table.filter(Arc::new(CountingFilter {
            invocations: Arc::clone(&stage_invocations),
        }));
    }

    let recording = run_request(table, Request::new(Method::GET, "/pets"));
    assert_eq!(full_responses(&recording.events())[0].0, 200);
    assert_eq!(stage_invocations.load(Ordering::SeqCst), 4);
}

#[test]
fn test_filter_can_short_circuit_without_proceeding() {
    let handler_invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handler_invocations);
    let handler = move |_req: &Request, _args: &HandlerArgs| -> anyhow::Result<RouteOutcome> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(RouteOutcome::None)
    };

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/pets", handler));
    table.filter(Arc::new(ShortCircuitFilter));

    let recording = run_request(table, Request::new(Method::GET, "/pets"));
    let responses = full_responses(&recording.events());
    assert_eq!(responses[0].0, 200);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&responses[0].2).unwrap(),
        json!({ "short": "circuit" })
    );
    assert_eq!(handler_invocations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_double_proceed_is_a_chain_contract_violation() {
    fn ok(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::None)
    }

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/pets", ok));
    table.filter(Arc::new(DoubleProceedFilter));

    // The violation surfaces as a pipeline failure; with nothing
    // registered to recover it, the default error response is written and
    // the connection force-closed.
    let recording = run_request(table, Request::new(Method::GET, "/pets"));
    let responses = full_responses(&recording.events());
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].0, 500);
    assert!(recording.closed());
}

#[test]
fn test_cors_preflight_short_circuits_with_headers() {
    let handler_invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&handler_invocations);
    let handler = move |_req: &Request, _args: &HandlerArgs| -> anyhow::Result<RouteOutcome> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(RouteOutcome::None)
    };

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/pets", handler));
    table.filter(Arc::new(CorsFilter::default()));

    let request = Request::new(Method::OPTIONS, "/pets").with_header("Origin", "https://app.example");
    let recording = run_request(table, request);
    let responses = full_responses(&recording.events());
    assert_eq!(responses[0].0, 204);
    assert_eq!(header(&responses[0].1, "access-control-allow-origin"), Some("*"));
    assert_eq!(handler_invocations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cors_stamps_allow_origin_on_normal_responses() {
    fn ok(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::Value(json!({ "ok": true })))
    }

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/pets", ok));
    table.filter(Arc::new(CorsFilter::default()));

    let request = Request::new(Method::GET, "/pets").with_header("Origin", "https://app.example");
    let recording = run_request(table, request);
    let responses = full_responses(&recording.events());
    assert_eq!(responses[0].0, 200);
    assert_eq!(header(&responses[0].1, "access-control-allow-origin"), Some("*"));
}

#[test]
fn test_tracing_filter_passes_responses_through() {
    fn ok(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::Value(json!({ "traced": true })))
    }

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/pets", ok));
    table.filter(Arc::new(TracingFilter));

    let recording = run_request(table, Request::new(Method::GET, "/pets"));
    let responses = full_responses(&recording.events());
    assert_eq!(responses[0].0, 200);
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&responses[0].2).unwrap(),
        json!({ "traced": true })
    );
}
