//! Response framing: chunked streams with terminal frames, event-stream
//! close behavior, fixed-length buffering, codec fallback and the
//! connection-lifecycle policy.

mod common;

use std::sync::Arc;

use common::{full_responses, header, RecordingChannel, WriteEvent};
use conveyor::dispatcher::Dispatcher;
use conveyor::router::{HandlerArgs, RouteOutcome, RouteSpec, RouteTable};
use conveyor::server::{Body, Channel, Request, Response};
use conveyor::stream::value_channel;
use conveyor::MediaType;
use http::{Method, StatusCode};
use serde_json::json;

fn run_request(table: RouteTable, request: Request) -> Arc<RecordingChannel> {
    common::setup();
    let dispatcher = Dispatcher::new(Arc::new(table));
    let recording = Arc::new(RecordingChannel::new());
    let channel: Arc<dyn Channel> = recording.clone();
    dispatcher.dispatch(&channel, Arc::new(request), None);
    recording
}

fn stream_xyz(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
    let (sink, stream) = value_channel();
    let _ = may::go!(move || {
        for v in ["x", "y", "z"] {
            if sink.send(Ok(json!(v))).is_err() {
                break;
            }
        }
    });
    Ok(RouteOutcome::Stream(stream))
}

#[test]
fn test_streamed_body_writes_frames_in_order_with_terminal_frame() {
    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/stream", stream_xyz));

    let recording = run_request(table, Request::new(Method::GET, "/stream"));
    let events = recording.events();

    match &events[0] {
        WriteEvent::Begin { status, headers } => {
            assert_eq!(*status, 200);
            assert_eq!(header(headers, "transfer-encoding"), Some("chunked"));
            assert_eq!(header(headers, "content-type"), Some("application/json"));
        }
        other => panic!("expected chunked begin, got {other:?}"),
    }
    assert_eq!(events[1], WriteEvent::Chunk(b"\"x\"".to_vec()));
    assert_eq!(events[2], WriteEvent::Chunk(b"\"y\"".to_vec()));
    assert_eq!(events[3], WriteEvent::Chunk(b"\"z\"".to_vec()));
    assert_eq!(events[4], WriteEvent::End);
    // Keep-alive 200: the connection stays open for reuse.
    assert!(!recording.closed());
}

#[test]
fn test_event_stream_on_non_keep_alive_gets_synthetic_no_content_frame() {
    let mut table = RouteTable::new();
    table.route(
        RouteSpec::new(Method::GET, "/events", stream_xyz).produces(MediaType::EventStream),
    );

    let request = Request::new(Method::GET, "/events").with_header("Connection", "close");
    let recording = run_request(table, request);
    let events = recording.events();

    match &events[0] {
        WriteEvent::Begin { headers, .. } => {
            assert_eq!(header(headers, "content-type"), Some("text/event-stream"));
        }
        other => panic!("expected chunked begin, got {other:?}"),
    }
    assert_eq!(events[1], WriteEvent::Chunk(b"data: x\n\n".to_vec()));
    assert_eq!(events[4], WriteEvent::End);
    match &events[5] {
        WriteEvent::Full { status, body, .. } => {
            assert_eq!(*status, 204);
            assert!(body.is_empty());
        }
        other => panic!("expected synthetic no-content frame, got {other:?}"),
    }
    assert_eq!(events[6], WriteEvent::Close);
}

#[test]
fn test_buffered_value_gets_content_length_and_single_write() {
    fn value(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::Value(json!({ "n": 42 })))
    }

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/value", value));

    let recording = run_request(table, Request::new(Method::GET, "/value"));
    let events = recording.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        WriteEvent::Full {
            status,
            headers,
            body,
        } => {
            assert_eq!(*status, 200);
            assert_eq!(body, br#"{"n":42}"#);
            assert_eq!(
                header(headers, "content-length"),
                Some(body.len().to_string().as_str())
            );
            assert_eq!(header(headers, "content-type"), Some("application/json"));
        }
        other => panic!("expected single fixed-length write, got {other:?}"),
    }
}

#[test]
fn test_raw_bytes_bypass_codecs() {
    fn bytes(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::Response(
            Response::ok()
                .with_body(Body::Bytes(b"\x00\x01\x02".to_vec()))
                .with_content_type(MediaType::OctetStream),
        ))
    }

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/bin", bytes));

    let recording = run_request(table, Request::new(Method::GET, "/bin"));
    let responses = full_responses(&recording.events());
    let (status, headers, body) = &responses[0];
    assert_eq!(*status, 200);
    assert_eq!(body, &b"\x00\x01\x02".to_vec());
    assert_eq!(header(headers, "content-type"), Some("application/octet-stream"));
    assert_eq!(header(headers, "content-length"), Some("3"));
}

#[test]
fn test_unknown_media_type_falls_back_to_text_codec() {
    fn value(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::Value(json!("plain payload")))
    }

    let mut table = RouteTable::new();
    table.route(
        RouteSpec::new(Method::GET, "/custom", value)
            .produces(MediaType::parse("application/vnd.acme")),
    );

    let recording = run_request(table, Request::new(Method::GET, "/custom"));
    let responses = full_responses(&recording.events());
    let (_, headers, body) = &responses[0];
    // The text fallback encoded the value; the declared media type stays.
    assert_eq!(body, &b"plain payload".to_vec());
    assert_eq!(header(headers, "content-type"), Some("application/vnd.acme"));
}

#[test]
fn test_non_keep_alive_connection_closes_after_write() {
    fn value(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::Value(json!({ "ok": true })))
    }

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/value", value));

    let request = Request::new(Method::GET, "/value").with_header("Connection", "close");
    let recording = run_request(table, request);
    assert!(recording.closed());
}

#[test]
fn test_error_status_closes_connection_after_write() {
    fn bad(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::Response(Response::status(
            StatusCode::BAD_REQUEST,
        )))
    }

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/bad", bad));

    let recording = run_request(table, Request::new(Method::GET, "/bad"));
    let responses = full_responses(&recording.events());
    assert_eq!(responses[0].0, 400);
    assert!(recording.closed());
}

#[test]
fn test_closed_peer_during_write_is_swallowed() {
    fn value(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::Value(json!({ "ok": true })))
    }

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/value", value));

    common::setup();
    let dispatcher = Dispatcher::new(Arc::new(table));
    let recording = Arc::new(RecordingChannel::new());
    recording.disconnect_peer();
    let channel: Arc<dyn Channel> = recording.clone();
    dispatcher.dispatch(&channel, Arc::new(Request::new(Method::GET, "/value")), None);

    // Expected under client disconnect: no retries, no error recovery.
    assert!(recording.events().is_empty());
}

#[test]
fn test_write_failure_on_unwritable_channel_force_closes() {
    fn value(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::Value(json!({ "ok": true })))
    }

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/value", value));

    common::setup();
    let dispatcher = Dispatcher::new(Arc::new(table));
    let recording = Arc::new(RecordingChannel::new());
    recording.fail_writes(false);
    let channel: Arc<dyn Channel> = recording.clone();
    dispatcher.dispatch(&channel, Arc::new(Request::new(Method::GET, "/value")), None);

    assert!(recording.closed());
}

#[test]
fn test_write_failure_on_writable_channel_reenters_pipeline() {
    fn value(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
        Ok(RouteOutcome::Value(json!({ "ok": true })))
    }

    let mut table = RouteTable::new();
    table.route(RouteSpec::new(Method::GET, "/value", value));

    common::setup();
    let dispatcher = Dispatcher::new(Arc::new(table));
    let recording = Arc::new(RecordingChannel::new());
    recording.fail_writes(true);
    let channel: Arc<dyn Channel> = recording.clone();
    dispatcher.dispatch(&channel, Arc::new(Request::new(Method::GET, "/value")), None);

    // The write error re-enters the pipeline; with nothing registered the
    // classifier falls back to the default error path, whose own write
    // also fails, ending in a forced close. The request is never left
    // unresolved.
    assert!(recording.closed());
}
