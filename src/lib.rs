//! # Conveyor
//!
//! **Conveyor** is a coroutine-powered HTTP request-dispatch pipeline built
//! on the [`may`](https://docs.rs/may) runtime. It sits between a transport
//! layer that parses wire bytes and the handlers that implement an API: a
//! structured request goes in, a correctly framed response comes out, with
//! bodies consumed and produced incrementally under pull-based
//! backpressure.
//!
//! ## Architecture
//!
//! - **[`dispatcher`]** - routing with strict 405/404/415 fallback
//!   ordering, orchestration of the stages below
//! - **[`body`]** - single-credit body streaming, multipart [`body::Part`]
//!   sub-streams, argument fulfillment with an exactly-once execution latch
//! - **[`filter`]** - composable filter chain with route execution as its
//!   automatically appended terminal stage
//! - **[`executor`]** / **[`worker_pool`]** - off-loop handler execution on
//!   dedicated pools with shed/block backpressure, result classification
//! - **[`server`]** - request/response types, the transport [`server::Channel`]
//!   seam and the framing [`server::ResponseWriter`]
//! - **[`errors`]** - the failure taxonomy and the classifier that maps
//!   failures to error routes, exception handlers or the terminal default
//! - **[`router`]** - route lookup contracts, copy-on-fulfill
//!   [`router::RouteMatch`], and a minimal [`router::RouteTable`]
//! - **[`codec`]** - media-type codecs (JSON, plain text, SSE framing) and
//!   their registry
//!
//! ## Concurrency model
//!
//! One coroutine owns each connection's request. Dispatch, body consumption
//! and response writing run on it; handler execution and body encoding are
//! handed off to worker pools and marshaled back over reply channels. All
//! chunk delivery keeps exactly one unit in flight per stream, so a slow
//! consumer bounds memory instead of growing a buffer.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use conveyor::dispatcher::Dispatcher;
//! use conveyor::router::{HandlerArgs, RouteOutcome, RouteSpec, RouteTable};
//! use conveyor::server::Request;
//! use http::Method;
//!
//! fn health(_req: &Request, _args: &HandlerArgs) -> anyhow::Result<RouteOutcome> {
//!     Ok(RouteOutcome::Value(serde_json::json!({ "status": "ok" })))
//! }
//!
//! let mut table = RouteTable::new();
//! table.route(RouteSpec::new(Method::GET, "/health", health));
//!
//! let dispatcher = Dispatcher::new(Arc::new(table));
//! // hand `dispatcher` to the transport layer; it calls
//! // `dispatcher.dispatch(channel, request, body)` per request
//! ```
//!
//! Conveyor uses the `may` coroutine runtime, not tokio: handlers run in
//! coroutines, stack sizes are tuned via `CONVEYOR_STACK_SIZE`, and
//! blocking operations should use `may`'s facilities.

pub mod binder;
pub mod body;
pub mod codec;
pub mod dispatcher;
pub mod errors;
pub mod executor;
pub mod filter;
pub mod ids;
pub mod media;
pub mod router;
pub mod runtime_config;
pub mod server;
pub mod stream;
pub mod worker_pool;

pub use dispatcher::Dispatcher;
pub use errors::{ErrorKind, PipelineError};
pub use media::MediaType;
pub use router::{RouteMatch, RouteSpec, RouteTable, Router};
pub use server::{Channel, Request, Response};
