//! # Dispatcher Module
//!
//! The pipeline's front door: turns an incoming structured request into a
//! matched handler invocation and that invocation's result into a framed
//! response on the connection's channel.
//!
//! ## Overview
//!
//! The [`Dispatcher`] coordinates the other stages and owns the policy
//! decisions between them:
//!
//! - **Routing fallbacks** - a wrong-method probe prefers a registered 405
//!   status route over a synthesized `Allow`-listing default; no match at
//!   all prefers a registered 404 route over a bare 404; a matched route
//!   that cannot consume the request's media type prefers a 415 route over
//!   a bare 415. The ordering is strict.
//! - **Body-driven fulfillment** - a route that still needs body data gets
//!   the body processor on the connection coroutine; the execution it
//!   triggers is spawned off it so open parts keep feeding.
//! - **Failure routing** - every error lands in the classifier, which ends
//!   in a registered recovery, or the default minimal error response and a
//!   force-close. No request is left unanswered.
//!
//! A route executes at most once per request, and once a response has begun
//! streaming no further execution for that request can start: both follow
//! from the body processor's exactly-once latch and the single dispatch
//! path through this module.

mod core;

pub use core::{permits_request_body, Dispatcher};
