//! # Filter Module
//!
//! Composable request-processing stages wrapped around route execution.
//!
//! A filter may inspect the request, short-circuit with its own response
//! (auth, CORS preflight), or pass through to the next stage via
//! [`FilterChain::proceed`] and decorate the result. The chain's terminal
//! stage is always the actual route execution, appended automatically by
//! [`run`]; `proceed` must be invoked exactly once per stage invocation,
//! and over-advancing is a chain-construction bug, not a request failure.

mod core;
mod cors;
mod tracing;

pub use core::{run, FilterChain, HttpFilter};
pub use cors::CorsFilter;
pub use self::tracing::TracingFilter;
