//! # Server Module
//!
//! The transport-facing types of the pipeline: the structured [`Request`]
//! handed over by the connection, the [`Response`] under construction, the
//! [`Channel`] write seam implemented by the surrounding transport layer,
//! and the [`ResponseWriter`] that frames responses onto it.

pub mod channel;
pub mod request;
pub mod response;
pub mod writer;

pub use channel::{Channel, ChannelError};
pub use request::{HeaderVec, Request, MAX_INLINE_HEADERS};
pub use response::{Body, Response, ResponseHead};
pub use writer::ResponseWriter;
