//! # Codec Module
//!
//! Media-type codecs and the registry the response writer consults. Only
//! encoding is this crate's concern; request-body decoding beyond JSON
//! body binding lives with the transport.

mod core;
mod event_stream;
mod json;
mod text;

pub use core::{Codec, CodecError, CodecRegistry};
pub use event_stream::EventStreamCodec;
pub use json::JsonCodec;
pub use text::TextPlainCodec;
