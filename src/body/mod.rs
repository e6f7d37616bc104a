//! # Body Module
//!
//! Incremental request-body consumption under pull-based backpressure.
//!
//! ## Overview
//!
//! The transport feeds a request's body through a single-credit chunk
//! stream ([`channel`]): it may only deliver a chunk after the processor
//! has asked for one, so a slow or stalled handler never causes unbounded
//! buffering. The [`BodyProcessor`] walks the stream chunk by chunk,
//! binding named multipart fields to the route's remaining inputs (file
//! uploads as streaming [`Part`] sub-streams, everything else buffered)
//! and accumulating unclaimed content as the raw body. The moment the
//! route becomes executable (or the terminal chunk arrives) an exactly-once
//! latch fires the downstream execution; with a part still open, the chunk
//! loop keeps running to feed it at the handler's pace.
//!
//! Each chunk is routed to exactly one destination: a named input, an open
//! part, or the raw-body accumulator. Never duplicated.

mod core;
mod part;
mod processor;

pub use core::{channel, BodyChunk, BodyReceiver, BodySender, FieldChunk};
pub use part::{Part, PartSender};
pub use processor::{BodyProcessor, ExecutionLatch, ProcessorState};
