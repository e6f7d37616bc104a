use crate::server::response::ResponseHead;

/// Failure reported by the transport for a write attempt.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The peer is gone. Expected under client disconnect; the writer
    /// swallows this rather than raising it into the pipeline.
    #[error("connection closed by peer")]
    Closed,
    /// Any other transport-level write failure.
    #[error("transport write failed: {0}")]
    Io(String),
}

/// Write side of one connection, implemented by the surrounding transport
/// layer. The pipeline produces the same response representation the
/// transport already uses; no wire format is introduced here.
///
/// A fixed-length response is a single [`write_full`](Channel::write_full).
/// A chunked response is [`begin_chunked`](Channel::begin_chunked), any
/// number of [`write_chunk`](Channel::write_chunk) frames, and an
/// [`end_chunked`](Channel::end_chunked) terminal empty frame.
pub trait Channel: Send + Sync {
    /// Write one complete fixed-length response.
    fn write_full(&self, head: ResponseHead, body: Vec<u8>) -> Result<(), ChannelError>;

    /// Start a chunked response with the given head.
    fn begin_chunked(&self, head: ResponseHead) -> Result<(), ChannelError>;

    /// Write one encoded body frame of a chunked response.
    fn write_chunk(&self, data: Vec<u8>) -> Result<(), ChannelError>;

    /// Finish a chunked response with the terminal empty frame.
    fn end_chunked(&self) -> Result<(), ChannelError>;

    /// Whether the connection can still accept writes. Consulted after a
    /// write failure to decide between re-raising into the pipeline and
    /// force-closing.
    fn is_writable(&self) -> bool;

    /// Close the connection, releasing transport resources.
    fn close(&self);
}
