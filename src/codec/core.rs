use std::sync::Arc;

use serde_json::Value;

use crate::media::MediaType;

/// Failure while encoding a body value. Surfaced as a pipeline exception
/// and routed like a handler failure.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CodecError(pub String);

/// Encodes body values for one media type.
pub trait Codec: Send + Sync {
    fn media_type(&self) -> MediaType;
    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
}

/// Read-only registry of codecs, shared across requests and consulted by
/// the response writer. When no codec matches the negotiated media type the
/// writer falls back to plain text.
#[derive(Clone, Default)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn Codec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the bundled JSON, plain-text and
    /// event-stream codecs.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::json::JsonCodec));
        registry.register(Arc::new(super::text::TextPlainCodec));
        registry.register(Arc::new(super::event_stream::EventStreamCodec));
        registry
    }

    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        self.codecs.push(codec);
    }

    pub fn find_codec(&self, media: &MediaType) -> Option<Arc<dyn Codec>> {
        self.codecs
            .iter()
            .find(|c| &c.media_type() == media)
            .map(Arc::clone)
    }
}
