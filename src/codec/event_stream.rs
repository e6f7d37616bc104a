use serde_json::Value;

use crate::codec::core::{Codec, CodecError};
use crate::media::MediaType;

/// Frames values as `text/event-stream` messages:
///
/// ```text
/// data: <payload>
///
/// ```
///
/// String values become the payload verbatim; other values are rendered as
/// compact JSON.
pub struct EventStreamCodec;

impl Codec for EventStreamCodec {
    fn media_type(&self) -> MediaType {
        MediaType::EventStream
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let payload = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let mut out = String::with_capacity(payload.len() + 8);
        out.push_str("data: ");
        out.push_str(&payload);
        out.push_str("\n\n");
        Ok(out.into_bytes())
    }
}
