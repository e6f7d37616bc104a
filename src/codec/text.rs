use serde_json::Value;

use crate::codec::core::{Codec, CodecError};
use crate::media::MediaType;

/// Plain-text codec, also the writer's fallback when nothing else matches
/// the negotiated media type. Strings encode verbatim; anything else
/// encodes as its compact JSON rendering.
pub struct TextPlainCodec;

impl Codec for TextPlainCodec {
    fn media_type(&self) -> MediaType {
        MediaType::Text
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        match value {
            Value::String(s) => Ok(s.clone().into_bytes()),
            other => Ok(other.to_string().into_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strings_encode_without_quotes() {
        assert_eq!(TextPlainCodec.encode(&json!("hi")).unwrap(), b"hi");
    }

    #[test]
    fn test_non_strings_encode_as_json() {
        assert_eq!(
            TextPlainCodec.encode(&json!({"n": 2})).unwrap(),
            br#"{"n":2}"#
        );
    }
}
