use serde_json::Value;

use crate::codec::core::{Codec, CodecError};
use crate::media::MediaType;

/// Encodes values as compact JSON.
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn media_type(&self) -> MediaType {
        MediaType::Json
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError(e.to_string()))
    }
}
