use crate::stream::{credit_channel, CreditReceiver, CreditSender};

/// One slice of a named multipart form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChunk {
    pub name: String,
    pub data: Vec<u8>,
    /// Whether the field is a file upload (bindable as a streaming part).
    pub file: bool,
    /// Whether this slice completes the field.
    pub last: bool,
}

impl FieldChunk {
    pub fn complete(name: &str, data: impl Into<Vec<u8>>) -> Self {
        FieldChunk {
            name: name.to_string(),
            data: data.into(),
            file: false,
            last: true,
        }
    }

    pub fn upload(name: &str, data: impl Into<Vec<u8>>, last: bool) -> Self {
        FieldChunk {
            name: name.to_string(),
            data: data.into(),
            file: true,
            last,
        }
    }
}

/// One unit of the incoming body stream, delivered in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyChunk {
    /// A named multipart form field slice.
    Field(FieldChunk),
    /// Raw body content.
    Data(Vec<u8>),
    /// Terminal marker. A producer that vanishes without sending this is a
    /// peer cancellation, not a completion.
    End,
}

/// Transport-side producer of body chunks. Each `send` blocks until the
/// processor has granted a credit, so at most one chunk is in flight.
pub type BodySender = CreditSender<BodyChunk>;

/// Processor-side consumer of body chunks.
pub type BodyReceiver = CreditReceiver<BodyChunk>;

/// Create the body stream for one request.
pub fn channel() -> (BodySender, BodyReceiver) {
    credit_channel()
}
