use std::sync::Arc;

use http::StatusCode;
use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::codec::{Codec, CodecRegistry, TextPlainCodec};
use crate::errors::PipelineError;
use crate::media::MediaType;
use crate::server::channel::{Channel, ChannelError};
use crate::server::request::Request;
use crate::server::response::{Body, Response, ResponseHead};
use crate::worker_pool::WorkerPool;

/// Fallback when the registry has nothing for the negotiated media type.
static TEXT_FALLBACK: Lazy<Arc<dyn Codec>> = Lazy::new(|| Arc::new(TextPlainCodec));

enum WriteFailure {
    Channel(ChannelError),
    Pipeline(PipelineError),
}

/// Turns a classified [`Response`] into transport writes.
///
/// Framing strategy follows the body's shape: streamed bodies (and
/// responses already committed to chunked transfer) are encoded
/// frame-by-frame as they are pulled. Everything else is encoded in full,
/// off the connection coroutine on the encode pool unless already raw
/// bytes, and written once with an explicit content length.
///
/// After every successful write the connection-lifecycle policy applies:
/// close unless the request was keep-alive and the status is below 300.
#[derive(Clone)]
pub struct ResponseWriter {
    codecs: CodecRegistry,
    encode_pool: Arc<WorkerPool>,
}

impl ResponseWriter {
    pub fn new(codecs: CodecRegistry, encode_pool: Arc<WorkerPool>) -> Self {
        ResponseWriter {
            codecs,
            encode_pool,
        }
    }

    /// Write `response` to `channel`. A closed peer is swallowed; any
    /// other transport failure is re-raised as a pipeline error while the
    /// channel stays writable and force-closes it otherwise. Encoding
    /// failures re-raise for the error classifier.
    pub fn write(
        &self,
        channel: &dyn Channel,
        request: &Request,
        response: Response,
        default_media: MediaType,
    ) -> Result<(), PipelineError> {
        let status = response.status;
        let media = response
            .content_type
            .clone()
            .unwrap_or(default_media);
        debug!(
            request_id = %request.id,
            status = status.as_u16(),
            media = %media,
            chunked = response.is_chunked(),
            "writing response"
        );

        let result = if response.is_chunked() {
            self.write_chunked(channel, request, response, &media)
        } else {
            self.write_buffered(channel, response, &media)
        };

        match result {
            Ok(()) => {
                if !request.is_keep_alive() || status.as_u16() >= 300 {
                    debug!(request_id = %request.id, "closing connection per lifecycle policy");
                    channel.close();
                }
                Ok(())
            }
            Err(WriteFailure::Channel(ChannelError::Closed)) => {
                // Nothing to be done when the client disconnects.
                debug!(request_id = %request.id, "peer closed connection during write");
                Ok(())
            }
            Err(WriteFailure::Channel(err)) => {
                if channel.is_writable() {
                    warn!(request_id = %request.id, error = %err, "write failed, re-raising into pipeline");
                    Err(PipelineError::Write(err))
                } else {
                    error!(request_id = %request.id, error = %err, "write failed on unwritable channel, force-closing");
                    channel.close();
                    Ok(())
                }
            }
            Err(WriteFailure::Pipeline(e)) => Err(e),
        }
    }

    fn resolve_codec(&self, media: &MediaType) -> Arc<dyn Codec> {
        self.codecs
            .find_codec(media)
            .unwrap_or_else(|| Arc::clone(&TEXT_FALLBACK))
    }

    fn write_buffered(
        &self,
        channel: &dyn Channel,
        response: Response,
        media: &MediaType,
    ) -> Result<(), WriteFailure> {
        let Response {
            status,
            headers,
            body,
            ..
        } = response;
        let mut head = ResponseHead { status, headers };
        match body {
            Body::Empty => {
                head.set_header("content-length", "0".to_string());
                channel.write_full(head, Vec::new()).map_err(WriteFailure::Channel)
            }
            Body::Bytes(bytes) => {
                head.set_header("content-type", media.to_string());
                head.set_header("content-length", bytes.len().to_string());
                channel.write_full(head, bytes).map_err(WriteFailure::Channel)
            }
            Body::Value(value) => {
                let codec = self.resolve_codec(media);
                let bytes = self.encode_off_loop(codec, value)?;
                head.set_header("content-type", media.to_string());
                head.set_header("content-length", bytes.len().to_string());
                channel.write_full(head, bytes).map_err(WriteFailure::Channel)
            }
            // Streamed bodies always take the chunked path.
            Body::Stream(_) => Err(WriteFailure::Pipeline(PipelineError::Codec(
                "streamed body requires chunked transfer".to_string(),
            ))),
        }
    }

    fn write_chunked(
        &self,
        channel: &dyn Channel,
        request: &Request,
        response: Response,
        media: &MediaType,
    ) -> Result<(), WriteFailure> {
        let Response {
            status,
            headers,
            body,
            ..
        } = response;
        let mut head = ResponseHead { status, headers };
        head.set_header("content-type", media.to_string());
        head.set_header("transfer-encoding", "chunked".to_string());
        let codec = self.resolve_codec(media);

        channel.begin_chunked(head).map_err(WriteFailure::Channel)?;
        match body {
            Body::Stream(stream) => {
                while let Some(item) = stream.pull() {
                    let value = item.map_err(WriteFailure::Pipeline)?;
                    let frame = codec
                        .encode(&value)
                        .map_err(|e| WriteFailure::Pipeline(PipelineError::Codec(e.to_string())))?;
                    channel.write_chunk(frame).map_err(WriteFailure::Channel)?;
                }
            }
            Body::Value(value) => {
                let frame = codec
                    .encode(&value)
                    .map_err(|e| WriteFailure::Pipeline(PipelineError::Codec(e.to_string())))?;
                channel.write_chunk(frame).map_err(WriteFailure::Channel)?;
            }
            Body::Bytes(bytes) => {
                channel.write_chunk(bytes).map_err(WriteFailure::Channel)?;
            }
            Body::Empty => {}
        }
        channel.end_chunked().map_err(WriteFailure::Channel)?;

        // Event streams on connections that will not be reused get an
        // explicit no-content frame so the client observes a clean end.
        if media.is_event_stream() && !request.is_keep_alive() {
            channel
                .write_full(ResponseHead::new(StatusCode::NO_CONTENT), Vec::new())
                .map_err(WriteFailure::Channel)?;
        }
        Ok(())
    }

    /// Encode on the pool so serialization cost stays off the connection
    /// coroutine; raw byte bodies never come through here.
    fn encode_off_loop(
        &self,
        codec: Arc<dyn Codec>,
        value: Value,
    ) -> Result<Vec<u8>, WriteFailure> {
        let (tx, rx) = may::sync::mpsc::channel();
        let submitted = self.encode_pool.execute(Box::new(move || {
            let _ = tx.send(codec.encode(&value));
        }));
        if submitted.is_err() {
            return Err(WriteFailure::Pipeline(PipelineError::Codec(
                "encode pool unavailable".to_string(),
            )));
        }
        match rx.recv() {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(WriteFailure::Pipeline(PipelineError::Codec(e.to_string()))),
            Err(_) => Err(WriteFailure::Pipeline(PipelineError::Codec(
                "encode worker terminated".to_string(),
            ))),
        }
    }
}
