//! Newline-delimited frame codec
//!
//! Wraps [`LinesCodec`] with a maximum line length so a misbehaving agent
//! cannot make the reader buffer unbounded output. Over-long lines are not an
//! error: they surface as [`Frame::Oversized`] and the codec discards input up
//! to the next newline, so the stream keeps going.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::error::AgentError;
use crate::types::options::DEFAULT_MAX_FRAME_SIZE;

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, without its terminator
    Line(String),
    /// A line longer than the limit was dropped
    Oversized,
}

/// Codec for newline-framed JSON streams
#[derive(Debug)]
pub struct FrameCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl FrameCodec {
    /// Codec with the default limit
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Codec with a custom limit
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    /// Configured limit
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map_result(
        &self,
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Frame>, AgentError> {
        match result {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized)),
            Err(LinesCodecError::Io(e)) => Err(AgentError::Io(e)),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = AgentError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, AgentError> {
        let result = self.inner.decode(src);
        self.map_result(result)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, AgentError> {
        let result = self.inner.decode_eof(src);
        self.map_result(result)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AgentError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), AgentError> {
        // The limit only applies when decoding
        self.inner
            .encode(item, dst)
            .map_err(|e| AgentError::transport(format!("Failed to encode frame: {e}")))
    }
}
