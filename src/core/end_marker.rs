//! # End-Marker Framing
//!
//! Frames delimited by a trailing byte sequence instead of a length prefix.
//!
//! ## Wire Format
//! ```text
//! [PAYLOAD ...] [END_MARKER]
//! ```
//!
//! A decoded frame is everything up to and including the first occurrence of the marker.
//! Bytes after the marker stay in the read buffer and start the next frame. A payload that
//! contains the marker is split at it; there is no escaping.

use crate::config::{Framing, ServerConfig, MAX_FRAME_SIZE};
use crate::error::{constants, PipelineError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Codec for end-marker delimited frames
#[derive(Debug, Clone)]
pub struct EndMarkerCodec {
    marker: Bytes,
    max_frame_size: usize,
    // Offset up to which the buffer is known not to contain the marker
    next_index: usize,
}

impl EndMarkerCodec {
    /// `marker` must not be empty; use [`ServerConfig::end_marker`] to validate it
    pub fn new(marker: impl Into<Bytes>) -> Self {
        Self {
            marker: marker.into(),
            max_frame_size: MAX_FRAME_SIZE,
            next_index: 0,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        match config.framing() {
            Framing::EndMarker { marker } => Ok(Self {
                marker: marker.clone(),
                max_frame_size: config.max_frame_size(),
                next_index: 0,
            }),
            Framing::Tlv { .. } => Err(PipelineError::ConfigError(
                constants::ERR_NOT_END_MARKER.into(),
            )),
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn marker(&self) -> &[u8] {
        &self.marker
    }

    /// The payload of a decoded frame, without its trailing marker
    pub fn strip_marker<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        frame.strip_suffix(&self.marker[..]).unwrap_or(frame)
    }

    /// Append `payload` followed by the marker to `dst`
    pub fn encode_frame<B: BufMut>(&self, payload: &[u8], dst: &mut B) -> Result<()> {
        let total = payload.len() + self.marker.len();
        if total > self.max_frame_size {
            return Err(PipelineError::OversizedFrame {
                size: total as u64,
                limit: self.max_frame_size,
            });
        }
        dst.put_slice(payload);
        dst.put_slice(&self.marker);
        Ok(())
    }
}

impl Decoder for EndMarkerCodec {
    type Item = BytesMut;
    type Error = PipelineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        let marker_len = self.marker.len();
        if marker_len == 0 {
            return Err(PipelineError::ConfigError(
                constants::ERR_EMPTY_END_MARKER.into(),
            ));
        }

        let start = self.next_index.min(src.len());
        let found = src[start..]
            .windows(marker_len)
            .position(|window| window == &self.marker[..]);

        match found {
            Some(pos) => {
                let frame_len = start + pos + marker_len;
                self.next_index = 0;
                if frame_len > self.max_frame_size {
                    return Err(PipelineError::OversizedFrame {
                        size: frame_len as u64,
                        limit: self.max_frame_size,
                    });
                }
                Ok(Some(src.split_to(frame_len)))
            }
            None => {
                if src.len() > self.max_frame_size {
                    return Err(PipelineError::OversizedFrame {
                        size: src.len() as u64,
                        limit: self.max_frame_size,
                    });
                }
                // A marker may straddle the next read
                self.next_index = src.len().saturating_sub(marker_len - 1);
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(PipelineError::ShortRead {
                expected: src.len() + self.marker.len(),
                received: src.len(),
            }),
        }
    }
}

impl Encoder<Bytes> for EndMarkerCodec {
    type Error = PipelineError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(payload.len() + self.marker.len());
        self.encode_frame(&payload, dst)
    }
}
