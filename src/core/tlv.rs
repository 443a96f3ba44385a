//! # TLV Framing
//!
//! Tag + Length + Value frames with a fixed-width big-endian length field.
//!
//! ## Wire Format
//! ```text
//! [TAG (N bytes)] [LENGTH (2|4|8 bytes, BE) = whole frame incl. header] [BODY]
//! ```
//!
//! Decoding runs a per-message state machine, `AwaitHeader -> AwaitBody -> Complete`,
//! and yields the body only. The declared length is checked against the header length
//! and the frame ceiling before any body bytes are awaited.

use crate::config::{Framing, LengthWidth, ServerConfig, DEFAULT_TAG, MAX_FRAME_SIZE};
use crate::error::{constants, PipelineError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitHeader,
    AwaitBody { body_len: usize },
}

/// Codec for TLV frames
#[derive(Debug, Clone)]
pub struct TlvCodec {
    tag: Bytes,
    width: LengthWidth,
    max_frame_size: usize,
    validate_tag: bool,
    state: DecodeState,
}

impl TlvCodec {
    pub fn new(tag: impl Into<Bytes>, width: LengthWidth) -> Self {
        Self {
            tag: tag.into(),
            width,
            max_frame_size: MAX_FRAME_SIZE,
            validate_tag: false,
            state: DecodeState::AwaitHeader,
        }
    }

    /// Build the codec described by a TLV `ServerConfig`
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        match config.framing() {
            Framing::Tlv { tag, width } => Ok(Self {
                tag: tag.clone(),
                width: *width,
                max_frame_size: config.max_frame_size(),
                validate_tag: config.validate_tag(),
                state: DecodeState::AwaitHeader,
            }),
            Framing::EndMarker { .. } => {
                Err(PipelineError::ConfigError(constants::ERR_NOT_TLV.into()))
            }
        }
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn with_tag_validation(mut self, enabled: bool) -> Self {
        self.validate_tag = enabled;
        self
    }

    /// `len(tag) + width`
    pub fn header_len(&self) -> usize {
        self.tag.len() + self.width.bytes()
    }

    /// Validate a complete header and return the body length it announces
    fn parse_header(&self, header: &[u8]) -> Result<usize> {
        let tag_len = self.tag.len();
        if self.validate_tag && header[..tag_len] != self.tag[..] {
            return Err(PipelineError::TagMismatch {
                expected: self.tag.to_vec(),
                actual: header[..tag_len].to_vec(),
            });
        }

        let header_len = self.header_len();
        let declared = self.width.read_be(&header[tag_len..header_len]);
        if declared < header_len as u64 {
            return Err(PipelineError::MalformedFrame {
                declared,
                header: header_len,
            });
        }
        if declared > self.max_frame_size as u64 {
            return Err(PipelineError::OversizedFrame {
                size: declared,
                limit: self.max_frame_size,
            });
        }
        Ok(declared as usize - header_len)
    }

    /// Append one complete frame for `body` to `dst`.
    ///
    /// # Errors
    /// `LengthOverflow` if the frame length does not fit the length field,
    /// `OversizedFrame` if it exceeds the frame ceiling. Nothing is written on error.
    pub fn encode_frame<B: BufMut>(&self, body: &[u8], dst: &mut B) -> Result<()> {
        let total = (self.header_len() as u64).saturating_add(body.len() as u64);
        if total > self.width.max_value() {
            return Err(PipelineError::LengthOverflow {
                length: total,
                width: self.width.bytes(),
            });
        }
        if total > self.max_frame_size as u64 {
            return Err(PipelineError::OversizedFrame {
                size: total,
                limit: self.max_frame_size,
            });
        }

        dst.put_slice(&self.tag);
        self.width.write_be(total, dst)?;
        dst.put_slice(body);
        Ok(())
    }
}

impl Default for TlvCodec {
    fn default() -> Self {
        Self::new(Bytes::from_static(DEFAULT_TAG.as_bytes()), LengthWidth::Four)
    }
}

impl Decoder for TlvCodec {
    type Item = BytesMut;
    type Error = PipelineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        if self.state == DecodeState::AwaitHeader {
            let header_len = self.header_len();
            if src.len() < header_len {
                src.reserve(header_len - src.len());
                return Ok(None);
            }
            let body_len = self.parse_header(&src[..header_len])?;
            src.advance(header_len);
            self.state = DecodeState::AwaitBody { body_len };
        }

        let DecodeState::AwaitBody { body_len } = self.state else {
            return Ok(None);
        };
        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None);
        }

        self.state = DecodeState::AwaitHeader;
        Ok(Some(src.split_to(body_len)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        match self.state {
            DecodeState::AwaitHeader if src.is_empty() => Ok(None),
            DecodeState::AwaitHeader => Err(PipelineError::ShortRead {
                expected: self.header_len(),
                received: src.len(),
            }),
            DecodeState::AwaitBody { body_len } => Err(PipelineError::ShortRead {
                expected: body_len,
                received: src.len(),
            }),
        }
    }
}

impl Encoder<Bytes> for TlvCodec {
    type Error = PipelineError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(self.header_len() + body.len());
        self.encode_frame(&body, dst)
    }
}
