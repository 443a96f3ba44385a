//! # Frame Codec
//!
//! [`FrameCodec`] picks the TLV or end-marker codec from a [`ServerConfig`] so callers
//! can drive either discipline through one `tokio_util::codec` type, e.g. a client's
//! `Framed<TcpStream, FrameCodec>`.

use crate::config::{Framing, ServerConfig};
use crate::core::end_marker::EndMarkerCodec;
use crate::core::tlv::TlvCodec;
use crate::error::{PipelineError, Result};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone)]
pub enum FrameCodec {
    Tlv(TlvCodec),
    EndMarker(EndMarkerCodec),
}

impl FrameCodec {
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        Ok(match config.framing() {
            Framing::Tlv { .. } => FrameCodec::Tlv(TlvCodec::from_config(config)?),
            Framing::EndMarker { .. } => {
                FrameCodec::EndMarker(EndMarkerCodec::from_config(config)?)
            }
        })
    }

    /// Append one complete frame for `payload` to `dst`
    pub fn encode_frame(&self, payload: &[u8], dst: &mut Vec<u8>) -> Result<()> {
        match self {
            FrameCodec::Tlv(codec) => codec.encode_frame(payload, dst),
            FrameCodec::EndMarker(codec) => codec.encode_frame(payload, dst),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = PipelineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        match self {
            FrameCodec::Tlv(codec) => codec.decode(src),
            FrameCodec::EndMarker(codec) => codec.decode(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        match self {
            FrameCodec::Tlv(codec) => codec.decode_eof(src),
            FrameCodec::EndMarker(codec) => codec.decode_eof(src),
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = PipelineError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        match self {
            FrameCodec::Tlv(codec) => codec.encode(payload, dst),
            FrameCodec::EndMarker(codec) => codec.encode(payload, dst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_discipline_from_config() {
        let tlv = ServerConfig::tlv("FF", 2).unwrap();
        assert!(matches!(
            FrameCodec::from_config(&tlv).unwrap(),
            FrameCodec::Tlv(_)
        ));

        let marker = ServerConfig::end_marker("\n").unwrap();
        let mut codec = FrameCodec::from_config(&marker).unwrap();
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from_static(b"hi"), &mut buf).unwrap();
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"hi\n");
    }

    #[test]
    fn config_limits_flow_into_codec() {
        let config = ServerConfig::tlv("BF", 4)
            .unwrap()
            .with_max_frame_size(16)
            .unwrap();
        let codec = FrameCodec::from_config(&config).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            codec.encode_frame(&[0u8; 11], &mut out),
            Err(PipelineError::OversizedFrame { size: 17, limit: 16 })
        ));
        assert!(codec.encode_frame(&[0u8; 10], &mut out).is_ok());
        assert_eq!(out.len(), 16);
    }
}
