//! # Pipeline Stages
//!
//! A [`Stage`] turns input bytes into output bytes, possibly reading from or writing to
//! the connection on the way. Stages hold no per-connection state, so one stage list is
//! shared by every worker. The shared resources they need (framing configuration, buffer
//! and codec pools, metrics) come in through the [`StageContext`].

use crate::config::{Discipline, Framing, ServerConfig};
use crate::core::connection::Connection;
use crate::core::end_marker::EndMarkerCodec;
use crate::core::tlv::TlvCodec;
use crate::error::Result;
use crate::utils::buffer_pool::BufferPool;
use crate::utils::compression::Compression;
use crate::utils::metrics::Metrics;
use bytes::Bytes;
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// What an application handler sees besides its input bytes
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext<'a> {
    pub config: &'a ServerConfig,
    pub peer: Option<SocketAddr>,
}

/// Signature of an application handler stage
pub type HandlerFn = dyn Fn(&HandlerContext<'_>, &[u8]) -> Result<Vec<u8>> + Send + Sync + 'static;

/// Shared, read-only resources injected into every stage invocation
#[derive(Clone)]
pub struct StageContext {
    config: Arc<ServerConfig>,
    buffers: BufferPool,
    compression: Arc<Compression>,
    metrics: Arc<Metrics>,
}

impl StageContext {
    pub fn new(config: ServerConfig) -> Self {
        let buffers = BufferPool::default();
        Self {
            config: Arc::new(config),
            compression: Arc::new(Compression::default().with_buffer_pool(buffers.clone())),
            buffers,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Replace the scratch buffer pool; the compression engine moves to it as well
    pub fn with_buffer_pool(mut self, buffers: BufferPool) -> Self {
        self.compression = Arc::new(
            Compression::clone(&self.compression).with_buffer_pool(buffers.clone()),
        );
        self.buffers = buffers;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Arc::new(compression.with_buffer_pool(self.buffers.clone()));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    pub fn compression(&self) -> &Compression {
        &self.compression
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("config", &self.config)
            .field("buffers", &self.buffers)
            .field("compression", &self.compression)
            .finish()
    }
}

/// One unit of the processing pipeline
#[derive(Clone)]
pub enum Stage {
    /// Read one TLV frame from the connection; outputs the body
    DecodeTlv,
    /// Write the input as one TLV frame; outputs its input unchanged
    EncodeTlv,
    /// Read one end-marker frame; outputs it with the marker attached
    DecodeEndMarker,
    /// Write the input followed by the marker; outputs its input unchanged
    EncodeEndMarker,
    Compress,
    /// Inflate the input; under end-marker framing a trailing marker is dropped first
    Decompress,
    /// User-supplied transform between decode and encode
    Handler {
        name: Cow<'static, str>,
        handler: Arc<HandlerFn>,
    },
}

impl Stage {
    pub fn handler<F>(name: impl Into<Cow<'static, str>>, handler: F) -> Self
    where
        F: Fn(&HandlerContext<'_>, &[u8]) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        Stage::Handler {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }

    /// Handler that answers every message with itself
    pub fn echo() -> Self {
        Self::handler("echo", |_, input| Ok(input.to_vec()))
    }

    pub fn name(&self) -> &str {
        match self {
            Stage::DecodeTlv => "decode_tlv",
            Stage::EncodeTlv => "encode_tlv",
            Stage::DecodeEndMarker => "decode_end_marker",
            Stage::EncodeEndMarker => "encode_end_marker",
            Stage::Compress => "compress",
            Stage::Decompress => "decompress",
            Stage::Handler { name, .. } => name,
        }
    }

    /// Whether the stage blocks on the peer for its input
    pub fn reads_connection(&self) -> bool {
        matches!(self, Stage::DecodeTlv | Stage::DecodeEndMarker)
    }

    /// Framing discipline a stage depends on, if any
    pub fn discipline(&self) -> Option<Discipline> {
        match self {
            Stage::DecodeTlv | Stage::EncodeTlv => Some(Discipline::Tlv),
            Stage::DecodeEndMarker | Stage::EncodeEndMarker => Some(Discipline::EndMarker),
            _ => None,
        }
    }

    /// Run the stage once.
    ///
    /// Decode stages ignore `input` and read from `conn`. `scratch` is an empty pooled
    /// buffer the stage may use as working space; it is released by the caller.
    pub async fn execute<S>(
        &self,
        ctx: &StageContext,
        conn: &mut Connection<S>,
        input: Bytes,
        scratch: &mut Vec<u8>,
    ) -> Result<Bytes>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            Stage::DecodeTlv => {
                let mut codec = TlvCodec::from_config(ctx.config())?;
                let body = conn.read_frame(&mut codec).await?;
                ctx.metrics()
                    .frame_received((codec.header_len() + body.len()) as u64);
                Ok(body.freeze())
            }
            Stage::DecodeEndMarker => {
                let mut codec = EndMarkerCodec::from_config(ctx.config())?;
                let frame = conn.read_frame(&mut codec).await?;
                ctx.metrics().frame_received(frame.len() as u64);
                Ok(frame.freeze())
            }
            Stage::EncodeTlv => {
                TlvCodec::from_config(ctx.config())?.encode_frame(&input, scratch)?;
                conn.write_frame(scratch).await?;
                ctx.metrics().frame_sent(scratch.len() as u64);
                Ok(input)
            }
            Stage::EncodeEndMarker => {
                EndMarkerCodec::from_config(ctx.config())?.encode_frame(&input, scratch)?;
                conn.write_frame(scratch).await?;
                ctx.metrics().frame_sent(scratch.len() as u64);
                Ok(input)
            }
            Stage::Compress => {
                ctx.metrics().compression_attempt();
                ctx.compression().compress_into(&input, scratch)?;
                Ok(Bytes::copy_from_slice(scratch))
            }
            Stage::Decompress => {
                ctx.metrics().decompression_attempt();
                // End-marker frames arrive with their marker; the compressed payload does not
                let payload = match ctx.config().framing() {
                    Framing::EndMarker { marker } => {
                        input.strip_suffix(&marker[..]).unwrap_or(&input[..])
                    }
                    Framing::Tlv { .. } => &input[..],
                };
                ctx.compression().decompress_into(payload, scratch)?;
                Ok(Bytes::copy_from_slice(scratch))
            }
            Stage::Handler { handler, .. } => {
                let hctx = HandlerContext {
                    config: ctx.config(),
                    peer: conn.peer(),
                };
                (**handler)(&hctx, &input).map(Bytes::from)
            }
        }
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
