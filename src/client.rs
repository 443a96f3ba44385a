//! # Client
//!
//! Peer-side counterpart of the server: frames outgoing payloads with the same
//! [`ServerConfig`], optionally compressing them first, and unframes replies.
//!
//! ```rust,no_run
//! use stagewire::client::Client;
//! use stagewire::config::ServerConfig;
//!
//! # async fn demo() -> stagewire::error::Result<()> {
//! let config = ServerConfig::tlv("BF", 4)?;
//! let mut client = Client::connect("127.0.0.1:8080", &config).await?;
//! let reply = client.request(b"hello").await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

use crate::config::{Framing, ServerConfig};
use crate::core::codec::FrameCodec;
use crate::error::{PipelineError, Result};
use crate::utils::compression::Compression;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::{debug, instrument};

pub struct Client {
    framed: Framed<TcpStream, FrameCodec>,
    compression: Option<Compression>,
    marker: Option<Bytes>,
}

impl Client {
    #[instrument(skip(addr, config))]
    pub async fn connect<A: ToSocketAddrs>(addr: A, config: &ServerConfig) -> Result<Self> {
        let codec = FrameCodec::from_config(config)?;
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        debug!(peer = ?stream.peer_addr().ok(), "Connected");

        let marker = match config.framing() {
            Framing::EndMarker { marker } => Some(marker.clone()),
            Framing::Tlv { .. } => None,
        };

        Ok(Self {
            framed: Framed::new(stream, codec),
            compression: None,
            marker,
        })
    }

    /// Compress outgoing payloads and decompress replies
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.framed.get_ref().peer_addr()?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.framed.get_ref().local_addr()?)
    }

    /// Frame and send one message
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        let body = match &self.compression {
            Some(compression) => Bytes::from(compression.compress(payload)?),
            None => Bytes::copy_from_slice(payload),
        };
        self.framed.send(body).await
    }

    /// Send several messages with a single flush
    pub async fn send_all<I, P>(&mut self, payloads: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        for payload in payloads {
            let body = match &self.compression {
                Some(compression) => Bytes::from(compression.compress(payload.as_ref())?),
                None => Bytes::copy_from_slice(payload.as_ref()),
            };
            self.framed.feed(body).await?;
        }
        self.framed.flush().await
    }

    /// Wait for the next frame.
    ///
    /// With end-marker framing the marker is kept, unless compression is on, in which
    /// case it is removed before decompressing.
    ///
    /// # Errors
    /// `ConnectionClosed` if the server closed the stream between frames.
    pub async fn recv(&mut self) -> Result<Bytes> {
        let frame = self
            .framed
            .next()
            .await
            .ok_or(PipelineError::ConnectionClosed)??
            .freeze();

        let Some(compression) = &self.compression else {
            return Ok(frame);
        };
        let payload = match &self.marker {
            Some(marker) if frame.ends_with(marker) => frame.slice(..frame.len() - marker.len()),
            _ => frame,
        };
        Ok(Bytes::from(compression.decompress(&payload)?))
    }

    /// Send one message and wait for its reply
    pub async fn request(&mut self, payload: &[u8]) -> Result<Bytes> {
        self.send(payload).await?;
        self.recv().await
    }

    /// Close the write half; the server sees a clean end of stream
    pub async fn close(mut self) -> Result<()> {
        self.framed.close().await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.framed.get_ref().peer_addr().ok())
            .field("compression", &self.compression.as_ref().map(Compression::kind))
            .finish()
    }
}
