//! # Connection
//!
//! One live transport stream plus its read buffer. A connection is owned by exactly one
//! worker for its whole life and is never shared.
//!
//! Decode stages pull frames through [`Connection::read_frame`], which keeps any bytes
//! read beyond the current frame for the next one. Encode stages hand complete frames to
//! [`Connection::write_frame`], which issues them as a single write.

use crate::error::{PipelineError, Result};
use crate::utils::buffer_pool::DEFAULT_BUFFER_CAPACITY;
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Decoder;

pub struct Connection<S = TcpStream> {
    stream: S,
    read_buf: BytesMut,
    peer: Option<SocketAddr>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY),
            peer: None,
        }
    }

    pub fn with_peer(stream: S, peer: SocketAddr) -> Self {
        Self {
            peer: Some(peer),
            ..Self::new(stream)
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Bytes received but not yet consumed by a frame
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    /// Read until `codec` yields one frame.
    ///
    /// # Errors
    /// `ConnectionClosed` if the peer closes between frames, `ShortRead` if it closes
    /// mid-frame, and any decode or I/O error.
    pub async fn read_frame<D>(&mut self, codec: &mut D) -> Result<BytesMut>
    where
        D: Decoder<Item = BytesMut, Error = PipelineError>,
    {
        loop {
            if let Some(frame) = codec.decode(&mut self.read_buf)? {
                return Ok(frame);
            }

            if self.read_buf.capacity() - self.read_buf.len() < DEFAULT_BUFFER_CAPACITY / 4 {
                self.read_buf.reserve(DEFAULT_BUFFER_CAPACITY);
            }
            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return codec
                    .decode_eof(&mut self.read_buf)?
                    .ok_or(PipelineError::ConnectionClosed);
            }
        }
    }

    /// Write one complete frame and flush it
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Close the write half of the transport
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("buffered", &self.read_buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tlv::TlvCodec;
    use tokio::io::duplex;

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn reads_frames_written_in_pieces() {
        let (client, server) = duplex(64);
        let mut conn = Connection::new(server);

        let writer = tokio::spawn(async move {
            let mut client = client;
            for chunk in [
                &b"BF\x00"[..],
                &b"\x00\x00\x0B"[..],
                &b"hel"[..],
                &b"loBF\x00\x00\x00\x07"[..],
            ] {
                client.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
            client.write_all(b"!").await.unwrap();
            client
        });

        let mut codec = TlvCodec::default();
        assert_eq!(&conn.read_frame(&mut codec).await.unwrap()[..], b"hello");
        assert_eq!(&conn.read_frame(&mut codec).await.unwrap()[..], b"!");

        drop(writer.await.unwrap());
        assert!(matches!(
            conn.read_frame(&mut codec).await,
            Err(PipelineError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn close_mid_frame_is_short_read() {
        let (mut client, server) = duplex(64);
        let mut conn = Connection::new(server);
        client.write_all(b"BF\x00\x00").await.unwrap();
        drop(client);

        assert!(matches!(
            conn.read_frame(&mut TlvCodec::default()).await,
            Err(PipelineError::ShortRead {
                expected: 6,
                received: 4
            })
        ));
    }
}
