//! # Payload Compression
//!
//! Symmetric compress/decompress transform used by the `Compress` and `Decompress`
//! pipeline stages.
//!
//! DEFLATE (raw, no zlib header) is the default and runs on pooled `flate2` codec
//! instances: each call checks out an instance, resets it, runs the whole payload through
//! it and hands it back. An instance that fails mid-stream is discarded rather than
//! pooled, so a corrupt peer cannot leave history behind for the next connection.
//! LZ4 and Zstd are one-shot and need no pooling.
//!
//! ## Limits
//! Decompressed output is capped (16 MiB by default) to stop decompression bombs.

use crate::config::{CompressionConfig, DEFAULT_COMPRESSION_LEVEL};
use crate::error::{PipelineError, Result};
use crate::utils::buffer_pool::BufferPool;
use crate::utils::pool::ObjectPool;
use flate2::{Compress, Decompress, FlushCompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};
use std::io::Read;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    Deflate,
    Lz4,
    Zstd,
}

/// Maximum output size for decompression
pub const MAX_DECOMPRESSION_SIZE: usize = 16 * 1024 * 1024;

/// Spare output capacity guaranteed before each codec call
const CHUNK: usize = 8192;

/// Pooled compression engine shared by every connection of a server.
///
/// Clones share the codec instance pools.
#[derive(Clone)]
pub struct Compression {
    kind: CompressionKind,
    level: u32,
    max_output: usize,
    deflaters: ObjectPool<Compress>,
    inflaters: ObjectPool<Decompress>,
    buffers: BufferPool,
}

impl Compression {
    /// Create an engine for `kind` at `level`
    pub fn new(kind: CompressionKind, level: u32) -> Self {
        Self::with_pool_size(kind, level, 32)
    }

    /// Create an engine that keeps at most `pool_size` idle codec instances per direction
    pub fn with_pool_size(kind: CompressionKind, level: u32, pool_size: usize) -> Self {
        Self {
            kind,
            level,
            max_output: MAX_DECOMPRESSION_SIZE,
            deflaters: ObjectPool::new(pool_size),
            inflaters: ObjectPool::new(pool_size),
            buffers: BufferPool::new(0),
        }
    }

    pub fn from_config(config: &CompressionConfig) -> Self {
        Self::with_pool_size(config.kind, config.level, config.pool_size)
    }

    /// Override the decompressed size limit
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    /// Share an existing buffer pool for the accumulation buffers
    pub fn with_buffer_pool(mut self, buffers: BufferPool) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    /// Compress `data` into a new vector.
    ///
    /// # Errors
    /// `MissingInput` for empty input, `CompressionFailure` if the codec fails.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = self.buffers.acquire();
        self.compress_into(data, &mut out)?;
        Ok(out.to_vec())
    }

    /// Compress `data`, appending the compressed stream to `out`
    pub fn compress_into(&self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if data.is_empty() {
            return Err(PipelineError::MissingInput);
        }
        match self.kind {
            CompressionKind::Deflate => self.deflate_into(data, out),
            CompressionKind::Lz4 => {
                out.extend_from_slice(&lz4_flex::compress_prepend_size(data));
                Ok(())
            }
            CompressionKind::Zstd => {
                zstd::stream::copy_encode(data, &mut *out, self.level as i32)
                    .map_err(|e| PipelineError::CompressionFailure(e.to_string()))
            }
        }
    }

    /// Decompress `data` into a new vector.
    ///
    /// # Errors
    /// `MissingInput` for empty input, `DecodeFailure` for corrupt or truncated streams and
    /// for output beyond the size limit.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = self.buffers.acquire();
        self.decompress_into(data, &mut out)?;
        Ok(out.to_vec())
    }

    /// Decompress `data`, appending the uncompressed bytes to `out`
    pub fn decompress_into(&self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if data.is_empty() {
            return Err(PipelineError::MissingInput);
        }
        match self.kind {
            CompressionKind::Deflate => self.inflate_into(data, out),
            CompressionKind::Lz4 => self.lz4_decompress_into(data, out),
            CompressionKind::Zstd => self.zstd_decompress_into(data, out),
        }
    }

    fn deflate_into(&self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let level = flate2::Compression::new(self.level.min(9));
        let mut deflater = self.deflaters.checkout(|| Compress::new(level, false));
        deflater.reset();

        let mut input = data;
        loop {
            if out.capacity() - out.len() < CHUNK {
                out.reserve(CHUNK);
            }
            let before = deflater.total_in();
            let status = match deflater.compress_vec(input, out, FlushCompress::Finish) {
                Ok(status) => status,
                Err(e) => {
                    deflater.discard();
                    return Err(PipelineError::CompressionFailure(e.to_string()));
                }
            };
            let consumed = (deflater.total_in() - before) as usize;
            input = &input[consumed..];

            if let Status::StreamEnd = status {
                return Ok(());
            }
        }
    }

    fn inflate_into(&self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let mut inflater = self.inflaters.checkout(|| Decompress::new(false));
        inflater.reset(false);

        let start = out.len();
        let mut input = data;
        loop {
            if out.capacity() - out.len() < CHUNK {
                out.reserve(CHUNK);
            }
            let (before_in, before_out) = (inflater.total_in(), inflater.total_out());
            let status = match inflater.decompress_vec(input, out, FlushDecompress::None) {
                Ok(status) => status,
                Err(e) => {
                    inflater.discard();
                    return Err(PipelineError::DecodeFailure(e.to_string()));
                }
            };
            let consumed = (inflater.total_in() - before_in) as usize;
            let produced = inflater.total_out() - before_out;
            input = &input[consumed..];

            if out.len() - start > self.max_output {
                inflater.discard();
                return Err(PipelineError::DecodeFailure(format!(
                    "decompressed output exceeds {} bytes",
                    self.max_output
                )));
            }

            match status {
                Status::StreamEnd => return Ok(()),
                Status::Ok | Status::BufError if consumed == 0 && produced == 0 => {
                    inflater.discard();
                    return Err(PipelineError::DecodeFailure(
                        "truncated deflate stream".to_string(),
                    ));
                }
                Status::Ok | Status::BufError => {}
            }
        }
    }

    fn lz4_decompress_into(&self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        // The prepended size is checked before lz4_flex allocates for it
        if data.len() < 4 {
            return Err(PipelineError::DecodeFailure(
                "lz4 input shorter than its size prefix".to_string(),
            ));
        }
        let claimed_size = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if claimed_size > self.max_output {
            return Err(PipelineError::DecodeFailure(format!(
                "lz4 stream claims {claimed_size} bytes (limit {})",
                self.max_output
            )));
        }

        let decompressed = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| PipelineError::DecodeFailure(e.to_string()))?;
        out.extend_from_slice(&decompressed);
        Ok(())
    }

    fn zstd_decompress_into(&self, data: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let mut reader = zstd::stream::Decoder::new(data)
            .map_err(|e| PipelineError::DecodeFailure(e.to_string()))?;

        let start = out.len();
        let mut chunk = [0u8; CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    out.extend_from_slice(&chunk[..n]);
                    if out.len() - start > self.max_output {
                        return Err(PipelineError::DecodeFailure(format!(
                            "decompressed output exceeds {} bytes",
                            self.max_output
                        )));
                    }
                }
                Err(e) => return Err(PipelineError::DecodeFailure(e.to_string())),
            }
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::new(CompressionKind::Deflate, DEFAULT_COMPRESSION_LEVEL)
    }
}

impl std::fmt::Debug for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compression")
            .field("kind", &self.kind)
            .field("level", &self.level)
            .field("max_output", &self.max_output)
            .field("idle_deflaters", &self.deflaters.available())
            .field("idle_inflaters", &self.inflaters.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &[u8] = b"Hello, World! This is a test of pooled deflate compression. \
                          Hello, World! This is a test of pooled deflate compression.";

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_deflate_roundtrip() {
        let engine = Compression::default();
        let compressed = engine.compress(TEXT).unwrap();
        assert!(compressed.len() < TEXT.len());
        assert_eq!(engine.decompress(&compressed).unwrap(), TEXT);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_lz4_and_zstd_roundtrip() {
        for kind in [CompressionKind::Lz4, CompressionKind::Zstd] {
            let engine = Compression::new(kind, 3);
            let compressed = engine.compress(TEXT).unwrap();
            assert_eq!(engine.decompress(&compressed).unwrap(), TEXT);
        }
    }

    #[test]
    fn test_empty_input_is_missing() {
        for kind in [
            CompressionKind::Deflate,
            CompressionKind::Lz4,
            CompressionKind::Zstd,
        ] {
            let engine = Compression::new(kind, 3);
            assert!(matches!(engine.compress(b""), Err(PipelineError::MissingInput)));
            assert!(matches!(
                engine.decompress(b""),
                Err(PipelineError::MissingInput)
            ));
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_reused_deflater_matches_fresh() {
        let pooled = Compression::with_pool_size(CompressionKind::Deflate, 6, 1);
        let first = pooled.compress(b"first payload, first payload").unwrap();
        let second = pooled.compress(TEXT).unwrap();

        let fresh = Compression::with_pool_size(CompressionKind::Deflate, 6, 1);
        assert_eq!(second, fresh.compress(TEXT).unwrap());
        assert_eq!(
            pooled.decompress(&first).unwrap(),
            b"first payload, first payload"
        );
        assert_eq!(pooled.decompress(&second).unwrap(), TEXT);
    }

    #[test]
    fn test_corrupt_deflate_stream() {
        let engine = Compression::default();
        // 0xff starts a block with reserved type 3
        let result = engine.decompress(&[0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(PipelineError::DecodeFailure(_))));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_truncated_deflate_stream() {
        let engine = Compression::default();
        let data: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        let compressed = engine.compress(&data).unwrap();
        let truncated = &compressed[..compressed.len() / 2];
        assert!(matches!(
            engine.decompress(truncated),
            Err(PipelineError::DecodeFailure(_))
        ));
        // The failed instance was discarded; the engine keeps working
        assert_eq!(engine.decompress(&compressed).unwrap(), data);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_deflate_bomb_rejected() {
        let engine = Compression::default().with_max_output(1024);
        let compressed = engine.compress(&vec![0u8; 1 << 20]).unwrap();
        assert!(matches!(
            engine.decompress(&compressed),
            Err(PipelineError::DecodeFailure(_))
        ));
    }

    #[test]
    fn test_lz4_oom_attack_prevention() {
        // Claims to decompress to 0xbbbb602b bytes
        let malicious_payload = vec![0x2b, 0x60, 0xbb, 0xbb];
        let engine = Compression::new(CompressionKind::Lz4, 0);
        assert!(engine.decompress(&malicious_payload).is_err());
    }

    #[test]
    fn test_lz4_short_input_rejection() {
        let engine = Compression::new(CompressionKind::Lz4, 0);
        assert!(engine.decompress(&[0x2b, 0x60]).is_err());
    }
}
