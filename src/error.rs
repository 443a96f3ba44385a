//! # Error Types
//!
//! Error handling for the framing pipeline.
//!
//! This module defines every error variant that can occur while binding, accepting,
//! framing, transforming, or writing messages.
//!
//! ## Error Categories
//! - **Server Errors**: listener setup and accept failures (reach the caller of `run()`)
//! - **Framing Errors**: short reads, malformed or oversized frames, tag mismatches
//! - **Compression Errors**: missing input, corrupt compressed streams
//! - **Configuration Errors**: invalid widths, empty markers, mismatched stages
//!
//! Everything except `BindFailure` and `AcceptFailure` is local to one connection: the
//! worker logs it and closes that connection.
//!
//! ## Example Usage
//! ```rust
//! use stagewire::config::{LengthWidth, ServerConfig};
//! use stagewire::error::PipelineError;
//!
//! let err = ServerConfig::end_marker(Vec::new()).unwrap_err();
//! assert!(matches!(err, PipelineError::ConfigError(_)));
//! assert!(LengthWidth::from_bytes(3).is_err());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants shared by several call sites.
pub mod constants {
    pub const ERR_EMPTY_TAG: &str = "TLV tag must not be empty";
    pub const ERR_EMPTY_END_MARKER: &str = "End marker must not be empty";
    pub const ERR_NOT_TLV: &str = "TLV stage used with a non-TLV framing configuration";
    pub const ERR_NOT_END_MARKER: &str =
        "End-marker stage used with a non end-marker framing configuration";
}

/// PipelineError is the error type for all server, framing and stage operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to bind listener on {address}: {source}")]
    BindFailure {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    AcceptFailure(#[source] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Short read: stream closed with {received} of {expected} bytes")]
    ShortRead { expected: usize, received: usize },

    #[error("Malformed frame: declared length {declared} is smaller than header length {header}")]
    MalformedFrame { declared: u64, header: usize },

    #[error("Frame too large: {size} bytes (limit {limit})")]
    OversizedFrame { size: u64, limit: usize },

    #[error("Frame tag mismatch: expected {expected:?}, got {actual:?}")]
    TagMismatch { expected: Vec<u8>, actual: Vec<u8> },

    #[error("Frame length {length} does not fit a {width}-byte length field")]
    LengthOverflow { length: u64, width: usize },

    #[error("Stage input is missing or empty")]
    MissingInput,

    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    #[error("Compression failed: {0}")]
    CompressionFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Handler '{stage}' failed: {message}")]
    Handler { stage: String, message: String },
}

impl PipelineError {
    /// True for the conditions a closing peer produces.
    ///
    /// Only used to pick a log level; the worker closes the connection on every error.
    pub fn is_disconnect(&self) -> bool {
        match self {
            PipelineError::ConnectionClosed
            | PipelineError::ShortRead { .. } => true,
            PipelineError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Build a handler error from any displayable failure.
    pub fn handler(stage: impl Into<String>, message: impl std::fmt::Display) -> Self {
        PipelineError::Handler {
            stage: stage.into(),
            message: message.to_string(),
        }
    }
}

/// Type alias for Results using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;
