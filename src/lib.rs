//! # stagewire
//!
//! Pluggable framing and a staged processing pipeline for stream-oriented transport
//! connections.
//!
//! A [`Server`] accepts TCP connections and gives each one its own worker. The worker
//! repeatedly runs a [`Pipeline`]: an ordered list of [`Stage`]s that read a frame off the
//! wire, transform it, hand it to application code, and write the reply back.
//!
//! ## Framing Disciplines
//! - **TLV**: `[tag][big-endian total length (2, 4 or 8 bytes)][body]`
//! - **End marker**: `[payload][marker]`
//!
//! ## Quick Start
//! ```rust,no_run
//! use stagewire::{Pipeline, Server, ServerConfig};
//!
//! # async fn demo() -> stagewire::Result<()> {
//! let config = ServerConfig::tlv("BF", 4)?;
//! let pipeline = Pipeline::standard(&config, true, |_ctx, message| {
//!     Ok(message.to_ascii_uppercase())
//! });
//! Server::bind("127.0.0.1:8080", config, pipeline).await?.run().await
//! # }
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod utils;

pub use client::Client;
pub use config::{NetworkConfig, ServerConfig};
pub use error::{PipelineError, Result};
pub use pipeline::{HandlerContext, Pipeline, Stage, StageContext};
pub use server::{start_server, Server};
pub use utils::compression::{Compression, CompressionKind};
