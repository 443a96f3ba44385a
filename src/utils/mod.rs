//! # Utility Modules
//!
//! Shared resources used by the pipeline stages and the server.
//!
//! ## Components
//! - **Buffer Pool**: reusable scratch buffers handed to each stage invocation
//! - **Object Pool**: generic checkout/return pool for stateful codec instances
//! - **Compression**: pooled DEFLATE plus one-shot LZ4 and Zstd
//! - **Logging**: `tracing-subscriber` setup with console fallback
//! - **Metrics**: atomic connection and frame counters
//!
//! Every shared resource here is `Send + Sync` and is owned by the server, never global.

pub mod buffer_pool;
pub mod compression;
pub mod logging;
pub mod metrics;
pub mod pool;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use compression::{Compression, CompressionKind};
