//! # Staged Processing Pipeline
//!
//! An ordered list of stages run once per message on a connection:
//!
//! - **Stage**: decode, encode, compress, decompress, or an application handler
//! - **StageContext**: shared configuration, buffer and codec pools, metrics
//! - **Pipeline**: immutable stage list, cloned cheaply into every worker
//!
//! Stages keep no per-connection state; leftover input lives in the connection's own
//! read buffer, so one pipeline serves any number of concurrent connections.

pub mod engine;
pub mod stage;

pub use engine::{Pipeline, PipelineBuilder};
pub use stage::{HandlerContext, HandlerFn, Stage, StageContext};
