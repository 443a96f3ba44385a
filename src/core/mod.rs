//! # Core Framing Components
//!
//! Wire framing disciplines and the per-connection transport wrapper.
//!
//! ## Components
//! - **TLV**: tag + fixed-width big-endian length + body
//! - **End Marker**: payload terminated by a configurable byte sequence
//! - **Codec**: one `tokio_util` codec type over either discipline
//! - **Connection**: stream plus read buffer, owned by a single worker
//!
//! ## Wire Formats
//! ```text
//! TLV:        [Tag(N)] [Length(2|4|8), total incl. header] [Body]
//! End marker: [Payload] [Marker]
//! ```
//!
//! ## Limits
//! - Frames are capped (65535 bytes by default) before their bodies are read
//! - A TLV length smaller than its own header is rejected as malformed

pub mod codec;
pub mod connection;
pub mod end_marker;
pub mod tlv;

pub use codec::FrameCodec;
pub use connection::Connection;
pub use end_marker::EndMarkerCodec;
pub use tlv::TlvCodec;
