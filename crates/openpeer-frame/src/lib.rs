//! Length-prefixed envelope framing for stream-based transports.
//!
//! Byte streams (Unix sockets, pipes) have no message boundaries, so every
//! envelope is framed with:
//! - A 2-byte magic number ("OP") for stream synchronization
//! - A 4-byte little-endian payload length
//! - The UTF-8 JSON payload
//!
//! [`StreamTransport`] turns any framed stream into an
//! [`openpeer_transport::Transport`].

pub mod codec;
pub mod error;
pub mod stream;

pub use codec::{
    decode_frame, encode_frame, EnvelopeCodec, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    MAGIC,
};
pub use error::{FrameError, Result};
pub use stream::StreamTransport;
