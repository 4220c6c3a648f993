//! Peer-to-peer messaging between isolated processes or tasks.
//!
//! openpeer lets two peers that share only a message transport exchange
//! typed notifications and make request/response calls, with signed
//! envelopes, sequence-number correlation and a retrying connect handshake.
//!
//! # Crate Structure
//!
//! - [`transport`]: message transports (in-memory bus and ports, relay, Unix sockets)
//! - [`frame`]: length-prefixed framing of envelopes over byte streams
//! - [`channel`]: the protocol itself (behind the default `channel` feature)

/// Re-export transport types.
pub mod transport {
    pub use openpeer_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use openpeer_frame::*;
}

/// Re-export channel types (requires `channel` feature).
#[cfg(feature = "channel")]
pub mod channel {
    pub use openpeer_channel::*;
}
