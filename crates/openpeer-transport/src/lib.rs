//! Message transports for openpeer channels.
//!
//! The protocol layer only needs a narrow contract: hand a whole message to
//! every other listener, and hear whole messages from everybody else. This
//! crate provides that contract ([`Transport`]) and the stock implementations:
//! - [`MemoryBus`]: broadcast fan-out between any number of members
//! - [`MemoryPort`]: a point-to-point pair
//! - [`Relay`]: forwards everything between two transports
//! - [`UnixDomainSocket`]: listener/connector for stream-based transports
//!
//! Transports guarantee nothing about delivery beyond "whole messages, in
//! send order per sender". Anything else is the protocol's problem.

pub mod error;
pub mod memory;
pub mod relay;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::{BusMember, MemoryBus, MemoryPort};
pub use relay::Relay;
pub use traits::{Fanout, Inbox, Transport};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
