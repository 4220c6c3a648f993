//! Peer-to-peer messaging over an unreliable message transport.
//!
//! Two peers that share nothing but a [`Transport`](openpeer_transport::Transport)
//! exchange typed notifications and make request/response calls:
//!
//! - [`PacketCodec`] wraps every message in a signed envelope and drops
//!   anything on the transport that is not one of ours
//! - [`CorrelationRegistry`] matches replies to requests by sequence number
//! - [`Dispatcher`] fans pushed messages out to listeners by type
//! - [`Negotiator`] runs the bounded-retry connect handshake
//! - [`ExecutionContext`] holds the named operations the peer may call
//! - [`Channel`] puts it all together
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use openpeer_channel::{from_args, Bindings, Channel, Endpoint};
//! use openpeer_transport::MemoryBus;
//! use serde_json::json;
//!
//! # async fn demo() -> openpeer_channel::Result<()> {
//! let bus = MemoryBus::new("demo");
//! let a = Channel::new(Arc::new(bus.join()))?;
//! let b = Channel::new(Arc::new(bus.join()))?;
//!
//! b.register(Bindings::new().function("add", |args| {
//!     let (x, y): (i64, i64) = from_args(args)?;
//!     Ok(x + y)
//! }))?;
//!
//! assert!(a.connect(Endpoint::Primary).await);
//! assert_eq!(a.call("add", vec![json!(2), json!(3)]).await?, json!(5));
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod execution;
pub mod flags;
pub mod message;
pub mod negotiator;
pub mod registry;

pub use channel::Channel;
pub use codec::{hash, sign, PacketCodec, PROTOCOL_VERSION, SIGNATURE_LEN};
pub use config::ChannelConfig;
pub use dispatcher::{Dispatcher, Listener, ListenerId, Subscription};
pub use error::{ChannelError, Result};
pub use execution::{from_args, Bindings, ExecutionContext, Operation, OperationError};
pub use flags::{Action, Category, Kind};
pub use message::{CallRequest, Envelope, Message, PushData, DEFAULT_MESSAGE_TYPE};
pub use negotiator::{ConnectionState, Endpoint, Negotiator, RouteId};
pub use registry::{CorrelationRegistry, PendingReply};
