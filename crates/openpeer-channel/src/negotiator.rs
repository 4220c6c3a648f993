//! Connection handshake state machine.
//!
//! ```text
//!            connect()            reply
//!   Idle ───────────────▶ Negotiating ───────▶ Connected
//!    ▲                        │                    │
//!    │                        │ attempts exhausted │ peer disconnect
//!    │                        ▼                    │
//!    │                      Failed                 │
//!    └─────────────────────────────────────────────┘
//! ```
//!
//! An inbound connect request moves any state straight to `Connected`:
//! either side may complete the handshake.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;

use openpeer_transport::Transport;
use tracing::{debug, info};

use crate::error::{ChannelError, Result};

/// Where a channel's traffic came from or goes to. Route 0 is the
/// transport the channel was opened on; ports attached later get fresh ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(pub(crate) u64);

impl RouteId {
    pub const PRIMARY: RouteId = RouteId(0);
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route-{}", self.0)
    }
}

/// Where to run a handshake.
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// The transport the channel was opened on.
    Primary,
    /// A point-to-point transport to a specific peer. It becomes the peer
    /// route when the handshake succeeds.
    Port(Arc<dyn Transport>),
}

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Negotiating,
    Connected,
    /// The last handshake ran out of attempts. `connect` may be retried.
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Link {
    state: ConnectionState,
    peer: Option<RouteId>,
}

/// Tracks handshake state and the bound peer route.
#[derive(Debug)]
pub struct Negotiator {
    link: Mutex<Link>,
}

impl Negotiator {
    pub fn new() -> Self {
        Self {
            link: Mutex::new(Link {
                state: ConnectionState::Idle,
                peer: None,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Route of the bound peer, if connected.
    pub fn peer(&self) -> Option<RouteId> {
        self.lock().peer
    }

    /// Run a bounded-retry handshake toward `route`.
    ///
    /// A peer bound by an earlier handshake stays bound until this one
    /// settles, so traffic keeps flowing to it in the meantime.
    ///
    /// `attempt` sends one connect request and waits for its reply with the
    /// per-attempt timeout. `Ok` binds `route` as peer; a
    /// [`ChannelError::CallTimeout`] tries again; any other error aborts.
    /// Exhausting `attempts` fails with [`ChannelError::HandshakeTimeout`].
    pub async fn negotiate<F, Fut>(
        &self,
        route: RouteId,
        attempts: u32,
        mut attempt: F,
    ) -> Result<()>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.lock().state = ConnectionState::Negotiating;
        debug!(%route, attempts, "handshake started");

        for n in 1..=attempts {
            match attempt(n).await {
                Ok(()) => {
                    self.bind(route);
                    info!(%route, attempt = n, "handshake succeeded");
                    return Ok(());
                }
                Err(ChannelError::CallTimeout { .. }) => continue,
                Err(err) => {
                    self.settle(ConnectionState::Failed);
                    debug!(%route, error = %err, "handshake aborted");
                    return Err(err);
                }
            }
        }

        self.settle(ConnectionState::Failed);
        info!(%route, attempts, "handshake timed out");
        Err(ChannelError::HandshakeTimeout { attempts })
    }

    /// The peer on `route` initiated a handshake toward us.
    pub fn accept(&self, route: RouteId) {
        self.bind(route);
        debug!(%route, "accepted inbound handshake");
    }

    /// The peer on `route` went away. Returns whether it was our bound
    /// peer. A connected channel drops back to `Idle`; a handshake in
    /// progress carries on.
    pub fn disconnect(&self, route: RouteId) -> bool {
        let mut link = self.lock();
        if link.peer != Some(route) {
            return false;
        }
        link.peer = None;
        if link.state == ConnectionState::Connected {
            link.state = ConnectionState::Idle;
        }
        true
    }

    /// Back to `Idle` with no peer.
    pub fn reset(&self) {
        let mut link = self.lock();
        link.state = ConnectionState::Idle;
        link.peer = None;
    }

    fn bind(&self, route: RouteId) {
        let mut link = self.lock();
        link.state = ConnectionState::Connected;
        link.peer = Some(route);
    }

    // Only leave Negotiating: a concurrent inbound handshake may already
    // have connected us. A failed handshake also unbinds the old peer.
    fn settle(&self, state: ConnectionState) {
        let mut link = self.lock();
        if link.state == ConnectionState::Negotiating {
            link.state = state;
            link.peer = None;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Link> {
        self.link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new()
    }
}
