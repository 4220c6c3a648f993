use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use openpeer_transport::{Inbox, Transport};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, trace, warn, Instrument, Span};

use crate::codec::PacketCodec;
use crate::config::ChannelConfig;
use crate::dispatcher::{Dispatcher, ListenerId, Subscription};
use crate::error::{ChannelError, Result};
use crate::execution::{Bindings, ExecutionContext};
use crate::flags::{Action, Category, Kind};
use crate::message::{CallRequest, Message, PushData, DEFAULT_MESSAGE_TYPE};
use crate::negotiator::{ConnectionState, Endpoint, Negotiator, RouteId};
use crate::registry::{CorrelationRegistry, PendingReply};

/// One end of a peer-to-peer messaging channel.
///
/// Composes the codec, correlation registry, dispatcher, handshake and
/// execution context over a [`Transport`]. Cloning is cheap and every clone
/// drives the same channel.
///
/// Inbound traffic is handled by a single router task per channel, one
/// message at a time in arrival order. Remote calls run in their own tasks
/// so a slow operation never stalls routing.
///
/// When the primary transport ends the channel destroys itself.
///
/// Must be opened inside a tokio runtime.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

struct Route {
    transport: Arc<dyn Transport>,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct Routes {
    next: u64,
    by_id: HashMap<RouteId, Route>,
}

enum Inbound {
    Frame(Value),
    /// The route's inbox ended: the transport was closed or its stream hit EOF.
    Closed,
}

struct Inner {
    config: ChannelConfig,
    codec: PacketCodec,
    registry: CorrelationRegistry,
    dispatcher: Dispatcher,
    context: Arc<ExecutionContext>,
    negotiator: Negotiator,
    routes: Mutex<Routes>,
    queue: mpsc::UnboundedSender<(RouteId, Inbound)>,
    router: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
    span: Span,
}

impl Channel {
    /// Open a channel on `transport` with default configuration.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Self::open(transport, ChannelConfig::default())
    }

    /// Open a channel on `transport` and start routing its inbound traffic.
    pub fn open(transport: Arc<dyn Transport>, config: ChannelConfig) -> Result<Self> {
        let (queue, inbound) = mpsc::unbounded_channel();
        let span = info_span!("channel", name = %config.name);
        let inner = Arc::new(Inner {
            codec: PacketCodec::new(config.version.clone()),
            config,
            registry: CorrelationRegistry::new(),
            dispatcher: Dispatcher::new(),
            context: Arc::new(ExecutionContext::new()),
            negotiator: Negotiator::new(),
            routes: Mutex::new(Routes::default()),
            queue,
            router: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            span,
        });

        let primary = inner.attach(transport)?;
        debug_assert_eq!(primary, RouteId::PRIMARY);

        let router = tokio::spawn(
            route_loop(Arc::downgrade(&inner), inbound).instrument(inner.span.clone()),
        );
        *lock(&inner.router) = Some(router);

        info!(parent: &inner.span, version = %inner.config.version, "channel open");
        Ok(Self { inner })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Fire-and-forget notification, delivered to the peer's listeners for
    /// `message_type` (use [`DEFAULT_MESSAGE_TYPE`] for the default `"*"`).
    pub fn push(&self, data: Value, message_type: &str) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_live()?;
        let push = PushData {
            message: data,
            message_type: message_type.to_string(),
        };
        let message = Message::new(inner.registry.allocate(), Category::Common | Action::Message)
            .with_data(serde_json::to_value(push)?);
        trace!(parent: &inner.span, no = message.no, message_type, "push");
        inner.send(inner.target(), message)
    }

    /// Invoke the operation `name` registered on the peer and wait for its
    /// result.
    ///
    /// Fails with [`ChannelError::Remote`] if the peer has no such operation
    /// or it failed, [`ChannelError::CallTimeout`] past the configured
    /// deadline, and [`ChannelError::NotConnected`] before a handshake when
    /// the channel requires one.
    pub async fn call(&self, name: impl Into<String>, args: Vec<Value>) -> Result<Value> {
        let inner = &self.inner;
        inner.ensure_live()?;
        if inner.config.require_connection && inner.negotiator.peer().is_none() {
            return Err(ChannelError::NotConnected);
        }

        let request = serde_json::to_value(CallRequest {
            name: name.into(),
            args,
        })?;
        let pending = inner.request(
            inner.target(),
            Category::Common | Action::Call,
            Some(request),
        )?;
        debug!(parent: &inner.span, no = pending.no(), "call sent");
        pending.wait(inner.config.call_timeout).await
    }

    /// Listen for pushes of exactly `message_type`.
    pub fn message<F>(&self, message_type: &str, listener: F) -> Result<Subscription>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.ensure_live()?;
        Ok(self.inner.dispatcher.subscribe(message_type, Arc::new(listener)))
    }

    /// Remove listeners; see [`Dispatcher::unsubscribe`]. Returns how many
    /// were removed.
    pub fn off(&self, message_type: Option<&str>, id: Option<ListenerId>) -> usize {
        self.inner.dispatcher.unsubscribe(message_type, id)
    }

    /// Expose operations to the peer. Later registrations of a name win.
    pub fn register(&self, bindings: Bindings) -> Result<usize> {
        self.inner.ensure_live()?;
        let count = self.inner.context.register(bindings);
        debug!(parent: &self.inner.span, count, "operations registered");
        Ok(count)
    }

    /// Handshake with the peer at `endpoint`. `false` once every attempt
    /// went unanswered; see [`Channel::try_connect`] for the error.
    pub async fn connect(&self, endpoint: Endpoint) -> bool {
        self.try_connect(endpoint).await.is_ok()
    }

    /// Handshake with the peer at `endpoint`.
    ///
    /// A [`Endpoint::Port`] is attached first so its reply is heard, and
    /// detached again if the handshake fails.
    pub async fn try_connect(&self, endpoint: Endpoint) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_live()?;
        let (route, attached) = match endpoint {
            Endpoint::Primary => (RouteId::PRIMARY, false),
            Endpoint::Port(transport) => (inner.attach(transport)?, true),
        };

        let timeout = inner.config.handshake_attempt_timeout;
        let result = inner
            .negotiator
            .negotiate(route, inner.config.handshake_attempts, |_| async move {
                let pending = inner.request(
                    route,
                    Category::Internal | Action::Connect,
                    Some(Value::from("connect")),
                )?;
                pending.wait(Some(timeout)).await.map(|_| ())
            })
            .instrument(inner.span.clone())
            .await;

        if result.is_err() && attached {
            inner.detach(route);
        }
        result
    }

    /// Heartbeat round trip to the peer.
    pub async fn ping(&self) -> Result<Duration> {
        let inner = &self.inner;
        inner.ensure_live()?;
        let started = Instant::now();
        let pending = inner.request(inner.target(), Category::Internal | Action::Heartbeat, None)?;
        pending.wait(Some(inner.config.ping_timeout())).await?;
        Ok(started.elapsed())
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.negotiator.state()
    }

    /// Route of the bound peer, if connected.
    pub fn peer(&self) -> Option<RouteId> {
        self.inner.negotiator.peer()
    }

    /// Calls, pings and handshake attempts still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Tear the channel down. Idempotent.
    ///
    /// Tells a connected peer we are leaving, rejects every pending call
    /// with [`ChannelError::Destroyed`], drops all listeners and stops
    /// reading from the transports. The transports themselves stay open.
    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.inner.config.name)
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Inner {
    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            Err(ChannelError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Bound peer if connected, the primary transport otherwise.
    fn target(&self) -> RouteId {
        self.negotiator.peer().unwrap_or(RouteId::PRIMARY)
    }

    fn attach(&self, transport: Arc<dyn Transport>) -> Result<RouteId> {
        let inbox = transport.subscribe()?;
        let mut routes = lock(&self.routes);
        let id = RouteId(routes.next);
        routes.next += 1;
        let pump = tokio::spawn(pump(id, inbox, self.queue.clone()).instrument(self.span.clone()));
        routes.by_id.insert(id, Route { transport, pump });
        debug!(parent: &self.span, route = %id, "transport attached");
        Ok(id)
    }

    fn detach(&self, route: RouteId) {
        if let Some(entry) = lock(&self.routes).by_id.remove(&route) {
            entry.pump.abort();
            debug!(parent: &self.span, %route, "transport detached");
        }
    }

    fn send(&self, route: RouteId, message: Message) -> Result<()> {
        let transport = lock(&self.routes)
            .by_id
            .get(&route)
            .map(|entry| Arc::clone(&entry.transport))
            .ok_or(ChannelError::NotConnected)?;
        let frame = self.codec.encode(message)?;
        transport.send(frame)?;
        Ok(())
    }

    /// Send a fresh request and return the handle waiting for its reply.
    fn request(&self, route: RouteId, kind: Kind, data: Option<Value>) -> Result<PendingReply> {
        let no = self.registry.allocate();
        let pending = self.registry.register(no)?;
        let mut message = Message::new(no, kind);
        message.data = data;
        // On failure `pending` drops here and takes its entry with it.
        self.send(route, message)?;
        Ok(pending)
    }

    fn reply(&self, route: RouteId, no: u64, outcome: std::result::Result<Value, Value>) {
        if let Err(err) = self.send(route, Message::reply(no, outcome)) {
            warn!(%route, no, error = %err, "failed to send reply");
        }
    }

    fn handle(self: &Arc<Self>, route: RouteId, raw: Value) {
        let Some(envelope) = self.codec.unwrap(&raw) else {
            return;
        };
        let message = envelope.payload;
        let kind = message.kind;
        debug!(%route, no = message.no, ?kind, "inbound");

        if kind.is_reply() {
            let outcome = match message.failure().cloned() {
                Some(error) => Err(ChannelError::Remote(error)),
                None => Ok(message.data.unwrap_or(Value::Null)),
            };
            self.registry.resolve(message.no, outcome);
            return;
        }

        match (kind.category(), kind.action()) {
            (Some(Category::Internal), Some(Action::Connect)) => {
                self.negotiator.accept(route);
                self.reply(route, message.no, Ok(Value::from("connected")));
            }
            (Some(Category::Internal), Some(Action::Heartbeat)) => {
                self.reply(route, message.no, Ok(Value::Null));
            }
            (Some(Category::Internal), Some(Action::Disconnect)) => {
                if self.negotiator.disconnect(route) {
                    info!(%route, "peer disconnected");
                }
            }
            (Some(Category::Common), Some(Action::Message)) => {
                let push = match message.data {
                    None => PushData {
                        message: Value::Null,
                        message_type: DEFAULT_MESSAGE_TYPE.to_string(),
                    },
                    Some(data) => match serde_json::from_value::<PushData>(data) {
                        Ok(push) => push,
                        Err(err) => {
                            trace!(no = message.no, error = %err, "dropping malformed push");
                            return;
                        }
                    },
                };
                let delivered = self.dispatcher.publish(&push.message_type, &push.message);
                trace!(message_type = %push.message_type, delivered, "push delivered");
            }
            (Some(Category::Common), Some(Action::Call)) => {
                self.execute(route, message.no, message.data)
            }
            _ => trace!(?kind, "ignoring message kind"),
        }
    }

    fn execute(self: &Arc<Self>, route: RouteId, no: u64, data: Option<Value>) {
        let request = match data.map(serde_json::from_value::<CallRequest>) {
            Some(Ok(request)) => request,
            Some(Err(err)) => {
                self.reply(route, no, Err(Value::String(format!("malformed call request: {err}"))));
                return;
            }
            None => {
                self.reply(route, no, Err(Value::from("malformed call request: missing data")));
                return;
            }
        };

        debug!(%route, no, operation = %request.name, "executing call");
        let execution = self.context.execute(request);
        let channel = Arc::downgrade(self);
        tokio::spawn(
            async move {
                let outcome = execution.await;
                match channel.upgrade() {
                    Some(inner) if inner.ensure_live().is_ok() => inner.reply(route, no, outcome),
                    _ => trace!(no, "channel gone before call finished"),
                }
            }
            .instrument(self.span.clone()),
        );
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(peer) = self.negotiator.peer() {
            let notice = Message::new(
                self.registry.allocate(),
                Category::Internal | Action::Disconnect,
            );
            if let Err(err) = self.send(peer, notice) {
                debug!(parent: &self.span, error = %err, "disconnect notice not sent");
            }
        }

        let rejected = self.registry.destroy();
        self.dispatcher.clear();
        self.negotiator.reset();
        self.shutdown();
        info!(parent: &self.span, rejected, "channel destroyed");
    }

    /// A route's transport ended. Losing the primary transport ends the channel.
    fn route_closed(&self, route: RouteId) {
        lock(&self.routes).by_id.remove(&route);
        if self.negotiator.disconnect(route) {
            info!(%route, "peer hung up");
        }
        if route == RouteId::PRIMARY {
            info!("primary transport ended");
            self.destroy();
        } else {
            debug!(%route, "transport ended");
        }
    }

    /// Stop the router and every pump. Idempotent.
    fn shutdown(&self) {
        if let Some(router) = lock(&self.router).take() {
            router.abort();
        }
        let routes: Vec<Route> = lock(&self.routes).by_id.drain().map(|(_, entry)| entry).collect();
        for entry in routes {
            entry.pump.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.registry.destroy();
        self.shutdown();
    }
}

async fn route_loop(
    channel: Weak<Inner>,
    mut inbound: mpsc::UnboundedReceiver<(RouteId, Inbound)>,
) {
    while let Some((route, event)) = inbound.recv().await {
        let Some(inner) = channel.upgrade() else {
            break;
        };
        match event {
            Inbound::Frame(raw) => inner.handle(route, raw),
            Inbound::Closed => inner.route_closed(route),
        }
    }
    debug!("router stopped");
}

async fn pump(
    route: RouteId,
    mut inbox: Inbox,
    queue: mpsc::UnboundedSender<(RouteId, Inbound)>,
) {
    while let Some(raw) = inbox.recv().await {
        if queue.send((route, Inbound::Frame(raw))).is_err() {
            return;
        }
    }
    debug!(%route, "transport inbox ended");
    let _ = queue.send((route, Inbound::Closed));
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
