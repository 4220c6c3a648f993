use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};

/// A bidirectional, message-oriented transport.
///
/// `send` hands one whole message to every *other* current listener of the
/// transport; `subscribe` registers a new listener. Delivery, ordering between
/// different senders and backpressure are not guaranteed.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Queue a message for delivery. Never blocks.
    fn send(&self, message: Value) -> Result<()>;

    /// Register a listener for inbound messages.
    fn subscribe(&self) -> Result<Inbox>;

    /// Close this side of the transport. Idempotent.
    ///
    /// Every [`Inbox`] obtained from this transport ends, and further sends
    /// fail with [`TransportError::Closed`].
    fn close(&self);

    /// Whether [`Transport::close`] has been called (or the link went away).
    fn is_closed(&self) -> bool;
}

/// Receiving half of a transport subscription.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl Inbox {
    /// Wait for the next message. Returns `None` once the transport is closed
    /// and everything already delivered has been drained.
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Take a message if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}

/// A set of listeners that all receive every delivered message.
///
/// Building block for [`Transport`] implementations: keep one `Fanout` per
/// receiving side, call [`Fanout::deliver`] for each inbound message.
#[derive(Default)]
pub struct Fanout {
    senders: Mutex<Vec<mpsc::UnboundedSender<Value>>>,
    closed: AtomicBool,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener.
    pub fn subscribe(&self) -> Result<Inbox> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.senders).push(tx);
        Ok(Inbox { rx })
    }

    /// Hand `message` to every live listener. Listeners whose inbox was
    /// dropped are pruned. Returns the number of listeners reached.
    pub fn deliver(&self, message: &Value) -> usize {
        if self.is_closed() {
            return 0;
        }
        let mut senders = lock(&self.senders);
        senders.retain(|tx| tx.send(message.clone()).is_ok());
        senders.len()
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        let mut senders = lock(&self.senders);
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }

    /// End every inbox and refuse new subscriptions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.senders).clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Fanout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fanout")
            .field("listeners", &lock(&self.senders).len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// A poisoned listener table is still structurally valid.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
