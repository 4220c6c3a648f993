//! Type-keyed publish/subscribe fan-out for one-way messages.
//!
//! Delivery is by exact type string: a listener on `"*"` only hears messages
//! published under `"*"` (the default push type), not every type.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tracing::warn;

/// A message listener. Receives the pushed `message` value.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identity of one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Topics {
    next_id: u64,
    by_type: HashMap<String, Vec<(ListenerId, Listener)>>,
}

impl Topics {
    fn contains(&self, message_type: &str, id: ListenerId) -> bool {
        self.by_type
            .get(message_type)
            .is_some_and(|listeners| listeners.iter().any(|(lid, _)| *lid == id))
    }

    fn remove(&mut self, message_type: &str, id: ListenerId) -> bool {
        let Some(listeners) = self.by_type.get_mut(message_type) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            self.by_type.remove(message_type);
        }
        removed
    }
}

/// Subscription table of one channel.
///
/// The table lock is never held while a listener runs, so a listener may
/// subscribe or unsubscribe (itself included) during dispatch.
#[derive(Default)]
pub struct Dispatcher {
    topics: Arc<Mutex<Topics>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `listener` for `message_type`, after any existing ones.
    pub fn subscribe(&self, message_type: &str, listener: Listener) -> Subscription {
        let mut topics = lock(&self.topics);
        topics.next_id += 1;
        let id = ListenerId(topics.next_id);
        topics
            .by_type
            .entry(message_type.to_string())
            .or_default()
            .push((id, listener));
        Subscription {
            id,
            message_type: message_type.to_string(),
            topics: Arc::downgrade(&self.topics),
        }
    }

    /// Deliver `data` to every listener of `message_type`, in subscription
    /// order. Returns how many listeners ran to completion.
    ///
    /// A listener removed by an earlier one in the same dispatch is skipped.
    /// A panicking listener is logged and does not stop the others.
    pub fn publish(&self, message_type: &str, data: &Value) -> usize {
        let snapshot: Vec<(ListenerId, Listener)> = {
            let topics = lock(&self.topics);
            match topics.by_type.get(message_type) {
                Some(listeners) => listeners.clone(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (id, listener) in snapshot {
            if !lock(&self.topics).contains(message_type, id) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| listener(data))) {
                Ok(()) => delivered += 1,
                Err(payload) => warn!(
                    message_type,
                    listener = id.0,
                    panic = panic_message(payload.as_ref()),
                    "message listener panicked"
                ),
            }
        }
        delivered
    }

    /// Remove subscriptions. Returns how many listeners were removed.
    ///
    /// - no type, no id: clears everything
    /// - type only: clears that type
    /// - type and id: removes exactly that listener
    /// - id only: removes that listener from whichever type holds it
    pub fn unsubscribe(&self, message_type: Option<&str>, id: Option<ListenerId>) -> usize {
        let mut topics = lock(&self.topics);
        match (message_type, id) {
            (None, None) => {
                let count = topics.by_type.values().map(Vec::len).sum();
                topics.by_type.clear();
                count
            }
            (Some(message_type), None) => topics
                .by_type
                .remove(message_type)
                .map_or(0, |listeners| listeners.len()),
            (Some(message_type), Some(id)) => usize::from(topics.remove(message_type, id)),
            (None, Some(id)) => {
                let holder = topics
                    .by_type
                    .iter()
                    .find(|(_, listeners)| listeners.iter().any(|(lid, _)| *lid == id))
                    .map(|(message_type, _)| message_type.clone());
                holder.map_or(0, |message_type| usize::from(topics.remove(&message_type, id)))
            }
        }
    }

    /// Remove every subscription.
    pub fn clear(&self) -> usize {
        self.unsubscribe(None, None)
    }

    /// Listeners currently registered for `message_type`.
    pub fn listener_count(&self, message_type: &str) -> usize {
        lock(&self.topics)
            .by_type
            .get(message_type)
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.topics).by_type.is_empty()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics = lock(&self.topics);
        let mut types: Vec<_> = topics.by_type.keys().cloned().collect();
        types.sort();
        f.debug_struct("Dispatcher").field("types", &types).finish()
    }
}

/// Handle returned by [`Dispatcher::subscribe`].
///
/// Dropping it does not unsubscribe; call [`Subscription::cancel`].
#[derive(Debug, Clone)]
pub struct Subscription {
    id: ListenerId,
    message_type: String,
    topics: Weak<Mutex<Topics>>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Remove this listener. Returns `false` if it was already gone.
    pub fn cancel(&self) -> bool {
        match self.topics.upgrade() {
            Some(topics) => lock(&topics).remove(&self.message_type, self.id),
            None => false,
        }
    }
}

fn lock(topics: &Mutex<Topics>) -> MutexGuard<'_, Topics> {
    topics
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
