//! Request/reply correlation by sequence number.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{ChannelError, Result};

type Outcome = Result<Value>;

#[derive(Default)]
struct Table {
    pending: HashMap<u64, oneshot::Sender<Outcome>>,
    destroyed: bool,
}

/// Outstanding requests of one channel, keyed by sequence number.
///
/// Every entry leaves the table exactly once: through [`resolve`], through
/// its own deadline in [`PendingReply::wait`], or through [`destroy`].
/// Whoever removes the entry decides the outcome; everyone else is a no-op.
///
/// [`resolve`]: CorrelationRegistry::resolve
/// [`destroy`]: CorrelationRegistry::destroy
pub struct CorrelationRegistry {
    next: AtomicU64,
    table: Arc<Mutex<Table>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            table: Arc::new(Mutex::new(Table::default())),
        }
    }

    /// Fresh sequence number. Starts at 1 and never repeats for this registry.
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Start waiting for the reply to `no`.
    ///
    /// Register before sending the request so a fast reply cannot be missed.
    pub fn register(&self, no: u64) -> Result<PendingReply> {
        let (tx, rx) = oneshot::channel();
        let mut table = lock(&self.table);
        if table.destroyed {
            return Err(ChannelError::Destroyed);
        }
        table.pending.insert(no, tx);
        Ok(PendingReply {
            no,
            rx,
            table: Arc::downgrade(&self.table),
        })
    }

    /// Complete the pending entry for `no`. Returns `false` if there is none
    /// (already timed out, already resolved, or never requested here).
    pub fn resolve(&self, no: u64, outcome: Outcome) -> bool {
        let mut table = lock(&self.table);
        match table.pending.remove(&no) {
            // Sent under the lock: a waiter that finds its entry gone can
            // rely on the outcome already sitting in its receiver.
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => {
                trace!(no, "no pending call for reply");
                false
            }
        }
    }

    /// Drop the entry for `no` without completing it.
    pub fn cancel(&self, no: u64) -> bool {
        lock(&self.table).pending.remove(&no).is_some()
    }

    /// Reject every outstanding entry with [`ChannelError::Destroyed`] and
    /// refuse new ones. Returns how many were rejected; idempotent.
    pub fn destroy(&self) -> usize {
        let mut table = lock(&self.table);
        table.destroyed = true;
        let drained: Vec<_> = table.pending.drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(ChannelError::Destroyed));
        }
        count
    }

    pub fn is_destroyed(&self) -> bool {
        lock(&self.table).destroyed
    }

    /// Number of outstanding entries.
    pub fn len(&self) -> usize {
        lock(&self.table).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CorrelationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CorrelationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationRegistry")
            .field("next", &self.next.load(Ordering::Relaxed))
            .field("pending", &self.len())
            .finish()
    }
}

/// The waiting side of one registry entry.
///
/// Dropping it before completion removes the entry, so a late reply finds
/// nothing to resolve.
#[derive(Debug)]
pub struct PendingReply {
    no: u64,
    rx: oneshot::Receiver<Outcome>,
    table: Weak<Mutex<Table>>,
}

impl PendingReply {
    pub fn no(&self) -> u64 {
        self.no
    }

    /// Wait for the reply, at most `timeout` if one is given.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Value> {
        let received = match timeout {
            None => (&mut self.rx).await.ok(),
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received.ok(),
                Err(_) => {
                    if self.remove() {
                        return Err(ChannelError::CallTimeout {
                            no: self.no,
                            timeout: limit,
                        });
                    }
                    // The entry was taken while the timer fired; its outcome wins.
                    self.rx.try_recv().ok()
                }
            },
        };
        // No value at all means the sender was dropped with the registry.
        received.unwrap_or(Err(ChannelError::Destroyed))
    }

    fn remove(&self) -> bool {
        match self.table.upgrade() {
            Some(table) => lock(&table).pending.remove(&self.no).is_some(),
            None => false,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.remove();
    }
}

fn lock(table: &Mutex<Table>) -> MutexGuard<'_, Table> {
    table
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
