use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Fanout, Inbox, Transport};

struct Hub {
    name: String,
    members: Mutex<Vec<(u64, Arc<Fanout>)>>,
    next_member: AtomicU64,
}

impl Hub {
    fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            members: Mutex::new(Vec::new()),
            next_member: AtomicU64::new(1),
        })
    }

    fn join(self: &Arc<Self>) -> BusMember {
        let id = self.next_member.fetch_add(1, Ordering::Relaxed);
        let inbound = Arc::new(Fanout::new());
        self.lock_members().push((id, Arc::clone(&inbound)));
        debug!(bus = %self.name, member = id, "member joined");
        BusMember {
            hub: Arc::clone(self),
            id,
            inbound,
        }
    }

    fn broadcast(&self, from: u64, message: &Value) -> Result<usize> {
        // Snapshot so delivery happens outside the membership lock.
        let targets: Vec<Arc<Fanout>> = {
            let members = self.lock_members();
            if !members.iter().any(|(id, _)| *id == from) {
                return Err(TransportError::Closed);
            }
            members
                .iter()
                .filter(|(id, _)| *id != from)
                .map(|(_, fanout)| Arc::clone(fanout))
                .collect()
        };
        Ok(targets.iter().map(|fanout| fanout.deliver(message)).sum())
    }

    fn leave(&self, member: u64) {
        let removed = {
            let mut members = self.lock_members();
            members
                .iter()
                .position(|(id, _)| *id == member)
                .map(|idx| members.remove(idx))
        };
        if let Some((_, fanout)) = removed {
            fanout.close();
            debug!(bus = %self.name, member, "member left");
        }
    }

    fn member_count(&self) -> usize {
        self.lock_members().len()
    }

    fn lock_members(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Arc<Fanout>)>> {
        self.members
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process broadcast bus.
///
/// Every message sent by one member is delivered to all *other* members
/// currently joined; the sender never hears its own messages.
#[derive(Clone)]
pub struct MemoryBus {
    hub: Arc<Hub>,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            hub: Hub::new(name),
        }
    }

    /// Join the bus as a new member.
    pub fn join(&self) -> BusMember {
        self.hub.join()
    }

    /// Bus name for diagnostics.
    pub fn name(&self) -> &str {
        &self.hub.name
    }

    /// Number of members currently joined.
    pub fn member_count(&self) -> usize {
        self.hub.member_count()
    }
}

impl fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBus")
            .field("name", &self.hub.name)
            .field("members", &self.hub.member_count())
            .finish()
    }
}

/// One member's handle on a [`MemoryBus`]. Leaves the bus on drop.
pub struct BusMember {
    hub: Arc<Hub>,
    id: u64,
    inbound: Arc<Fanout>,
}

impl BusMember {
    /// Member id, unique within its bus.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Transport for BusMember {
    fn send(&self, message: Value) -> Result<()> {
        self.hub.broadcast(self.id, &message).map(|_| ())
    }

    fn subscribe(&self) -> Result<Inbox> {
        self.inbound.subscribe()
    }

    fn close(&self) {
        self.hub.leave(self.id);
    }

    fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }
}

impl Drop for BusMember {
    fn drop(&mut self) {
        self.hub.leave(self.id);
    }
}

impl fmt::Debug for BusMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusMember")
            .field("bus", &self.hub.name)
            .field("id", &self.id)
            .finish()
    }
}

/// One end of a point-to-point in-process link.
#[derive(Debug)]
pub struct MemoryPort {
    member: BusMember,
}

impl MemoryPort {
    /// Create a connected pair of ports.
    pub fn pair() -> (MemoryPort, MemoryPort) {
        let hub = Hub::new("port");
        let left = MemoryPort { member: hub.join() };
        let right = MemoryPort { member: hub.join() };
        (left, right)
    }
}

impl Transport for MemoryPort {
    fn send(&self, message: Value) -> Result<()> {
        self.member.send(message)
    }

    fn subscribe(&self) -> Result<Inbox> {
        self.member.subscribe()
    }

    fn close(&self) {
        self.member.close();
    }

    fn is_closed(&self) -> bool {
        self.member.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn bus_delivers_to_others_but_not_sender() {
        let bus = MemoryBus::new("test");
        let a = bus.join();
        let b = bus.join();
        let c = bus.join();
        let mut a_in = a.subscribe().unwrap();
        let mut b_in = b.subscribe().unwrap();
        let mut c_in = c.subscribe().unwrap();

        a.send(json!("hello")).unwrap();

        assert_eq!(b_in.recv().await, Some(json!("hello")));
        assert_eq!(c_in.recv().await, Some(json!("hello")));
        assert_eq!(a_in.try_recv(), None);
    }

    #[tokio::test]
    async fn bus_preserves_per_sender_order() {
        let bus = MemoryBus::new("order");
        let a = bus.join();
        let b = bus.join();
        let mut inbox = b.subscribe().unwrap();

        for i in 0..10 {
            a.send(json!(i)).unwrap();
        }
        for i in 0..10 {
            assert_eq!(inbox.recv().await, Some(json!(i)));
        }
    }

    #[tokio::test]
    async fn closed_member_cannot_send_and_stops_receiving() {
        let bus = MemoryBus::new("close");
        let a = bus.join();
        let b = bus.join();
        let mut b_in = b.subscribe().unwrap();

        b.close();
        assert!(b.is_closed());
        assert_eq!(bus.member_count(), 1);
        assert_eq!(b_in.recv().await, None);
        assert!(matches!(b.send(json!(1)), Err(TransportError::Closed)));
        // Sending into a bus with nobody listening is not an error.
        a.send(json!(1)).unwrap();
    }

    #[tokio::test]
    async fn dropping_member_leaves_bus() {
        let bus = MemoryBus::new("drop");
        let a = bus.join();
        {
            let _b = bus.join();
            assert_eq!(bus.member_count(), 2);
        }
        assert_eq!(bus.member_count(), 1);
        drop(a);
        assert_eq!(bus.member_count(), 0);
    }

    #[tokio::test]
    async fn port_pair_is_point_to_point() {
        let (left, right) = MemoryPort::pair();
        let mut left_in = left.subscribe().unwrap();
        let mut right_in = right.subscribe().unwrap();

        left.send(json!({"to": "right"})).unwrap();
        right.send(json!({"to": "left"})).unwrap();

        assert_eq!(right_in.recv().await, Some(json!({"to": "right"})));
        assert_eq!(left_in.recv().await, Some(json!({"to": "left"})));
    }
}
