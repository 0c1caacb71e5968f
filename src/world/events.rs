//! Block mutation events.
//!
//! A [`BlockEventBus`] is created by the host and handed to whoever wants
//! to observe block changes. Subscribing returns a [`Subscription`] guard;
//! dropping the guard unsubscribes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::BlockState;
use crate::schema::BlockPos;

/// A block changed.
#[derive(Debug, Clone)]
pub struct BlockEvent {
    pub pos: BlockPos,
    pub old: Option<BlockState>,
    pub new: BlockState,
}

type Listener = Arc<dyn Fn(&BlockEvent) + Send + Sync>;

/// Fan-out of block events to registered listeners.
#[derive(Default)]
pub struct BlockEventBus {
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl BlockEventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a listener for as long as the returned guard lives.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&BlockEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    /// Deliver an event to every listener, on the calling thread.
    pub fn publish(&self, event: &BlockEvent) {
        // Clone out so listeners may subscribe or unsubscribe re-entrantly.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners.write().retain(|(other, _)| *other != id);
    }
}

impl std::fmt::Debug for BlockEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockEventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Guard for a registered listener.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BlockEventBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
