//! In-process publish/subscribe for summary lines.
//!
//! Publishers hand a complete JSONL line to [`LiveBus::publish`]; every
//! current subscriber receives it through its own unbounded channel, so a
//! slow or dead subscriber can never stall a publisher or its peers. A
//! subscriber whose receiving end has gone away is dropped on the next
//! publish.
//!
//! The bus also owns the session hook: while a capture session is active,
//! every published line is appended to the session journal.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::mpsc;

use crate::session::SessionManager;

/// Handle returned by [`LiveBus::subscribe`].
///
/// Dropping the receiver is the normal way to unsubscribe; the bus notices
/// on the next publish. Calling [`LiveBus::unsubscribe`] with the id removes
/// the sender eagerly.
pub struct BusSubscription {
    /// Identity of this subscriber within the bus.
    pub id: u64,
    /// Stream of published lines, in publish order.
    pub receiver: mpsc::UnboundedReceiver<String>,
}

/// Process-wide line bus. One instance per orchestrator.
#[derive(Debug, Default)]
pub struct LiveBus {
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
    session_hook: Mutex<Option<Arc<SessionManager>>>,
}

impl LiveBus {
    /// New bus with no subscribers and no session hook.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and return its handle.
    pub fn subscribe(&self) -> BusSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_subscribers().insert(id, tx);
        BusSubscription { id, receiver: rx }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        self.lock_subscribers().remove(&id);
    }

    /// Number of currently registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    /// Route published lines into the given session manager.
    pub fn set_session_hook(&self, sessions: Arc<SessionManager>) {
        *self.lock_hook() = Some(sessions);
    }

    /// Detach the session hook.
    pub fn clear_session_hook(&self) {
        *self.lock_hook() = None;
    }

    /// Deliver a line to every subscriber and to the active session.
    ///
    /// Delivery is best effort: a subscriber whose channel is closed is
    /// removed and the remaining subscribers are unaffected. Per-subscriber
    /// ordering equals publish order.
    pub fn publish(&self, line: &str) {
        let snapshot: Vec<(u64, mpsc::UnboundedSender<String>)> = self
            .lock_subscribers()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(line.to_string()).is_err() {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.lock_subscribers();
            for id in dead {
                subscribers.remove(&id);
            }
        }

        let hook = self.lock_hook().clone();
        if let Some(sessions) = hook {
            sessions.add_frame(line);
        }
    }

    fn lock_subscribers(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<String>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_hook(&self) -> std::sync::MutexGuard<'_, Option<Arc<SessionManager>>> {
        self.session_hook.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_publish_order() {
        let bus = LiveBus::new();
        let mut sub = bus.subscribe();

        bus.publish("one");
        bus.publish("two");
        bus.publish("three");

        assert_eq!(sub.receiver.try_recv().ok().as_deref(), Some("one"));
        assert_eq!(sub.receiver.try_recv().ok().as_deref(), Some("two"));
        assert_eq!(sub.receiver.try_recv().ok().as_deref(), Some("three"));
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn dead_subscriber_is_isolated_and_pruned() {
        let bus = LiveBus::new();
        let dead = bus.subscribe();
        let mut live = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(dead.receiver);
        bus.publish("line");

        assert_eq!(live.receiver.try_recv().ok().as_deref(), Some("line"));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = LiveBus::new();
        let mut sub = bus.subscribe();

        bus.unsubscribe(sub.id);
        bus.publish("line");

        assert!(sub.receiver.try_recv().is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        let bus = LiveBus::new();
        bus.publish("line");
        assert_eq!(bus.subscriber_count(), 0);
    }
}
