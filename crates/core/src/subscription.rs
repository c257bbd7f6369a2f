//! Subscription management.
//!
//! Observer registration returning an unsubscribe token, shared by sources
//! and result views. Callbacks are `Send + Sync` so notifications can be
//! delivered from whichever thread applies a mutation.

use hashbrown::HashMap;
use std::sync::Arc;

/// Unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback type for event notifications.
pub type EventCallback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Manages subscriptions for one event stream.
pub struct SubscriptionManager<E> {
    /// Active subscriptions
    subscriptions: HashMap<SubscriptionId, EventCallback<E>>,
    /// Next subscription ID to assign
    next_id: SubscriptionId,
}

impl<E> Default for SubscriptionManager<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> SubscriptionManager<E> {
    /// Creates a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            next_id: 1,
        }
    }

    /// Subscribes with the given callback.
    ///
    /// Returns the subscription ID that can be used to unsubscribe.
    pub fn subscribe(&mut self, callback: EventCallback<E>) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.insert(id, callback);
        id
    }

    /// Unsubscribes by ID.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    /// Notifies all active subscriptions of an event.
    pub fn notify_all(&self, event: &E) {
        for callback in self.subscriptions.values() {
            callback(event);
        }
    }

    /// Returns a snapshot of the registered callbacks.
    ///
    /// Views clone the callback list out so events can be delivered after
    /// the state lock is released but still inside the mutation domain.
    pub fn callbacks(&self) -> Vec<EventCallback<E>> {
        self.subscriptions.values().cloned().collect()
    }

    /// Returns the number of active subscriptions.
    #[inline]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Returns true if there are no subscriptions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Clears all subscriptions.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_unsubscribe() {
        let mut manager: SubscriptionManager<i64> = SubscriptionManager::new();

        let id1 = manager.subscribe(Arc::new(|_| {}));
        let id2 = manager.subscribe(Arc::new(|_| {}));

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(manager.len(), 2);

        assert!(manager.unsubscribe(id1));
        assert!(!manager.unsubscribe(id1));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_notify_all() {
        let mut manager: SubscriptionManager<i64> = SubscriptionManager::new();

        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();

        manager.subscribe(Arc::new(move |v: &i64| {
            c1.fetch_add(*v as usize, Ordering::SeqCst);
        }));
        manager.subscribe(Arc::new(move |v: &i64| {
            c2.fetch_add(*v as usize * 10, Ordering::SeqCst);
        }));

        manager.notify_all(&2);

        assert_eq!(count.load(Ordering::SeqCst), 22);
    }

    #[test]
    fn test_unsubscribed_not_notified() {
        let mut manager: SubscriptionManager<()> = SubscriptionManager::new();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();

        let id = manager.subscribe(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        manager.unsubscribe(id);
        manager.notify_all(&());

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear() {
        let mut manager: SubscriptionManager<()> = SubscriptionManager::new();
        manager.subscribe(Arc::new(|_| {}));
        manager.subscribe(Arc::new(|_| {}));

        assert!(!manager.is_empty());
        manager.clear();
        assert!(manager.is_empty());
    }
}
