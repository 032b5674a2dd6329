//! Subscription manager for broadcasting snapshots.

use crate::types::Snapshot;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::types::{DropReason, ManagerEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId};

/// Internal subscription state.
struct Subscription {
    sender: Sender<ManagerEvent>,
}

impl Subscription {
    /// Try to send an event. Returns the drop reason if the subscriber can't take it.
    fn try_send(&self, event: ManagerEvent) -> Result<(), DropReason> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DropReason::BufferOverflow),
            Err(TrySendError::Disconnected(_)) => Err(DropReason::Disconnected),
        }
    }
}

/// Registry of subscribers; fans every snapshot out to all of them.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Most recently broadcast snapshot, for replaying subscribers.
    latest: RwLock<Option<Snapshot>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            latest: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription.
    ///
    /// With `replay_latest` the current snapshot is queued before the
    /// subscription becomes visible to broadcasts, so the subscriber sees
    /// every version from then on exactly once.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));
        let subscription = Subscription { sender };

        let mut subs = self.subscriptions.write();
        if config.replay_latest {
            if let Some(snapshot) = self.latest.read().clone() {
                // Fresh channel with capacity >= 1, cannot fail
                let _ = subscription.try_send(ManagerEvent::Snapshot(snapshot));
            }
        }
        subs.insert(id, subscription);

        debug!(subscription = id.0, replay = config.replay_latest, "Subscribed");
        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up. Returns false if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        match subs.remove(&id) {
            Some(sub) => {
                // Best effort
                let _ = sub.try_send(ManagerEvent::Dropped {
                    reason: DropReason::Unsubscribed,
                });
                debug!(subscription = id.0, "Unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// The most recently broadcast snapshot.
    pub fn latest(&self) -> Option<Snapshot> {
        self.latest.read().clone()
    }

    /// Broadcast a snapshot to all subscribers. Drops subscribers that fail to receive.
    ///
    /// Callers must serialize broadcasts to keep versions in order.
    pub fn broadcast(&self, snapshot: Snapshot) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            *self.latest.write() = Some(snapshot.clone());
            for (id, sub) in subs.iter() {
                if let Err(reason) = sub.try_send(ManagerEvent::Snapshot(snapshot.clone())) {
                    to_remove.push((*id, reason));
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for (id, reason) in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(subscription = id.0, ?reason, "Dropping subscriber");
                    // Try to notify about the drop (might fail, that's ok)
                    let _ = sub.try_send(ManagerEvent::Dropped { reason });
                }
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Person, PersonId};
    use std::time::Duration;

    fn snapshot(version: u64, ids: &[i64]) -> Snapshot {
        let cache: Vec<Person> = ids
            .iter()
            .map(|id| Person::new(PersonId(*id), "First", "Last"))
            .collect();
        Snapshot::from_cache(version, &cache)
    }

    fn expect_snapshot(handle: &SubscriptionHandle) -> Snapshot {
        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            ManagerEvent::Snapshot(s) => s,
            other => panic!("Expected Snapshot event, got {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = SubscriptionManager::new();

        let handle = manager.subscribe(SubscriptionConfig::default());
        assert_eq!(manager.subscription_count(), 1);

        assert!(manager.unsubscribe(handle.id));
        assert!(!manager.unsubscribe(handle.id));
        assert_eq!(manager.subscription_count(), 0);

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        assert!(matches!(
            event,
            ManagerEvent::Dropped {
                reason: DropReason::Unsubscribed
            }
        ));
    }

    #[test]
    fn test_broadcast_to_all() {
        let manager = SubscriptionManager::new();
        let a = manager.subscribe(SubscriptionConfig::default());
        let b = manager.subscribe(SubscriptionConfig::default());

        manager.broadcast(snapshot(1, &[1, 2]));

        for handle in [&a, &b] {
            let s = expect_snapshot(handle);
            assert_eq!(s.version, 1);
            assert_eq!(s.ids(), vec![PersonId(2), PersonId(1)]);
        }
    }

    #[test]
    fn test_late_subscriber_without_replay() {
        let manager = SubscriptionManager::new();
        manager.broadcast(snapshot(1, &[1]));

        let handle = manager.subscribe(SubscriptionConfig::default());
        assert!(handle.recv_timeout(Duration::from_millis(50)).is_err());

        manager.broadcast(snapshot(2, &[1, 2]));
        assert_eq!(expect_snapshot(&handle).version, 2);
    }

    #[test]
    fn test_late_subscriber_with_replay() {
        let manager = SubscriptionManager::new();

        // Nothing to replay yet
        let early = manager.subscribe(SubscriptionConfig::replaying());
        assert!(early.try_recv().is_err());

        manager.broadcast(snapshot(1, &[1]));
        let late = manager.subscribe(SubscriptionConfig::replaying());
        assert_eq!(expect_snapshot(&late).version, 1);

        manager.broadcast(snapshot(2, &[1, 2]));
        assert_eq!(expect_snapshot(&late).version, 2);
        assert_eq!(manager.latest().unwrap().version, 2);
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let manager = SubscriptionManager::new();
        let config = SubscriptionConfig {
            buffer_size: 2,
            ..Default::default()
        };
        let _handle = manager.subscribe(config);

        for version in 1..=10 {
            manager.broadcast(snapshot(version, &[1]));
        }

        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_drop_disconnected_subscriber() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig::default());
        let keep = manager.subscribe(SubscriptionConfig::default());
        drop(handle);

        manager.broadcast(snapshot(1, &[1]));

        assert_eq!(manager.subscription_count(), 1);
        assert_eq!(expect_snapshot(&keep).version, 1);
    }
}
