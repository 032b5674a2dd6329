//! Subscription types for live snapshot delivery.

use crate::types::Snapshot;
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Max buffered snapshots before dropping the subscriber.
    /// Default: 64
    pub buffer_size: usize,

    /// Deliver the most recent snapshot (if any) right after subscribing.
    /// Default: false, late subscribers only see later publishes.
    pub replay_latest: bool,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64,
            replay_latest: false,
        }
    }
}

impl SubscriptionConfig {
    /// Default config with replay of the latest snapshot enabled.
    pub fn replaying() -> Self {
        Self {
            replay_latest: true,
            ..Default::default()
        }
    }
}

/// Events delivered to a subscriber.
#[derive(Clone, Debug)]
pub enum ManagerEvent {
    /// The full ordered record set after a load or mutation.
    Snapshot(Snapshot),

    /// Subscription was dropped; no further events follow.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive snapshots from a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<ManagerEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ManagerEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ManagerEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ManagerEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Blocking iterator over snapshots, ending when the subscription is
    /// dropped or the manager goes away.
    pub fn snapshots(&self) -> impl Iterator<Item = Snapshot> + '_ {
        self.receiver.iter().map_while(|event| match event {
            ManagerEvent::Snapshot(snapshot) => Some(snapshot),
            ManagerEvent::Dropped { .. } => None,
        })
    }

    /// Drain buffered events and return the newest snapshot among them.
    pub fn latest(&self) -> Option<Snapshot> {
        self.receiver
            .try_iter()
            .filter_map(|event| match event {
                ManagerEvent::Snapshot(snapshot) => Some(snapshot),
                ManagerEvent::Dropped { .. } => None,
            })
            .last()
    }
}
