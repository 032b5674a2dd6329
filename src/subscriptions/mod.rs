//! Subscription system for live record snapshots.
//!
//! Every successful load or mutation publishes the full ordered record set;
//! subscribers never see deltas.
//!
//! Subscriptions support:
//! - Optional replay of the latest snapshot on subscribe
//! - Bounded buffers with slow-subscriber dropping
//! - Explicit unsubscribe
//!
//! # Example
//!
//! ```ignore
//! let handle = manager.subscribe();
//!
//! for snapshot in handle.snapshots() {
//!     for person in snapshot.persons.iter() {
//!         println!("{}: {}", person.id, person);
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{DropReason, ManagerEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId};
