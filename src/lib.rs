//! # Contacts Store
//!
//! A durable personal-contacts store with a live, ordered view.
//!
//! ## Core Concepts
//!
//! - **Persons**: records with a store-assigned id and first/last names
//! - **Row store**: an append-only, checksummed file replayed on open
//! - **Record manager**: serializes every mutation through the store and
//!   its in-memory cache
//! - **Snapshots**: the full record set, newest first, published to every
//!   subscriber after each successful mutation
//!
//! ## Example
//!
//! ```ignore
//! use contacts_store::{ManagerConfig, RecordManager};
//!
//! let manager = RecordManager::new("people.db", ManagerConfig::in_dir("./data"));
//! let updates = manager.subscribe();
//! manager.open()?;
//!
//! let ada = manager.create("Ada", "Lovelace")?;
//! manager.update(&ada.renamed("Ada", "Byron"))?;
//!
//! for snapshot in updates.snapshots() {
//!     println!("{} persons", snapshot.len());
//! }
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use config::ManagerConfig;
pub use error::{ManagerError, ManagerResult, Result, StoreError};
pub use manager::{person_schema, RecordManager, FIRST_NAME, LAST_NAME, PERSON_TABLE};
pub use store::{
    ColumnDef, CompactionStats, LogStore, LogStoreProvider, Order, Row, RowId, RowStore,
    StoreProvider, TableSchema, Values,
};
pub use subscriptions::{
    DropReason, ManagerEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    SubscriptionManager,
};
pub use types::{Person, PersonId, Snapshot};
