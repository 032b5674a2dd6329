//! Record manager: the single gateway to the person record set.
//!
//! The manager owns the opened store and an in-memory cache of every
//! person. Each mutation runs under one lock: store write, cache update and
//! snapshot publish happen together, so subscribers see versions in the
//! order mutations were applied and the cache never drifts from the store.

use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult, StoreError};
use crate::store::{
    ColumnDef, CompactionStats, LogStoreProvider, Order, Row, RowStore, StoreProvider,
    TableSchema, Values,
};
use crate::subscriptions::{SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager};
use crate::types::{validate_name, Person, PersonId, Snapshot};
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Table holding person rows.
pub const PERSON_TABLE: &str = "person";

/// First-name column.
pub const FIRST_NAME: &str = "first_name";

/// Last-name column.
pub const LAST_NAME: &str = "last_name";

/// Schema of the person table: implicit integer id plus two required text columns.
pub fn person_schema() -> TableSchema {
    TableSchema::new(
        PERSON_TABLE,
        vec![ColumnDef::required(FIRST_NAME), ColumnDef::required(LAST_NAME)],
    )
}

fn person_values(first_name: &str, last_name: &str) -> Values {
    let mut values = Values::new();
    values.insert(FIRST_NAME.to_string(), first_name.to_string());
    values.insert(LAST_NAME.to_string(), last_name.to_string());
    values
}

fn person_from_row(row: &Row) -> Result<Person, StoreError> {
    Ok(Person::new(
        PersonId(row.id),
        row.get(FIRST_NAME)?,
        row.get(LAST_NAME)?,
    ))
}

/// State guarded by the mutation lock.
struct State {
    /// Opened store (None until `open` succeeds, and after `close`).
    store: Option<Box<dyn RowStore>>,
    /// All persons in store order (ascending id).
    cache: Vec<Person>,
    /// Version of the last published snapshot.
    version: u64,
}

impl State {
    fn store(&mut self) -> ManagerResult<&mut Box<dyn RowStore>> {
        self.store.as_mut().ok_or(ManagerError::NotOpen)
    }
}

/// Serializes all access to one person store and publishes snapshots.
///
/// Share it between threads with an `Arc`; every method takes `&self`.
pub struct RecordManager {
    storage_id: String,
    config: ManagerConfig,
    provider: Arc<dyn StoreProvider>,
    state: Mutex<State>,
    subscriptions: SubscriptionManager,
}

impl RecordManager {
    /// Create a manager for a file-backed store named `storage_id` inside
    /// `config.data_dir`. Nothing is opened until [`open`](Self::open).
    pub fn new(storage_id: impl Into<String>, config: ManagerConfig) -> Self {
        let provider = Arc::new(LogStoreProvider::new(config.sync_interval));
        Self::with_provider(storage_id, config, provider)
    }

    /// Create a manager that opens its store through `provider`.
    pub fn with_provider(
        storage_id: impl Into<String>,
        config: ManagerConfig,
        provider: Arc<dyn StoreProvider>,
    ) -> Self {
        Self {
            storage_id: storage_id.into(),
            config,
            provider,
            state: Mutex::new(State {
                store: None,
                cache: Vec::new(),
                version: 0,
            }),
            subscriptions: SubscriptionManager::new(),
        }
    }

    pub fn storage_id(&self) -> &str {
        &self.storage_id
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().store.is_some()
    }

    // --- Lifecycle ---

    /// Open the store, ensure the person table exists, load every row and
    /// publish the initial snapshot.
    ///
    /// Opening an already open manager succeeds without doing anything. On
    /// failure the manager stays closed and nothing is published.
    pub fn open(&self) -> ManagerResult<()> {
        let mut state = self.state.lock();
        if state.store.is_some() {
            return Ok(());
        }

        let (store, cache) = report("open", self.load())?;
        info!(
            storage = %self.storage_id,
            persons = cache.len(),
            "Opened record manager"
        );
        state.store = Some(store);
        state.cache = cache;
        self.publish(&mut state);
        Ok(())
    }

    fn load(&self) -> ManagerResult<(Box<dyn RowStore>, Vec<Person>)> {
        let location = self
            .config
            .resolve(&self.storage_id)
            .map_err(ManagerError::StoreUnavailable)?;
        fs::create_dir_all(&self.config.data_dir)
            .map_err(|e| ManagerError::StoreUnavailable(e.into()))?;

        let mut store = self
            .provider
            .open(&location)
            .map_err(ManagerError::StoreUnavailable)?;

        match Self::load_persons(store.as_mut()) {
            Ok(cache) => Ok((store, cache)),
            Err(e) => {
                if let Err(close_err) = store.close() {
                    warn!(error = %close_err, "Failed to close store after load error");
                }
                Err(ManagerError::StoreUnavailable(e))
            }
        }
    }

    fn load_persons(store: &mut dyn RowStore) -> Result<Vec<Person>, StoreError> {
        if store.create_table(&person_schema())? {
            debug!(table = PERSON_TABLE, "Created table");
        }
        store
            .query(PERSON_TABLE, &[FIRST_NAME, LAST_NAME], Order::Ascending)?
            .iter()
            .map(person_from_row)
            .collect()
    }

    /// Close the store handle.
    ///
    /// The cache and the last snapshot are kept, but every other operation
    /// fails with `NotOpen` until the manager is opened again.
    pub fn close(&self) -> ManagerResult<()> {
        let mut state = self.state.lock();
        let result = state
            .store
            .take()
            .ok_or(ManagerError::NotOpen)
            .and_then(|store| store.close().map_err(ManagerError::StoreUnavailable));
        report("close", result)?;

        info!(storage = %self.storage_id, "Closed record manager");
        Ok(())
    }

    // --- Mutations ---

    /// Insert a new person and return it with the id the store assigned.
    pub fn create(&self, first_name: &str, last_name: &str) -> ManagerResult<Person> {
        let mut state = self.state.lock();
        let person = report("create", Self::insert_person(&mut state, first_name, last_name))?;

        state.cache.push(person.clone());
        debug!(id = %person.id, "Created person");
        self.publish(&mut state);
        Ok(person)
    }

    fn insert_person(state: &mut State, first_name: &str, last_name: &str) -> ManagerResult<Person> {
        let store = state.store()?;
        validate_name(FIRST_NAME, first_name).map_err(ManagerError::ConstraintViolation)?;
        validate_name(LAST_NAME, last_name).map_err(ManagerError::ConstraintViolation)?;

        let id = store.insert(PERSON_TABLE, person_values(first_name, last_name))?;
        Ok(Person::new(PersonId(id), first_name, last_name))
    }

    /// Replace the names of the stored person with `person.id`.
    pub fn update(&self, person: &Person) -> ManagerResult<()> {
        let mut state = self.state.lock();
        report("update", Self::update_person(&mut state, person))?;

        match state.cache.iter_mut().find(|p| p.id == person.id) {
            Some(cached) => *cached = person.clone(),
            None => state.cache.push(person.clone()),
        }
        debug!(id = %person.id, "Updated person");
        self.publish(&mut state);
        Ok(())
    }

    fn update_person(state: &mut State, person: &Person) -> ManagerResult<()> {
        let store = state.store()?;
        validate_name(FIRST_NAME, &person.first_name).map_err(ManagerError::ConstraintViolation)?;
        validate_name(LAST_NAME, &person.last_name).map_err(ManagerError::ConstraintViolation)?;

        let affected = store.update(
            PERSON_TABLE,
            person_values(&person.first_name, &person.last_name),
            person.id.0,
        )?;
        if affected == 0 {
            return Err(ManagerError::NoMatch(person.id));
        }
        Ok(())
    }

    /// Remove the stored person with `person.id`.
    pub fn delete(&self, person: &Person) -> ManagerResult<()> {
        let mut state = self.state.lock();
        let result = state.store().and_then(|store| {
            match store.delete(PERSON_TABLE, person.id.0)? {
                0 => Err(ManagerError::NoMatch(person.id)),
                _ => Ok(()),
            }
        });
        report("delete", result)?;

        state.cache.retain(|p| p != person);
        debug!(id = %person.id, "Deleted person");
        self.publish(&mut state);
        Ok(())
    }

    /// Rewrite the store without obsolete history. The record set does not
    /// change, so nothing is published.
    pub fn compact(&self) -> ManagerResult<CompactionStats> {
        let mut state = self.state.lock();
        let stats = report(
            "compact",
            state
                .store()
                .and_then(|store| store.compact().map_err(ManagerError::StoreUnavailable)),
        )?;

        info!(
            storage = %self.storage_id,
            entries_before = stats.entries_before,
            entries_after = stats.entries_after,
            "Compacted store"
        );
        Ok(stats)
    }

    // --- Queries ---

    /// All persons in display order (id descending).
    pub fn persons(&self) -> ManagerResult<Vec<Person>> {
        let mut state = self.state.lock();
        report("persons", state.store().map(|_| ()))?;

        let mut persons = state.cache.clone();
        persons.sort();
        Ok(persons)
    }

    /// The last published snapshot, still available after `close`.
    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.subscriptions.latest()
    }

    // --- Subscriptions ---

    /// Subscribe with the configured defaults.
    pub fn subscribe(&self) -> SubscriptionHandle {
        self.subscribe_with(self.config.subscription.clone())
    }

    pub fn subscribe_with(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    /// Publish the cache. Must be called with the state lock held.
    fn publish(&self, state: &mut State) {
        state.version += 1;
        let snapshot = Snapshot::from_cache(state.version, &state.cache);
        debug!(version = snapshot.version, persons = snapshot.len(), "Publishing snapshot");
        self.subscriptions.broadcast(snapshot);
    }
}

impl Drop for RecordManager {
    fn drop(&mut self) {
        if let Some(store) = self.state.get_mut().store.take() {
            if let Err(e) = store.close() {
                warn!(storage = %self.storage_id, error = %e, "Failed to close store on drop");
            }
        }
    }
}

/// Log a failed operation to the diagnostics channel and pass the result on.
fn report<T>(operation: &'static str, result: ManagerResult<T>) -> ManagerResult<T> {
    if let Err(ref e) = result {
        warn!(operation, error = %e, "Record manager operation failed");
    }
    result
}
