//! Core types for person records.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Unique identifier for a person (assigned by the store, never reused).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PersonId(pub i64);

impl fmt::Debug for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PersonId({})", self.0)
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single person record.
///
/// Identity is the `id`: two values with the same id are equal even if their
/// names differ. The natural ordering puts the most recently created person
/// first (larger id sorts earlier).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Person {
    /// Unique identifier (assigned by store).
    pub id: PersonId,

    /// Given name, never empty.
    pub first_name: String,

    /// Family name, never empty.
    pub last_name: String,
}

impl Person {
    pub fn new(id: PersonId, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    /// Copy of this person with replaced names, keeping the id.
    pub fn renamed(&self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self::new(self.id, first_name, last_name)
    }

    /// Compare the name fields, which `==` ignores.
    pub fn has_same_names(&self, other: &Person) -> bool {
        self.first_name == other.first_name && self.last_name == other.last_name
    }
}

impl PartialEq for Person {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Person {}

impl Hash for Person {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Person {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Person {
    fn cmp(&self, other: &Self) -> Ordering {
        other.id.cmp(&self.id)
    }
}

impl fmt::Display for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.first_name, self.last_name)
    }
}

/// Check that a name field holds something other than whitespace.
pub(crate) fn validate_name(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{} must not be empty", field))
    } else {
        Ok(())
    }
}

/// The full ordered record set, as published to subscribers.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Publish counter, starting at 1 for the first snapshot of a manager.
    pub version: u64,

    /// All persons, sorted by id descending.
    pub persons: Arc<Vec<Person>>,
}

impl Snapshot {
    /// Build a snapshot from the cache, applying the display ordering.
    pub(crate) fn from_cache(version: u64, cache: &[Person]) -> Self {
        let mut persons = cache.to_vec();
        persons.sort();
        Self {
            version,
            persons: Arc::new(persons),
        }
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn get(&self, id: PersonId) -> Option<&Person> {
        self.persons.iter().find(|p| p.id == id)
    }

    pub fn ids(&self) -> Vec<PersonId> {
        self.persons.iter().map(|p| p.id).collect()
    }
}
