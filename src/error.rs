//! Error types for the row store and the record manager.

use crate::types::PersonId;
use thiserror::Error;

/// Error type for row store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store is locked by another handle")]
    Locked,

    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table {0} exists with a different schema")]
    SchemaMismatch(String),

    #[error("Unknown column {column} in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Constraint failed: {0}")]
    Constraint(String),
}

impl StoreError {
    /// True for failures caused by the data or schema rather than the medium.
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            StoreError::Constraint(_)
                | StoreError::UnknownColumn { .. }
                | StoreError::TableNotFound(_)
                | StoreError::SchemaMismatch(_)
        )
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for row store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Why a record manager operation failed.
///
/// Every manager operation returns one of these instead of panicking, so the
/// caller always has a success/failure signal plus the diagnostic.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Record manager is not open")]
    NotOpen,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("No person with id {0}")]
    NoMatch(PersonId),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl From<StoreError> for ManagerError {
    fn from(e: StoreError) -> Self {
        if e.is_constraint() {
            ManagerError::ConstraintViolation(e.to_string())
        } else {
            ManagerError::StoreUnavailable(e)
        }
    }
}

/// Result type for record manager operations.
pub type ManagerResult<T> = std::result::Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        let constraint: ManagerError = StoreError::Constraint("first_name is empty".into()).into();
        assert!(matches!(constraint, ManagerError::ConstraintViolation(_)));

        let column: ManagerError = StoreError::UnknownColumn {
            table: "person".into(),
            column: "age".into(),
        }
        .into();
        assert!(matches!(column, ManagerError::ConstraintViolation(_)));

        let io: ManagerError =
            StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")).into();
        assert!(matches!(io, ManagerError::StoreUnavailable(StoreError::Io(_))));

        let locked: ManagerError = StoreError::Locked.into();
        assert!(matches!(locked, ManagerError::StoreUnavailable(StoreError::Locked)));
    }
}
