pub mod repository;
pub mod sqlite;

pub use repository::*;
pub use sqlite::*;

use thiserror::Error;

/// Storage-layer failures. Surfaced to callers as-is, never retried here.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage file unavailable at {path}: {reason}")]
    Unavailable { path: String, reason: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: String, reason: String },
}

impl DatabaseError {
    pub(crate) fn corrupt(table: &str, reason: impl std::fmt::Display) -> Self {
        Self::CorruptRow {
            table: table.into(),
            reason: reason.to_string(),
        }
    }
}
