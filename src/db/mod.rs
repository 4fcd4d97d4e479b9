pub mod sqlite;

pub use sqlite::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt cache row: {0}")]
    CorruptRow(String),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Failed to prepare database directory {path}: {reason}")]
    Directory { path: String, reason: String },
}
