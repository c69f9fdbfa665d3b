//! Error types for the migration system.

use std::path::PathBuf;

/// Errors that can occur during migration operations.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// A migration version is not a 14-digit `YYYYMMDDHHMMSS` stamp.
    #[error("Invalid migration version \"{0}\": expected 14 digits (YYYYMMDDHHMMSS)")]
    InvalidVersion(String),

    /// Two migrations were registered under the same version.
    #[error("Migration version \"{0}\" is already registered")]
    DuplicateVersion(String),

    /// A version was referenced that no registered migration carries.
    #[error("Migration \"{0}\" is not registered")]
    MigrationNotFound(String),

    /// Downgrades are not part of the migration model.
    #[error("Migrating down is not supported; restore from a backup instead")]
    DowngradeNotSupported,

    /// A migration file already exists at the target path.
    #[error("Migration file already exists: {0}")]
    MigrationExists(PathBuf),

    /// Database error during migration execution.
    #[error(transparent)]
    Database(#[from] strata_core::DatabaseError),

    /// IO error reading or writing migration files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
