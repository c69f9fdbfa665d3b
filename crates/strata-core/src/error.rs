//! Portable database error taxonomy.
//!
//! Native driver errors are never surfaced directly: every connection and
//! platform boundary classifies them through the dialect-specific mapping
//! before re-throwing one of these kinds. Unmatched errors fall through to
//! [`DatabaseError::Generic`].

/// Errors produced by the database access layer.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// A unique or primary key constraint was violated.
    #[error("Unique constraint violation: {0}")]
    UniqueConstraintViolation(String),

    /// A foreign key constraint was violated.
    #[error("Foreign key constraint violation: {0}")]
    ForeignKeyConstraintViolation(String),

    /// A database error with no further classification.
    #[error("Database error: {0}")]
    Generic(String),

    /// The requested operation cannot be expressed on this dialect.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A table expected to exist could not be located in the catalog.
    #[error("Database table \"{0}\" not found")]
    TableNotFound(String),

    /// Transaction state machine misuse (commit/rollback without a begin).
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A statement parameter was referenced but never bound.
    #[error("Parameter \":{0}\" has not been bound")]
    UnboundParameter(String),
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// A raw error surfaced by a native driver, prior to classification.
///
/// `code` carries whatever the driver exposes: an SQLSTATE, a native error
/// number, or nothing at all. Classification matches on both code and
/// message, per dialect.
#[derive(Debug, Clone)]
pub struct DriverError {
    pub code: Option<String>,
    pub message: String,
}

impl DriverError {
    #[must_use]
    pub fn new(code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => Self {
                code: db.code().map(|c| c.to_string()),
                message: db.message().to_string(),
            },
            other => Self {
                code: None,
                message: other.to_string(),
            },
        }
    }
}
