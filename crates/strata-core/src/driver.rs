//! Driver abstraction over native database handles.
//!
//! A [`Driver`] wraps one physical connection handle. All calls are issued
//! from a single logical thread of control at a time; there is no internal
//! locking beyond what the wrapped handle requires.

use async_trait::async_trait;

use crate::error::DriverError;
use crate::value::{Row, SqlValue};

/// The SQL dialect a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    Sqlite,
    MySql,
    PostgreSql,
    Mssql,
    Oracle,
    Db2,
    Cubrid,
}

impl DriverKind {
    /// Canonical lowercase driver identifier.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
            Self::Mssql => "mssql",
            Self::Oracle => "oracle",
            Self::Db2 => "db2",
            Self::Cubrid => "cubrid",
        }
    }

    /// Whether the dialect supports savepoints for nested transactions.
    #[must_use]
    pub fn supports_savepoints(self) -> bool {
        !matches!(self, Self::Cubrid)
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A native driver handle adapted to the access layer.
#[async_trait]
pub trait Driver: Send + Sync {
    /// The dialect this handle speaks.
    fn kind(&self) -> DriverKind;

    /// Server software version, when the driver exposes one.
    fn server_version(&self) -> Option<&str>;

    /// Executes a parameterless SQL statement, returning affected rows.
    async fn exec(&self, sql: &str) -> Result<u64, DriverError>;

    /// Compiles a statement. `sql` uses the driver's native placeholder
    /// style; parameter values are supplied positionally on execute.
    async fn prepare(&self, sql: &str) -> Result<Box<dyn DriverStatement>, DriverError>;

    /// Begins a top-level native transaction.
    async fn begin(&self) -> Result<(), DriverError>;

    /// Commits the top-level native transaction.
    async fn commit(&self) -> Result<(), DriverError>;

    /// Rolls back the top-level native transaction.
    async fn rollback(&self) -> Result<(), DriverError>;

    /// Last value generated for an auto-increment/identity column.
    async fn last_insert_id(&self) -> Result<i64, DriverError>;
}

/// A compiled native cursor.
///
/// Cursors are stateful: [`DriverStatement::execute`] resets the result
/// set, and fetching past the end yields `None` rather than an error.
#[async_trait]
pub trait DriverStatement: Send {
    /// Executes with the given positional parameters, returning the number
    /// of affected rows (meaningful for non-SELECT statements).
    async fn execute(&mut self, params: &[SqlValue]) -> Result<u64, DriverError>;

    /// Fetches the next result row, or `None` at end of result set.
    async fn fetch_next(&mut self) -> Result<Option<Row>, DriverError>;

    /// Closes the cursor, draining any pending result sets.
    async fn close(&mut self) -> Result<(), DriverError>;
}
