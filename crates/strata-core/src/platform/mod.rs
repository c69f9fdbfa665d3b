//! Dialect platforms.
//!
//! A platform translates abstract schema descriptors, pagination requests
//! and native driver errors into the concrete SQL and error kinds of one
//! dialect. Platforms operate entirely through their owning
//! [`Connection`](crate::connection::Connection), so they work over any
//! [`Driver`](crate::driver::Driver) implementation that speaks the
//! dialect.

mod mssql;
mod mysql;
mod postgres;
mod sqlite;

pub use mssql::MssqlPlatform;
pub use mysql::MySqlPlatform;
pub use postgres::PostgreSqlPlatform;
pub use sqlite::SqlitePlatform;

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::connection::Connection;
use crate::driver::DriverKind;
use crate::error::{DatabaseError, DriverError, Result};
use crate::schema::{Column, ForeignKey, Index, Table};

/// Dialect-specific DDL, introspection and data maintenance.
#[async_trait]
pub trait Platform: Send + Sync {
    /// The dialect this platform emits SQL for.
    fn kind(&self) -> DriverKind;

    /// The connection all SQL is issued through.
    fn connection(&self) -> &Connection;

    /// Checks whether a table exists, comparing names case-insensitively
    /// after schema-object-prefix substitution.
    async fn has_table(&self, table: &str) -> Result<bool>;

    /// Creates a table from the pending descriptors.
    async fn create_table(&self, table: &Table) -> Result<()>;

    /// Drops a table.
    async fn drop_table(&self, table: &str) -> Result<()>;

    /// Adds a column to an existing table.
    async fn add_column(&self, table: &str, column: &Column) -> Result<()>;

    /// Adds an index to an existing table.
    async fn add_index(&self, table: &str, index: &Index) -> Result<()>;

    /// Drops the index covering the given columns, located by its
    /// content-addressed name.
    async fn drop_index(&self, table: &str, columns: &[&str]) -> Result<()>;

    /// Adds a foreign key to an existing table.
    async fn add_foreign_key(&self, table: &str, key: &ForeignKey) -> Result<()>;

    /// Drops the foreign key matching columns and reference. A no-op when
    /// the constraint cannot be found.
    async fn drop_foreign_key(
        &self,
        table: &str,
        columns: &[&str],
        ref_table: &str,
        ref_columns: &[&str],
    ) -> Result<()>;

    /// Drops every view and table in the database.
    async fn flush_database(&self) -> Result<()>;

    /// Deletes all rows from every table except migration tracking tables,
    /// with foreign key checking disabled for the duration.
    async fn flush_data(&self) -> Result<()>;
}

/// Name pattern (before prefix substitution) of tables that
/// [`Platform::flush_data`] must leave untouched.
pub const TRACKING_TABLE_GLOB: &str = "#__strata_*";

/// Injects a dialect-correct LIMIT / OFFSET clause into `sql`.
///
/// A `limit` of 0 means "no pagination" and returns the SQL unchanged.
/// `db2_limit_offset` enables the DB2 compatibility vector for
/// limit-plus-offset queries.
pub fn paginate_sql(
    kind: DriverKind,
    server_version: Option<&str>,
    db2_limit_offset: bool,
    sql: &str,
    limit: u64,
    offset: u64,
) -> Result<String> {
    if limit == 0 {
        return Ok(sql.to_string());
    }

    match kind {
        DriverKind::Sqlite | DriverKind::MySql | DriverKind::PostgreSql => {
            Ok(format!("{sql} LIMIT {limit} OFFSET {offset}"))
        }
        DriverKind::Cubrid => Ok(format!("{sql} LIMIT {offset}, {limit}")),
        DriverKind::Mssql => {
            if offset == 0 {
                static SELECT_TOKEN: OnceLock<Regex> = OnceLock::new();
                let re = SELECT_TOKEN
                    .get_or_init(|| Regex::new(r"(?i)(?:^|\W)SELECT\W").unwrap());
                Ok(re.replace(sql, format!("${{0}}TOP {limit} ")).into_owned())
            } else {
                Err(DatabaseError::UnsupportedOperation(
                    "limit plus offset queries are not expressible on MSSQL".to_string(),
                ))
            }
        }
        DriverKind::Oracle => {
            if oracle_major_version(server_version) >= 12 {
                Ok(format!(
                    "{sql} OFFSET {offset} ROWS FETCH NEXT {limit} ROWS ONLY"
                ))
            } else {
                Ok(format!(
                    "SELECT * FROM (SELECT sq.*, ROWNUM rn FROM ({sql}) sq WHERE ROWNUM <= {}) WHERE rn > {offset}",
                    offset + limit
                ))
            }
        }
        DriverKind::Db2 => {
            if offset == 0 {
                Ok(format!("{sql} FETCH FIRST {limit} ROWS ONLY"))
            } else if db2_limit_offset {
                Ok(format!("{sql} LIMIT {limit} OFFSET {offset}"))
            } else {
                Err(DatabaseError::UnsupportedOperation(
                    "limit plus offset queries require the DB2 compatibility vector".to_string(),
                ))
            }
        }
    }
}

fn oracle_major_version(version: Option<&str>) -> u32 {
    let Some(version) = version else { return 0 };
    static MAJOR: OnceLock<Regex> = OnceLock::new();
    let re = MAJOR.get_or_init(|| Regex::new(r"(?i)([0-9]+)[cg]").unwrap());
    re.captures(version)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Classifies a native driver error into the portable taxonomy.
///
/// Unmatched errors fall through to [`DatabaseError::Generic`], never a
/// panic and never the raw driver error.
#[must_use]
pub fn classify_error(kind: DriverKind, err: &DriverError) -> DatabaseError {
    let code = err.code.as_deref();
    let message = err.message.as_str();

    match kind {
        DriverKind::Sqlite => classify_sqlite(code, message),
        DriverKind::MySql => classify_mysql(code, message),
        DriverKind::PostgreSql => classify_postgres(code, message),
        DriverKind::Mssql => classify_mssql(code, message),
        _ => DatabaseError::Generic(err.to_string()),
    }
}

const SQLITE_UNIQUE_MARKERS: [&str; 4] = [
    "must be unique",
    "is not unique",
    "are not unique",
    "UNIQUE constraint failed",
];

fn classify_sqlite(code: Option<&str>, message: &str) -> DatabaseError {
    // SQLSTATE 23000 from drivers that expose it; SQLITE_CONSTRAINT (19)
    // and its extended result codes from drivers that expose native codes.
    let constraint = match code {
        Some("23000") => true,
        Some(code) => code
            .parse::<u64>()
            .map(|n| n == 19 || n % 256 == 19)
            .unwrap_or(false),
        None => false,
    };

    if constraint {
        if SQLITE_UNIQUE_MARKERS.iter().any(|m| message.contains(m)) {
            return DatabaseError::UniqueConstraintViolation(message.to_string());
        }
        if message.to_lowercase().contains("foreign") {
            return DatabaseError::ForeignKeyConstraintViolation(message.to_string());
        }
    }

    DatabaseError::Generic(message.to_string())
}

fn classify_mysql(code: Option<&str>, message: &str) -> DatabaseError {
    match code {
        Some("1216" | "1217" | "1451" | "1452" | "1701") => {
            DatabaseError::ForeignKeyConstraintViolation(message.to_string())
        }
        Some("1062" | "1557" | "1569" | "1586") => {
            DatabaseError::UniqueConstraintViolation(message.to_string())
        }
        _ => DatabaseError::Generic(message.to_string()),
    }
}

fn classify_postgres(code: Option<&str>, message: &str) -> DatabaseError {
    match code {
        Some("23503") => DatabaseError::ForeignKeyConstraintViolation(message.to_string()),
        Some("23505") => DatabaseError::UniqueConstraintViolation(message.to_string()),
        // Partition truncate restriction surfaces as feature-not-supported.
        Some("0A000") if message.contains("truncate") => {
            DatabaseError::ForeignKeyConstraintViolation(message.to_string())
        }
        _ => DatabaseError::Generic(message.to_string()),
    }
}

fn classify_mssql(code: Option<&str>, message: &str) -> DatabaseError {
    match code {
        Some("2601" | "2627") => DatabaseError::UniqueConstraintViolation(message.to_string()),
        Some("547") => DatabaseError::ForeignKeyConstraintViolation(message.to_string()),
        _ => DatabaseError::Generic(message.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! A no-op driver for exercising SQL builders of dialects that have
    //! no embeddable server.

    use async_trait::async_trait;

    use crate::driver::{Driver, DriverKind, DriverStatement};
    use crate::error::DriverError;
    use crate::value::{Row, SqlValue};

    type DriverResult<T> = std::result::Result<T, DriverError>;

    pub struct FakeDriver {
        kind: DriverKind,
        version: Option<String>,
    }

    impl FakeDriver {
        pub fn new(kind: DriverKind) -> Self {
            Self {
                kind,
                version: None,
            }
        }

        pub fn with_version(kind: DriverKind, version: &str) -> Self {
            Self {
                kind,
                version: Some(version.to_string()),
            }
        }
    }

    #[async_trait]
    impl Driver for FakeDriver {
        fn kind(&self) -> DriverKind {
            self.kind
        }

        fn server_version(&self) -> Option<&str> {
            self.version.as_deref()
        }

        async fn exec(&self, _sql: &str) -> DriverResult<u64> {
            Ok(0)
        }

        async fn prepare(&self, _sql: &str) -> DriverResult<Box<dyn DriverStatement>> {
            Ok(Box::new(FakeStatement))
        }

        async fn begin(&self) -> DriverResult<()> {
            Ok(())
        }

        async fn commit(&self) -> DriverResult<()> {
            Ok(())
        }

        async fn rollback(&self) -> DriverResult<()> {
            Ok(())
        }

        async fn last_insert_id(&self) -> DriverResult<i64> {
            Ok(0)
        }
    }

    struct FakeStatement;

    #[async_trait]
    impl DriverStatement for FakeStatement {
        async fn execute(&mut self, _params: &[SqlValue]) -> DriverResult<u64> {
            Ok(0)
        }

        async fn fetch_next(&mut self) -> DriverResult<Option<Row>> {
            Ok(None)
        }

        async fn close(&mut self) -> DriverResult<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(code: Option<&str>, message: &str) -> DriverError {
        DriverError::new(code.map(String::from), message)
    }

    #[test]
    fn test_paginate_limit_offset_dialects() {
        let sql = "SELECT * FROM t";
        for kind in [DriverKind::Sqlite, DriverKind::MySql, DriverKind::PostgreSql] {
            assert_eq!(
                paginate_sql(kind, None, false, sql, 2, 1).unwrap(),
                "SELECT * FROM t LIMIT 2 OFFSET 1"
            );
        }
        assert_eq!(
            paginate_sql(DriverKind::Cubrid, None, false, sql, 2, 1).unwrap(),
            "SELECT * FROM t LIMIT 1, 2"
        );
    }

    #[test]
    fn test_paginate_zero_limit_is_identity() {
        let sql = "SELECT * FROM t";
        assert_eq!(
            paginate_sql(DriverKind::Mssql, None, false, sql, 0, 5).unwrap(),
            sql
        );
    }

    #[test]
    fn test_paginate_mssql_top() {
        let sql = "SELECT id FROM t WHERE x = 1";
        assert_eq!(
            paginate_sql(DriverKind::Mssql, None, false, sql, 5, 0).unwrap(),
            "SELECT TOP 5 id FROM t WHERE x = 1"
        );
        assert!(matches!(
            paginate_sql(DriverKind::Mssql, None, false, sql, 5, 2),
            Err(DatabaseError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_paginate_oracle_versions() {
        let sql = "SELECT id FROM t";
        assert_eq!(
            paginate_sql(DriverKind::Oracle, Some("Oracle Database 12c"), false, sql, 3, 4)
                .unwrap(),
            "SELECT id FROM t OFFSET 4 ROWS FETCH NEXT 3 ROWS ONLY"
        );
        assert_eq!(
            paginate_sql(DriverKind::Oracle, Some("11g"), false, sql, 3, 4).unwrap(),
            "SELECT * FROM (SELECT sq.*, ROWNUM rn FROM (SELECT id FROM t) sq WHERE ROWNUM <= 7) WHERE rn > 4"
        );
    }

    #[test]
    fn test_paginate_db2() {
        let sql = "SELECT id FROM t";
        assert_eq!(
            paginate_sql(DriverKind::Db2, None, false, sql, 3, 0).unwrap(),
            "SELECT id FROM t FETCH FIRST 3 ROWS ONLY"
        );
        assert_eq!(
            paginate_sql(DriverKind::Db2, None, true, sql, 3, 4).unwrap(),
            "SELECT id FROM t LIMIT 3 OFFSET 4"
        );
        assert!(matches!(
            paginate_sql(DriverKind::Db2, None, false, sql, 3, 4),
            Err(DatabaseError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_classify_sqlite() {
        assert!(matches!(
            classify_error(
                DriverKind::Sqlite,
                &err(Some("23000"), "UNIQUE constraint failed: t.id")
            ),
            DatabaseError::UniqueConstraintViolation(_)
        ));
        assert!(matches!(
            classify_error(DriverKind::Sqlite, &err(Some("2067"), "UNIQUE constraint failed: t.id")),
            DatabaseError::UniqueConstraintViolation(_)
        ));
        assert!(matches!(
            classify_error(DriverKind::Sqlite, &err(Some("787"), "FOREIGN KEY constraint failed")),
            DatabaseError::ForeignKeyConstraintViolation(_)
        ));
        assert!(matches!(
            classify_error(DriverKind::Sqlite, &err(Some("1"), "syntax error")),
            DatabaseError::Generic(_)
        ));
    }

    #[test]
    fn test_classify_mysql() {
        for code in ["1216", "1217", "1451", "1452", "1701"] {
            assert!(matches!(
                classify_error(DriverKind::MySql, &err(Some(code), "fk")),
                DatabaseError::ForeignKeyConstraintViolation(_)
            ));
        }
        for code in ["1062", "1557", "1569", "1586"] {
            assert!(matches!(
                classify_error(DriverKind::MySql, &err(Some(code), "dup")),
                DatabaseError::UniqueConstraintViolation(_)
            ));
        }
        assert!(matches!(
            classify_error(DriverKind::MySql, &err(Some("1064"), "syntax")),
            DatabaseError::Generic(_)
        ));
    }

    #[test]
    fn test_classify_postgres() {
        assert!(matches!(
            classify_error(DriverKind::PostgreSql, &err(Some("23503"), "fk")),
            DatabaseError::ForeignKeyConstraintViolation(_)
        ));
        assert!(matches!(
            classify_error(DriverKind::PostgreSql, &err(Some("23505"), "dup")),
            DatabaseError::UniqueConstraintViolation(_)
        ));
        assert!(matches!(
            classify_error(
                DriverKind::PostgreSql,
                &err(Some("0A000"), "cannot truncate a table referenced in a foreign key constraint")
            ),
            DatabaseError::ForeignKeyConstraintViolation(_)
        ));
        assert!(matches!(
            classify_error(DriverKind::PostgreSql, &err(Some("0A000"), "not supported")),
            DatabaseError::Generic(_)
        ));
    }

    #[test]
    fn test_classify_mssql() {
        assert!(matches!(
            classify_error(DriverKind::Mssql, &err(Some("2627"), "dup key")),
            DatabaseError::UniqueConstraintViolation(_)
        ));
        assert!(matches!(
            classify_error(DriverKind::Mssql, &err(Some("547"), "fk conflict")),
            DatabaseError::ForeignKeyConstraintViolation(_)
        ));
    }
}
