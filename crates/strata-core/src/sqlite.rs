//! SQLite driver backed by an `sqlx` connection pool.
//!
//! The pool is sized to a single connection: transaction nesting state
//! lives in the [`Connection`](crate::connection::Connection) wrapper and
//! only holds across calls when every statement hits the same physical
//! handle.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::query::Query;
use sqlx::{Column, Either, Executor, Row as _, TypeInfo, Value, ValueRef};

use crate::driver::{Driver, DriverKind, DriverStatement};
use crate::error::DriverError;
use crate::value::{Row, SqlValue};

/// SQLite implementation of the [`Driver`] contract.
pub struct SqliteDriver {
    pool: SqlitePool,
    server_version: Option<String>,
}

impl SqliteDriver {
    /// Connects to the given SQLite URL (e.g. `sqlite::memory:` or
    /// `sqlite:app.db`) and enables foreign key enforcement.
    pub async fn connect(url: &str) -> Result<Self, DriverError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await?;

        let version: (String,) = sqlx::query_as("SELECT sqlite_version()")
            .fetch_one(&pool)
            .await?;

        Ok(Self {
            pool,
            server_version: Some(version.0),
        })
    }

    /// Wraps an existing single-connection pool.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            server_version: None,
        }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    async fn exec(&self, sql: &str) -> Result<u64, DriverError> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn prepare(&self, sql: &str) -> Result<Box<dyn DriverStatement>, DriverError> {
        Ok(Box::new(SqliteStatement {
            pool: self.pool.clone(),
            sql: sql.to_string(),
            rows: VecDeque::new(),
        }))
    }

    async fn begin(&self) -> Result<(), DriverError> {
        self.exec("BEGIN").await.map(|_| ())
    }

    async fn commit(&self) -> Result<(), DriverError> {
        self.exec("COMMIT").await.map(|_| ())
    }

    async fn rollback(&self) -> Result<(), DriverError> {
        self.exec("ROLLBACK").await.map(|_| ())
    }

    async fn last_insert_id(&self) -> Result<i64, DriverError> {
        let row: (i64,) = sqlx::query_as("SELECT last_insert_rowid()")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

struct SqliteStatement {
    pool: SqlitePool,
    sql: String,
    rows: VecDeque<Row>,
}

#[async_trait]
impl DriverStatement for SqliteStatement {
    async fn execute(&mut self, params: &[SqlValue]) -> Result<u64, DriverError> {
        self.rows.clear();

        let mut query = sqlx::query(&self.sql);
        for value in params {
            query = bind_value(query, value.clone());
        }

        let mut affected = 0;
        let mut stream = (&self.pool).fetch_many(query);

        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(result) => affected += result.rows_affected(),
                Either::Right(row) => self.rows.push_back(decode_row(&row)?),
            }
        }

        Ok(affected)
    }

    async fn fetch_next(&mut self) -> Result<Option<Row>, DriverError> {
        Ok(self.rows.pop_front())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        // Result sets are fully drained at execute time, so closing only
        // discards what has not been fetched yet.
        self.rows.clear();
        Ok(())
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<i64>),
        SqlValue::Integer(i) => query.bind(i),
        SqlValue::Double(d) => query.bind(d),
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Blob(b) => query.bind(b),
        SqlValue::Bool(b) => query.bind(b),
    }
}

fn decode_row(row: &SqliteRow) -> Result<Row, DriverError> {
    let mut columns = Vec::with_capacity(row.columns().len());

    for column in row.columns() {
        let raw = row.try_get_raw(column.ordinal())?;

        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let owned = ValueRef::to_owned(&raw);
            match raw.type_info().name() {
                "BOOLEAN" => SqlValue::Bool(owned.try_decode()?),
                "INTEGER" | "INT" | "BIGINT" | "INT4" | "INT8" => {
                    SqlValue::Integer(owned.try_decode()?)
                }
                "REAL" | "NUMERIC" | "FLOAT" | "DOUBLE" => SqlValue::Double(owned.try_decode()?),
                "BLOB" => SqlValue::Blob(owned.try_decode()?),
                _ => SqlValue::Text(owned.try_decode()?),
            }
        };

        columns.push((column.name().to_string(), value));
    }

    Ok(Row::new(columns))
}
