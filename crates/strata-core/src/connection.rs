//! Logical connection over a [`Driver`].
//!
//! A `Connection` owns exactly one driver handle and layers on top of it:
//! nested transactions via savepoints, schema object prefix substitution,
//! identifier quoting, named parameter statements and portable error
//! classification. Cloning a `Connection` is cheap and yields a second
//! handle to the same underlying state.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;
use tracing::trace;

use crate::driver::{Driver, DriverKind};
use crate::error::{DatabaseError, DriverError, Result};
use crate::hooks::{ConnectionDecorator, ParamEncoder, TransactionCoordinator};
use crate::platform::{
    self, MssqlPlatform, MySqlPlatform, Platform, PostgreSqlPlatform, SqlitePlatform,
};
use crate::statement::Statement;
use crate::value::SqlValue;

/// Placeholder token replaced by the connection's table prefix in every
/// prepared SQL string and in explicitly prefixed names.
pub const SCHEMA_OBJECT_PREFIX: &str = "#__";

struct ConnectionInner {
    driver: Arc<dyn Driver>,
    prefix: RwLock<String>,
    depth: AtomicU32,
    encoders: RwLock<Vec<Arc<dyn ParamEncoder>>>,
    decorators: RwLock<Vec<Arc<dyn ConnectionDecorator>>>,
    coordinator: RwLock<Option<Arc<dyn TransactionCoordinator>>>,
    db2_limit_offset: AtomicBool,
}

/// A logical database connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wraps a driver handle with an empty table prefix.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                driver,
                prefix: RwLock::new(String::new()),
                depth: AtomicU32::new(0),
                encoders: RwLock::new(Vec::new()),
                decorators: RwLock::new(Vec::new()),
                coordinator: RwLock::new(None),
                db2_limit_offset: AtomicBool::new(false),
            }),
        }
    }

    /// The dialect of the underlying driver.
    #[must_use]
    pub fn kind(&self) -> DriverKind {
        self.inner.driver.kind()
    }

    /// Server software version, when the driver exposes one.
    #[must_use]
    pub fn server_version(&self) -> Option<String> {
        self.inner.driver.server_version().map(str::to_string)
    }

    /// Sets the table prefix substituted for [`SCHEMA_OBJECT_PREFIX`].
    pub fn set_prefix(&self, prefix: impl Into<String>) {
        *self.inner.prefix.write().expect("prefix lock") = prefix.into();
    }

    /// The current table prefix.
    #[must_use]
    pub fn prefix(&self) -> String {
        self.inner.prefix.read().expect("prefix lock").clone()
    }

    /// Replaces the leading [`SCHEMA_OBJECT_PREFIX`] token in a name with
    /// the configured prefix.
    #[must_use]
    pub fn apply_prefix(&self, value: &str) -> String {
        value.replace(SCHEMA_OBJECT_PREFIX, &self.prefix())
    }

    /// Enables the DB2 compatibility vector for limit-plus-offset queries.
    pub fn set_db2_limit_offset(&self, enabled: bool) {
        self.inner.db2_limit_offset.store(enabled, Ordering::SeqCst);
    }

    /// Registers a parameter encoder at the end of the encoder chain.
    pub fn register_param_encoder(&self, encoder: Arc<dyn ParamEncoder>) {
        self.inner
            .encoders
            .write()
            .expect("encoder lock")
            .push(encoder);
    }

    /// Registers an SQL decorator at the end of the decorator chain.
    pub fn register_decorator(&self, decorator: Arc<dyn ConnectionDecorator>) {
        self.inner
            .decorators
            .write()
            .expect("decorator lock")
            .push(decorator);
    }

    /// Installs a coordinator for outermost transaction boundaries.
    pub fn set_transaction_coordinator(&self, coordinator: Arc<dyn TransactionCoordinator>) {
        *self.inner.coordinator.write().expect("coordinator lock") = Some(coordinator);
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Current transaction nesting depth. 0 means autocommit.
    #[must_use]
    pub fn transaction_depth(&self) -> u32 {
        self.inner.depth.load(Ordering::SeqCst)
    }

    /// Whether a transaction is active at any depth.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction_depth() > 0
    }

    /// Begins a transaction. At depth 0 this starts a native transaction
    /// (or delegates to the coordinator); at deeper levels it creates a
    /// savepoint named after the level.
    ///
    /// The depth counter only moves after the native operation succeeds, so
    /// a failed begin leaves the state machine where it was.
    pub async fn begin_transaction(&self) -> Result<()> {
        let depth = self.transaction_depth();

        if depth == 0 {
            let coordinator = self.coordinator();
            match coordinator {
                Some(c) => c.begin(self).await?,
                None => self
                    .inner
                    .driver
                    .begin()
                    .await
                    .map_err(|e| self.classify(e))?,
            }
        } else {
            self.exec_savepoint(SavepointOp::Create, depth).await?;
        }

        self.inner.depth.store(depth + 1, Ordering::SeqCst);
        trace!(depth = depth + 1, "transaction begun");
        Ok(())
    }

    /// Commits the innermost transaction level.
    ///
    /// Committing a nested level re-establishes its savepoint, releasing
    /// nothing: the enclosing transaction still decides the final outcome.
    pub async fn commit(&self) -> Result<()> {
        let depth = self.transaction_depth();
        if depth == 0 {
            return Err(DatabaseError::Transaction(
                "commit called without an active transaction".to_string(),
            ));
        }

        let target = depth - 1;
        if target == 0 {
            let coordinator = self.coordinator();
            match coordinator {
                Some(c) => c.commit(self).await?,
                None => self
                    .inner
                    .driver
                    .commit()
                    .await
                    .map_err(|e| self.classify(e))?,
            }
        } else {
            self.exec_savepoint(SavepointOp::Create, target).await?;
        }

        self.inner.depth.store(target, Ordering::SeqCst);
        trace!(depth = target, "transaction committed");
        Ok(())
    }

    /// Rolls back the innermost transaction level.
    ///
    /// A nested rollback returns to the savepoint of the enclosing level,
    /// discarding only the work done inside the innermost level.
    pub async fn roll_back(&self) -> Result<()> {
        let depth = self.transaction_depth();
        if depth == 0 {
            return Err(DatabaseError::Transaction(
                "rollback called without an active transaction".to_string(),
            ));
        }

        let target = depth - 1;
        if target == 0 {
            let coordinator = self.coordinator();
            match coordinator {
                Some(c) => c.roll_back(self).await?,
                None => self
                    .inner
                    .driver
                    .rollback()
                    .await
                    .map_err(|e| self.classify(e))?,
            }
        } else {
            self.exec_savepoint(SavepointOp::Rollback, target).await?;
        }

        self.inner.depth.store(target, Ordering::SeqCst);
        trace!(depth = target, "transaction rolled back");
        Ok(())
    }

    async fn exec_savepoint(&self, op: SavepointOp, level: u32) -> Result<()> {
        let kind = self.kind();
        if !kind.supports_savepoints() {
            return Err(DatabaseError::UnsupportedOperation(format!(
                "driver \"{kind}\" does not support nested transactions"
            )));
        }

        let sql = match op {
            SavepointOp::Create => match kind {
                DriverKind::Mssql => format!("SAVE TRANSACTION LEVEL{level}"),
                _ => format!("SAVEPOINT LEVEL{level}"),
            },
            SavepointOp::Rollback => match kind {
                DriverKind::Mssql => format!("ROLLBACK TRANSACTION LEVEL{level}"),
                DriverKind::Oracle => format!("ROLLBACK TO LEVEL{level}"),
                _ => format!("ROLLBACK TO SAVEPOINT LEVEL{level}"),
            },
        };

        self.inner
            .driver
            .exec(&sql)
            .await
            .map_err(|e| self.classify(e))?;
        Ok(())
    }

    fn coordinator(&self) -> Option<Arc<dyn TransactionCoordinator>> {
        self.inner.coordinator.read().expect("coordinator lock").clone()
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Prepares a statement from template SQL.
    ///
    /// Template SQL may use `:name` parameters, backtick-quoted
    /// identifiers and the [`SCHEMA_OBJECT_PREFIX`] token; all three are
    /// resolved here or at execute time. No SQL reaches the driver until
    /// the statement is executed.
    #[must_use]
    pub fn prepare(&self, sql: &str) -> Statement {
        let mut sql = sql.to_string();
        let decorators = self.inner.decorators.read().expect("decorator lock").clone();
        for decorator in &decorators {
            sql = decorator.prepare_sql(self, sql);
        }
        Statement::new(self.clone(), self.prepare_sql(&sql))
    }

    /// Executes a statement without named parameters, returning affected
    /// rows.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        self.prepare(sql).execute().await
    }

    /// Normalizes template SQL: collapses whitespace, substitutes the
    /// schema object prefix and converts backtick identifier quoting into
    /// the dialect's own quoting style.
    #[must_use]
    pub fn prepare_sql(&self, sql: &str) -> String {
        static WHITESPACE: OnceLock<Regex> = OnceLock::new();
        static BACKTICKED: OnceLock<Regex> = OnceLock::new();

        let ws = WHITESPACE.get_or_init(|| Regex::new(r"\s+").unwrap());
        let ticked = BACKTICKED.get_or_init(|| Regex::new(r"`([^`]*)`").unwrap());

        let sql = ws.replace_all(sql.trim(), " ");
        let sql = sql.replace(SCHEMA_OBJECT_PREFIX, &self.prefix());
        ticked
            .replace_all(&sql, |caps: &regex::Captures<'_>| {
                self.quote_identifier(&caps[1])
            })
            .into_owned()
    }

    /// Quotes an identifier for the connection's dialect.
    #[must_use]
    pub fn quote_identifier(&self, identifier: &str) -> String {
        match self.kind() {
            DriverKind::MySql => format!("`{}`", identifier.replace('`', "``")),
            DriverKind::Mssql => {
                format!("[{}]", identifier.replace(['[', ']'], ""))
            }
            _ => format!("\"{}\"", identifier.replace('"', "\\\"")),
        }
    }

    // ------------------------------------------------------------------
    // Row helpers
    // ------------------------------------------------------------------

    /// Inserts one row, returning the number of affected rows.
    pub async fn insert(&self, table: &str, values: &[(&str, SqlValue)]) -> Result<u64> {
        let columns: Vec<String> = values
            .iter()
            .map(|(name, _)| self.quote_identifier(name))
            .collect();
        let params: Vec<String> = values.iter().map(|(name, _)| format!(":{name}")).collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_identifier(table),
            columns.join(", "),
            params.join(", ")
        );

        let mut stmt = self.prepare(&sql);
        for (name, value) in values {
            stmt.bind_value(name, value.clone());
        }
        stmt.execute().await
    }

    /// Updates all rows matching the key columns, returning the number of
    /// affected rows.
    pub async fn update(
        &self,
        table: &str,
        key: &[(&str, SqlValue)],
        values: &[(&str, SqlValue)],
    ) -> Result<u64> {
        let assignments: Vec<String> = values
            .iter()
            .map(|(name, _)| format!("{} = :v{name}", self.quote_identifier(name)))
            .collect();
        let conditions: Vec<String> = key
            .iter()
            .map(|(name, _)| format!("{} = :k{name}", self.quote_identifier(name)))
            .collect();

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.quote_identifier(table),
            assignments.join(", "),
            conditions.join(" AND ")
        );

        let mut stmt = self.prepare(&sql);
        for (name, value) in values {
            stmt.bind_value(&format!("v{name}"), value.clone());
        }
        for (name, value) in key {
            stmt.bind_value(&format!("k{name}"), value.clone());
        }
        stmt.execute().await
    }

    /// Deletes all rows matching the key columns, returning the number of
    /// affected rows.
    pub async fn delete(&self, table: &str, key: &[(&str, SqlValue)]) -> Result<u64> {
        let conditions: Vec<String> = key
            .iter()
            .map(|(name, _)| format!("{} = :{name}", self.quote_identifier(name)))
            .collect();

        let sql = format!(
            "DELETE FROM {} WHERE {}",
            self.quote_identifier(table),
            conditions.join(" AND ")
        );

        let mut stmt = self.prepare(&sql);
        for (name, value) in key {
            stmt.bind_value(name, value.clone());
        }
        stmt.execute().await
    }

    /// Inserts or updates the row identified by the key columns, inside
    /// its own transaction level.
    ///
    /// With an empty `values` list the first key pair is written instead,
    /// so an upsert always touches the row.
    pub async fn upsert(
        &self,
        table: &str,
        key: &[(&str, SqlValue)],
        values: &[(&str, SqlValue)],
    ) -> Result<()> {
        if key.is_empty() {
            return Err(DatabaseError::Generic(
                "upsert requires at least one key column".to_string(),
            ));
        }

        self.begin_transaction().await?;
        match self.upsert_in_transaction(table, key, values).await {
            Ok(()) => self.commit().await,
            Err(err) => {
                let _ = self.roll_back().await;
                Err(err)
            }
        }
    }

    async fn upsert_in_transaction(
        &self,
        table: &str,
        key: &[(&str, SqlValue)],
        values: &[(&str, SqlValue)],
    ) -> Result<()> {
        let values = if values.is_empty() { &key[..1] } else { values };

        let conditions: Vec<String> = key
            .iter()
            .map(|(name, _)| format!("{} = :{name}", self.quote_identifier(name)))
            .collect();
        let sql = format!(
            "SELECT 1 FROM {} WHERE {}",
            self.quote_identifier(table),
            conditions.join(" AND ")
        );

        let mut stmt = self.prepare(&sql);
        stmt.set_limit(1);
        for (name, value) in key {
            stmt.bind_value(name, value.clone());
        }
        stmt.execute().await?;
        let exists = stmt.fetch_next_column(0).await?.is_some();

        if exists {
            self.update(table, key, values).await?;
        } else {
            let mut row: Vec<(&str, SqlValue)> = values.to_vec();
            for (name, value) in key {
                if !row.iter().any(|(n, _)| n == name) {
                    row.push((*name, value.clone()));
                }
            }
            self.insert(table, &row).await?;
        }
        Ok(())
    }

    /// Last generated auto-increment / identity value.
    ///
    /// PostgreSQL has no connection-global insert id; use
    /// [`Connection::last_insert_id_from_sequence`] or
    /// [`Connection::last_insert_id_for`] there.
    pub async fn last_insert_id(&self) -> Result<i64> {
        if self.kind() == DriverKind::PostgreSql {
            return Err(DatabaseError::UnsupportedOperation(
                "PostgreSQL requires a sequence name to read the last insert id".to_string(),
            ));
        }
        self.inner
            .driver
            .last_insert_id()
            .await
            .map_err(|e| self.classify(e))
    }

    /// Last value generated by a named sequence. The sequence name is
    /// prefix-substituted before use.
    pub async fn last_insert_id_from_sequence(&self, sequence: &str) -> Result<i64> {
        if self.kind() != DriverKind::PostgreSql {
            return self.last_insert_id().await;
        }

        let mut stmt = self.prepare("SELECT currval(:seq)");
        stmt.bind_value("seq", self.apply_prefix(sequence));
        stmt.execute().await?;
        self.fetch_generated_id(stmt).await
    }

    /// Last value generated for a serial column, resolved through the
    /// catalog. The table name is prefix-substituted before use.
    pub async fn last_insert_id_for(&self, table: &str, column: &str) -> Result<i64> {
        if self.kind() != DriverKind::PostgreSql {
            return self.last_insert_id().await;
        }

        let mut stmt = self.prepare("SELECT currval(pg_get_serial_sequence(:table, :column))");
        stmt.bind_value("table", self.apply_prefix(table));
        stmt.bind_value("column", column);
        stmt.execute().await?;
        self.fetch_generated_id(stmt).await
    }

    async fn fetch_generated_id(&self, mut stmt: Statement) -> Result<i64> {
        stmt.fetch_next_column(0)
            .await?
            .and_then(|v| v.as_i64())
            .ok_or_else(|| DatabaseError::Generic("no generated id available".to_string()))
    }

    // ------------------------------------------------------------------
    // Platform and classification
    // ------------------------------------------------------------------

    /// The schema platform for this connection's dialect.
    pub fn platform(&self) -> Result<Box<dyn Platform>> {
        match self.kind() {
            DriverKind::Sqlite => Ok(Box::new(SqlitePlatform::new(self.clone()))),
            DriverKind::MySql => Ok(Box::new(MySqlPlatform::new(self.clone()))),
            DriverKind::PostgreSql => Ok(Box::new(PostgreSqlPlatform::new(self.clone()))),
            DriverKind::Mssql => Ok(Box::new(MssqlPlatform::new(self.clone()))),
            other => Err(DatabaseError::UnsupportedOperation(format!(
                "no schema platform for driver \"{other}\""
            ))),
        }
    }

    pub(crate) fn classify(&self, err: DriverError) -> DatabaseError {
        platform::classify_error(self.kind(), &err)
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.inner.driver
    }

    pub(crate) fn encoders(&self) -> Vec<Arc<dyn ParamEncoder>> {
        self.inner.encoders.read().expect("encoder lock").clone()
    }

    pub(crate) fn db2_limit_offset(&self) -> bool {
        self.inner.db2_limit_offset.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy)]
enum SavepointOp {
    Create,
    Rollback,
}
