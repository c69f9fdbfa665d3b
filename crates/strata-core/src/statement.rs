//! Prepared statements with named parameters.
//!
//! A [`Statement`] holds template SQL and compiles it lazily: the first
//! execute injects the pagination clause, translates `:name` parameters
//! into the driver's positional placeholders and compiles a native cursor.
//! Re-executing reuses the compiled cursor; changing limit or offset
//! discards it so the next execute compiles fresh SQL.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use tracing::debug;

use crate::connection::Connection;
use crate::driver::{DriverKind, DriverStatement};
use crate::error::{DatabaseError, Result};
use crate::platform;
use crate::value::{ColumnRef, Row, SqlValue};

type TransformFn = Box<dyn Fn(SqlValue) -> SqlValue + Send + Sync>;
type ComputeFn = Box<dyn Fn(&Row) -> SqlValue + Send + Sync>;

/// A prepared statement bound to one connection.
pub struct Statement {
    conn: Connection,
    sql: String,
    limit: u64,
    offset: u64,
    cursor: Option<Box<dyn DriverStatement>>,
    param_order: Vec<String>,
    params: BTreeMap<String, SqlValue>,
    transforms: BTreeMap<String, Vec<TransformFn>>,
    computed: Vec<(String, ComputeFn)>,
    enhanced: bool,
}

impl Statement {
    pub(crate) fn new(conn: Connection, sql: String) -> Self {
        Self {
            conn,
            sql,
            limit: 0,
            offset: 0,
            cursor: None,
            param_order: Vec::new(),
            params: BTreeMap::new(),
            transforms: BTreeMap::new(),
            computed: Vec::new(),
            enhanced: false,
        }
    }

    /// The normalized template SQL, before pagination and placeholder
    /// translation.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Maximum number of rows to fetch. 0 disables pagination.
    pub fn set_limit(&mut self, limit: u64) -> &mut Self {
        if self.limit != limit {
            self.invalidate_cursor();
        }
        self.limit = limit;
        self
    }

    /// Number of rows to skip. Only meaningful together with a limit.
    pub fn set_offset(&mut self, offset: u64) -> &mut Self {
        if self.offset != offset {
            self.invalidate_cursor();
        }
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Whether a native cursor is currently compiled.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.cursor.is_some()
    }

    /// Binds a named parameter. Unreferenced bindings are ignored at
    /// execute time; referenced but unbound parameters are an error.
    pub fn bind_value(&mut self, name: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.params.insert(name.to_string(), value.into());
        self
    }

    /// Binds several named parameters at once.
    pub fn bind_all(&mut self, params: &[(&str, SqlValue)]) -> &mut Self {
        for (name, value) in params {
            self.params.insert((*name).to_string(), value.clone());
        }
        self
    }

    /// Registers a value transformer for a result column. Transformers for
    /// the same column stack in registration order. Registering one
    /// switches the statement into enhanced row processing.
    pub fn transform(
        &mut self,
        column: &str,
        f: impl Fn(SqlValue) -> SqlValue + Send + Sync + 'static,
    ) -> &mut Self {
        self.transforms
            .entry(column.to_string())
            .or_default()
            .push(Box::new(f));
        self.enhanced = true;
        self
    }

    /// Registers a computed column derived from the whole row, overwriting
    /// any previous computation for the same column. Registering one
    /// switches the statement into enhanced row processing.
    pub fn compute(
        &mut self,
        column: &str,
        f: impl Fn(&Row) -> SqlValue + Send + Sync + 'static,
    ) -> &mut Self {
        if let Some(slot) = self.computed.iter_mut().find(|(n, _)| n == column) {
            slot.1 = Box::new(f);
        } else {
            self.computed.push((column.to_string(), Box::new(f)));
        }
        self.enhanced = true;
        self
    }

    /// Enables or disables enhanced row processing for whole-row fetches.
    pub fn set_enhanced(&mut self, enhanced: bool) -> &mut Self {
        self.enhanced = enhanced;
        self
    }

    /// Executes the statement, returning the number of affected rows.
    pub async fn execute(&mut self) -> Result<u64> {
        if self.cursor.is_none() {
            self.compile().await?;
        } else if let Some(cursor) = self.cursor.as_mut() {
            cursor.close().await.map_err(|e| self.conn.classify(e))?;
        }

        let encoders = self.conn.encoders();
        let mut values = Vec::with_capacity(self.param_order.len());
        for name in &self.param_order {
            let mut value = self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| DatabaseError::UnboundParameter(name.clone()))?;
            for encoder in &encoders {
                if let Some(encoded) = encoder.encode_param(&self.conn, &value) {
                    value = encoded;
                    break;
                }
            }
            values.push(value);
        }

        let Some(cursor) = self.cursor.as_mut() else {
            return Err(DatabaseError::Generic(
                "statement has no compiled cursor".to_string(),
            ));
        };

        let started = Instant::now();
        let affected = cursor
            .execute(&values)
            .await
            .map_err(|e| self.conn.classify(e))?;

        debug!(
            sql = %self.sql,
            limit = self.limit,
            offset = self.offset,
            affected,
            elapsed = ?started.elapsed(),
            "query executed"
        );

        Ok(affected)
    }

    async fn compile(&mut self) -> Result<()> {
        let paginated = platform::paginate_sql(
            self.conn.kind(),
            self.conn.driver().server_version(),
            self.conn.db2_limit_offset(),
            &self.sql,
            self.limit,
            self.offset,
        )?;
        let (native, order) = translate_placeholders(&paginated, self.conn.kind());

        let cursor = self
            .conn
            .driver()
            .prepare(&native)
            .await
            .map_err(|e| self.conn.classify(e))?;

        self.cursor = Some(cursor);
        self.param_order = order;
        Ok(())
    }

    fn invalidate_cursor(&mut self) {
        self.cursor = None;
        self.param_order.clear();
    }

    /// Fetches the next row, or `None` past the end of the result set.
    /// Enhanced processing applies registered transforms and computed
    /// columns.
    pub async fn fetch_next_row(&mut self) -> Result<Option<Row>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        let row = cursor
            .fetch_next()
            .await
            .map_err(|e| self.conn.classify(e))?;

        Ok(row.map(|row| {
            if self.enhanced {
                self.process_row(row)
            } else {
                row
            }
        }))
    }

    /// Fetches a single column of the next row. Transforms and computed
    /// values for that column apply regardless of the enhanced flag.
    pub async fn fetch_next_column(
        &mut self,
        column: impl Into<ColumnRef>,
    ) -> Result<Option<SqlValue>> {
        let column = column.into();

        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        let Some(row) = cursor
            .fetch_next()
            .await
            .map_err(|e| self.conn.classify(e))?
        else {
            return Ok(None);
        };

        let name = match &column {
            ColumnRef::Name(n) => Some(n.clone()),
            ColumnRef::Index(i) => row.column_name(*i).map(str::to_string),
        };

        let mut value = row
            .get_ref(&column)
            .cloned()
            .ok_or_else(|| missing_column(&column))?;

        if let Some(name) = name {
            if let Some(fns) = self.transforms.get(&name) {
                for f in fns {
                    value = f(value);
                }
            }
            if let Some((_, f)) = self.computed.iter().find(|(n, _)| *n == name) {
                value = f(&row);
            }
        }

        Ok(Some(value))
    }

    /// Fetches all remaining rows.
    pub async fn fetch_rows(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_next_row().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Fetches one column of all remaining rows.
    pub async fn fetch_columns(&mut self, column: impl Into<ColumnRef>) -> Result<Vec<SqlValue>> {
        let column = column.into();
        let mut values = Vec::new();
        while let Some(value) = self.fetch_next_column(column.clone()).await? {
            values.push(value);
        }
        Ok(values)
    }

    /// Fetches all remaining rows as a key-to-value map. Later rows win on
    /// duplicate keys.
    pub async fn fetch_map(
        &mut self,
        key: impl Into<ColumnRef>,
        value: impl Into<ColumnRef>,
    ) -> Result<BTreeMap<SqlValue, SqlValue>> {
        let key = key.into();
        let value = value.into();

        let mut map = BTreeMap::new();
        while let Some(row) = self.fetch_next_row().await? {
            let k = row.get_ref(&key).cloned().ok_or_else(|| missing_column(&key))?;
            let v = row
                .get_ref(&value)
                .cloned()
                .ok_or_else(|| missing_column(&value))?;
            map.insert(k, v);
        }
        Ok(map)
    }

    /// Discards any unfetched rows. The compiled cursor stays usable for
    /// another execute.
    pub async fn close_cursor(&mut self) -> Result<()> {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.close().await.map_err(|e| self.conn.classify(e))?;
        }
        Ok(())
    }

    fn process_row(&self, mut row: Row) -> Row {
        for (column, fns) in &self.transforms {
            if let Some(value) = row.get(column).cloned() {
                let mut value = value;
                for f in fns {
                    value = f(value);
                }
                row.set(column, value);
            }
        }
        for (column, f) in &self.computed {
            let value = f(&row);
            row.set(column, value);
        }
        row
    }
}

fn missing_column(column: &ColumnRef) -> DatabaseError {
    DatabaseError::Generic(match column {
        ColumnRef::Name(n) => format!("column \"{n}\" not present in result"),
        ColumnRef::Index(i) => format!("column index {i} out of bounds"),
    })
}

/// Translates `:name` parameters into the dialect's positional
/// placeholders, returning the rewritten SQL and the parameter names in
/// placeholder order. Repeated names occupy one slot per occurrence.
fn translate_placeholders(sql: &str, kind: DriverKind) -> (String, Vec<String>) {
    static NAMED: OnceLock<Regex> = OnceLock::new();
    let re = NAMED
        .get_or_init(|| Regex::new(r"(?:^|[^:\w]):(?P<name>[A-Za-z_][A-Za-z0-9_]*)").unwrap());

    let mut out = String::with_capacity(sql.len());
    let mut order = Vec::new();
    let mut last = 0;

    for caps in re.captures_iter(sql) {
        let name = caps.name("name").expect("named group");
        out.push_str(&sql[last..name.start() - 1]);
        order.push(name.as_str().to_string());

        match kind {
            DriverKind::PostgreSql => {
                out.push('$');
                out.push_str(&order.len().to_string());
            }
            _ => out.push('?'),
        }

        last = name.end();
    }
    out.push_str(&sql[last..]);

    (out, order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteDriver;
    use std::sync::Arc;

    async fn connection() -> Connection {
        let driver = SqliteDriver::connect("sqlite::memory:")
            .await
            .expect("in-memory SQLite");
        Connection::new(Arc::new(driver))
    }

    async fn seed(conn: &Connection, names: &[&str]) {
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        for name in names {
            conn.insert("t", &[("name", (*name).into())]).await.unwrap();
        }
    }

    #[test]
    fn test_translate_placeholders() {
        let (sql, order) =
            translate_placeholders("SELECT * FROM t WHERE a = :a AND b = :b", DriverKind::Sqlite);
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(order, vec!["a", "b"]);

        let (sql, order) = translate_placeholders(
            "UPDATE t SET a = :x WHERE b = :x",
            DriverKind::PostgreSql,
        );
        assert_eq!(sql, "UPDATE t SET a = $1 WHERE b = $2");
        assert_eq!(order, vec!["x", "x"]);

        let (sql, order) =
            translate_placeholders("SELECT x::text FROM t", DriverKind::PostgreSql);
        assert_eq!(sql, "SELECT x::text FROM t");
        assert!(order.is_empty());
    }

    #[tokio::test]
    async fn test_unbound_parameter_is_an_error() {
        let conn = connection().await;
        seed(&conn, &[]).await;

        let mut stmt = conn.prepare("SELECT * FROM t WHERE id = :id");
        let err = stmt.execute().await.unwrap_err();
        assert!(matches!(err, DatabaseError::UnboundParameter(name) if name == "id"));
    }

    #[tokio::test]
    async fn test_limit_offset_window() {
        let conn = connection().await;
        seed(&conn, &["a", "b", "c", "d", "e"]).await;

        let mut stmt = conn.prepare("SELECT name FROM t ORDER BY id");
        stmt.set_limit(2).set_offset(1);
        stmt.execute().await.unwrap();

        let names = stmt.fetch_columns("name").await.unwrap();
        assert_eq!(
            names,
            vec![
                SqlValue::Text("b".to_string()),
                SqlValue::Text("c".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_changing_limit_invalidates_cursor() {
        let conn = connection().await;
        seed(&conn, &["a", "b", "c"]).await;

        let mut stmt = conn.prepare("SELECT name FROM t ORDER BY id");
        stmt.set_limit(1);
        stmt.execute().await.unwrap();
        assert!(stmt.is_compiled());

        stmt.set_limit(2);
        assert!(!stmt.is_compiled());
        stmt.execute().await.unwrap();
        assert_eq!(stmt.fetch_rows().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transform_and_compute() {
        let conn = connection().await;
        seed(&conn, &["a"]).await;

        let mut stmt = conn.prepare("SELECT id, name FROM t");
        stmt.transform("name", |v| match v {
            SqlValue::Text(s) => SqlValue::Text(s.to_uppercase()),
            other => other,
        });
        stmt.compute("label", |row| {
            let id = row.get("id").and_then(SqlValue::as_i64).unwrap_or(0);
            SqlValue::Text(format!("row-{id}"))
        });
        stmt.execute().await.unwrap();

        let row = stmt.fetch_next_row().await.unwrap().unwrap();
        assert_eq!(row.get("name"), Some(&SqlValue::Text("A".to_string())));
        assert_eq!(row.get("label"), Some(&SqlValue::Text("row-1".to_string())));
    }

    #[tokio::test]
    async fn test_fetch_map() {
        let conn = connection().await;
        seed(&conn, &["a", "b"]).await;

        let mut stmt = conn.prepare("SELECT id, name FROM t");
        stmt.execute().await.unwrap();

        let map = stmt.fetch_map("id", "name").await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(
            map.get(&SqlValue::Integer(2)),
            Some(&SqlValue::Text("b".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fetch_map_rejects_missing_column() {
        let conn = connection().await;
        seed(&conn, &["a"]).await;

        let mut stmt = conn.prepare("SELECT id, name FROM t");
        stmt.execute().await.unwrap();

        let err = stmt.fetch_map("id", "nope").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Generic(msg) if msg.contains("nope")));
    }

    #[tokio::test]
    async fn test_param_encoder_chain() {
        use crate::hooks::CallbackParamEncoder;

        let conn = connection().await;
        seed(&conn, &[]).await;

        conn.register_param_encoder(Arc::new(CallbackParamEncoder::new(|_conn, value| {
            value.as_str().map(|s| SqlValue::Text(s.to_lowercase()))
        })));

        let mut stmt = conn.prepare("INSERT INTO t (name) VALUES (:name)");
        stmt.bind_value("name", "LOUD");
        stmt.execute().await.unwrap();

        let mut stmt = conn.prepare("SELECT name FROM t");
        stmt.execute().await.unwrap();
        assert_eq!(
            stmt.fetch_next_column("name").await.unwrap(),
            Some(SqlValue::Text("loud".to_string()))
        );
    }
}
