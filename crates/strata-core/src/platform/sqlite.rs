//! SQLite schema platform.
//!
//! SQLite cannot alter constraints in place, so foreign key changes go
//! through a full table rebuild: capture the DDL from `sqlite_master`,
//! rename the table aside, recreate it with the rewritten DDL, copy the
//! rows over an explicit column list and re-apply the index DDLs.

use async_trait::async_trait;
use regex::Regex;

use crate::connection::Connection;
use crate::driver::DriverKind;
use crate::error::{DatabaseError, Result};
use crate::platform::{Platform, TRACKING_TABLE_GLOB};
use crate::schema::{Column, ColumnType, ForeignKey, Index, Table};
use crate::value::SqlValue;

pub struct SqlitePlatform {
    conn: Connection,
}

impl SqlitePlatform {
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn type_sql(column: &Column) -> &'static str {
        match column.column_type() {
            ColumnType::VarChar | ColumnType::Char | ColumnType::Text | ColumnType::Uuid => "TEXT",
            ColumnType::Int | ColumnType::BigInt | ColumnType::Bool => "INTEGER",
            ColumnType::Double => "REAL",
            ColumnType::Blob | ColumnType::Binary => "BLOB",
        }
    }

    fn column_sql(&self, column: &Column) -> String {
        let mut sql = format!(
            "{} {}",
            self.conn.quote_identifier(column.name()),
            Self::type_sql(column)
        );
        if column.is_identity() {
            sql.push_str(" PRIMARY KEY AUTOINCREMENT");
        }
        if !column.is_nullable() {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = column.default() {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.literal());
        }
        sql
    }

    fn foreign_key_sql(&self, key: &ForeignKey) -> String {
        format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            self.quote_list(key.columns()),
            self.conn.quote_identifier(key.ref_table()),
            self.quote_list(key.ref_columns()),
            key.update_action().as_sql(),
            key.delete_action().as_sql()
        )
    }

    pub(crate) fn create_table_sql(&self, table: &Table) -> String {
        let mut parts: Vec<String> = table.columns().iter().map(|c| self.column_sql(c)).collect();

        let identity = table.columns().iter().any(Column::is_identity);
        let pk = table.primary_key_columns();
        if !identity && !pk.is_empty() {
            parts.push(format!(
                "PRIMARY KEY ({})",
                pk.iter()
                    .map(|c| self.conn.quote_identifier(c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        for key in table.foreign_keys() {
            parts.push(self.foreign_key_sql(key));
        }

        format!(
            "CREATE TABLE {} ({})",
            self.conn.quote_identifier(table.name()),
            parts.join(", ")
        )
    }

    fn index_sql(&self, table: &str, index: &Index) -> String {
        let unique = if index.is_unique() { "UNIQUE " } else { "" };
        format!(
            "CREATE {unique}INDEX {} ON {} ({})",
            self.conn
                .quote_identifier(&index.name(&self.conn.apply_prefix(table))),
            self.conn.quote_identifier(table),
            self.quote_list(index.columns())
        )
    }

    fn quote_list(&self, names: &[String]) -> String {
        names
            .iter()
            .map(|n| self.conn.quote_identifier(n))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Rebuilds a table through rename / recreate / copy / reindex.
    ///
    /// `rewrite` receives the captured CREATE TABLE DDL with the closing
    /// parenthesis stripped plus the table's column names, and must return
    /// complete replacement DDL.
    async fn rebuild_table<F>(&self, table: &str, rewrite: F) -> Result<()>
    where
        F: FnOnce(&str, &[String]) -> Result<String>,
    {
        let prefixed = self.conn.apply_prefix(table);

        let mut stmt = self.conn.prepare(
            "SELECT `sql` FROM `sqlite_master` WHERE `type` = 'table' AND `name` = :name",
        );
        stmt.bind_value("name", prefixed.clone());
        stmt.execute().await?;
        let ddl = stmt
            .fetch_next_column("sql")
            .await?
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or(DatabaseError::TableNotFound(prefixed))?;
        let ddl = ddl.trim_end_matches([' ', ')']).to_string();

        let mut stmt = self.conn.prepare(&format!(
            "PRAGMA table_info({})",
            self.conn.quote_identifier(table)
        ));
        stmt.execute().await?;
        let column_names: Vec<String> = stmt
            .fetch_columns("name")
            .await?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let mut stmt = self.conn.prepare(
            "SELECT `sql` FROM `sqlite_master` WHERE `type` = 'index' AND `tbl_name` = :name AND `sql` IS NOT NULL",
        );
        stmt.bind_value("name", self.conn.apply_prefix(table));
        stmt.execute().await?;
        let index_ddls: Vec<String> = stmt
            .fetch_columns("sql")
            .await?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let new_ddl = rewrite(&ddl, &column_names)?;

        let tmp = format!("{table}_tmp_");
        self.conn
            .execute(&format!(
                "ALTER TABLE {} RENAME TO {}",
                self.conn.quote_identifier(table),
                self.conn.quote_identifier(&tmp)
            ))
            .await?;
        self.conn.execute(&new_ddl).await?;

        // Explicit column list on both sides: the rebuilt table may carry
        // the columns in a different order than the snapshot.
        let columns = self.quote_list(&column_names);
        self.conn
            .execute(&format!(
                "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
                self.conn.quote_identifier(table),
                self.conn.quote_identifier(&tmp)
            ))
            .await?;
        self.conn
            .execute(&format!(
                "DROP TABLE {}",
                self.conn.quote_identifier(&tmp)
            ))
            .await?;

        for ddl in index_ddls {
            self.conn.execute(&ddl).await?;
        }
        Ok(())
    }

    async fn drop_all_objects(&self) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT `name`, `type` FROM `sqlite_master` WHERE `type` IN ('table', 'view') AND `name` NOT LIKE 'sqlite_%'",
        );
        stmt.execute().await?;

        for row in stmt.fetch_rows().await? {
            let Some(name) = row.get("name").and_then(SqlValue::as_str).map(str::to_string)
            else {
                continue;
            };
            let verb = match row.get("type").and_then(SqlValue::as_str) {
                Some("view") => "DROP VIEW",
                _ => "DROP TABLE",
            };
            self.conn
                .execute(&format!("{verb} {}", self.conn.quote_identifier(&name)))
                .await?;
        }
        Ok(())
    }

    async fn delete_all_rows(&self) -> Result<()> {
        let mut stmt = self.conn.prepare(
            "SELECT `name` FROM `sqlite_master` WHERE `type` = 'table' AND `name` NOT LIKE 'sqlite_%' AND NOT (`name` GLOB :skip)",
        );
        stmt.bind_value("skip", self.conn.apply_prefix(TRACKING_TABLE_GLOB));
        stmt.execute().await?;

        let names: Vec<String> = stmt
            .fetch_columns("name")
            .await?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        for name in names {
            self.conn
                .execute(&format!(
                    "DELETE FROM {}",
                    self.conn.quote_identifier(&name)
                ))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for SqlitePlatform {
    fn kind(&self) -> DriverKind {
        DriverKind::Sqlite
    }

    fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare(
            "SELECT `name` FROM `sqlite_master` WHERE `type` = 'table' AND `name` = :name",
        );
        stmt.set_limit(1);
        stmt.bind_value("name", self.conn.apply_prefix(table));
        stmt.execute().await?;
        Ok(stmt.fetch_next_column(0).await?.is_some())
    }

    async fn create_table(&self, table: &Table) -> Result<()> {
        self.conn.execute(&self.create_table_sql(table)).await?;
        for index in table.indexes() {
            self.conn
                .execute(&self.index_sql(table.name(), index))
                .await?;
        }
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.conn
            .execute(&format!(
                "DROP TABLE {}",
                self.conn.quote_identifier(table)
            ))
            .await?;
        Ok(())
    }

    async fn add_column(&self, table: &str, column: &Column) -> Result<()> {
        self.conn
            .execute(&format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.conn.quote_identifier(table),
                self.column_sql(column)
            ))
            .await?;
        Ok(())
    }

    async fn add_index(&self, table: &str, index: &Index) -> Result<()> {
        self.conn.execute(&self.index_sql(table, index)).await?;
        Ok(())
    }

    async fn drop_index(&self, table: &str, columns: &[&str]) -> Result<()> {
        let name = Index::new(columns.iter().copied()).name(&self.conn.apply_prefix(table));
        self.conn
            .execute(&format!(
                "DROP INDEX {}",
                self.conn.quote_identifier(&name)
            ))
            .await?;
        Ok(())
    }

    async fn add_foreign_key(&self, table: &str, key: &ForeignKey) -> Result<()> {
        let fk = self.foreign_key_sql(key);
        let wanted: Vec<String> = key.columns().to_vec();

        self.rebuild_table(table, move |ddl, columns| {
            for column in &wanted {
                if !columns.contains(column) {
                    return Err(DatabaseError::Generic(format!(
                        "column \"{column}\" does not exist in the rebuilt table"
                    )));
                }
            }
            Ok(format!("{ddl}, {fk})"))
        })
        .await
    }

    async fn drop_foreign_key(
        &self,
        table: &str,
        columns: &[&str],
        ref_table: &str,
        ref_columns: &[&str],
    ) -> Result<()> {
        let columns: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
        let ref_columns: Vec<String> = ref_columns.iter().map(|c| (*c).to_string()).collect();
        let ref_table = self.conn.apply_prefix(ref_table);

        self.rebuild_table(table, move |ddl, _| {
            let re = Regex::new(
                r"(?i),\s*FOREIGN\s+KEY\s*\(([^)]+)\)\s*REFERENCES\s+([^(]+)\(([^)]+)\)[^,]*",
            )
            .unwrap();

            let mut out = String::with_capacity(ddl.len());
            let mut last = 0;
            for caps in re.captures_iter(ddl) {
                let whole = caps.get(0).expect("whole match");
                if ident_list(&caps[1]) == columns
                    && clean_ident(&caps[2]) == ref_table
                    && ident_list(&caps[3]) == ref_columns
                {
                    out.push_str(&ddl[last..whole.start()]);
                    last = whole.end();
                }
            }
            out.push_str(&ddl[last..]);
            out.push(')');
            Ok(out)
        })
        .await
    }

    async fn flush_database(&self) -> Result<()> {
        self.conn.execute("PRAGMA foreign_keys = OFF").await?;
        let result = self.drop_all_objects().await;
        self.conn.execute("PRAGMA foreign_keys = ON").await?;
        result
    }

    async fn flush_data(&self) -> Result<()> {
        self.conn.execute("PRAGMA foreign_keys = OFF").await?;
        let result = self.delete_all_rows().await;
        self.conn.execute("PRAGMA foreign_keys = ON").await?;
        result
    }
}

fn clean_ident(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

fn ident_list(raw: &str) -> Vec<String> {
    raw.split(',').map(clean_ident).collect()
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
        let conn = Connection::new(Arc::new(driver));
        conn.set_prefix("app_");
        conn
    }

    fn users_table() -> Table {
        let mut table = Table::new("#__users");
        table
            .add_column(Column::new("id", ColumnType::Int).identity())
            .add_column(Column::new("name", ColumnType::VarChar).limit(100))
            .add_index(Index::new(["name"]).unique());
        table
    }

    #[tokio::test]
    async fn test_create_and_has_table() {
        let conn = connection().await;
        let platform = SqlitePlatform::new(conn.clone());

        let mut table = users_table();
        table.create(&platform).await.unwrap();

        assert!(platform.has_table("#__users").await.unwrap());
        assert!(platform.has_table("app_users").await.unwrap());
        assert!(!platform.has_table("#__missing").await.unwrap());

        conn.insert("#__users", &[("name", "a".into())])
            .await
            .unwrap();
        assert_eq!(conn.last_insert_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unique_index_is_enforced() {
        let conn = connection().await;
        let platform = SqlitePlatform::new(conn.clone());
        users_table().create(&platform).await.unwrap();

        conn.insert("#__users", &[("name", "a".into())])
            .await
            .unwrap();
        let err = conn
            .insert("#__users", &[("name", "a".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::UniqueConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_add_and_drop_foreign_key_rebuild() {
        let conn = connection().await;
        let platform = SqlitePlatform::new(conn.clone());
        users_table().create(&platform).await.unwrap();

        let mut posts = Table::new("#__posts");
        posts
            .add_column(Column::new("id", ColumnType::Int).identity())
            .add_column(Column::new("uid", ColumnType::Int));
        posts.create(&platform).await.unwrap();

        conn.insert("#__users", &[("name", "a".into())])
            .await
            .unwrap();
        conn.insert("#__posts", &[("uid", 1.into())]).await.unwrap();

        platform
            .add_foreign_key("#__posts", &ForeignKey::new(["uid"], "#__users", ["id"]))
            .await
            .unwrap();

        // Survived the rebuild.
        let mut stmt = conn.prepare("SELECT COUNT(*) AS n FROM `#__posts`");
        stmt.execute().await.unwrap();
        assert_eq!(
            stmt.fetch_next_column("n").await.unwrap(),
            Some(SqlValue::Integer(1))
        );

        // Constraint is live.
        let err = conn
            .insert("#__posts", &[("uid", 99.into())])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::ForeignKeyConstraintViolation(_)
        ));

        platform
            .drop_foreign_key("#__posts", &["uid"], "#__users", &["id"])
            .await
            .unwrap();

        // Constraint is gone, data still present.
        conn.insert("#__posts", &[("uid", 99.into())]).await.unwrap();
        let mut stmt = conn.prepare("SELECT COUNT(*) AS n FROM `#__posts`");
        stmt.execute().await.unwrap();
        assert_eq!(
            stmt.fetch_next_column("n").await.unwrap(),
            Some(SqlValue::Integer(2))
        );
    }

    #[tokio::test]
    async fn test_rebuild_preserves_indexes_and_data() {
        let conn = connection().await;
        let platform = SqlitePlatform::new(conn.clone());
        users_table().create(&platform).await.unwrap();

        let mut posts = Table::new("#__posts");
        posts
            .add_column(Column::new("id", ColumnType::Int).identity())
            .add_column(Column::new("uid", ColumnType::Int))
            .add_column(Column::new("slug", ColumnType::VarChar).limit(100))
            .add_index(Index::new(["slug"]).unique());
        posts.create(&platform).await.unwrap();

        conn.insert("#__users", &[("name", "a".into())])
            .await
            .unwrap();
        conn.insert("#__posts", &[("uid", 1.into()), ("slug", "first".into())])
            .await
            .unwrap();

        let key = ForeignKey::new(["uid"], "#__users", ["id"]);
        for _ in 0..3 {
            platform.add_foreign_key("#__posts", &key).await.unwrap();
            platform
                .drop_foreign_key("#__posts", &["uid"], "#__users", &["id"])
                .await
                .unwrap();
        }

        // The unique index came through every rebuild, exactly once.
        let mut stmt = conn.prepare(
            "SELECT COUNT(*) AS n FROM sqlite_master \
             WHERE type = 'index' AND tbl_name = 'app_posts' AND sql IS NOT NULL",
        );
        stmt.execute().await.unwrap();
        assert_eq!(
            stmt.fetch_next_column("n").await.unwrap(),
            Some(SqlValue::Integer(1))
        );

        // And it still rejects duplicates.
        let err = conn
            .insert("#__posts", &[("uid", 1.into()), ("slug", "first".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::UniqueConstraintViolation(_)));

        let mut stmt = conn.prepare("SELECT COUNT(*) AS n FROM `#__posts`");
        stmt.execute().await.unwrap();
        assert_eq!(
            stmt.fetch_next_column("n").await.unwrap(),
            Some(SqlValue::Integer(1))
        );
    }

    #[tokio::test]
    async fn test_flush_data_skips_tracking_tables() {
        let conn = connection().await;
        let platform = SqlitePlatform::new(conn.clone());

        users_table().create(&platform).await.unwrap();
        conn.execute("CREATE TABLE `#__strata_migrations` (version TEXT)")
            .await
            .unwrap();

        conn.insert("#__users", &[("name", "a".into())])
            .await
            .unwrap();
        conn.insert("#__strata_migrations", &[("version", "20240101000000".into())])
            .await
            .unwrap();

        platform.flush_data().await.unwrap();

        let mut stmt = conn.prepare("SELECT COUNT(*) AS n FROM `#__users`");
        stmt.execute().await.unwrap();
        assert_eq!(
            stmt.fetch_next_column("n").await.unwrap(),
            Some(SqlValue::Integer(0))
        );

        let mut stmt = conn.prepare("SELECT COUNT(*) AS n FROM `#__strata_migrations`");
        stmt.execute().await.unwrap();
        assert_eq!(
            stmt.fetch_next_column("n").await.unwrap(),
            Some(SqlValue::Integer(1))
        );
    }

    #[tokio::test]
    async fn test_flush_database_drops_everything() {
        let conn = connection().await;
        let platform = SqlitePlatform::new(conn.clone());
        users_table().create(&platform).await.unwrap();

        platform.flush_database().await.unwrap();
        assert!(!platform.has_table("#__users").await.unwrap());
    }
}
