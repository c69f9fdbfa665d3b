//! Microsoft SQL Server schema platform.

use async_trait::async_trait;

use crate::connection::Connection;
use crate::driver::DriverKind;
use crate::error::Result;
use crate::platform::Platform;
use crate::schema::{Column, ColumnType, ForeignKey, Index, Table};

pub struct MssqlPlatform {
    conn: Connection,
}

impl MssqlPlatform {
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn type_sql(column: &Column) -> String {
        let limit = column.type_limit();
        match column.column_type() {
            ColumnType::VarChar => format!("VARCHAR({})", limit.unwrap_or(250)),
            ColumnType::Char => format!("CHAR({})", limit.unwrap_or(1)),
            ColumnType::Text => "VARCHAR(MAX)".to_string(),
            ColumnType::Int => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Double => "FLOAT".to_string(),
            ColumnType::Blob => "VARBINARY(MAX)".to_string(),
            ColumnType::Bool => "BIT".to_string(),
            ColumnType::Binary => format!("VARBINARY({})", limit.unwrap_or(250)),
            ColumnType::Uuid => "UNIQUEIDENTIFIER".to_string(),
        }
    }

    fn column_sql(&self, column: &Column) -> String {
        let mut sql = format!(
            "{} {}",
            self.conn.quote_identifier(column.name()),
            Self::type_sql(column)
        );
        if column.is_identity() {
            sql.push_str(" IDENTITY(1, 1)");
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

    fn foreign_key_sql(&self, table: &str, key: &ForeignKey) -> String {
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            self.conn
                .quote_identifier(&key.name(&self.conn.apply_prefix(table))),
            self.quote_list(key.columns()),
            self.conn.quote_identifier(key.ref_table()),
            self.quote_list(key.ref_columns()),
            key.update_action().as_sql(),
            key.delete_action().as_sql()
        )
    }

    fn create_table_sql(&self, table: &Table) -> String {
        let mut parts: Vec<String> = table.columns().iter().map(|c| self.column_sql(c)).collect();

        let pk = table.primary_key_columns();
        if !pk.is_empty() {
            parts.push(format!(
                "PRIMARY KEY ({})",
                pk.iter()
                    .map(|c| self.conn.quote_identifier(c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        for key in table.foreign_keys() {
            parts.push(self.foreign_key_sql(table.name(), key));
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

    async fn base_table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT `TABLE_NAME` FROM `INFORMATION_SCHEMA`.`TABLES` WHERE `TABLE_TYPE` = 'BASE TABLE'",
        );
        stmt.execute().await?;
        Ok(stmt
            .fetch_columns(0)
            .await?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn drop_all_objects(&self) -> Result<()> {
        // Constraints go first, otherwise drop order matters.
        let mut stmt = self.conn.prepare(
            "SELECT `TABLE_NAME`, `CONSTRAINT_NAME` FROM `INFORMATION_SCHEMA`.`TABLE_CONSTRAINTS` WHERE `CONSTRAINT_TYPE` = 'FOREIGN KEY'",
        );
        stmt.execute().await?;
        let constraints: Vec<(String, String)> = stmt
            .fetch_rows()
            .await?
            .into_iter()
            .filter_map(|row| {
                let table = row.get_index(0)?.as_str()?.to_string();
                let name = row.get_index(1)?.as_str()?.to_string();
                Some((table, name))
            })
            .collect();

        for (table, name) in constraints {
            self.conn
                .execute(&format!(
                    "ALTER TABLE {} DROP CONSTRAINT {}",
                    self.conn.quote_identifier(&table),
                    self.conn.quote_identifier(&name)
                ))
                .await?;
        }

        let mut stmt = self
            .conn
            .prepare("SELECT `TABLE_NAME` FROM `INFORMATION_SCHEMA`.`VIEWS`");
        stmt.execute().await?;
        let views: Vec<String> = stmt
            .fetch_columns(0)
            .await?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        for view in views {
            self.conn
                .execute(&format!(
                    "DROP VIEW {}",
                    self.conn.quote_identifier(&view)
                ))
                .await?;
        }
        for table in self.base_table_names().await? {
            self.conn
                .execute(&format!(
                    "DROP TABLE {}",
                    self.conn.quote_identifier(&table)
                ))
                .await?;
        }
        Ok(())
    }

    async fn delete_all_rows(&self, tables: &[String]) -> Result<()> {
        for table in tables {
            self.conn
                .execute(&format!(
                    "DELETE FROM {}",
                    self.conn.quote_identifier(table)
                ))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for MssqlPlatform {
    fn kind(&self) -> DriverKind {
        DriverKind::Mssql
    }

    fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare(
            "SELECT `TABLE_NAME` FROM `INFORMATION_SCHEMA`.`TABLES` WHERE lower(`TABLE_NAME`) = lower(:name)",
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
                "ALTER TABLE {} ADD {}",
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
                "DROP INDEX {} ON {}",
                self.conn.quote_identifier(&name),
                self.conn.quote_identifier(table)
            ))
            .await?;
        Ok(())
    }

    async fn add_foreign_key(&self, table: &str, key: &ForeignKey) -> Result<()> {
        self.conn
            .execute(&format!(
                "ALTER TABLE {} ADD {}",
                self.conn.quote_identifier(table),
                self.foreign_key_sql(table, key)
            ))
            .await?;
        Ok(())
    }

    async fn drop_foreign_key(
        &self,
        table: &str,
        columns: &[&str],
        ref_table: &str,
        ref_columns: &[&str],
    ) -> Result<()> {
        let key = ForeignKey::new(columns.iter().copied(), ref_table, ref_columns.iter().copied());
        let name = key.name(&self.conn.apply_prefix(table));

        let mut stmt = self.conn.prepare(
            "SELECT `CONSTRAINT_NAME` FROM `INFORMATION_SCHEMA`.`TABLE_CONSTRAINTS` WHERE lower(`TABLE_NAME`) = lower(:table) AND `CONSTRAINT_TYPE` = 'FOREIGN KEY' AND `CONSTRAINT_NAME` = :name",
        );
        stmt.set_limit(1);
        stmt.bind_value("table", self.conn.apply_prefix(table));
        stmt.bind_value("name", name.clone());
        stmt.execute().await?;

        if stmt.fetch_next_column(0).await?.is_some() {
            self.conn
                .execute(&format!(
                    "ALTER TABLE {} DROP CONSTRAINT {}",
                    self.conn.quote_identifier(table),
                    self.conn.quote_identifier(&name)
                ))
                .await?;
        }
        Ok(())
    }

    async fn flush_database(&self) -> Result<()> {
        self.drop_all_objects().await
    }

    async fn flush_data(&self) -> Result<()> {
        let skip = self.conn.apply_prefix(super::TRACKING_TABLE_GLOB);
        let skip = skip.trim_end_matches('*').to_string();

        let tables: Vec<String> = self
            .base_table_names()
            .await?
            .into_iter()
            .filter(|t| !t.starts_with(&skip))
            .collect();

        for table in &tables {
            self.conn
                .execute(&format!(
                    "ALTER TABLE {} NOCHECK CONSTRAINT ALL",
                    self.conn.quote_identifier(table)
                ))
                .await?;
        }

        let result = self.delete_all_rows(&tables).await;

        for table in &tables {
            self.conn
                .execute(&format!(
                    "ALTER TABLE {} WITH CHECK CHECK CONSTRAINT ALL",
                    self.conn.quote_identifier(table)
                ))
                .await?;
        }
        result
    }
}
