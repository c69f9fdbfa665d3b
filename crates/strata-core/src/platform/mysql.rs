//! MySQL schema platform.

use async_trait::async_trait;

use crate::connection::Connection;
use crate::driver::DriverKind;
use crate::error::Result;
use crate::platform::Platform;
use crate::schema::{Column, ColumnType, ForeignKey, Index, Table};

const DEFAULT_ENGINE: &str = "InnoDB";
const DEFAULT_COLLATION: &str = "utf8_unicode_ci";

pub struct MySqlPlatform {
    conn: Connection,
}

impl MySqlPlatform {
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    fn type_sql(column: &Column) -> String {
        let limit = column.type_limit();
        match column.column_type() {
            ColumnType::VarChar => format!("VARCHAR({})", limit.unwrap_or(250)),
            ColumnType::Char => format!("CHAR({})", limit.unwrap_or(1)),
            ColumnType::Text => "LONGTEXT".to_string(),
            ColumnType::Int => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Blob => "LONGBLOB".to_string(),
            ColumnType::Bool => "TINYINT(1)".to_string(),
            ColumnType::Binary => format!("VARBINARY({})", limit.unwrap_or(250)),
            ColumnType::Uuid => "BINARY(16)".to_string(),
        }
    }

    fn column_sql(&self, column: &Column) -> String {
        let mut sql = format!(
            "{} {}",
            self.conn.quote_identifier(column.name()),
            Self::type_sql(column)
        );
        if column.is_unsigned()
            && matches!(
                column.column_type(),
                ColumnType::Int | ColumnType::BigInt | ColumnType::Double
            )
        {
            sql.push_str(" UNSIGNED");
        }
        if !column.is_nullable() {
            sql.push_str(" NOT NULL");
        }
        if column.is_identity() {
            sql.push_str(" AUTO_INCREMENT");
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
            "CREATE TABLE {} ({}) ENGINE = {} COLLATE = {}",
            self.conn.quote_identifier(table.name()),
            parts.join(", "),
            table.engine().unwrap_or(DEFAULT_ENGINE),
            table.collation().unwrap_or(DEFAULT_COLLATION)
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
            "SELECT `TABLE_NAME` FROM `information_schema`.`TABLES` WHERE `TABLE_SCHEMA` = DATABASE() AND `TABLE_TYPE` = 'BASE TABLE'",
        );
        stmt.execute().await?;
        Ok(stmt
            .fetch_columns(0)
            .await?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    async fn view_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT `TABLE_NAME` FROM `information_schema`.`VIEWS` WHERE `TABLE_SCHEMA` = DATABASE()",
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
        for view in self.view_names().await? {
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

    async fn delete_all_rows(&self) -> Result<()> {
        let skip = self.conn.apply_prefix(super::TRACKING_TABLE_GLOB);
        let skip = skip.trim_end_matches('*').to_string();

        for table in self.base_table_names().await? {
            if table.starts_with(&skip) {
                continue;
            }
            self.conn
                .execute(&format!(
                    "DELETE FROM {}",
                    self.conn.quote_identifier(&table)
                ))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Platform for MySqlPlatform {
    fn kind(&self) -> DriverKind {
        DriverKind::MySql
    }

    fn connection(&self) -> &Connection {
        &self.conn
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare(
            "SELECT `TABLE_NAME` FROM `information_schema`.`TABLES` WHERE `TABLE_SCHEMA` = DATABASE() AND `TABLE_NAME` = :name",
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
            "SELECT `CONSTRAINT_NAME` FROM `information_schema`.`TABLE_CONSTRAINTS` WHERE `TABLE_SCHEMA` = DATABASE() AND `TABLE_NAME` = :table AND `CONSTRAINT_TYPE` = 'FOREIGN KEY' AND `CONSTRAINT_NAME` = :name",
        );
        stmt.set_limit(1);
        stmt.bind_value("table", self.conn.apply_prefix(table));
        stmt.bind_value("name", name.clone());
        stmt.execute().await?;

        if stmt.fetch_next_column(0).await?.is_some() {
            self.conn
                .execute(&format!(
                    "ALTER TABLE {} DROP FOREIGN KEY {}",
                    self.conn.quote_identifier(table),
                    self.conn.quote_identifier(&name)
                ))
                .await?;
        }
        Ok(())
    }

    async fn flush_database(&self) -> Result<()> {
        self.conn.execute("SET FOREIGN_KEY_CHECKS = 0").await?;
        let result = self.drop_all_objects().await;
        self.conn.execute("SET FOREIGN_KEY_CHECKS = 1").await?;
        result
    }

    async fn flush_data(&self) -> Result<()> {
        self.conn.execute("SET FOREIGN_KEY_CHECKS = 0").await?;
        let result = self.delete_all_rows().await;
        self.conn.execute("SET FOREIGN_KEY_CHECKS = 1").await?;
        result
    }
}
