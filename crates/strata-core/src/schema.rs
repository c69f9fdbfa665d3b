//! Abstract schema descriptors.
//!
//! Tables, columns, indexes and foreign keys are described in
//! dialect-neutral terms and translated to DDL by a
//! [`Platform`](crate::platform::Platform). Index and foreign key names
//! are derived from their content, so the same descriptor always maps to
//! the same database object regardless of creation order.

use crate::error::Result;
use crate::platform::Platform;
use crate::value::SqlValue;

/// Portable column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Bounded variable-length text. Requires a limit.
    VarChar,
    /// Fixed-length text. Requires a limit.
    Char,
    /// Unbounded text.
    Text,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    BigInt,
    /// Double-precision float.
    Double,
    /// Unbounded binary data.
    Blob,
    /// Boolean.
    Bool,
    /// Bounded binary data. Requires a limit.
    Binary,
    /// A 128-bit UUID.
    Uuid,
}

/// A column descriptor.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    column_type: ColumnType,
    limit: Option<u32>,
    nullable: bool,
    default: Option<SqlValue>,
    primary_key: bool,
    identity: bool,
    unsigned: bool,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            limit: None,
            nullable: false,
            default: None,
            primary_key: false,
            identity: false,
            unsigned: false,
        }
    }

    /// Sets the length limit for bounded types.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Allows `NULL` values.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the default value. A `NULL` default also makes the column
    /// nullable.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<SqlValue>) -> Self {
        let value = value.into();
        if value.is_null() {
            self.nullable = true;
        }
        self.default = Some(value);
        self
    }

    /// Marks the column as part of the primary key.
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Marks the column as an auto-increment identity column. Implies
    /// primary key.
    #[must_use]
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    /// Marks an integer column unsigned, on dialects that support it.
    #[must_use]
    pub fn unsigned(mut self) -> Self {
        self.unsigned = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    #[must_use]
    pub fn type_limit(&self) -> Option<u32> {
        self.limit
    }

    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    #[must_use]
    pub fn default(&self) -> Option<&SqlValue> {
        self.default.as_ref()
    }

    #[must_use]
    pub fn is_primary_key(&self) -> bool {
        self.primary_key || self.identity
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    #[must_use]
    pub fn is_unsigned(&self) -> bool {
        self.unsigned
    }
}

/// An index descriptor.
#[derive(Debug, Clone)]
pub struct Index {
    columns: Vec<String>,
    unique: bool,
}

impl Index {
    #[must_use]
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    /// Makes the index a unique index.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Content-addressed index name, stable for the same table and column
    /// list.
    #[must_use]
    pub fn name(&self, table: &str) -> String {
        format!(
            "idx_{:016x}",
            fnv1a_64(format!("{table}||{}", self.columns.join(",")).as_bytes())
        )
    }
}

/// Referential action taken on update or delete of a referenced row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ForeignKeyAction {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// A foreign key descriptor.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    columns: Vec<String>,
    ref_table: String,
    ref_columns: Vec<String>,
    on_update: ForeignKeyAction,
    on_delete: ForeignKeyAction,
}

impl ForeignKey {
    #[must_use]
    pub fn new<I, J, S, T>(columns: I, ref_table: impl Into<String>, ref_columns: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ref_table: ref_table.into(),
            ref_columns: ref_columns.into_iter().map(Into::into).collect(),
            on_update: ForeignKeyAction::Cascade,
            on_delete: ForeignKeyAction::Cascade,
        }
    }

    #[must_use]
    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = action;
        self
    }

    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn ref_table(&self) -> &str {
        &self.ref_table
    }

    #[must_use]
    pub fn ref_columns(&self) -> &[String] {
        &self.ref_columns
    }

    #[must_use]
    pub fn update_action(&self) -> ForeignKeyAction {
        self.on_update
    }

    #[must_use]
    pub fn delete_action(&self) -> ForeignKeyAction {
        self.on_delete
    }

    /// Content-addressed constraint name, stable for the same source,
    /// target and column lists.
    #[must_use]
    pub fn name(&self, table: &str) -> String {
        let input = format!(
            "{table}||{}||{}||{}",
            self.columns.join(","),
            self.ref_table,
            self.ref_columns.join(",")
        );
        format!("fk_{:016x}", fnv1a_64(input.as_bytes()))
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// A table under construction or modification.
///
/// Descriptors accumulate as pending changes until flushed by
/// [`Table::create`], [`Table::update`] or [`Table::save`]; a successful
/// flush clears the pending lists so a table handle can be reused for
/// further changes.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    indexes: Vec<Index>,
    foreign_keys: Vec<ForeignKey>,
    engine: Option<String>,
    collation: Option<String>,
}

impl Table {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            engine: None,
            collation: None,
        }
    }

    /// Storage engine hint, honored by dialects that have engines.
    #[must_use]
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    /// Collation hint, honored by dialects that set one per table.
    #[must_use]
    pub fn with_collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    pub fn add_column(&mut self, column: Column) -> &mut Self {
        self.columns.push(column);
        self
    }

    pub fn add_index(&mut self, index: Index) -> &mut Self {
        self.indexes.push(index);
        self
    }

    pub fn add_foreign_key(&mut self, key: ForeignKey) -> &mut Self {
        self.foreign_keys.push(key);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    #[must_use]
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    #[must_use]
    pub fn engine(&self) -> Option<&str> {
        self.engine.as_deref()
    }

    #[must_use]
    pub fn collation(&self) -> Option<&str> {
        self.collation.as_deref()
    }

    /// Primary key column names, in declaration order.
    #[must_use]
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key())
            .map(Column::name)
            .collect()
    }

    /// Creates the table from all pending descriptors, then clears them.
    pub async fn create(&mut self, platform: &dyn Platform) -> Result<()> {
        platform.create_table(self).await?;
        self.clear_pending();
        Ok(())
    }

    /// Applies all pending descriptors to an existing table, then clears
    /// them.
    pub async fn update(&mut self, platform: &dyn Platform) -> Result<()> {
        for column in &self.columns {
            platform.add_column(&self.name, column).await?;
        }
        for index in &self.indexes {
            platform.add_index(&self.name, index).await?;
        }
        for key in &self.foreign_keys {
            platform.add_foreign_key(&self.name, key).await?;
        }
        self.clear_pending();
        Ok(())
    }

    /// Creates or updates depending on whether the table already exists.
    pub async fn save(&mut self, platform: &dyn Platform) -> Result<()> {
        if platform.has_table(&self.name).await? {
            self.update(platform).await
        } else {
            self.create(platform).await
        }
    }

    fn clear_pending(&mut self) {
        self.columns.clear();
        self.indexes.clear();
        self.foreign_keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_defaults() {
        let col = Column::new("id", ColumnType::Int).identity();
        assert!(col.is_primary_key());
        assert!(!col.is_nullable());

        let col = Column::new("note", ColumnType::Text).default_value(None::<i64>);
        assert!(col.is_nullable());
        assert_eq!(col.default(), Some(&SqlValue::Null));
    }

    #[test]
    fn test_index_name_is_content_addressed() {
        let a = Index::new(["x", "y"]);
        let b = Index::new(["x", "y"]).unique();
        let c = Index::new(["y", "x"]);

        assert_eq!(a.name("t"), b.name("t"));
        assert_ne!(a.name("t"), c.name("t"));
        assert_ne!(a.name("t"), a.name("u"));
        assert!(a.name("t").starts_with("idx_"));
    }

    #[test]
    fn test_foreign_key_name_is_content_addressed() {
        let a = ForeignKey::new(["uid"], "users", ["id"]);
        let b = ForeignKey::new(["uid"], "users", ["id"]).on_delete(ForeignKeyAction::SetNull);
        let c = ForeignKey::new(["uid"], "accounts", ["id"]);

        assert_eq!(a.name("t"), b.name("t"));
        assert_ne!(a.name("t"), c.name("t"));
        assert!(a.name("t").starts_with("fk_"));
    }

    #[test]
    fn test_primary_key_columns() {
        let mut table = Table::new("#__t");
        table
            .add_column(Column::new("a", ColumnType::Int).primary_key())
            .add_column(Column::new("b", ColumnType::Int))
            .add_column(Column::new("c", ColumnType::Int).identity());

        assert_eq!(table.primary_key_columns(), vec!["a", "c"]);
    }
}
