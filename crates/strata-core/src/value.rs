//! SQL values and result rows.

use std::cmp::Ordering;

/// A dynamically typed SQL value as bound to or fetched from a statement.
#[derive(Debug, Clone, Default)]
pub enum SqlValue {
    #[default]
    Null,
    Integer(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
}

impl SqlValue {
    /// Returns `true` when the value is SQL `NULL`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value as an integer if it carries one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Returns the value as a float if it carries one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            #[allow(clippy::cast_precision_loss)]
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the value as a string slice if it carries text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the value as a byte slice if it carries a blob.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// Renders the value as an SQL literal, for diagnostics only.
    #[must_use]
    pub fn literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Double(d) => d.to_string(),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Blob(b) => format!("x'{}'", hex(b)),
            Self::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Integer(_) => 2,
            Self::Double(_) => 3,
            Self::Text(_) => 4,
            Self::Blob(_) => 5,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SqlValue {}

impl PartialOrd for SqlValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SqlValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            (Self::Blob(a), Self::Blob(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A fetched result row: column names paired with values, in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    /// Creates a row from (name, value) pairs.
    #[must_use]
    pub fn new(columns: Vec<(String, SqlValue)>) -> Self {
        Self { columns }
    }

    /// Number of columns in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` when the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Looks up a value by column name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Looks up a value by column position.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&SqlValue> {
        self.columns.get(index).map(|(_, v)| v)
    }

    /// Looks up a value by a name-or-index column reference.
    #[must_use]
    pub fn get_ref(&self, column: &ColumnRef) -> Option<&SqlValue> {
        match column {
            ColumnRef::Index(i) => self.get_index(*i),
            ColumnRef::Name(n) => self.get(n),
        }
    }

    /// Returns the name of the column at the given position.
    #[must_use]
    pub fn column_name(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(|(n, _)| n.as_str())
    }

    /// Sets a column value, appending the column when it does not exist yet.
    pub fn set(&mut self, name: &str, value: SqlValue) {
        if let Some(slot) = self.columns.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            self.columns.push((name.to_string(), value));
        }
    }

    /// Iterates over (name, value) pairs in select order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Consumes the row into its (name, value) pairs.
    #[must_use]
    pub fn into_columns(self) -> Vec<(String, SqlValue)> {
        self.columns
    }
}

/// Identifies a result column either by name or by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

impl From<usize> for ColumnRef {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl From<&str> for ColumnRef {
    fn from(n: &str) -> Self {
        Self::Name(n.to_string())
    }
}

impl From<String> for ColumnRef {
    fn from(n: String) -> Self {
        Self::Name(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(SqlValue::from(42i64), SqlValue::Integer(42));
        assert_eq!(SqlValue::from("abc"), SqlValue::Text("abc".to_string()));
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some(1i32)), SqlValue::Integer(1));
    }

    #[test]
    fn test_value_ordering() {
        assert!(SqlValue::Null < SqlValue::Integer(0));
        assert!(SqlValue::Integer(1) < SqlValue::Integer(2));
        assert!(SqlValue::Text("a".into()) < SqlValue::Text("b".into()));
        assert_eq!(SqlValue::Double(1.5), SqlValue::Double(1.5));
    }

    #[test]
    fn test_row_lookup() {
        let mut row = Row::new(vec![
            ("id".to_string(), SqlValue::Integer(7)),
            ("name".to_string(), SqlValue::Text("foo".to_string())),
        ]);

        assert_eq!(row.get("id"), Some(&SqlValue::Integer(7)));
        assert_eq!(row.get_index(1), Some(&SqlValue::Text("foo".to_string())));
        assert_eq!(row.get("missing"), None);

        row.set("name", SqlValue::Text("bar".to_string()));
        row.set("extra", SqlValue::Bool(true));
        assert_eq!(row.get("name"), Some(&SqlValue::Text("bar".to_string())));
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_literal_rendering() {
        assert_eq!(SqlValue::Null.literal(), "NULL");
        assert_eq!(SqlValue::Text("o'clock".into()).literal(), "'o''clock'");
        assert_eq!(SqlValue::Bool(true).literal(), "1");
        assert_eq!(SqlValue::Blob(vec![0xab, 0x01]).literal(), "x'ab01'");
    }
}
