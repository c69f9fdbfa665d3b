//! The migration contract.

use async_trait::async_trait;
use strata_core::connection::Connection;
use strata_core::platform::Platform;
use strata_core::schema::Table;

use crate::error::{MigrateError, Result};

/// A single schema migration, identified by a 14-digit version stamp.
///
/// Migrations only go up. Reverting a change means writing a new
/// migration that undoes it.
#[async_trait]
pub trait Migration: Send + Sync {
    /// The `YYYYMMDDHHMMSS` version stamp. Versions order migrations and
    /// key the tracking table.
    fn version(&self) -> &str;

    /// Applies the migration. Runs inside a transaction together with the
    /// tracking table insert.
    async fn up(&self, ctx: &MigrationContext) -> Result<()>;
}

/// Checks that a version is a 14-digit timestamp.
#[must_use]
pub fn is_valid_version(version: &str) -> bool {
    version.len() == 14 && version.bytes().all(|b| b.is_ascii_digit())
}

pub(crate) fn validate_version(version: &str) -> Result<()> {
    if is_valid_version(version) {
        Ok(())
    } else {
        Err(MigrateError::InvalidVersion(version.to_string()))
    }
}

/// Everything a migration body needs: the connection for data changes and
/// the schema platform for DDL.
pub struct MigrationContext {
    conn: Connection,
    platform: Box<dyn Platform>,
}

impl MigrationContext {
    pub(crate) fn new(conn: Connection) -> Result<Self> {
        let platform = conn.platform()?;
        Ok(Self { conn, platform })
    }

    /// The connection migrations run on.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// The schema platform for the connection's dialect.
    #[must_use]
    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Starts a table descriptor. Use the `#__` prefix token for names
    /// that should follow the connection's table prefix.
    #[must_use]
    pub fn table(&self, name: &str) -> Table {
        Table::new(name)
    }

    /// Whether a table exists.
    pub async fn has_table(&self, name: &str) -> Result<bool> {
        Ok(self.platform.has_table(name).await?)
    }

    /// Drops a table.
    pub async fn drop_table(&self, name: &str) -> Result<()> {
        self.platform.drop_table(name).await?;
        Ok(())
    }

    /// Runs raw SQL, with prefix and backtick substitution applied.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        Ok(self.conn.execute(sql).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_validation() {
        assert!(is_valid_version("20260829123000"));
        assert!(!is_valid_version("2026082912300"));
        assert!(!is_valid_version("202608291230000"));
        assert!(!is_valid_version("2026x829123000"));
        assert!(!is_valid_version(""));
    }
}
