//! Migration registration and execution.
//!
//! The manager keeps registered migrations ordered by version and tracks
//! applied versions in the `#__strata_migrations` table. Applying a
//! migration is idempotent: the check, the migration body and the
//! tracking insert share one transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use strata_core::connection::Connection;
use strata_core::schema::{Column, ColumnType, Table};
use tracing::info;

use crate::error::{MigrateError, Result};
use crate::migration::{validate_version, Migration, MigrationContext};

/// Name of the tracking table, before prefix substitution.
pub const TRACKING_TABLE: &str = "#__strata_migrations";

/// Status of one registered migration.
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub version: String,
    /// Timestamp recorded when the migration was applied, if it was.
    pub applied_at: Option<String>,
}

/// Registers and applies migrations on one connection.
pub struct MigrationManager {
    conn: Connection,
    migrations: BTreeMap<String, Arc<dyn Migration>>,
}

impl MigrationManager {
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            migrations: BTreeMap::new(),
        }
    }

    /// Registers a migration. Versions must be unique 14-digit stamps.
    pub fn register(&mut self, migration: Arc<dyn Migration>) -> Result<()> {
        let version = migration.version().to_string();
        validate_version(&version)?;
        if self.migrations.contains_key(&version) {
            return Err(MigrateError::DuplicateVersion(version));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Registered versions in ascending order.
    #[must_use]
    pub fn versions(&self) -> Vec<String> {
        self.migrations.keys().cloned().collect()
    }

    /// Creates the tracking table when it does not exist yet.
    pub async fn ensure_tracking_table(&self) -> Result<()> {
        let platform = self.conn.platform()?;
        if platform.has_table(TRACKING_TABLE).await? {
            return Ok(());
        }

        let mut table = Table::new(TRACKING_TABLE);
        table
            .add_column(Column::new("version", ColumnType::Char).limit(14).primary_key())
            .add_column(Column::new("applied_at", ColumnType::VarChar).limit(32));
        table.create(platform.as_ref()).await?;
        Ok(())
    }

    /// All versions recorded as applied, in ascending order.
    pub async fn applied_versions(&self) -> Result<BTreeSet<String>> {
        self.ensure_tracking_table().await?;

        let mut stmt = self
            .conn
            .prepare("SELECT `version` FROM `#__strata_migrations` ORDER BY `version`");
        stmt.execute().await?;

        Ok(stmt
            .fetch_columns("version")
            .await?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    /// Applies all registered migrations that are not yet recorded, in
    /// version order. Returns the number of migrations applied.
    pub async fn migrate_up(&self) -> Result<usize> {
        if self.migrations.is_empty() {
            return Ok(0);
        }
        self.ensure_tracking_table().await?;

        // A count query is enough to detect the common nothing-pending
        // case without pulling the version list.
        let mut stmt = self
            .conn
            .prepare("SELECT COUNT(*) AS n FROM `#__strata_migrations`");
        stmt.execute().await?;
        let recorded = stmt
            .fetch_next_column("n")
            .await?
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let applied = if recorded == 0 {
            BTreeSet::new()
        } else {
            self.applied_versions().await?
        };

        if self.migrations.keys().all(|v| applied.contains(v)) {
            return Ok(0);
        }

        let mut count = 0;
        for version in self.migrations.keys() {
            if applied.contains(version) {
                continue;
            }
            if self.execute_migration_up(version).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Applies one registered migration inside a transaction. Returns
    /// `false` when the version was already recorded.
    pub async fn execute_migration_up(&self, version: &str) -> Result<bool> {
        let migration = self
            .migrations
            .get(version)
            .ok_or_else(|| MigrateError::MigrationNotFound(version.to_string()))?
            .clone();

        self.ensure_tracking_table().await?;
        self.conn.begin_transaction().await?;

        match self.apply(migration.as_ref()).await {
            Ok(applied) => {
                self.conn.commit().await?;
                if applied {
                    info!(version, "migration applied");
                }
                Ok(applied)
            }
            Err(err) => {
                let _ = self.conn.roll_back().await;
                Err(err)
            }
        }
    }

    /// Downgrades are rejected; restore a backup and roll forward.
    pub async fn migrate_down(&self) -> Result<usize> {
        Err(MigrateError::DowngradeNotSupported)
    }

    /// See [`MigrationManager::migrate_down`].
    pub async fn execute_migration_down(&self, _version: &str) -> Result<bool> {
        Err(MigrateError::DowngradeNotSupported)
    }

    /// Registered migrations with their applied timestamps.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>> {
        self.ensure_tracking_table().await?;

        let mut stmt = self
            .conn
            .prepare("SELECT `version`, `applied_at` FROM `#__strata_migrations`");
        stmt.execute().await?;

        let mut applied = BTreeMap::new();
        for row in stmt.fetch_rows().await? {
            let Some(version) = row.get("version").and_then(|v| v.as_str()) else {
                continue;
            };
            let stamp = row
                .get("applied_at")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            applied.insert(version.to_string(), stamp.to_string());
        }

        Ok(self
            .migrations
            .keys()
            .map(|version| MigrationStatus {
                version: version.clone(),
                applied_at: applied.get(version).cloned(),
            })
            .collect())
    }

    async fn apply(&self, migration: &dyn Migration) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM `#__strata_migrations` WHERE `version` = :version");
        stmt.set_limit(1);
        stmt.bind_value("version", migration.version());
        stmt.execute().await?;
        if stmt.fetch_next_column(0).await?.is_some() {
            return Ok(false);
        }

        let ctx = MigrationContext::new(self.conn.clone())?;
        migration.up(&ctx).await?;

        self.conn
            .insert(
                TRACKING_TABLE,
                &[
                    ("version", migration.version().into()),
                    (
                        "applied_at",
                        Utc::now().format("%Y-%m-%d %H:%M:%S").to_string().into(),
                    ),
                ],
            )
            .await?;
        Ok(true)
    }
}
