//! Timestamp-versioned database migrations for `strata-core`.
//!
//! Migrations are plain Rust types implementing [`migration::Migration`],
//! identified by a 14-digit `YYYYMMDDHHMMSS` version stamp. The
//! [`manager::MigrationManager`] applies registered migrations in version
//! order, recording each in the `#__strata_migrations` tracking table;
//! the check, the migration body and the record share one transaction, so
//! applying is idempotent and crash-safe.
//!
//! Migrations only go up. There is no downgrade path: reverting a change
//! means writing a new migration that undoes it (or restoring a backup).
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_migrate::prelude::*;
//!
//! pub struct Version20260829120000;
//!
//! #[async_trait]
//! impl Migration for Version20260829120000 {
//!     fn version(&self) -> &str {
//!         "20260829120000"
//!     }
//!
//!     async fn up(&self, ctx: &MigrationContext) -> Result<()> {
//!         let mut table = ctx.table("#__users");
//!         table
//!             .add_column(Column::new("id", ColumnType::Int).identity())
//!             .add_column(Column::new("name", ColumnType::VarChar).limit(100));
//!         table.create(ctx.platform()).await?;
//!         Ok(())
//!     }
//! }
//!
//! let mut manager = MigrationManager::new(conn);
//! manager.register(Arc::new(Version20260829120000))?;
//! manager.migrate_up().await?;
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Write a new migration skeleton
//! strata-migrate generate
//!
//! # Show which migration files are applied
//! strata-migrate status
//!
//! # Delete all rows outside tracking tables
//! strata-migrate flush
//!
//! # Drop every table and view
//! strata-migrate flush --all
//! ```

pub mod error;
pub mod manager;
pub mod migration;
pub mod writer;

/// Prelude for convenient imports.
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::error::{MigrateError, Result};
    pub use crate::manager::{MigrationManager, MigrationStatus, TRACKING_TABLE};
    pub use crate::migration::{Migration, MigrationContext};
    pub use crate::writer::{generate_version, MigrationWriter};

    pub use strata_core::connection::Connection;
    pub use strata_core::schema::{
        Column, ColumnType, ForeignKey, ForeignKeyAction, Index, Table,
    };
    pub use strata_core::value::SqlValue;
}
