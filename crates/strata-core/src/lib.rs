//! # strata-core
//!
//! A portable database access layer over native drivers.
//!
//! This crate provides:
//! - A [`Connection`] with nested transactions, table prefixing and
//!   dialect-aware identifier quoting
//! - Prepared [`Statement`]s with named parameters, pagination and result
//!   post-processing
//! - A portable error taxonomy classified from native driver errors
//! - Dialect [`platform`]s that translate abstract schema descriptors into
//!   concrete DDL
//!
//! # Connections and statements
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_core::prelude::*;
//! use strata_core::sqlite::SqliteDriver;
//!
//! let driver = SqliteDriver::connect("sqlite:app.db").await?;
//! let conn = Connection::new(Arc::new(driver));
//! conn.set_prefix("app_");
//!
//! // `#__` expands to the configured prefix, backticks become the
//! // dialect's identifier quoting.
//! let mut stmt = conn.prepare("SELECT `id`, `name` FROM `#__users` WHERE `id` = :id");
//! stmt.bind_value("id", 7);
//! stmt.execute().await?;
//!
//! if let Some(row) = stmt.fetch_next_row().await? {
//!     println!("{:?}", row.get("name"));
//! }
//! ```
//!
//! # Nested transactions
//!
//! Transactions nest through savepoints named after their depth. A nested
//! rollback discards only the innermost level; the outermost commit or
//! rollback decides the final outcome:
//!
//! ```rust,ignore
//! conn.begin_transaction().await?;
//! conn.begin_transaction().await?;
//! conn.roll_back().await?;   // inner level gone
//! conn.commit().await?;      // outer level persists
//! ```
//!
//! # Schema management
//!
//! ```rust,ignore
//! use strata_core::schema::{Column, ColumnType, Index, Table};
//!
//! let platform = conn.platform()?;
//! let mut table = Table::new("#__users");
//! table
//!     .add_column(Column::new("id", ColumnType::Int).identity())
//!     .add_column(Column::new("name", ColumnType::VarChar).limit(100))
//!     .add_index(Index::new(["name"]).unique());
//! table.save(platform.as_ref()).await?;
//! ```

pub mod connection;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod platform;
pub mod schema;
pub mod sqlite;
pub mod statement;
pub mod value;

pub use connection::{Connection, SCHEMA_OBJECT_PREFIX};
pub use driver::{Driver, DriverKind, DriverStatement};
pub use error::{DatabaseError, DriverError, Result};
pub use statement::Statement;
pub use value::{ColumnRef, Row, SqlValue};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::connection::{Connection, SCHEMA_OBJECT_PREFIX};
    pub use crate::driver::{Driver, DriverKind, DriverStatement};
    pub use crate::error::{DatabaseError, DriverError, Result};
    pub use crate::hooks::{
        CallbackParamEncoder, ConnectionDecorator, ParamEncoder, TransactionCoordinator,
    };
    pub use crate::platform::Platform;
    pub use crate::schema::{
        Column, ColumnType, ForeignKey, ForeignKeyAction, Index, Table,
    };
    pub use crate::statement::Statement;
    pub use crate::value::{ColumnRef, Row, SqlValue};
}
