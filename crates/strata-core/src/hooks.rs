//! Extension seams for connections.
//!
//! Three collaborator traits let callers intercept a connection without
//! subclassing it: [`ParamEncoder`] rewrites bound parameter values,
//! [`ConnectionDecorator`] rewrites SQL text at prepare time, and
//! [`TransactionCoordinator`] takes over outermost transaction control.

use async_trait::async_trait;

use crate::connection::Connection;
use crate::error::Result;
use crate::value::SqlValue;

/// Converts domain values into SQL-bindable values.
///
/// Encoders registered on a connection are consulted in registration order
/// for every bound parameter; the first encoder to return `Some` wins and
/// the chain stops.
pub trait ParamEncoder: Send + Sync {
    /// Returns the encoded replacement value, or `None` to pass on the
    /// value unchanged to the next encoder.
    fn encode_param(&self, conn: &Connection, value: &SqlValue) -> Option<SqlValue>;
}

/// A [`ParamEncoder`] backed by a closure.
pub struct CallbackParamEncoder<F> {
    callback: F,
}

impl<F> CallbackParamEncoder<F>
where
    F: Fn(&Connection, &SqlValue) -> Option<SqlValue> + Send + Sync,
{
    #[must_use]
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ParamEncoder for CallbackParamEncoder<F>
where
    F: Fn(&Connection, &SqlValue) -> Option<SqlValue> + Send + Sync,
{
    fn encode_param(&self, conn: &Connection, value: &SqlValue) -> Option<SqlValue> {
        (self.callback)(conn, value)
    }
}

/// Rewrites SQL text before a statement is compiled.
///
/// Decorators run in registration order, each receiving the previous
/// decorator's output. Rewritten SQL is passed through the same chain
/// exactly once per prepare; a decorator never sees its own output again.
pub trait ConnectionDecorator: Send + Sync {
    /// Returns the (possibly rewritten) SQL to compile.
    fn prepare_sql(&self, conn: &Connection, sql: String) -> String;
}

/// Delegates outermost transaction boundaries to an external coordinator.
///
/// Only depth 0 -> 1 and 1 -> 0 transitions are delegated; savepoint
/// handling for nested levels stays inside the connection.
#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    /// Called instead of the native begin for the outermost transaction.
    async fn begin(&self, conn: &Connection) -> Result<()>;

    /// Called instead of the native commit for the outermost transaction.
    async fn commit(&self, conn: &Connection) -> Result<()>;

    /// Called instead of the native rollback for the outermost transaction.
    async fn roll_back(&self, conn: &Connection) -> Result<()>;
}
