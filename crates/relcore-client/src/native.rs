//! Native driver primitives.
//!
//! The core never speaks a wire protocol. It drives a native driver through
//! the traits in this module: a [`NativeConnection`] creates
//! [`NativeCommand`]s and [`NativeTransaction`]s, and a command executed in
//! reader mode yields a [`NativeReader`].
//!
//! Drivers report failures as boxed errors ([`DriverError`]); the core hands
//! them to callers unchanged inside [`Error::Driver`](crate::Error::Driver),
//! so they can be downcast back to the driver's own error type.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relcore_types::{DbParameter, SqlValue};

use crate::ambient::AmbientTransaction;
use crate::transaction::IsolationLevel;

/// An error reported by a native driver.
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for native driver calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Physical state of a native connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Closed,
    /// Connected and usable.
    Open,
    /// Connected but unusable; must be closed before reopening.
    Broken,
}

/// How a provider spells savepoint commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavepointDialect {
    /// `SAVEPOINT x`, `ROLLBACK TO SAVEPOINT x`, `RELEASE SAVEPOINT x`.
    #[default]
    Standard,
    /// `SAVE TRANSACTION x`, `ROLLBACK TRANSACTION x`; no release.
    SqlServer,
    /// The provider has no savepoints.
    Unsupported,
}

impl SavepointDialect {
    /// SQL creating a savepoint, or `None` when unsupported.
    #[must_use]
    pub fn create_sql(&self, name: &str) -> Option<String> {
        match self {
            Self::Standard => Some(format!("SAVEPOINT {name}")),
            Self::SqlServer => Some(format!("SAVE TRANSACTION {name}")),
            Self::Unsupported => None,
        }
    }

    /// SQL rolling back to a savepoint, or `None` when unsupported.
    #[must_use]
    pub fn rollback_sql(&self, name: &str) -> Option<String> {
        match self {
            Self::Standard => Some(format!("ROLLBACK TO SAVEPOINT {name}")),
            Self::SqlServer => Some(format!("ROLLBACK TRANSACTION {name}")),
            Self::Unsupported => None,
        }
    }

    /// SQL releasing a savepoint, or `None` when release is a no-op.
    #[must_use]
    pub fn release_sql(&self, name: &str) -> Option<String> {
        match self {
            Self::Standard => Some(format!("RELEASE SAVEPOINT {name}")),
            Self::SqlServer | Self::Unsupported => None,
        }
    }

    /// Whether savepoints can be created at all.
    #[must_use]
    pub fn supports_savepoints(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// A physical connection owned by a native driver.
#[async_trait]
pub trait NativeConnection: Send {
    /// Current physical state.
    fn state(&self) -> ConnectionState;

    /// The connection string the driver connects with.
    fn connection_string(&self) -> &str;

    /// Replace the connection string. Only called while closed.
    fn set_connection_string(&mut self, connection_string: &str);

    /// Open the physical connection.
    async fn open(&mut self) -> DriverResult<()>;

    /// Close the physical connection.
    async fn close(&mut self) -> DriverResult<()>;

    /// Create a command bound to this connection.
    fn create_command(&mut self) -> Box<dyn NativeCommand>;

    /// Start a transaction.
    async fn begin_transaction(
        &mut self,
        isolation_level: IsolationLevel,
    ) -> DriverResult<Arc<dyn NativeTransaction>>;

    /// Enlist in an ambient transaction, or leave the current one with `None`.
    fn enlist_transaction(&mut self, transaction: Option<&Arc<AmbientTransaction>>) -> DriverResult<()>;

    /// Whether the driver can take part in ambient transactions.
    fn supports_ambient_transactions(&self) -> bool {
        true
    }

    /// Savepoint spelling for this provider.
    fn savepoint_dialect(&self) -> SavepointDialect {
        SavepointDialect::Standard
    }
}

/// A command created by a [`NativeConnection`].
#[async_trait]
pub trait NativeCommand: Send {
    /// Set the command text.
    fn set_text(&mut self, text: &str);

    /// The command text.
    fn text(&self) -> &str;

    /// Set the command timeout; `None` uses the driver default.
    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Attach a transaction, or detach with `None`.
    fn set_transaction(&mut self, transaction: Option<Arc<dyn NativeTransaction>>);

    /// Parameters attached so far, in order.
    fn parameters(&self) -> &[DbParameter];

    /// Attach a parameter.
    fn add_parameter(&mut self, parameter: DbParameter);

    /// Remove all parameters.
    fn clear_parameters(&mut self);

    /// Execute and return the number of rows affected.
    async fn execute_non_query(&mut self) -> DriverResult<i64>;

    /// Execute and return the first column of the first row.
    async fn execute_scalar(&mut self) -> DriverResult<SqlValue>;

    /// Execute and return a forward-only reader.
    async fn execute_reader(&mut self) -> DriverResult<Box<dyn NativeReader>>;

    /// Release driver resources held by the command.
    fn dispose(&mut self);
}

/// A forward-only result reader.
#[async_trait]
pub trait NativeReader: Send {
    /// Number of columns in the current result.
    fn field_count(&self) -> usize;

    /// Name of a column.
    fn column_name(&self, ordinal: usize) -> Option<&str>;

    /// Advance to the next row.
    async fn read(&mut self) -> DriverResult<bool>;

    /// Value of a column in the current row.
    fn value(&self, ordinal: usize) -> DriverResult<SqlValue>;

    /// Whether a column in the current row is NULL.
    fn is_null(&self, ordinal: usize) -> DriverResult<bool> {
        self.value(ordinal).map(|v| v.is_null())
    }

    /// Rows changed by the statement, or `-1` for a query.
    fn records_affected(&self) -> i64;

    /// Close the reader.
    async fn close(&mut self) -> DriverResult<()>;
}

/// A transaction started on a [`NativeConnection`].
#[async_trait]
pub trait NativeTransaction: Send + Sync {
    /// Isolation level the transaction was started with.
    fn isolation_level(&self) -> IsolationLevel;

    /// Commit the transaction.
    async fn commit(&self) -> DriverResult<()>;

    /// Roll the transaction back.
    async fn rollback(&self) -> DriverResult<()>;

    /// Release driver resources, rolling back if still pending.
    fn dispose(&self);
}

/// Creates native connections for a connection string.
pub trait NativeConnectionFactory: Send + Sync {
    /// Create an unopened connection.
    fn create(&self, connection_string: &str) -> Box<dyn NativeConnection>;
}

impl<F> NativeConnectionFactory for F
where
    F: Fn(&str) -> Box<dyn NativeConnection> + Send + Sync,
{
    fn create(&self, connection_string: &str) -> Box<dyn NativeConnection> {
        self(connection_string)
    }
}

/// Whether two native transactions are the same object.
#[must_use]
pub fn same_transaction(a: &Arc<dyn NativeTransaction>, b: &Arc<dyn NativeTransaction>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}
