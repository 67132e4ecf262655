//! Interception hooks for commands, connections and transactions.
//!
//! Interceptors observe and optionally alter execution. "Before" hooks
//! receive the result accumulated so far and return a new one, so several
//! interceptors compose in registration order; returning
//! [`InterceptionResult::SuppressWithResult`] or
//! [`InterceptionResult::Suppress`] skips the native call. "After" hooks may
//! replace the result. Failure hooks only observe; the error always
//! propagates unchanged.
//!
//! Every method has a pass-through default, so an interceptor implements only
//! what it needs. [`CommandInterceptor::is_enabled`] and its siblings are
//! cheap predicates checked before any event data is built.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use relcore_types::SqlValue;
use uuid::Uuid;

use crate::error::Error;
use crate::native::{NativeCommand, NativeReader, NativeTransaction};
use crate::transaction::IsolationLevel;

/// Result of a "before" interception hook.
#[derive(Debug, Default)]
pub enum InterceptionResult<T> {
    /// Proceed with the native operation.
    #[default]
    NotIntercepted,
    /// Skip the native operation and use this result instead.
    SuppressWithResult(T),
    /// Skip the native operation; it produces no result.
    Suppress,
}

impl<T> InterceptionResult<T> {
    /// Whether the native operation will be skipped.
    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        !matches!(self, Self::NotIntercepted)
    }

    /// The substituted result, if any.
    #[must_use]
    pub fn into_result(self) -> Option<T> {
        match self {
            Self::SuppressWithResult(v) => Some(v),
            Self::NotIntercepted | Self::Suppress => None,
        }
    }
}

/// The execution mode of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteMethod {
    /// Rows-affected count.
    NonQuery,
    /// Single value.
    Scalar,
    /// Forward-only reader.
    Reader,
}

impl ExecuteMethod {
    /// Lower-case name used in log fields.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NonQuery => "non_query",
            Self::Scalar => "scalar",
            Self::Reader => "reader",
        }
    }
}

/// Data passed to command hooks.
#[derive(Debug, Clone)]
pub struct CommandEventData<'a> {
    /// Connection the command runs on.
    pub connection_id: Uuid,
    /// Correlation id for this execution; nil when nothing observes it.
    pub command_id: Uuid,
    /// Execution mode.
    pub method: ExecuteMethod,
    /// Command text as it may be logged.
    pub log_text: &'a str,
    /// Elapsed time, set for "executed" and failure hooks.
    pub elapsed: Option<Duration>,
}

/// Data passed to connection hooks.
#[derive(Debug, Clone)]
pub struct ConnectionEventData {
    /// Connection id.
    pub connection_id: Uuid,
    /// Elapsed time, set for completion and failure hooks.
    pub elapsed: Option<Duration>,
}

/// The transaction operation a hook is observing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionAction {
    /// Starting a transaction.
    Start,
    /// Adopting an external transaction.
    Use,
    /// Committing.
    Commit,
    /// Rolling back.
    Rollback,
    /// Creating a savepoint.
    CreateSavepoint,
    /// Rolling back to a savepoint.
    RollbackToSavepoint,
    /// Releasing a savepoint.
    ReleaseSavepoint,
}

/// Data passed to transaction hooks.
#[derive(Debug, Clone)]
pub struct TransactionEventData<'a> {
    /// Connection id.
    pub connection_id: Uuid,
    /// Transaction id.
    pub transaction_id: Uuid,
    /// Isolation level.
    pub isolation_level: IsolationLevel,
    /// Operation being observed.
    pub action: TransactionAction,
    /// Savepoint name for savepoint operations.
    pub savepoint: Option<&'a str>,
    /// Elapsed time, set for completion and failure hooks.
    pub elapsed: Option<Duration>,
}

/// Hooks around native command creation and execution.
#[allow(unused_variables)]
pub trait CommandInterceptor: Send + Sync {
    /// Whether any hook of this interceptor should fire.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Before a native command is created.
    fn command_creating(
        &self,
        event: &CommandEventData<'_>,
        result: InterceptionResult<Box<dyn NativeCommand>>,
    ) -> InterceptionResult<Box<dyn NativeCommand>> {
        result
    }

    /// After a native command is created.
    fn command_created(
        &self,
        event: &CommandEventData<'_>,
        command: Box<dyn NativeCommand>,
    ) -> Box<dyn NativeCommand> {
        command
    }

    /// Before a non-query executes.
    fn non_query_executing(
        &self,
        command: &dyn NativeCommand,
        event: &CommandEventData<'_>,
        result: InterceptionResult<i64>,
    ) -> InterceptionResult<i64> {
        result
    }

    /// After a non-query executes.
    fn non_query_executed(&self, command: &dyn NativeCommand, event: &CommandEventData<'_>, rows: i64) -> i64 {
        rows
    }

    /// Before a scalar executes.
    fn scalar_executing(
        &self,
        command: &dyn NativeCommand,
        event: &CommandEventData<'_>,
        result: InterceptionResult<SqlValue>,
    ) -> InterceptionResult<SqlValue> {
        result
    }

    /// After a scalar executes.
    fn scalar_executed(
        &self,
        command: &dyn NativeCommand,
        event: &CommandEventData<'_>,
        value: SqlValue,
    ) -> SqlValue {
        value
    }

    /// Before a reader executes.
    fn reader_executing(
        &self,
        command: &dyn NativeCommand,
        event: &CommandEventData<'_>,
        result: InterceptionResult<Box<dyn NativeReader>>,
    ) -> InterceptionResult<Box<dyn NativeReader>> {
        result
    }

    /// After a reader executes.
    fn reader_executed(
        &self,
        command: &dyn NativeCommand,
        event: &CommandEventData<'_>,
        reader: Box<dyn NativeReader>,
    ) -> Box<dyn NativeReader> {
        reader
    }

    /// Execution failed.
    fn command_failed(&self, command: &dyn NativeCommand, event: &CommandEventData<'_>, error: &Error) {}
}

/// Hooks around physical open and close.
#[allow(unused_variables)]
pub trait ConnectionInterceptor: Send + Sync {
    /// Whether any hook of this interceptor should fire.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Before the physical open.
    fn connection_opening(
        &self,
        event: &ConnectionEventData,
        result: InterceptionResult<()>,
    ) -> InterceptionResult<()> {
        result
    }

    /// After the physical open.
    fn connection_opened(&self, event: &ConnectionEventData) {}

    /// Before the physical close.
    fn connection_closing(
        &self,
        event: &ConnectionEventData,
        result: InterceptionResult<()>,
    ) -> InterceptionResult<()> {
        result
    }

    /// After the physical close.
    fn connection_closed(&self, event: &ConnectionEventData) {}

    /// Open or close failed.
    fn connection_failed(&self, event: &ConnectionEventData, error: &Error) {}
}

/// Hooks around transaction operations.
#[allow(unused_variables)]
pub trait TransactionInterceptor: Send + Sync {
    /// Whether any hook of this interceptor should fire.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Before a native transaction starts.
    fn transaction_starting(
        &self,
        event: &TransactionEventData<'_>,
        result: InterceptionResult<Arc<dyn NativeTransaction>>,
    ) -> InterceptionResult<Arc<dyn NativeTransaction>> {
        result
    }

    /// After a native transaction starts.
    fn transaction_started(
        &self,
        event: &TransactionEventData<'_>,
        transaction: Arc<dyn NativeTransaction>,
    ) -> Arc<dyn NativeTransaction> {
        transaction
    }

    /// An external native transaction is adopted.
    fn transaction_used(
        &self,
        event: &TransactionEventData<'_>,
        transaction: Arc<dyn NativeTransaction>,
    ) -> Arc<dyn NativeTransaction> {
        transaction
    }

    /// Before commit, rollback or a savepoint command.
    fn transaction_operating(
        &self,
        event: &TransactionEventData<'_>,
        result: InterceptionResult<()>,
    ) -> InterceptionResult<()> {
        result
    }

    /// After commit, rollback or a savepoint command.
    fn transaction_operated(&self, event: &TransactionEventData<'_>) {}

    /// A transaction operation failed.
    fn transaction_failed(&self, event: &TransactionEventData<'_>, error: &Error) {}
}

/// The interceptors registered on a connection.
#[derive(Clone, Default)]
pub struct Interceptors {
    command: Vec<Arc<dyn CommandInterceptor>>,
    connection: Vec<Arc<dyn ConnectionInterceptor>>,
    transaction: Vec<Arc<dyn TransactionInterceptor>>,
}

impl Interceptors {
    /// No interceptors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command interceptor.
    #[must_use]
    pub fn with_command(mut self, interceptor: Arc<dyn CommandInterceptor>) -> Self {
        self.command.push(interceptor);
        self
    }

    /// Add a connection interceptor.
    #[must_use]
    pub fn with_connection(mut self, interceptor: Arc<dyn ConnectionInterceptor>) -> Self {
        self.connection.push(interceptor);
        self
    }

    /// Add a transaction interceptor.
    #[must_use]
    pub fn with_transaction(mut self, interceptor: Arc<dyn TransactionInterceptor>) -> Self {
        self.transaction.push(interceptor);
        self
    }

    /// Whether no interceptor of any kind is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.command.is_empty() && self.connection.is_empty() && self.transaction.is_empty()
    }

    pub(crate) fn command_enabled(&self) -> bool {
        self.command.iter().any(|i| i.is_enabled())
    }

    pub(crate) fn commands(&self) -> impl Iterator<Item = &dyn CommandInterceptor> {
        self.command.iter().filter(|i| i.is_enabled()).map(|i| i.as_ref())
    }

    pub(crate) fn connections(&self) -> impl Iterator<Item = &dyn ConnectionInterceptor> {
        self.connection.iter().filter(|i| i.is_enabled()).map(|i| i.as_ref())
    }

    pub(crate) fn transactions(&self) -> impl Iterator<Item = &dyn TransactionInterceptor> {
        self.transaction.iter().filter(|i| i.is_enabled()).map(|i| i.as_ref())
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("command", &self.command.len())
            .field("connection", &self.connection.len())
            .field("transaction", &self.transaction.len())
            .finish()
    }
}
