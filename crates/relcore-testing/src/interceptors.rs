//! Interceptors for tests.
//!
//! [`RecordingInterceptor`] records the name of every hook that fires.
//! [`ScriptedInterceptor`] suppresses or replaces results on demand.

use std::sync::Arc;

use parking_lot::Mutex;
use relcore_client::{
    CommandEventData, CommandInterceptor, ConnectionEventData, ConnectionInterceptor, Error, InterceptionResult,
    Interceptors, NativeCommand, NativeReader, NativeTransaction, TransactionEventData, TransactionInterceptor,
};
use relcore_types::SqlValue;

/// Records hook names in firing order.
#[derive(Debug, Clone, Default)]
pub struct RecordingInterceptor {
    hooks: Arc<Mutex<Vec<&'static str>>>,
}

impl RecordingInterceptor {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interceptors with this recorder registered for every kind of hook.
    #[must_use]
    pub fn registered(&self) -> Interceptors {
        Interceptors::new()
            .with_command(Arc::new(self.clone()))
            .with_connection(Arc::new(self.clone()))
            .with_transaction(Arc::new(self.clone()))
    }

    /// Hook names recorded so far.
    #[must_use]
    pub fn hooks(&self) -> Vec<&'static str> {
        self.hooks.lock().clone()
    }

    /// Whether `hook` fired.
    #[must_use]
    pub fn fired(&self, hook: &str) -> bool {
        self.hooks.lock().iter().any(|h| *h == hook)
    }

    /// Forget recorded hooks.
    pub fn clear(&self) {
        self.hooks.lock().clear();
    }

    fn push(&self, hook: &'static str) {
        self.hooks.lock().push(hook);
    }
}

impl CommandInterceptor for RecordingInterceptor {
    fn command_creating(
        &self,
        _event: &CommandEventData<'_>,
        result: InterceptionResult<Box<dyn NativeCommand>>,
    ) -> InterceptionResult<Box<dyn NativeCommand>> {
        self.push("command_creating");
        result
    }

    fn command_created(&self, _event: &CommandEventData<'_>, command: Box<dyn NativeCommand>) -> Box<dyn NativeCommand> {
        self.push("command_created");
        command
    }

    fn non_query_executing(
        &self,
        _command: &dyn NativeCommand,
        _event: &CommandEventData<'_>,
        result: InterceptionResult<i64>,
    ) -> InterceptionResult<i64> {
        self.push("non_query_executing");
        result
    }

    fn non_query_executed(&self, _command: &dyn NativeCommand, _event: &CommandEventData<'_>, rows: i64) -> i64 {
        self.push("non_query_executed");
        rows
    }

    fn scalar_executing(
        &self,
        _command: &dyn NativeCommand,
        _event: &CommandEventData<'_>,
        result: InterceptionResult<SqlValue>,
    ) -> InterceptionResult<SqlValue> {
        self.push("scalar_executing");
        result
    }

    fn scalar_executed(&self, _command: &dyn NativeCommand, _event: &CommandEventData<'_>, value: SqlValue) -> SqlValue {
        self.push("scalar_executed");
        value
    }

    fn reader_executing(
        &self,
        _command: &dyn NativeCommand,
        _event: &CommandEventData<'_>,
        result: InterceptionResult<Box<dyn NativeReader>>,
    ) -> InterceptionResult<Box<dyn NativeReader>> {
        self.push("reader_executing");
        result
    }

    fn reader_executed(
        &self,
        _command: &dyn NativeCommand,
        _event: &CommandEventData<'_>,
        reader: Box<dyn NativeReader>,
    ) -> Box<dyn NativeReader> {
        self.push("reader_executed");
        reader
    }

    fn command_failed(&self, _command: &dyn NativeCommand, _event: &CommandEventData<'_>, _error: &Error) {
        self.push("command_failed");
    }
}

impl ConnectionInterceptor for RecordingInterceptor {
    fn connection_opening(&self, _event: &ConnectionEventData, result: InterceptionResult<()>) -> InterceptionResult<()> {
        self.push("connection_opening");
        result
    }

    fn connection_opened(&self, _event: &ConnectionEventData) {
        self.push("connection_opened");
    }

    fn connection_closing(&self, _event: &ConnectionEventData, result: InterceptionResult<()>) -> InterceptionResult<()> {
        self.push("connection_closing");
        result
    }

    fn connection_closed(&self, _event: &ConnectionEventData) {
        self.push("connection_closed");
    }

    fn connection_failed(&self, _event: &ConnectionEventData, _error: &Error) {
        self.push("connection_failed");
    }
}

impl TransactionInterceptor for RecordingInterceptor {
    fn transaction_starting(
        &self,
        _event: &TransactionEventData<'_>,
        result: InterceptionResult<Arc<dyn NativeTransaction>>,
    ) -> InterceptionResult<Arc<dyn NativeTransaction>> {
        self.push("transaction_starting");
        result
    }

    fn transaction_started(
        &self,
        _event: &TransactionEventData<'_>,
        transaction: Arc<dyn NativeTransaction>,
    ) -> Arc<dyn NativeTransaction> {
        self.push("transaction_started");
        transaction
    }

    fn transaction_used(
        &self,
        _event: &TransactionEventData<'_>,
        transaction: Arc<dyn NativeTransaction>,
    ) -> Arc<dyn NativeTransaction> {
        self.push("transaction_used");
        transaction
    }

    fn transaction_operating(
        &self,
        _event: &TransactionEventData<'_>,
        result: InterceptionResult<()>,
    ) -> InterceptionResult<()> {
        self.push("transaction_operating");
        result
    }

    fn transaction_operated(&self, _event: &TransactionEventData<'_>) {
        self.push("transaction_operated");
    }

    fn transaction_failed(&self, _event: &TransactionEventData<'_>, _error: &Error) {
        self.push("transaction_failed");
    }
}

/// Suppresses or replaces command results.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInterceptor {
    non_query_result: Option<i64>,
    suppress_non_query: bool,
    scalar_result: Option<SqlValue>,
    suppress_scalar: bool,
    rows_override: Option<i64>,
    disabled: bool,
}

impl ScriptedInterceptor {
    /// Pass everything through.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip non-queries and report `rows` instead.
    #[must_use]
    pub fn non_query_result(mut self, rows: i64) -> Self {
        self.non_query_result = Some(rows);
        self
    }

    /// Skip non-queries without a result.
    #[must_use]
    pub fn suppress_non_query(mut self) -> Self {
        self.suppress_non_query = true;
        self
    }

    /// Skip scalars and report `value` instead.
    #[must_use]
    pub fn scalar_result(mut self, value: impl Into<SqlValue>) -> Self {
        self.scalar_result = Some(value.into());
        self
    }

    /// Skip scalars without a result.
    #[must_use]
    pub fn suppress_scalar(mut self) -> Self {
        self.suppress_scalar = true;
        self
    }

    /// Replace the rows-affected count after a non-query ran.
    #[must_use]
    pub fn override_rows(mut self, rows: i64) -> Self {
        self.rows_override = Some(rows);
        self
    }

    /// Report the interceptor as disabled so no hook fires.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Interceptors with this one registered for commands.
    #[must_use]
    pub fn registered(self) -> Interceptors {
        Interceptors::new().with_command(Arc::new(self))
    }
}

impl CommandInterceptor for ScriptedInterceptor {
    fn is_enabled(&self) -> bool {
        !self.disabled
    }

    fn non_query_executing(
        &self,
        _command: &dyn NativeCommand,
        _event: &CommandEventData<'_>,
        result: InterceptionResult<i64>,
    ) -> InterceptionResult<i64> {
        if let Some(rows) = self.non_query_result {
            return InterceptionResult::SuppressWithResult(rows);
        }
        if self.suppress_non_query {
            return InterceptionResult::Suppress;
        }
        result
    }

    fn non_query_executed(&self, _command: &dyn NativeCommand, _event: &CommandEventData<'_>, rows: i64) -> i64 {
        self.rows_override.unwrap_or(rows)
    }

    fn scalar_executing(
        &self,
        _command: &dyn NativeCommand,
        _event: &CommandEventData<'_>,
        result: InterceptionResult<SqlValue>,
    ) -> InterceptionResult<SqlValue> {
        if let Some(value) = &self.scalar_result {
            return InterceptionResult::SuppressWithResult(value.clone());
        }
        if self.suppress_scalar {
            return InterceptionResult::Suppress;
        }
        result
    }
}
