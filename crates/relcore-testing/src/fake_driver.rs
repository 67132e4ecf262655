//! Scriptable in-memory native driver.
//!
//! [`FakeDriver`] implements the native driver traits without any I/O.
//! Responses are scripted per command text, failures can be injected for
//! opens, commits and individual commands, and every call the core makes is
//! recorded as a [`DriverEvent`] so tests can assert on the exact sequence.
//!
//! ## Example
//!
//! ```rust,ignore
//! use relcore_testing::fake_driver::{FakeDriver, FakeResponse};
//!
//! let driver = FakeDriver::builder()
//!     .with_response("SELECT COUNT(*) FROM users", FakeResponse::scalar(3))
//!     .build();
//!
//! let mut connection = RelationalConnection::new(RelationalOptions::new(), driver.factory());
//! // ...
//! assert_eq!(driver.count(|e| matches!(e, DriverEvent::Open)), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relcore_client::{
    AmbientTransaction, ConnectionState, DriverResult, IsolationLevel, NativeCommand, NativeConnection,
    NativeConnectionFactory, NativeReader, NativeTransaction, SavepointDialect,
};
use relcore_types::{DbParameter, SqlValue};
use thiserror::Error;
use uuid::Uuid;

/// Non-transient errors raised by the fake driver.
#[derive(Debug, Error)]
pub enum FakeDriverError {
    /// A scripted failure.
    #[error("scripted failure: {0}")]
    Scripted(String),

    /// A value was read before the first row or after the last.
    #[error("the fake reader is not positioned on a row")]
    NoRow,

    /// A column ordinal outside the row.
    #[error("column {0} does not exist")]
    NoColumn(usize),
}

/// Scripted response for a command text.
#[derive(Clone)]
pub enum FakeResponse {
    /// Rows-affected count; scalar mode returns NULL.
    RowsAffected(i64),

    /// A single value; reader mode yields one row with one column.
    Scalar(SqlValue),

    /// A result set; scalar mode returns the first column of the first row.
    Rows {
        /// Column names.
        columns: Vec<String>,
        /// Row values.
        rows: Vec<Vec<SqlValue>>,
    },

    /// Fail with a non-transient [`FakeDriverError::Scripted`].
    Error(String),

    /// Fail with an I/O error of this kind.
    Io(io::ErrorKind),

    /// Compute the response from the command text and parameters.
    Custom(Arc<dyn Fn(&str, &[DbParameter]) -> FakeResponse + Send + Sync>),
}

impl FakeResponse {
    /// A single scalar value.
    pub fn scalar(value: impl Into<SqlValue>) -> Self {
        Self::Scalar(value.into())
    }

    /// A result set.
    #[must_use]
    pub fn rows(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Rows {
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows,
        }
    }

    /// A scripted failure.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }
}

impl fmt::Debug for FakeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", &rows.len())
                .finish(),
            Self::Error(message) => f.debug_tuple("Error").field(message).finish(),
            Self::Io(kind) => f.debug_tuple("Io").field(kind).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

/// Something the fake driver was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Physical open.
    Open,
    /// Physical close.
    Close,
    /// A command executed.
    Execute {
        /// `non_query`, `scalar` or `reader`.
        method: &'static str,
        /// Command text.
        text: String,
        /// Parameters attached at execution time.
        parameters: Vec<DbParameter>,
        /// Whether a transaction was attached.
        in_transaction: bool,
        /// Timeout set on the command.
        timeout: Option<Duration>,
    },
    /// A command's parameters were cleared.
    ParametersCleared,
    /// A command was disposed.
    CommandDisposed,
    /// A reader was closed.
    ReaderClosed,
    /// A transaction started.
    Begin(IsolationLevel),
    /// A transaction committed.
    Commit,
    /// A transaction rolled back.
    Rollback,
    /// A transaction was disposed.
    TransactionDisposed,
    /// The connection enlisted in (or left) an ambient transaction.
    Enlist(Option<Uuid>),
}

impl DriverEvent {
    /// Command text, for execute events.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Execute { text, .. } => Some(text),
            _ => None,
        }
    }
}

struct Script {
    responses: HashMap<String, FakeResponse>,
    default_response: FakeResponse,
    command_failures: HashMap<String, u32>,
    open_failures: u32,
    commit_failures: u32,
    delay: Option<Duration>,
    supports_ambient: bool,
    dialect: SavepointDialect,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            responses: HashMap::new(),
            default_response: FakeResponse::RowsAffected(0),
            command_failures: HashMap::new(),
            open_failures: 0,
            commit_failures: 0,
            delay: None,
            supports_ambient: true,
            dialect: SavepointDialect::Standard,
        }
    }
}

#[derive(Default)]
struct Shared {
    script: Mutex<Script>,
    events: Mutex<Vec<DriverEvent>>,
    broken: AtomicBool,
}

impl Shared {
    fn record(&self, event: DriverEvent) {
        tracing::trace!(event = ?event, "fake driver event");
        self.events.lock().push(event);
    }

    fn respond(&self, text: &str, parameters: &[DbParameter]) -> DriverResult<FakeResponse> {
        let response = {
            let mut script = self.script.lock();
            if let Some(remaining) = script.command_failures.get_mut(text) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "scripted transient failure").into());
                }
            }
            script
                .responses
                .get(text)
                .unwrap_or(&script.default_response)
                .clone()
        };

        let response = match response {
            FakeResponse::Custom(f) => f(text, parameters),
            other => other,
        };
        match response {
            FakeResponse::Error(message) => Err(FakeDriverError::Scripted(message).into()),
            FakeResponse::Io(kind) => Err(io::Error::new(kind, "scripted I/O failure").into()),
            other => Ok(other),
        }
    }
}

/// Builder for [`FakeDriver`].
#[derive(Default)]
pub struct FakeDriverBuilder {
    script: Script,
}

impl FakeDriverBuilder {
    /// Respond to `text` with `response`.
    #[must_use]
    pub fn with_response(mut self, text: impl Into<String>, response: FakeResponse) -> Self {
        self.script.responses.insert(text.into(), response);
        self
    }

    /// Response for texts without a scripted one. Defaults to zero rows
    /// affected.
    #[must_use]
    pub fn with_default_response(mut self, response: FakeResponse) -> Self {
        self.script.default_response = response;
        self
    }

    /// Fail the first `times` executions of `text` with a timed-out I/O error.
    #[must_use]
    pub fn fail_command(mut self, text: impl Into<String>, times: u32) -> Self {
        self.script.command_failures.insert(text.into(), times);
        self
    }

    /// Fail the first `times` physical opens with a connection-reset error.
    #[must_use]
    pub fn fail_opens(mut self, times: u32) -> Self {
        self.script.open_failures = times;
        self
    }

    /// Fail the first `times` commits with a timed-out I/O error.
    #[must_use]
    pub fn fail_commits(mut self, times: u32) -> Self {
        self.script.commit_failures = times;
        self
    }

    /// Sleep this long before every command executes.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.script.delay = Some(delay);
        self
    }

    /// Report no support for ambient transactions.
    #[must_use]
    pub fn without_ambient_support(mut self) -> Self {
        self.script.supports_ambient = false;
        self
    }

    /// Savepoint spelling reported by connections.
    #[must_use]
    pub fn with_savepoint_dialect(mut self, dialect: SavepointDialect) -> Self {
        self.script.dialect = dialect;
        self
    }

    /// Build the driver.
    #[must_use]
    pub fn build(self) -> FakeDriver {
        FakeDriver {
            shared: Arc::new(Shared {
                script: Mutex::new(self.script),
                events: Mutex::new(Vec::new()),
                broken: AtomicBool::new(false),
            }),
        }
    }
}

/// An in-memory native driver. Clones share the script and the event log.
#[derive(Clone, Default)]
pub struct FakeDriver {
    shared: Arc<Shared>,
}

impl FakeDriver {
    /// Start scripting a driver.
    #[must_use]
    pub fn builder() -> FakeDriverBuilder {
        FakeDriverBuilder::default()
    }

    /// A factory creating connections on this driver.
    #[must_use]
    pub fn factory(&self) -> Arc<dyn NativeConnectionFactory> {
        Arc::new(self.clone())
    }

    /// An unopened connection.
    #[must_use]
    pub fn connection(&self, connection_string: &str) -> FakeConnection {
        FakeConnection {
            shared: Arc::clone(&self.shared),
            connection_string: connection_string.to_string(),
            open: false,
        }
    }

    /// A transaction started outside any relational connection.
    #[must_use]
    pub fn external_transaction(&self, isolation_level: IsolationLevel) -> Arc<dyn NativeTransaction> {
        self.shared.record(DriverEvent::Begin(isolation_level));
        Arc::new(FakeTransaction {
            shared: Arc::clone(&self.shared),
            isolation_level,
        })
    }

    /// Replace the response for `text`.
    pub fn set_response(&self, text: impl Into<String>, response: FakeResponse) {
        self.shared.script.lock().responses.insert(text.into(), response);
    }

    /// Report every open connection as broken until it is closed.
    pub fn break_connections(&self) {
        self.shared.broken.store(true, Ordering::SeqCst);
    }

    /// Every recorded event, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<DriverEvent> {
        self.shared.events.lock().clone()
    }

    /// Forget recorded events.
    pub fn clear_events(&self) {
        self.shared.events.lock().clear();
    }

    /// Number of recorded events matching `predicate`.
    pub fn count<F: Fn(&DriverEvent) -> bool>(&self, predicate: F) -> usize {
        self.shared.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Texts of executed commands, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.shared
            .events
            .lock()
            .iter()
            .filter_map(|e| e.text().map(str::to_string))
            .collect()
    }

    /// The last execute event.
    #[must_use]
    pub fn last_execute(&self) -> Option<DriverEvent> {
        self.shared
            .events
            .lock()
            .iter()
            .rev()
            .find(|e| matches!(e, DriverEvent::Execute { .. }))
            .cloned()
    }
}

impl fmt::Debug for FakeDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeDriver")
            .field("events", &self.shared.events.lock().len())
            .finish_non_exhaustive()
    }
}

impl NativeConnectionFactory for FakeDriver {
    fn create(&self, connection_string: &str) -> Box<dyn NativeConnection> {
        Box::new(self.connection(connection_string))
    }
}

/// A connection on a [`FakeDriver`].
pub struct FakeConnection {
    shared: Arc<Shared>,
    connection_string: String,
    open: bool,
}

impl FakeConnection {
    /// Mark the connection as already open, as if the caller had opened it.
    #[must_use]
    pub fn opened(mut self) -> Self {
        self.open = true;
        self
    }
}

impl fmt::Debug for FakeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeConnection")
            .field("connection_string", &self.connection_string)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl NativeConnection for FakeConnection {
    fn state(&self) -> ConnectionState {
        if !self.open {
            ConnectionState::Closed
        } else if self.shared.broken.load(Ordering::SeqCst) {
            ConnectionState::Broken
        } else {
            ConnectionState::Open
        }
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn set_connection_string(&mut self, connection_string: &str) {
        self.connection_string = connection_string.to_string();
    }

    async fn open(&mut self) -> DriverResult<()> {
        {
            let mut script = self.shared.script.lock();
            if script.open_failures > 0 {
                script.open_failures -= 1;
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "scripted open failure").into());
            }
        }
        self.open = true;
        self.shared.record(DriverEvent::Open);
        Ok(())
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.open = false;
        self.shared.broken.store(false, Ordering::SeqCst);
        self.shared.record(DriverEvent::Close);
        Ok(())
    }

    fn create_command(&mut self) -> Box<dyn NativeCommand> {
        Box::new(FakeCommand {
            shared: Arc::clone(&self.shared),
            text: String::new(),
            parameters: Vec::new(),
            timeout: None,
            transaction: None,
        })
    }

    async fn begin_transaction(
        &mut self,
        isolation_level: IsolationLevel,
    ) -> DriverResult<Arc<dyn NativeTransaction>> {
        self.shared.record(DriverEvent::Begin(isolation_level));
        Ok(Arc::new(FakeTransaction {
            shared: Arc::clone(&self.shared),
            isolation_level,
        }))
    }

    fn enlist_transaction(&mut self, transaction: Option<&Arc<AmbientTransaction>>) -> DriverResult<()> {
        self.shared.record(DriverEvent::Enlist(transaction.map(|t| t.id())));
        Ok(())
    }

    fn supports_ambient_transactions(&self) -> bool {
        self.shared.script.lock().supports_ambient
    }

    fn savepoint_dialect(&self) -> SavepointDialect {
        self.shared.script.lock().dialect
    }
}

struct FakeCommand {
    shared: Arc<Shared>,
    text: String,
    parameters: Vec<DbParameter>,
    timeout: Option<Duration>,
    transaction: Option<Arc<dyn NativeTransaction>>,
}

impl FakeCommand {
    async fn run(&mut self, method: &'static str) -> DriverResult<FakeResponse> {
        let delay = self.shared.script.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.shared.record(DriverEvent::Execute {
            method,
            text: self.text.clone(),
            parameters: self.parameters.clone(),
            in_transaction: self.transaction.is_some(),
            timeout: self.timeout,
        });
        self.shared.respond(&self.text, &self.parameters)
    }
}

#[async_trait]
impl NativeCommand for FakeCommand {
    fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn set_transaction(&mut self, transaction: Option<Arc<dyn NativeTransaction>>) {
        self.transaction = transaction;
    }

    fn parameters(&self) -> &[DbParameter] {
        &self.parameters
    }

    fn add_parameter(&mut self, parameter: DbParameter) {
        self.parameters.push(parameter);
    }

    fn clear_parameters(&mut self) {
        self.parameters.clear();
        self.shared.record(DriverEvent::ParametersCleared);
    }

    async fn execute_non_query(&mut self) -> DriverResult<i64> {
        Ok(match self.run("non_query").await? {
            FakeResponse::RowsAffected(n) => n,
            _ => -1,
        })
    }

    async fn execute_scalar(&mut self) -> DriverResult<SqlValue> {
        Ok(match self.run("scalar").await? {
            FakeResponse::Scalar(value) => value,
            FakeResponse::Rows { rows, .. } => rows
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .unwrap_or(SqlValue::Null),
            _ => SqlValue::Null,
        })
    }

    async fn execute_reader(&mut self) -> DriverResult<Box<dyn NativeReader>> {
        let reader = match self.run("reader").await? {
            FakeResponse::Rows { columns, rows } => FakeReader::new(Arc::clone(&self.shared), columns, rows, -1),
            FakeResponse::Scalar(value) => {
                FakeReader::new(Arc::clone(&self.shared), vec!["value".into()], vec![vec![value]], -1)
            }
            FakeResponse::RowsAffected(n) => FakeReader::new(Arc::clone(&self.shared), Vec::new(), Vec::new(), n),
            _ => FakeReader::new(Arc::clone(&self.shared), Vec::new(), Vec::new(), -1),
        };
        Ok(Box::new(reader))
    }

    fn dispose(&mut self) {
        self.transaction = None;
        self.shared.record(DriverEvent::CommandDisposed);
    }
}

/// A reader over scripted rows.
pub struct FakeReader {
    shared: Arc<Shared>,
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    position: Option<usize>,
    records_affected: i64,
}

impl FakeReader {
    fn new(shared: Arc<Shared>, columns: Vec<String>, rows: Vec<Vec<SqlValue>>, records_affected: i64) -> Self {
        Self {
            shared,
            columns,
            rows,
            position: None,
            records_affected,
        }
    }
}

#[async_trait]
impl NativeReader for FakeReader {
    fn field_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, ordinal: usize) -> Option<&str> {
        self.columns.get(ordinal).map(String::as_str)
    }

    async fn read(&mut self) -> DriverResult<bool> {
        let next = self.position.map_or(0, |p| p + 1);
        self.position = Some(next.min(self.rows.len()));
        Ok(next < self.rows.len())
    }

    fn value(&self, ordinal: usize) -> DriverResult<SqlValue> {
        let row = self
            .position
            .and_then(|p| self.rows.get(p))
            .ok_or(FakeDriverError::NoRow)?;
        row.get(ordinal)
            .cloned()
            .ok_or_else(|| FakeDriverError::NoColumn(ordinal).into())
    }

    fn records_affected(&self) -> i64 {
        self.records_affected
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.shared.record(DriverEvent::ReaderClosed);
        Ok(())
    }
}

struct FakeTransaction {
    shared: Arc<Shared>,
    isolation_level: IsolationLevel,
}

#[async_trait]
impl NativeTransaction for FakeTransaction {
    fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    async fn commit(&self) -> DriverResult<()> {
        {
            let mut script = self.shared.script.lock();
            if script.commit_failures > 0 {
                script.commit_failures -= 1;
                return Err(io::Error::new(io::ErrorKind::TimedOut, "scripted commit failure").into());
            }
        }
        self.shared.record(DriverEvent::Commit);
        Ok(())
    }

    async fn rollback(&self) -> DriverResult<()> {
        self.shared.record(DriverEvent::Rollback);
        Ok(())
    }

    fn dispose(&self) {
        self.shared.record(DriverEvent::TransactionDisposed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses() {
        let driver = FakeDriver::builder()
            .with_response("SELECT 1", FakeResponse::scalar(1))
            .with_response("BAD", FakeResponse::error("boom"))
            .build();

        let mut connection = driver.connection("");
        connection.open().await.unwrap();

        let mut command = connection.create_command();
        command.set_text("SELECT 1");
        assert_eq!(command.execute_scalar().await.unwrap(), SqlValue::Int(1));
        assert_eq!(command.execute_non_query().await.unwrap(), -1);

        command.set_text("BAD");
        let err = command.execute_non_query().await.unwrap_err();
        assert!(err.downcast_ref::<FakeDriverError>().is_some());

        assert_eq!(driver.executed(), vec!["SELECT 1", "SELECT 1", "BAD"]);
    }

    #[tokio::test]
    async fn test_command_failures_are_consumed() {
        let driver = FakeDriver::builder().fail_command("X", 1).build();
        let mut connection = driver.connection("");
        let mut command = connection.create_command();
        command.set_text("X");

        let err = command.execute_non_query().await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<io::Error>().unwrap().kind(),
            io::ErrorKind::TimedOut
        );
        assert_eq!(command.execute_non_query().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reader_walks_rows() {
        let driver = FakeDriver::builder()
            .with_response(
                "Q",
                FakeResponse::rows(&["a"], vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]]),
            )
            .build();
        let mut connection = driver.connection("");
        let mut command = connection.create_command();
        command.set_text("Q");

        let mut reader = command.execute_reader().await.unwrap();
        assert!(reader.value(0).is_err());
        assert!(reader.read().await.unwrap());
        assert_eq!(reader.value(0).unwrap(), SqlValue::Int(1));
        assert!(reader.read().await.unwrap());
        assert!(!reader.read().await.unwrap());
        assert!(!reader.read().await.unwrap());
        reader.close().await.unwrap();
        assert_eq!(driver.count(|e| matches!(e, DriverEvent::ReaderClosed)), 1);
    }

    #[tokio::test]
    async fn test_broken_until_closed() {
        let driver = FakeDriver::builder().build();
        let mut connection = driver.connection("");
        connection.open().await.unwrap();
        driver.break_connections();
        assert_eq!(connection.state(), ConnectionState::Broken);
        connection.close().await.unwrap();
        connection.open().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Open);
    }
}
