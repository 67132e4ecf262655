//! Command execution.
//!
//! A [`Command`] is immutable once built: command text, the text to log and
//! the logical parameters. Each execution creates a native command on the
//! connection, binds parameter values, opens the connection, runs the
//! interception hooks around the native call and releases everything again:
//!
//! ```text
//! check cancellation -> create native command -> bind -> open connection
//!   -> executing hooks -> native call (unless suppressed) -> executed hooks
//!   -> dispose command -> close connection
//! ```
//!
//! Reader-mode execution hands the command and the connection reference to
//! the returned [`RelationalDataReader`], unless columns are supplied for
//! buffering.

use std::sync::Arc;
use std::time::{Duration, Instant};

use relcore_types::SqlValue;
use tracing::{Instrument, Span};
use uuid::Uuid;

use crate::cancel::{CancellationToken, cancellable, check_cancelled};
use crate::connection::RelationalConnection;
use crate::diagnostics::{self, Observation, SanitizationConfig, extract_operation};
use crate::error::{Error, Result};
use crate::interception::{CommandEventData, ExecuteMethod, InterceptionResult, Interceptors};
use crate::native::{NativeCommand, NativeReader};
use crate::parameter::{CommandParameter, ParameterValues, bind};
use crate::reader::{ReaderColumn, RelationalDataReader};

/// Savepoint wrapped around non-queries in adopted transactions.
pub const AUTO_SAVEPOINT_NAME: &str = "relcore_auto_savepoint";

/// An executable command.
#[derive(Debug, Clone, Default)]
pub struct Command {
    text: String,
    log_text: Option<String>,
    parameters: Vec<CommandParameter>,
}

/// Per-execution arguments.
///
/// ```rust,ignore
/// let values = ParameterValues::new().with("id", 42);
/// let args = CommandArgs::new().values(&values).cancellation(&token);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandArgs<'a> {
    values: Option<&'a ParameterValues>,
    columns: Option<&'a [ReaderColumn]>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> CommandArgs<'a> {
    /// No values, no buffering, no cancellation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameter values keyed by invariant name.
    #[must_use]
    pub fn values(mut self, values: &'a ParameterValues) -> Self {
        self.values = Some(values);
        self
    }

    /// Buffer reader results through these column descriptions.
    #[must_use]
    pub fn columns(mut self, columns: &'a [ReaderColumn]) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Cancellation token observed by the execution.
    #[must_use]
    pub fn cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl Command {
    /// Create a command whose log text equals its text.
    #[must_use]
    pub fn new(text: impl Into<String>, parameters: Vec<CommandParameter>) -> Self {
        Self {
            text: text.into(),
            log_text: None,
            parameters,
        }
    }

    pub(crate) fn with_log_text(
        text: &str,
        log_text: Option<String>,
        parameters: Vec<CommandParameter>,
    ) -> Self {
        Self {
            text: text.to_string(),
            log_text,
            parameters,
        }
    }

    /// Command text sent to the driver.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Command text for logs. Equals [`Command::text`] unless literal
    /// fragments were redacted while building.
    #[must_use]
    pub fn log_text(&self) -> &str {
        self.log_text.as_deref().unwrap_or(&self.text)
    }

    /// Logical parameters.
    #[must_use]
    pub fn parameters(&self) -> &[CommandParameter] {
        &self.parameters
    }

    /// Copy text and parameters from `template`, reusing this command's
    /// allocations.
    pub fn populate_from(&mut self, template: &Command) {
        self.text.clone_from(&template.text);
        self.log_text.clone_from(&template.log_text);
        self.parameters.clone_from(&template.parameters);
    }

    /// Execute and return the rows-affected count.
    ///
    /// Inside a transaction the connection did not start itself, and with the
    /// `auto_savepoints` option on, the command runs between a savepoint and
    /// its release. A failure rolls back to the savepoint and leaves the
    /// transaction usable.
    pub async fn execute_non_query(
        &self,
        connection: &mut RelationalConnection,
        args: CommandArgs<'_>,
    ) -> Result<i64> {
        check_cancelled(args.cancel)?;
        if !connection.wants_auto_savepoint() {
            return self.execute_non_query_once(connection, args).await;
        }

        connection.create_savepoint(AUTO_SAVEPOINT_NAME, args.cancel).await?;
        match self.execute_non_query_once(connection, args).await {
            Ok(rows) => {
                connection.release_savepoint(AUTO_SAVEPOINT_NAME, args.cancel).await?;
                Ok(rows)
            }
            Err(e) => {
                if let Err(rollback) = connection.rollback_to_savepoint(AUTO_SAVEPOINT_NAME, None).await {
                    tracing::debug!(error = %rollback, "rollback to automatic savepoint failed");
                }
                Err(e)
            }
        }
    }

    async fn execute_non_query_once(
        &self,
        connection: &mut RelationalConnection,
        args: CommandArgs<'_>,
    ) -> Result<i64> {
        let ctx = ExecutionContext::new(self, connection, ExecuteMethod::NonQuery);
        let native = self.create_native_command(connection, &ctx, args.values)?;

        let mut scope = CommandScope::new(connection, native);
        scope.open(args.cancel).await?;
        let result = execute_non_query_in(&mut scope, &ctx, args.cancel).await;
        finish(scope, result).await
    }

    /// Execute and return the first column of the first row.
    pub async fn execute_scalar(
        &self,
        connection: &mut RelationalConnection,
        args: CommandArgs<'_>,
    ) -> Result<SqlValue> {
        check_cancelled(args.cancel)?;
        let ctx = ExecutionContext::new(self, connection, ExecuteMethod::Scalar);
        let native = self.create_native_command(connection, &ctx, args.values)?;

        let mut scope = CommandScope::new(connection, native);
        scope.open(args.cancel).await?;
        let result = execute_scalar_in(&mut scope, &ctx, args.cancel).await;
        finish(scope, result).await
    }

    /// Execute and return a reader.
    ///
    /// With [`CommandArgs::columns`] set, every row is buffered and the
    /// connection is released before this returns.
    pub async fn execute_reader<'c>(
        &self,
        connection: &'c mut RelationalConnection,
        args: CommandArgs<'_>,
    ) -> Result<RelationalDataReader<'c>> {
        check_cancelled(args.cancel)?;
        let ctx = ExecutionContext::new(self, connection, ExecuteMethod::Reader);
        let native = self.create_native_command(connection, &ctx, args.values)?;

        let mut scope = CommandScope::new(connection, native);
        scope.open(args.cancel).await?;
        let native_reader = match execute_reader_in(&mut scope, &ctx, args.cancel).await {
            Ok(reader) => reader,
            Err(e) => return finish(scope, Err(e)).await,
        };

        let mut reader = RelationalDataReader::live(scope, native_reader, ctx.observation.id);
        if let Some(columns) = args.columns {
            reader.buffer(columns, args.cancel).await?;
        }
        Ok(reader)
    }

    fn create_native_command(
        &self,
        connection: &mut RelationalConnection,
        ctx: &ExecutionContext<'_>,
        values: Option<&ParameterValues>,
    ) -> Result<Box<dyn NativeCommand>> {
        let event = ctx.event(None);

        let mut creating = InterceptionResult::NotIntercepted;
        if ctx.observation.intercept {
            for interceptor in ctx.interceptors.commands() {
                creating = interceptor.command_creating(&event, creating);
            }
        }
        let mut command = match creating.into_result() {
            Some(command) => command,
            None => connection.native_connection()?.create_command(),
        };
        if ctx.observation.intercept {
            for interceptor in ctx.interceptors.commands() {
                command = interceptor.command_created(&event, command);
            }
        }

        command.set_text(&self.text);
        command.set_transaction(connection.current_transaction().map(|t| Arc::clone(t.native())));
        command.set_timeout(connection.command_timeout());

        let detailed = connection.options().detailed_errors;
        if let Err(e) = bind(command.as_mut(), &self.parameters, values, detailed) {
            ctx.failed(command.as_ref(), &event, &e);
            command.clear_parameters();
            command.dispose();
            return Err(e);
        }
        Ok(command)
    }
}

/// What one execution needs to know about its observers.
struct ExecutionContext<'a> {
    observation: Observation,
    interceptors: Arc<Interceptors>,
    connection_id: Uuid,
    method: ExecuteMethod,
    log_text: &'a str,
    sensitive: bool,
}

impl<'a> ExecutionContext<'a> {
    fn new(command: &'a Command, connection: &RelationalConnection, method: ExecuteMethod) -> Self {
        let interceptors = Arc::clone(connection.interceptors());
        Self {
            observation: Observation::for_command(&interceptors),
            interceptors,
            connection_id: connection.id(),
            method,
            log_text: command.log_text(),
            sensitive: connection.options().sensitive_data_logging,
        }
    }

    fn event(&self, elapsed: Option<Duration>) -> CommandEventData<'a> {
        CommandEventData {
            connection_id: self.connection_id,
            command_id: self.observation.id,
            method: self.method,
            log_text: self.log_text,
            elapsed,
        }
    }

    fn span(&self) -> Span {
        if !self.observation.log {
            return Span::none();
        }
        diagnostics::execute_span(
            self.observation.id,
            self.connection_id,
            self.method.name(),
            extract_operation(self.log_text),
        )
    }

    fn executed(&self, command: &dyn NativeCommand, elapsed: Duration, rows: Option<i64>) {
        if !self.observation.log {
            return;
        }
        let statement = SanitizationConfig::for_sensitive_logging(self.sensitive).sanitize(self.log_text);
        if self.sensitive {
            tracing::debug!(
                command_id = %self.observation.id,
                connection_id = %self.connection_id,
                method = self.method.name(),
                operation = extract_operation(self.log_text),
                elapsed_ms = elapsed.as_millis() as u64,
                rows_affected = rows,
                statement = %statement,
                parameters = ?command.parameters(),
                "executed command"
            );
        } else {
            tracing::debug!(
                command_id = %self.observation.id,
                connection_id = %self.connection_id,
                method = self.method.name(),
                operation = extract_operation(self.log_text),
                elapsed_ms = elapsed.as_millis() as u64,
                rows_affected = rows,
                statement = %statement,
                parameter_count = command.parameters().len(),
                "executed command"
            );
        }
    }

    fn failed(&self, command: &dyn NativeCommand, event: &CommandEventData<'_>, error: &Error) {
        if self.observation.intercept {
            for interceptor in self.interceptors.commands() {
                interceptor.command_failed(command, event, error);
            }
        }
        tracing::debug!(
            command_id = %self.observation.id,
            connection_id = %self.connection_id,
            method = self.method.name(),
            error = %error,
            "command failed"
        );
    }
}

/// Owns the native command for one execution and the connection reference
/// taken by opening.
///
/// [`CommandScope::release`] disposes the command and closes the
/// connection. If the scope is dropped unreleased (the future was dropped or
/// a reader was abandoned) the same cleanup runs synchronously and the
/// physical close is deferred.
pub(crate) struct CommandScope<'c> {
    connection: &'c mut RelationalConnection,
    command: Box<dyn NativeCommand>,
    opened: bool,
    released: bool,
}

impl<'c> CommandScope<'c> {
    fn new(connection: &'c mut RelationalConnection, command: Box<dyn NativeCommand>) -> Self {
        Self {
            connection,
            command,
            opened: false,
            released: false,
        }
    }

    pub(crate) fn connection(&mut self) -> &mut RelationalConnection {
        self.connection
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released
    }

    async fn open(&mut self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.connection.open(cancel).await?;
        self.opened = true;
        Ok(())
    }

    pub(crate) async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.command.clear_parameters();
        self.command.dispose();
        if self.opened {
            self.opened = false;
            self.connection.close().await?;
        }
        Ok(())
    }
}

impl Drop for CommandScope<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.command.clear_parameters();
        self.command.dispose();
        if self.opened {
            self.connection.release_deferred();
        }
    }
}

/// Release the scope; an execution error wins over a cleanup error.
async fn finish<T>(mut scope: CommandScope<'_>, result: Result<T>) -> Result<T> {
    let released = scope.release().await;
    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(cleanup)) => {
            tracing::debug!(error = %cleanup, "cleanup after failed command also failed");
            Err(e)
        }
    }
}

async fn execute_non_query_in(
    scope: &mut CommandScope<'_>,
    ctx: &ExecutionContext<'_>,
    cancel: Option<&CancellationToken>,
) -> Result<i64> {
    let start = Instant::now();

    let mut intercepted = InterceptionResult::NotIntercepted;
    if ctx.observation.intercept {
        let event = ctx.event(None);
        for interceptor in ctx.interceptors.commands() {
            intercepted = interceptor.non_query_executing(scope.command.as_ref(), &event, intercepted);
        }
    }

    let span = ctx.span();
    let outcome = match intercepted {
        InterceptionResult::SuppressWithResult(rows) => Ok(rows),
        InterceptionResult::Suppress => Ok(-1),
        InterceptionResult::NotIntercepted => {
            let command = &mut scope.command;
            cancellable(cancel, async { command.execute_non_query().await.map_err(Error::Driver) })
                .instrument(span.clone())
                .await
        }
    };

    let elapsed = start.elapsed();
    diagnostics::record_outcome(&span, elapsed, &outcome);
    if let Ok(rows) = &outcome {
        diagnostics::record_rows(&span, *rows);
    }
    let event = ctx.event(Some(elapsed));
    match outcome {
        Ok(mut rows) => {
            if ctx.observation.intercept {
                for interceptor in ctx.interceptors.commands() {
                    rows = interceptor.non_query_executed(scope.command.as_ref(), &event, rows);
                }
            }
            ctx.executed(scope.command.as_ref(), elapsed, Some(rows));
            Ok(rows)
        }
        Err(e) => {
            ctx.failed(scope.command.as_ref(), &event, &e);
            Err(e)
        }
    }
}

async fn execute_scalar_in(
    scope: &mut CommandScope<'_>,
    ctx: &ExecutionContext<'_>,
    cancel: Option<&CancellationToken>,
) -> Result<SqlValue> {
    let start = Instant::now();

    let mut intercepted = InterceptionResult::NotIntercepted;
    if ctx.observation.intercept {
        let event = ctx.event(None);
        for interceptor in ctx.interceptors.commands() {
            intercepted = interceptor.scalar_executing(scope.command.as_ref(), &event, intercepted);
        }
    }

    let span = ctx.span();
    let outcome = match intercepted {
        InterceptionResult::SuppressWithResult(value) => Ok(value),
        InterceptionResult::Suppress => Ok(SqlValue::Null),
        InterceptionResult::NotIntercepted => {
            let command = &mut scope.command;
            cancellable(cancel, async { command.execute_scalar().await.map_err(Error::Driver) })
                .instrument(span.clone())
                .await
        }
    };

    let elapsed = start.elapsed();
    diagnostics::record_outcome(&span, elapsed, &outcome);
    let event = ctx.event(Some(elapsed));
    match outcome {
        Ok(mut value) => {
            if ctx.observation.intercept {
                for interceptor in ctx.interceptors.commands() {
                    value = interceptor.scalar_executed(scope.command.as_ref(), &event, value);
                }
            }
            ctx.executed(scope.command.as_ref(), elapsed, None);
            Ok(value)
        }
        Err(e) => {
            ctx.failed(scope.command.as_ref(), &event, &e);
            Err(e)
        }
    }
}

async fn execute_reader_in(
    scope: &mut CommandScope<'_>,
    ctx: &ExecutionContext<'_>,
    cancel: Option<&CancellationToken>,
) -> Result<Box<dyn NativeReader>> {
    let start = Instant::now();

    let mut intercepted = InterceptionResult::NotIntercepted;
    if ctx.observation.intercept {
        let event = ctx.event(None);
        for interceptor in ctx.interceptors.commands() {
            intercepted = interceptor.reader_executing(scope.command.as_ref(), &event, intercepted);
        }
    }

    // A reader cannot be suppressed without a replacement, so `Suppress`
    // runs the native command.
    let span = ctx.span();
    let outcome = match intercepted.into_result() {
        Some(reader) => Ok(reader),
        None => {
            let command = &mut scope.command;
            cancellable(cancel, async { command.execute_reader().await.map_err(Error::Driver) })
                .instrument(span.clone())
                .await
        }
    };

    let elapsed = start.elapsed();
    diagnostics::record_outcome(&span, elapsed, &outcome);
    let event = ctx.event(Some(elapsed));
    match outcome {
        Ok(mut reader) => {
            if ctx.observation.intercept {
                for interceptor in ctx.interceptors.commands() {
                    reader = interceptor.reader_executed(scope.command.as_ref(), &event, reader);
                }
            }
            ctx.executed(scope.command.as_ref(), elapsed, None);
            Ok(reader)
        }
        Err(e) => {
            ctx.failed(scope.command.as_ref(), &event, &e);
            Err(e)
        }
    }
}
