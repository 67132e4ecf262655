//! Database creation and deletion.
//!
//! [`DatabaseCreator`] answers "does the database exist", "does it have
//! tables" and runs the create/drop scripts produced by a
//! [`MigrationCommandProducer`]. Scripts run through a
//! [`MigrationCommandExecutor`], which wraps consecutive commands in a
//! transaction unless a command asks for none (`CREATE DATABASE` cannot run
//! inside one on most servers).

use relcore_types::SqlValue;

use crate::cancel::CancellationToken;
use crate::command::{Command, CommandArgs};
use crate::connection::RelationalConnection;
use crate::error::Result;
use crate::transaction::IsolationLevel;

/// One command of a migration script.
#[derive(Debug, Clone)]
pub struct MigrationCommand {
    /// The command to run.
    pub command: Command,
    /// Run outside any transaction the executor started.
    pub transaction_suppressed: bool,
}

impl MigrationCommand {
    /// A command that runs inside the script transaction.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            transaction_suppressed: false,
        }
    }

    /// A command that must run outside a transaction.
    #[must_use]
    pub fn suppressed(command: Command) -> Self {
        Self {
            command,
            transaction_suppressed: true,
        }
    }
}

/// Produces the provider-specific commands used by [`DatabaseCreator`].
pub trait MigrationCommandProducer: Send + Sync {
    /// A scalar command that is truthy when the database exists.
    fn exists_command(&self) -> Command;

    /// A scalar command that is truthy when the database has any user table.
    fn has_tables_command(&self) -> Command;

    /// Commands that create the empty database.
    fn create_database_commands(&self) -> Vec<MigrationCommand>;

    /// Commands that drop the database.
    fn drop_database_commands(&self) -> Vec<MigrationCommand>;

    /// Commands that create the schema.
    fn create_tables_commands(&self) -> Vec<MigrationCommand>;
}

/// Runs migration commands in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationCommandExecutor;

impl MigrationCommandExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Execute `commands` on `connection`.
    ///
    /// When no transaction is current, the executor begins one before the
    /// first command that allows it and commits it before any command that
    /// suppresses transactions, and at the end. A failure rolls back the
    /// transaction the executor started. A transaction that was already
    /// current is used as is.
    pub async fn execute_non_query(
        &self,
        commands: &[MigrationCommand],
        connection: &mut RelationalConnection,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        connection.open(cancel).await?;
        let result = run_commands(commands, connection, cancel).await;
        let closed = connection.close().await;
        result.and(closed.map(|_| ()))
    }
}

async fn run_commands(
    commands: &[MigrationCommand],
    connection: &mut RelationalConnection,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    let mut owns_transaction = false;

    for migration in commands {
        if let Err(e) = run_one(migration, connection, &mut owns_transaction, cancel).await {
            if owns_transaction && connection.current_transaction().is_some() {
                if let Err(rollback_err) = connection.rollback_transaction(None).await {
                    tracing::debug!(error = %rollback_err, "rollback of migration transaction failed");
                    connection.dispose_transaction();
                }
            }
            return Err(e);
        }
    }

    if owns_transaction {
        connection.commit_transaction(cancel).await?;
    }
    Ok(())
}

async fn run_one(
    migration: &MigrationCommand,
    connection: &mut RelationalConnection,
    owns_transaction: &mut bool,
    cancel: Option<&CancellationToken>,
) -> Result<()> {
    if !*owns_transaction && !migration.transaction_suppressed && connection.current_transaction().is_none() {
        connection.start_transaction(IsolationLevel::default(), cancel).await?;
        *owns_transaction = true;
    }
    if *owns_transaction && migration.transaction_suppressed {
        connection.commit_transaction(cancel).await?;
        *owns_transaction = false;
    }

    let mut args = CommandArgs::new();
    if let Some(token) = cancel {
        args = args.cancellation(token);
    }
    let rows = migration.command.execute_non_query(connection, args).await?;
    tracing::debug!(
        operation = crate::diagnostics::extract_operation(migration.command.log_text()),
        rows_affected = rows,
        suppressed = migration.transaction_suppressed,
        "executed migration command"
    );
    Ok(())
}

/// Creates and deletes databases through a command producer.
#[derive(Debug, Clone)]
pub struct DatabaseCreator<P> {
    producer: P,
    executor: MigrationCommandExecutor,
}

impl<P: MigrationCommandProducer> DatabaseCreator<P> {
    /// Create a creator over `producer`.
    #[must_use]
    pub fn new(producer: P) -> Self {
        Self {
            producer,
            executor: MigrationCommandExecutor::new(),
        }
    }

    /// The command producer.
    #[must_use]
    pub fn producer(&self) -> &P {
        &self.producer
    }

    /// Whether the database exists.
    pub async fn exists(&self, connection: &mut RelationalConnection, cancel: Option<&CancellationToken>) -> Result<bool> {
        scalar_is_truthy(&self.producer.exists_command(), connection, cancel).await
    }

    /// Whether the database has any tables.
    pub async fn has_tables(
        &self,
        connection: &mut RelationalConnection,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool> {
        scalar_is_truthy(&self.producer.has_tables_command(), connection, cancel).await
    }

    /// Create the empty database.
    pub async fn create(&self, connection: &mut RelationalConnection, cancel: Option<&CancellationToken>) -> Result<()> {
        let commands = self.producer.create_database_commands();
        self.executor.execute_non_query(&commands, connection, cancel).await
    }

    /// Drop the database.
    pub async fn delete(&self, connection: &mut RelationalConnection, cancel: Option<&CancellationToken>) -> Result<()> {
        let commands = self.producer.drop_database_commands();
        self.executor.execute_non_query(&commands, connection, cancel).await
    }

    /// Create the schema in an existing database.
    pub async fn create_tables(
        &self,
        connection: &mut RelationalConnection,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let commands = self.producer.create_tables_commands();
        self.executor.execute_non_query(&commands, connection, cancel).await
    }

    /// Create the database and its schema if missing.
    ///
    /// Returns whether anything was created.
    pub async fn ensure_created(
        &self,
        connection: &mut RelationalConnection,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool> {
        if !self.exists(connection, cancel).await? {
            self.create(connection, cancel).await?;
            self.create_tables(connection, cancel).await?;
            return Ok(true);
        }
        if !self.has_tables(connection, cancel).await? {
            self.create_tables(connection, cancel).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drop the database if it exists.
    ///
    /// Returns whether it was dropped.
    pub async fn ensure_deleted(
        &self,
        connection: &mut RelationalConnection,
        cancel: Option<&CancellationToken>,
    ) -> Result<bool> {
        if self.exists(connection, cancel).await? {
            self.delete(connection, cancel).await?;
            return Ok(true);
        }
        Ok(false)
    }
}

async fn scalar_is_truthy(
    command: &Command,
    connection: &mut RelationalConnection,
    cancel: Option<&CancellationToken>,
) -> Result<bool> {
    let mut args = CommandArgs::new();
    if let Some(token) = cancel {
        args = args.cancellation(token);
    }
    let value = command.execute_scalar(connection, args).await?;
    Ok(is_truthy(&value))
}

fn is_truthy(value: &SqlValue) -> bool {
    match value {
        SqlValue::Bool(b) => *b,
        SqlValue::Null => false,
        other => other.as_i64().is_some_and(|n| n != 0),
    }
}
