//! Synchronous facade.
//!
//! [`Connection`] drives a [`RelationalConnection`] on a private
//! current-thread runtime so callers without an async context get the same
//! semantics as the async API. It must not be used from inside a Tokio
//! runtime.

use relcore_types::SqlValue;
use tokio::runtime::{Builder, Runtime};
use uuid::Uuid;

use crate::command::{Command, CommandArgs};
use crate::connection::RelationalConnection;
use crate::error::{Error, Result};
use crate::reader::{BufferedDataReader, ReaderColumn, RelationalDataReader};
use crate::transaction::IsolationLevel;

/// A blocking wrapper around [`RelationalConnection`].
#[derive(Debug)]
pub struct Connection {
    runtime: Runtime,
    inner: RelationalConnection,
}

impl Connection {
    /// Wrap `inner` with a new current-thread runtime.
    pub fn new(inner: RelationalConnection) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build().map_err(Error::driver)?;
        Ok(Self { runtime, inner })
    }

    /// The wrapped connection.
    #[must_use]
    pub fn inner(&self) -> &RelationalConnection {
        &self.inner
    }

    /// The wrapped connection, mutably.
    pub fn inner_mut(&mut self) -> &mut RelationalConnection {
        &mut self.inner
    }

    /// Unwrap the connection.
    #[must_use]
    pub fn into_inner(self) -> RelationalConnection {
        self.inner
    }

    /// See [`RelationalConnection::open`].
    pub fn open(&mut self) -> Result<bool> {
        self.runtime.block_on(self.inner.open(None))
    }

    /// See [`RelationalConnection::close`].
    pub fn close(&mut self) -> Result<bool> {
        self.runtime.block_on(self.inner.close())
    }

    /// See [`Command::execute_non_query`].
    pub fn execute_non_query(&mut self, command: &Command, args: CommandArgs<'_>) -> Result<i64> {
        self.runtime.block_on(command.execute_non_query(&mut self.inner, args))
    }

    /// See [`Command::execute_scalar`].
    pub fn execute_scalar(&mut self, command: &Command, args: CommandArgs<'_>) -> Result<SqlValue> {
        self.runtime.block_on(command.execute_scalar(&mut self.inner, args))
    }

    /// See [`Command::execute_reader`].
    pub fn execute_reader<'c>(&'c mut self, command: &Command, args: CommandArgs<'_>) -> Result<BlockingReader<'c>> {
        let Self { runtime, inner } = self;
        let reader = runtime.block_on(command.execute_reader(inner, args))?;
        Ok(BlockingReader { runtime, reader })
    }

    /// Begin a transaction tracked by the connection.
    pub fn begin_transaction(&mut self, isolation_level: IsolationLevel) -> Result<Uuid> {
        self.runtime.block_on(self.inner.start_transaction(isolation_level, None))
    }

    /// Commit the current transaction.
    pub fn commit_transaction(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.commit_transaction(None))
    }

    /// Roll back the current transaction.
    pub fn rollback_transaction(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.rollback_transaction(None))
    }

    /// Create a savepoint in the current transaction.
    pub fn create_savepoint(&mut self, name: &str) -> Result<()> {
        self.runtime.block_on(self.inner.create_savepoint(name, None))
    }

    /// Roll back to a savepoint.
    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.runtime.block_on(self.inner.rollback_to_savepoint(name, None))
    }

    /// Release a savepoint.
    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.runtime.block_on(self.inner.release_savepoint(name, None))
    }

    /// See [`RelationalConnection::dispose`].
    pub fn dispose(&mut self) -> Result<()> {
        self.runtime.block_on(self.inner.dispose())
    }
}

/// A reader driven by the blocking connection's runtime.
#[derive(Debug)]
pub struct BlockingReader<'c> {
    runtime: &'c Runtime,
    reader: RelationalDataReader<'c>,
}

impl BlockingReader<'_> {
    /// Advance to the next row.
    pub fn read(&mut self) -> Result<bool> {
        self.runtime.block_on(self.reader.read())
    }

    /// Value at `ordinal` in the current row.
    pub fn get_value(&self, ordinal: usize) -> Result<SqlValue> {
        self.reader.get_value(ordinal)
    }

    /// Typed value at `ordinal` in the current row.
    pub fn get<T: relcore_types::FromSql>(&self, ordinal: usize) -> Result<T> {
        self.reader.get(ordinal)
    }

    /// Number of columns.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.reader.field_count()
    }

    /// Read the remaining rows into memory and close.
    pub fn into_buffered(self, columns: &[ReaderColumn]) -> Result<BufferedDataReader> {
        self.runtime.block_on(self.reader.into_buffered(columns))
    }

    /// Close the reader and release the connection.
    pub fn close(self) -> Result<()> {
        self.runtime.block_on(self.reader.close())
    }
}
