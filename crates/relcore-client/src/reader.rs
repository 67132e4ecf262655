//! Data readers returned by reader-mode execution.
//!
//! A [`RelationalDataReader`] either streams rows from the native reader
//! while holding the connection, or serves rows that were buffered up front.
//! Buffering happens when the caller supplies [`ReaderColumn`] descriptions:
//! every row is read and converted, the native reader is closed and the
//! connection reference is released before the reader is returned.

use std::fmt;
use std::time::Instant;

use relcore_types::{FromSql, ModelType, SqlValue, TypeError};
use uuid::Uuid;

use crate::cancel::{CancellationToken, cancellable};
use crate::command::CommandScope;
use crate::error::{Error, Result};
use crate::native::{DriverResult, NativeReader};

/// Reads one column value from the native reader at an ordinal.
pub type ReadFn = fn(&dyn NativeReader, usize) -> DriverResult<SqlValue>;

/// Describes a column to buffer.
#[derive(Debug, Clone)]
pub struct ReaderColumn {
    /// Model type the column is read as.
    pub model_type: ModelType,
    /// Whether the column may be NULL.
    pub nullable: bool,
    /// Name override; the native column name is used when unset.
    pub name: Option<String>,
    /// Custom read function; [`NativeReader::value`] is used when unset.
    pub read: Option<ReadFn>,
}

impl ReaderColumn {
    /// A column of the given type.
    #[must_use]
    pub fn new(model_type: ModelType, nullable: bool) -> Self {
        Self {
            model_type,
            nullable,
            name: None,
            read: None,
        }
    }

    /// Set the column name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set a custom read function.
    #[must_use]
    pub fn with_read(mut self, read: ReadFn) -> Self {
        self.read = Some(read);
        self
    }
}

/// Per-reader bookkeeping rented from the connection.
#[derive(Debug, Clone)]
pub(crate) struct ReaderState {
    pub(crate) command_id: Uuid,
    pub(crate) started: Instant,
    pub(crate) read_count: u64,
}

impl ReaderState {
    pub(crate) fn new(command_id: Uuid) -> Self {
        Self {
            command_id,
            started: Instant::now(),
            read_count: 0,
        }
    }

    pub(crate) fn reset(&mut self, command_id: Uuid) {
        self.command_id = command_id;
        self.started = Instant::now();
        self.read_count = 0;
    }
}

/// Rows read into memory.
#[derive(Debug, Clone, Default)]
pub struct BufferedDataReader {
    names: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    position: Option<usize>,
    records_affected: i64,
}

impl BufferedDataReader {
    /// Read every remaining row of `reader`, converting through `columns`.
    ///
    /// A NULL in a column described as non-nullable fails with
    /// [`TypeError::UnexpectedNull`].
    pub async fn load(
        reader: &mut dyn NativeReader,
        columns: &[ReaderColumn],
        cancel: Option<&CancellationToken>,
    ) -> Result<Self> {
        let names = columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                c.name
                    .clone()
                    .or_else(|| reader.column_name(i).map(str::to_string))
                    .unwrap_or_default()
            })
            .collect();

        let mut rows = Vec::new();
        while cancellable(cancel, async { reader.read().await.map_err(Error::Driver) }).await? {
            let mut row = Vec::with_capacity(columns.len());
            for (ordinal, column) in columns.iter().enumerate() {
                let value = match column.read {
                    Some(read) => read(&*reader, ordinal),
                    None => reader.value(ordinal),
                }
                .map_err(Error::Driver)?;
                if value.is_null() && !column.nullable {
                    return Err(Error::Type(TypeError::UnexpectedNull));
                }
                row.push(value);
            }
            rows.push(row);
        }

        Ok(Self {
            names,
            rows,
            position: None,
            records_affected: reader.records_affected(),
        })
    }

    /// Build a buffered reader from rows already in memory.
    #[must_use]
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            names,
            rows,
            position: None,
            records_affected: -1,
        }
    }

    /// Advance to the next row.
    pub fn read(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.rows.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.rows.len());
            false
        }
    }

    /// Value at `ordinal` in the current row.
    pub fn get_value(&self, ordinal: usize) -> Result<SqlValue> {
        let row = self
            .position
            .and_then(|p| self.rows.get(p))
            .ok_or(Error::NoCurrentRow)?;
        row.get(ordinal).cloned().ok_or(Error::ColumnOutOfRange {
            ordinal,
            field_count: self.names.len(),
        })
    }

    /// Typed value at `ordinal` in the current row.
    pub fn get<T: FromSql>(&self, ordinal: usize) -> Result<T> {
        Ok(T::from_sql(&self.get_value(ordinal)?)?)
    }

    /// Whether the value at `ordinal` is NULL.
    pub fn is_null(&self, ordinal: usize) -> Result<bool> {
        Ok(self.get_value(ordinal)?.is_null())
    }

    /// Number of columns.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.names.len()
    }

    /// Number of buffered rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column name at `ordinal`.
    #[must_use]
    pub fn column_name(&self, ordinal: usize) -> Option<&str> {
        self.names.get(ordinal).map(String::as_str)
    }

    /// Ordinal of a column, compared case-insensitively.
    #[must_use]
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n.eq_ignore_ascii_case(name))
    }

    /// Rows affected as reported by the native reader.
    #[must_use]
    pub fn records_affected(&self) -> i64 {
        self.records_affected
    }

    /// All buffered rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }

    /// Move back before the first row.
    pub fn rewind(&mut self) {
        self.position = None;
    }
}

enum ReaderSource {
    Live(Box<dyn NativeReader>),
    Buffered(BufferedDataReader),
}

/// The reader returned by [`Command::execute_reader`](crate::Command::execute_reader).
///
/// A live reader borrows the connection until it is closed. Call
/// [`RelationalDataReader::close`] to release it; dropping an unclosed
/// reader releases the command and the connection reference synchronously,
/// deferring any physical close to the connection's next close.
pub struct RelationalDataReader<'c> {
    source: ReaderSource,
    scope: CommandScope<'c>,
    state: Option<ReaderState>,
    command_id: Uuid,
    closed: bool,
}

impl<'c> RelationalDataReader<'c> {
    pub(crate) fn live(mut scope: CommandScope<'c>, reader: Box<dyn NativeReader>, command_id: Uuid) -> Self {
        let state = scope.connection().rent_reader_state(command_id);
        Self {
            source: ReaderSource::Live(reader),
            scope,
            state: Some(state),
            command_id,
            closed: false,
        }
    }

    /// Replace the live source with buffered rows and release the command
    /// and connection reference.
    pub(crate) async fn buffer(
        &mut self,
        columns: &[ReaderColumn],
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let ReaderSource::Live(reader) = &mut self.source else {
            return Ok(());
        };

        let buffered = match BufferedDataReader::load(reader.as_mut(), columns, cancel).await {
            Ok(buffered) => buffered,
            Err(e) => {
                if let Err(close_err) = self.close_inner().await {
                    tracing::debug!(error = %close_err, "cleanup after failed buffering also failed");
                }
                return Err(e);
            }
        };

        let closed = reader.close().await.map_err(Error::Driver);
        self.source = ReaderSource::Buffered(buffered);
        let released = self.scope.release().await;
        tracing::debug!(
            command_id = %self.command_id,
            rows = self.row_count().unwrap_or_default(),
            "buffered reader results"
        );
        closed.and(released)
    }

    /// Correlation id of the command that produced this reader.
    #[must_use]
    pub fn command_id(&self) -> Uuid {
        self.command_id
    }

    /// Whether the rows were buffered.
    #[must_use]
    pub fn is_buffered(&self) -> bool {
        matches!(self.source, ReaderSource::Buffered(_))
    }

    /// Number of buffered rows, if buffered.
    #[must_use]
    pub fn row_count(&self) -> Option<usize> {
        match &self.source {
            ReaderSource::Buffered(b) => Some(b.row_count()),
            ReaderSource::Live(_) => None,
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn field_count(&self) -> usize {
        match &self.source {
            ReaderSource::Live(r) => r.field_count(),
            ReaderSource::Buffered(b) => b.field_count(),
        }
    }

    /// Column name at `ordinal`.
    #[must_use]
    pub fn column_name(&self, ordinal: usize) -> Option<&str> {
        match &self.source {
            ReaderSource::Live(r) => r.column_name(ordinal),
            ReaderSource::Buffered(b) => b.column_name(ordinal),
        }
    }

    /// Advance to the next row.
    pub async fn read(&mut self) -> Result<bool> {
        self.read_with(None).await
    }

    /// Advance to the next row, observing a cancellation token.
    pub async fn read_with(&mut self, cancel: Option<&CancellationToken>) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        let has_row = match &mut self.source {
            ReaderSource::Live(r) => {
                cancellable(cancel, async { r.read().await.map_err(Error::Driver) }).await?
            }
            ReaderSource::Buffered(b) => b.read(),
        };
        if has_row {
            if let Some(state) = &mut self.state {
                state.read_count += 1;
            }
        }
        Ok(has_row)
    }

    /// Value at `ordinal` in the current row.
    pub fn get_value(&self, ordinal: usize) -> Result<SqlValue> {
        match &self.source {
            ReaderSource::Live(r) => r.value(ordinal).map_err(Error::Driver),
            ReaderSource::Buffered(b) => b.get_value(ordinal),
        }
    }

    /// Typed value at `ordinal` in the current row.
    pub fn get<T: FromSql>(&self, ordinal: usize) -> Result<T> {
        Ok(T::from_sql(&self.get_value(ordinal)?)?)
    }

    /// Whether the value at `ordinal` is NULL.
    pub fn is_null(&self, ordinal: usize) -> Result<bool> {
        match &self.source {
            ReaderSource::Live(r) => r.is_null(ordinal).map_err(Error::Driver),
            ReaderSource::Buffered(b) => b.is_null(ordinal),
        }
    }

    /// Rows affected as reported by the native reader.
    #[must_use]
    pub fn records_affected(&self) -> i64 {
        match &self.source {
            ReaderSource::Live(r) => r.records_affected(),
            ReaderSource::Buffered(b) => b.records_affected(),
        }
    }

    /// Rows read so far.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.state.as_ref().map_or(0, |s| s.read_count)
    }

    /// Read the remaining rows into memory and close this reader.
    pub async fn into_buffered(mut self, columns: &[ReaderColumn]) -> Result<BufferedDataReader> {
        self.buffer(columns, None).await?;
        self.close_inner().await?;
        match std::mem::take(&mut self.source) {
            ReaderSource::Buffered(b) => Ok(b),
            ReaderSource::Live(_) => Ok(BufferedDataReader::default()),
        }
    }

    /// Close the native reader, dispose the command and release the
    /// connection reference.
    pub async fn close(mut self) -> Result<()> {
        self.close_inner().await
    }

    async fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let reader_closed = match &mut self.source {
            ReaderSource::Live(r) => r.close().await.map_err(Error::Driver),
            ReaderSource::Buffered(_) => Ok(()),
        };
        let released = self.scope.release().await;

        if let Some(state) = self.state.take() {
            tracing::debug!(
                command_id = %state.command_id,
                read_count = state.read_count,
                elapsed_ms = state.started.elapsed().as_millis() as u64,
                "closed reader"
            );
            self.scope.connection().return_reader_state(state);
        }

        reader_closed.and(released)
    }
}

impl Default for ReaderSource {
    fn default() -> Self {
        Self::Buffered(BufferedDataReader::default())
    }
}

impl Drop for RelationalDataReader<'_> {
    fn drop(&mut self) {
        if !self.closed && !self.scope.is_released() {
            tracing::warn!(
                command_id = %self.command_id,
                "reader dropped without being closed; releasing synchronously"
            );
        }
        if let Some(state) = self.state.take() {
            self.scope.connection().return_reader_state(state);
        }
    }
}

impl fmt::Debug for RelationalDataReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalDataReader")
            .field("command_id", &self.command_id)
            .field("buffered", &self.is_buffered())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> BufferedDataReader {
        BufferedDataReader::from_rows(
            vec!["Id".into(), "Name".into()],
            vec![
                vec![SqlValue::Int(1), SqlValue::String("a".into())],
                vec![SqlValue::Int(2), SqlValue::Null],
            ],
        )
    }

    #[test]
    fn test_buffered_iteration() {
        let mut reader = sample();
        assert!(matches!(reader.get_value(0), Err(Error::NoCurrentRow)));

        assert!(reader.read());
        assert_eq!(reader.get::<i32>(0).unwrap(), 1);
        assert_eq!(reader.get::<String>(1).unwrap(), "a");

        assert!(reader.read());
        assert!(reader.is_null(1).unwrap());

        assert!(!reader.read());
        assert!(!reader.read());
        assert!(matches!(reader.get_value(0), Err(Error::NoCurrentRow)));

        reader.rewind();
        assert!(reader.read());
        assert_eq!(reader.get::<i32>(0).unwrap(), 1);
    }

    #[test]
    fn test_buffered_ordinals() {
        let mut reader = sample();
        assert_eq!(reader.field_count(), 2);
        assert_eq!(reader.row_count(), 2);
        assert_eq!(reader.ordinal("name"), Some(1));
        assert_eq!(reader.ordinal("missing"), None);
        assert_eq!(reader.column_name(0), Some("Id"));

        reader.read();
        assert!(matches!(
            reader.get_value(5),
            Err(Error::ColumnOutOfRange {
                ordinal: 5,
                field_count: 2
            })
        ));
    }

    #[test]
    fn test_reader_column_builder() {
        let column = ReaderColumn::new(ModelType::I32, false).named("Id");
        assert_eq!(column.name.as_deref(), Some("Id"));
        assert!(!column.nullable);
        assert!(column.read.is_none());
    }
}
