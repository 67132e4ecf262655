//! Transaction support.
//!
//! This module provides transaction isolation levels, savepoints, the
//! record a connection keeps for its current transaction, and the
//! [`Transaction`] guard returned by
//! [`RelationalConnection::begin_transaction`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::connection::RelationalConnection;
use crate::error::{Error, Result};
use crate::native::NativeTransaction;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Level chosen by the provider.
    Unspecified,

    /// Read uncommitted (dirty reads allowed).
    ReadUncommitted,

    /// Read committed.
    ///
    /// Transactions can only read committed data. Prevents dirty reads
    /// but allows non-repeatable reads and phantom reads.
    #[default]
    ReadCommitted,

    /// Repeatable read.
    RepeatableRead,

    /// Serializable (highest isolation).
    Serializable,

    /// Snapshot isolation.
    ///
    /// Uses row versioning to provide a point-in-time view of data.
    Snapshot,
}

impl IsolationLevel {
    /// Get the isolation level name as used in SQL.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

static IDENTIFIER_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_@#$]{0,127}$").ok());

/// Validate an identifier (savepoint name) before it is spliced into SQL.
///
/// Identifiers start with a letter or underscore, continue with letters,
/// digits, `_`, `@`, `#` or `$`, and are at most 128 characters long.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier("identifier cannot be empty".into()));
    }

    if !IDENTIFIER_RE.as_ref().is_some_and(|re| re.is_match(name)) {
        return Err(Error::InvalidIdentifier(format!(
            "invalid identifier '{name}': must start with letter/underscore, \
             contain only alphanumerics/_/@/#/$, and be 1-128 characters"
        )));
    }

    Ok(())
}

/// A savepoint within a transaction.
///
/// Savepoints allow partial rollbacks within a transaction.
/// The savepoint name is validated when created to prevent SQL injection.
///
/// # Example
///
/// ```rust,ignore
/// let mut tx = connection.begin_transaction(IsolationLevel::ReadCommitted, None).await?;
///
/// insert_order.execute_non_query(&mut tx, CommandArgs::new()).await?;
/// let sp = tx.create_savepoint("before_items", None).await?;
///
/// insert_items.execute_non_query(&mut tx, CommandArgs::new()).await?;
///
/// // Undo the items but keep the order
/// tx.rollback_to_savepoint(&sp, None).await?;
///
/// tx.commit(None).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePoint {
    /// The validated savepoint name.
    pub(crate) name: String,
}

impl SavePoint {
    /// Create a new savepoint with a validated name.
    ///
    /// This is called internally after name validation.
    pub(crate) fn new(name: String) -> Self {
        Self { name }
    }

    /// Get the savepoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The transaction a connection is currently using.
///
/// Every tracked transaction holds one connection open reference. A
/// transaction started through the connection is owned: disposing the
/// record disposes the native transaction. A transaction adopted through
/// [`RelationalConnection::use_transaction`] is not.
pub struct RelationalTransaction {
    id: Uuid,
    native: Arc<dyn NativeTransaction>,
    owned: bool,
    isolation_level: IsolationLevel,
}

impl RelationalTransaction {
    pub(crate) fn new(
        id: Uuid,
        native: Arc<dyn NativeTransaction>,
        owned: bool,
        isolation_level: IsolationLevel,
    ) -> Self {
        Self {
            id,
            native,
            owned,
            isolation_level,
        }
    }

    /// Transaction id used in diagnostics.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The native transaction.
    #[must_use]
    pub fn native(&self) -> &Arc<dyn NativeTransaction> {
        &self.native
    }

    /// Whether the connection started (and so owns) this transaction.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Isolation level.
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub(crate) fn dispose(&self) {
        if self.owned {
            self.native.dispose();
        }
    }
}

impl fmt::Debug for RelationalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalTransaction")
            .field("id", &self.id)
            .field("owned", &self.owned)
            .field("isolation_level", &self.isolation_level)
            .finish_non_exhaustive()
    }
}

/// A transaction begun on a [`RelationalConnection`].
///
/// The guard borrows the connection mutably and dereferences to it, so
/// commands run through the guard participate in the transaction. Dropping
/// the guard without committing disposes the transaction, which rolls it
/// back.
pub struct Transaction<'c> {
    connection: &'c mut RelationalConnection,
    id: Uuid,
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(connection: &'c mut RelationalConnection, id: Uuid) -> Self {
        Self { connection, id }
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether this transaction is still the connection's current one.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.connection
            .current_transaction()
            .is_some_and(|t| t.id() == self.id)
    }

    /// Isolation level, while the transaction is active.
    #[must_use]
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.connection
            .current_transaction()
            .filter(|t| t.id() == self.id)
            .map(RelationalTransaction::isolation_level)
    }

    /// Commit and release the connection reference taken when it began.
    pub async fn commit(&mut self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.ensure_active()?;
        self.connection.commit_transaction(cancel).await
    }

    /// Roll back and release the connection reference taken when it began.
    pub async fn rollback(&mut self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.ensure_active()?;
        self.connection.rollback_transaction(cancel).await
    }

    /// Create a savepoint.
    pub async fn create_savepoint(
        &mut self,
        name: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<SavePoint> {
        self.ensure_active()?;
        self.connection.create_savepoint(name, cancel).await?;
        Ok(SavePoint::new(name.to_string()))
    }

    /// Roll back to a savepoint.
    pub async fn rollback_to_savepoint(
        &mut self,
        savepoint: &SavePoint,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.ensure_active()?;
        self.connection.rollback_to_savepoint(savepoint.name(), cancel).await
    }

    /// Release a savepoint.
    pub async fn release_savepoint(
        &mut self,
        savepoint: &SavePoint,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.ensure_active()?;
        self.connection.release_savepoint(savepoint.name(), cancel).await
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::NoActiveTransaction)
        }
    }
}

impl Deref for Transaction<'_> {
    type Target = RelationalConnection;

    fn deref(&self) -> &Self::Target {
        self.connection
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::debug!(
                transaction_id = %self.id,
                "transaction dropped without commit; disposing"
            );
            self.connection.dispose_transaction();
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
