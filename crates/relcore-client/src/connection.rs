//! The relational connection.
//!
//! [`RelationalConnection`] wraps one native connection and reference-counts
//! logical opens: every [`open`](RelationalConnection::open) increments the
//! count, every [`close`](RelationalConnection::close) decrements it, and the
//! physical connection closes only when the count returns to zero and the
//! connection was opened by this wrapper in the first place. A connection
//! the caller opened physically stays open.
//!
//! ## Transactions
//!
//! At most one transaction is current. It is either started through
//! [`begin_transaction`](RelationalConnection::begin_transaction) (owned) or
//! adopted through [`use_transaction`](RelationalConnection::use_transaction)
//! (not owned). Either way it holds one open reference until it completes.
//! Explicit transactions conflict with an ambient transaction and with an
//! enlisted one.
//!
//! ## Drop safety
//!
//! Cleanup that must run when a future or guard is dropped goes through a
//! synchronous path: the open reference is released immediately and the
//! physical close is deferred. A deferred close is reused by the next open
//! or completed by the next close or dispose.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::Instrument;
use uuid::Uuid;

use crate::ambient::{AmbientContext, AmbientStack, AmbientTransaction};
use crate::cancel::{CancellationToken, cancellable, check_cancelled};
use crate::command::Command;
use crate::config::RelationalOptions;
use crate::diagnostics;
use crate::error::{Error, Result};
use crate::interception::{
    ConnectionEventData, InterceptionResult, Interceptors, TransactionAction, TransactionEventData,
};
use crate::native::{
    ConnectionState, NativeConnection, NativeConnectionFactory, NativeTransaction, same_transaction,
};
use crate::reader::ReaderState;
use crate::transaction::{IsolationLevel, RelationalTransaction, Transaction, validate_identifier};

/// A reference-counted wrapper around a native connection.
pub struct RelationalConnection {
    id: Uuid,
    options: RelationalOptions,
    factory: Option<Arc<dyn NativeConnectionFactory>>,
    native: Option<Box<dyn NativeConnection>>,
    owns_native: bool,
    connection_string: Option<String>,
    opened_count: usize,
    opened_internally: bool,
    pending_close: bool,
    current_transaction: Option<RelationalTransaction>,
    enlisted_transaction: Option<Arc<AmbientTransaction>>,
    ambient_context: Option<AmbientContext>,
    ambient_transactions: AmbientStack,
    command_timeout: Option<Duration>,
    interceptors: Arc<Interceptors>,
    cached_command: Option<Command>,
    reader_state: Option<ReaderState>,
}

impl RelationalConnection {
    /// A connection whose native connection is created on first use by
    /// `factory` and owned by the wrapper.
    #[must_use]
    pub fn new(options: RelationalOptions, factory: Arc<dyn NativeConnectionFactory>) -> Self {
        let connection_string = options.connection_string.clone();
        Self::build(options, Some(factory), None, false, connection_string)
    }

    /// A connection over a native connection supplied by the caller.
    ///
    /// The wrapper never closes or drops a native connection it does not
    /// own, except to reset logical state.
    #[must_use]
    pub fn from_native(options: RelationalOptions, native: Box<dyn NativeConnection>) -> Self {
        Self::build(options, None, Some(native), false, None)
    }

    fn build(
        options: RelationalOptions,
        factory: Option<Arc<dyn NativeConnectionFactory>>,
        native: Option<Box<dyn NativeConnection>>,
        owns_native: bool,
        connection_string: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            options,
            factory,
            native,
            owns_native,
            connection_string,
            opened_count: 0,
            opened_internally: false,
            pending_close: false,
            current_transaction: None,
            enlisted_transaction: None,
            ambient_context: None,
            ambient_transactions: AmbientStack::default(),
            command_timeout: None,
            interceptors: Arc::new(Interceptors::new()),
            cached_command: None,
            reader_state: None,
        }
    }

    /// Register interceptors.
    #[must_use]
    pub fn with_interceptors(mut self, interceptors: Interceptors) -> Self {
        self.interceptors = Arc::new(interceptors);
        self
    }

    /// Reconcile with ambient transactions made current through `context`.
    #[must_use]
    pub fn with_ambient_context(mut self, context: AmbientContext) -> Self {
        self.ambient_context = Some(context);
        self
    }

    /// Connection id used in diagnostics.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Options this connection was created with.
    #[must_use]
    pub fn options(&self) -> &RelationalOptions {
        &self.options
    }

    pub(crate) fn interceptors(&self) -> &Arc<Interceptors> {
        &self.interceptors
    }

    /// The connection string.
    #[must_use]
    pub fn connection_string(&self) -> Option<&str> {
        match &self.native {
            Some(native) => Some(native.connection_string()),
            None => self.connection_string.as_deref(),
        }
    }

    /// Change the connection string. Fails while open.
    pub fn set_connection_string(&mut self, connection_string: impl Into<String>) -> Result<()> {
        self.ensure_closed()?;
        let connection_string = connection_string.into();
        if let Some(native) = &mut self.native {
            native.set_connection_string(&connection_string);
        }
        self.connection_string = Some(connection_string);
        Ok(())
    }

    /// Replace the native connection. Fails while open.
    ///
    /// With `owned` set, the wrapper closes and drops the connection when
    /// disposed.
    pub fn set_native_connection(&mut self, native: Option<Box<dyn NativeConnection>>, owned: bool) -> Result<()> {
        self.ensure_closed()?;
        if let Some(native) = &native {
            self.connection_string = Some(native.connection_string().to_string());
        }
        self.native = native;
        self.owns_native = self.native.is_some() && owned;
        Ok(())
    }

    /// Take the native connection out of the wrapper. Fails while open.
    pub fn release_native(&mut self) -> Result<Option<Box<dyn NativeConnection>>> {
        self.ensure_closed()?;
        self.owns_native = false;
        Ok(self.native.take())
    }

    /// The native connection, if created.
    #[must_use]
    pub fn native(&self) -> Option<&dyn NativeConnection> {
        self.native.as_deref()
    }

    /// The native connection, creating it through the factory if needed.
    pub fn native_connection(&mut self) -> Result<&mut dyn NativeConnection> {
        if self.native.is_none() {
            let factory = self.factory.as_ref().ok_or(Error::NoConnection)?;
            let connection_string = self.connection_string.as_deref().unwrap_or_default();
            self.native = Some(factory.create(connection_string));
            self.owns_native = true;
            tracing::debug!(connection_id = %self.id, "created native connection");
        }
        match self.native.as_deref_mut() {
            Some(native) => Ok(native),
            None => Err(Error::NoConnection),
        }
    }

    /// Physical state of the native connection.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.native.as_ref().map_or(ConnectionState::Closed, |n| n.state())
    }

    /// Outstanding logical opens.
    #[must_use]
    pub fn opened_count(&self) -> usize {
        self.opened_count
    }

    /// Whether the physical open was performed by this wrapper.
    #[must_use]
    pub fn is_opened_internally(&self) -> bool {
        self.opened_internally
    }

    /// Whether a physical close was deferred by a synchronous release.
    #[must_use]
    pub fn has_pending_close(&self) -> bool {
        self.pending_close
    }

    /// Command timeout applied to new commands.
    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout.or(self.options.command_timeout)
    }

    /// Override the command timeout until the next reset.
    pub fn set_command_timeout(&mut self, timeout: Option<Duration>) {
        self.command_timeout = timeout;
    }

    /// The current transaction.
    #[must_use]
    pub fn current_transaction(&self) -> Option<&RelationalTransaction> {
        self.current_transaction.as_ref()
    }

    /// The explicitly enlisted ambient transaction.
    #[must_use]
    pub fn enlisted_transaction(&self) -> Option<&Arc<AmbientTransaction>> {
        self.enlisted_transaction.as_ref()
    }

    /// Number of ambient transactions this connection is enlisted in.
    #[must_use]
    pub fn ambient_transaction_count(&self) -> usize {
        self.ambient_transactions.len()
    }

    fn ensure_closed(&self) -> Result<()> {
        if self.opened_count > 0 || self.state() != ConnectionState::Closed {
            return Err(Error::CannotChangeWhileOpen);
        }
        Ok(())
    }

    // ---- open / close ----

    /// Open the connection, or add a reference if it is already open.
    ///
    /// Returns whether a physical open happened.
    pub async fn open(&mut self, cancel: Option<&CancellationToken>) -> Result<bool> {
        check_cancelled(cancel)?;
        self.native_connection()?;
        self.pending_close = false;

        if self.state() == ConnectionState::Broken {
            tracing::debug!(connection_id = %self.id, "closing broken connection before reopening");
            self.close_physical().await?;
        }

        let mut opened = false;
        if self.state() != ConnectionState::Open {
            self.clear_transactions(false);
            self.open_physical(cancel).await?;
            opened = true;
            if self.opened_count == 0 {
                self.opened_internally = true;
            }
        }
        self.opened_count += 1;

        if let Err(e) = self.handle_ambient_transactions() {
            if let Err(close_err) = self.close().await {
                tracing::debug!(error = %close_err, "close after failed ambient reconciliation also failed");
            }
            return Err(e);
        }
        Ok(opened)
    }

    /// Release one reference.
    ///
    /// The physical connection closes when the count reaches zero and this
    /// wrapper opened it. Returns whether a physical close happened.
    pub async fn close(&mut self) -> Result<bool> {
        if !self.release_reference() {
            return Ok(false);
        }
        self.clear_transactions(false);
        self.pending_close = false;

        let mut closed = false;
        if self.state() != ConnectionState::Closed {
            self.close_physical().await?;
            closed = true;
        }
        self.opened_internally = false;
        Ok(closed)
    }

    /// Release one reference without awaiting.
    ///
    /// Used from `Drop`; the physical close is deferred.
    pub(crate) fn release_deferred(&mut self) {
        if !self.release_reference() {
            return;
        }
        self.clear_transactions(false);
        if self.state() == ConnectionState::Closed {
            self.opened_internally = false;
        } else {
            self.pending_close = true;
            tracing::debug!(connection_id = %self.id, "physical close deferred");
        }
    }

    /// Decrement the count; true when a physical close is due.
    fn release_reference(&mut self) -> bool {
        let reached_zero = if self.opened_count == 0 {
            true
        } else {
            self.opened_count -= 1;
            self.opened_count == 0
        };
        reached_zero && self.opened_internally
    }

    async fn open_physical(&mut self, cancel: Option<&CancellationToken>) -> Result<()> {
        let interceptors = Arc::clone(&self.interceptors);
        let mut event = ConnectionEventData {
            connection_id: self.id,
            elapsed: None,
        };

        let mut intercepted = InterceptionResult::NotIntercepted;
        for interceptor in interceptors.connections() {
            intercepted = interceptor.connection_opening(&event, intercepted);
        }

        let span = diagnostics::connection_span(false, self.id);
        let start = Instant::now();
        let outcome = if intercepted.is_suppressed() {
            Ok(())
        } else {
            let native = self.native_connection()?;
            cancellable(cancel, async { native.open().await.map_err(Error::Driver) })
                .instrument(span.clone())
                .await
        };
        event.elapsed = Some(start.elapsed());
        diagnostics::record_outcome(&span, start.elapsed(), &outcome);

        match outcome {
            Ok(()) => {
                for interceptor in interceptors.connections() {
                    interceptor.connection_opened(&event);
                }
                tracing::debug!(
                    connection_id = %self.id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "opened connection"
                );
                Ok(())
            }
            Err(e) => {
                for interceptor in interceptors.connections() {
                    interceptor.connection_failed(&event, &e);
                }
                tracing::debug!(connection_id = %self.id, error = %e, "failed to open connection");
                Err(e)
            }
        }
    }

    async fn close_physical(&mut self) -> Result<()> {
        let interceptors = Arc::clone(&self.interceptors);
        let mut event = ConnectionEventData {
            connection_id: self.id,
            elapsed: None,
        };

        let mut intercepted = InterceptionResult::NotIntercepted;
        for interceptor in interceptors.connections() {
            intercepted = interceptor.connection_closing(&event, intercepted);
        }

        let span = diagnostics::connection_span(true, self.id);
        let start = Instant::now();
        let outcome = match (&mut self.native, intercepted.is_suppressed()) {
            (Some(native), false) => native.close().instrument(span.clone()).await.map_err(Error::Driver),
            _ => Ok(()),
        };
        event.elapsed = Some(start.elapsed());
        diagnostics::record_outcome(&span, start.elapsed(), &outcome);

        match outcome {
            Ok(()) => {
                for interceptor in interceptors.connections() {
                    interceptor.connection_closed(&event);
                }
                tracing::debug!(connection_id = %self.id, "closed connection");
                Ok(())
            }
            Err(e) => {
                for interceptor in interceptors.connections() {
                    interceptor.connection_failed(&event, &e);
                }
                tracing::debug!(connection_id = %self.id, error = %e, "failed to close connection");
                Err(e)
            }
        }
    }

    /// Drop the current transaction and, with `clear_ambient`, every
    /// ambient subscription.
    fn clear_transactions(&mut self, clear_ambient: bool) {
        if let Some(transaction) = self.current_transaction.take() {
            transaction.dispose();
            self.opened_count = self.opened_count.saturating_sub(1);
        }
        self.enlisted_transaction = None;
        if clear_ambient {
            self.ambient_transactions.clear();
        }
    }

    // ---- ambient transactions ----

    fn handle_ambient_transactions(&mut self) -> Result<()> {
        let current = self.ambient_context.as_ref().and_then(AmbientContext::current);
        let connection_id = self.id;
        if let Some(transaction_id) = self.ambient_transactions.take_mismatch() {
            tracing::debug!(
                connection_id = %connection_id,
                transaction_id = %transaction_id,
                "rejecting open after out-of-order ambient completion"
            );
            return Err(Error::AmbientTransactionMismatch);
        }
        let Some(native) = self.native.as_deref_mut() else {
            return Err(Error::NoConnection);
        };

        let Some(current) = current else {
            if self.ambient_transactions.is_empty() {
                return Ok(());
            }
            return Err(Error::PendingAmbientTransaction);
        };

        if !native.supports_ambient_transactions() {
            tracing::warn!(
                connection_id = %connection_id,
                "the native connection does not support ambient transactions; ignoring"
            );
            return Ok(());
        }

        if self.ambient_transactions.contains(&current) {
            return Ok(());
        }

        if !self.ambient_transactions.track(&current, connection_id) {
            tracing::debug!(
                connection_id = %connection_id,
                transaction_id = %current.id(),
                "ambient transaction already completed; not enlisting"
            );
            return Ok(());
        }
        if let Err(e) = native.enlist_transaction(Some(&current)) {
            self.ambient_transactions.discard(&current);
            return Err(Error::Driver(e));
        }
        tracing::debug!(
            connection_id = %connection_id,
            transaction_id = %current.id(),
            "enlisted in ambient transaction"
        );
        Ok(())
    }

    /// Apply the completion of an ambient transaction.
    ///
    /// Completion normally arrives through the subscription taken when the
    /// connection enlisted; a subscription that sees an out-of-order
    /// completion makes the next open fail with
    /// [`Error::AmbientTransactionMismatch`]. Fails when `transaction` is not
    /// the innermost tracked one.
    pub fn handle_ambient_completion(&self, transaction: &Arc<AmbientTransaction>) -> Result<()> {
        self.ambient_transactions.complete(transaction)
    }

    /// Enlist in (or, with `None`, leave) an ambient transaction explicitly.
    pub fn enlist_transaction(&mut self, transaction: Option<Arc<AmbientTransaction>>) -> Result<()> {
        let unchanged = match (&transaction, &self.enlisted_transaction) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Ok(());
        }
        if transaction.is_some() && self.current_transaction.is_some() {
            return Err(Error::TransactionAlreadyStarted);
        }

        let connection_id = self.id;
        let native = self.native_connection()?;
        if !native.supports_ambient_transactions() {
            tracing::warn!(
                connection_id = %connection_id,
                "the native connection does not support ambient transactions; ignoring enlistment"
            );
            return Ok(());
        }
        native.enlist_transaction(transaction.as_ref()).map_err(Error::Driver)?;
        self.enlisted_transaction = transaction;
        Ok(())
    }

    // ---- explicit transactions ----

    fn ensure_no_transactions(&self) -> Result<()> {
        if self.current_transaction.is_some() {
            return Err(Error::TransactionAlreadyStarted);
        }
        if self
            .ambient_context
            .as_ref()
            .and_then(AmbientContext::current)
            .is_some()
        {
            return Err(Error::ConflictingAmbientTransaction);
        }
        if self.enlisted_transaction.is_some() {
            return Err(Error::ConflictingEnlistedTransaction);
        }
        Ok(())
    }

    /// Begin a transaction.
    ///
    /// Opens the connection; the open reference is held until the
    /// transaction commits, rolls back or is disposed.
    pub async fn begin_transaction(
        &mut self,
        isolation_level: IsolationLevel,
        cancel: Option<&CancellationToken>,
    ) -> Result<Transaction<'_>> {
        let id = self.start_transaction(isolation_level, cancel).await?;
        Ok(Transaction::new(self, id))
    }

    /// Begin a transaction and track it without returning a guard.
    ///
    /// Complete it with [`commit_transaction`](Self::commit_transaction) or
    /// [`rollback_transaction`](Self::rollback_transaction).
    pub async fn start_transaction(
        &mut self,
        isolation_level: IsolationLevel,
        cancel: Option<&CancellationToken>,
    ) -> Result<Uuid> {
        check_cancelled(cancel)?;
        self.open(cancel).await?;
        if let Err(e) = self.ensure_no_transactions() {
            self.close().await?;
            return Err(e);
        }

        let interceptors = Arc::clone(&self.interceptors);
        let transaction_id = Uuid::new_v4();
        let mut event = TransactionEventData {
            connection_id: self.id,
            transaction_id,
            isolation_level,
            action: TransactionAction::Start,
            savepoint: None,
            elapsed: None,
        };

        let mut intercepted = InterceptionResult::NotIntercepted;
        for interceptor in interceptors.transactions() {
            intercepted = interceptor.transaction_starting(&event, intercepted);
        }

        let span = diagnostics::transaction_span(TransactionAction::Start, self.id, transaction_id);
        let start = Instant::now();
        let outcome = match intercepted.into_result() {
            Some(native) => Ok(native),
            None => {
                let native = self.native_connection()?;
                cancellable(cancel, async {
                    native.begin_transaction(isolation_level).await.map_err(Error::Driver)
                })
                .instrument(span.clone())
                .await
            }
        };
        event.elapsed = Some(start.elapsed());
        diagnostics::record_outcome(&span, start.elapsed(), &outcome);

        let mut native = match outcome {
            Ok(native) => native,
            Err(e) => {
                for interceptor in interceptors.transactions() {
                    interceptor.transaction_failed(&event, &e);
                }
                if let Err(close_err) = self.close().await {
                    tracing::debug!(error = %close_err, "close after failed begin also failed");
                }
                return Err(e);
            }
        };
        for interceptor in interceptors.transactions() {
            native = interceptor.transaction_started(&event, native);
        }

        tracing::debug!(
            connection_id = %self.id,
            transaction_id = %transaction_id,
            isolation_level = isolation_level.name(),
            "began transaction"
        );
        self.current_transaction = Some(RelationalTransaction::new(transaction_id, native, true, isolation_level));
        Ok(transaction_id)
    }

    /// Commit the current transaction.
    pub async fn commit_transaction(&mut self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.complete_transaction(TransactionAction::Commit, cancel).await
    }

    /// Roll back the current transaction.
    pub async fn rollback_transaction(&mut self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.complete_transaction(TransactionAction::Rollback, cancel).await
    }

    async fn complete_transaction(
        &mut self,
        action: TransactionAction,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        let transaction = self.current_transaction.as_ref().ok_or(Error::NoActiveTransaction)?;
        let native = Arc::clone(transaction.native());
        let mut event = self.transaction_event(transaction, action, None);

        let interceptors = Arc::clone(&self.interceptors);
        let mut intercepted = InterceptionResult::NotIntercepted;
        for interceptor in interceptors.transactions() {
            intercepted = interceptor.transaction_operating(&event, intercepted);
        }

        let span = diagnostics::transaction_span(action, self.id, event.transaction_id);
        let start = Instant::now();
        let outcome = if intercepted.is_suppressed() {
            Ok(())
        } else {
            cancellable(cancel, async {
                match action {
                    TransactionAction::Commit => native.commit().await,
                    _ => native.rollback().await,
                }
                .map_err(Error::Driver)
            })
            .instrument(span.clone())
            .await
        };
        event.elapsed = Some(start.elapsed());
        diagnostics::record_outcome(&span, start.elapsed(), &outcome);

        if let Err(e) = outcome {
            for interceptor in interceptors.transactions() {
                interceptor.transaction_failed(&event, &e);
            }
            tracing::debug!(transaction_id = %event.transaction_id, error = %e, "transaction operation failed");
            return Err(e);
        }
        for interceptor in interceptors.transactions() {
            interceptor.transaction_operated(&event);
        }
        tracing::debug!(
            connection_id = %self.id,
            transaction_id = %event.transaction_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            action = ?action,
            "completed transaction"
        );

        if let Some(transaction) = self.current_transaction.take() {
            transaction.dispose();
            self.close().await?;
        }
        Ok(())
    }

    /// Dispose the current transaction without awaiting.
    ///
    /// An owned native transaction is disposed, which rolls back pending
    /// work. The open reference is released with the physical close
    /// deferred.
    pub fn dispose_transaction(&mut self) {
        if let Some(transaction) = self.current_transaction.take() {
            tracing::debug!(
                connection_id = %self.id,
                transaction_id = %transaction.id(),
                "disposing transaction"
            );
            transaction.dispose();
            self.release_deferred();
        }
    }

    /// Adopt a native transaction started elsewhere, or stop tracking the
    /// current one with `None`.
    ///
    /// Returns the id of the tracked transaction. Adopting the transaction
    /// that is already current returns its id without side effects.
    pub async fn use_transaction(
        &mut self,
        transaction: Option<Arc<dyn NativeTransaction>>,
        transaction_id: Option<Uuid>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Uuid>> {
        let Some(native) = transaction else {
            if let Some(current) = self.current_transaction.take() {
                tracing::debug!(transaction_id = %current.id(), "stopped tracking transaction");
                self.release_deferred();
            }
            return Ok(None);
        };

        if let Some(current) = &self.current_transaction {
            if same_transaction(current.native(), &native) {
                return Ok(Some(current.id()));
            }
        }

        check_cancelled(cancel)?;
        self.ensure_no_transactions()?;
        self.open(cancel).await?;

        let id = transaction_id.unwrap_or_else(Uuid::new_v4);
        let isolation_level = native.isolation_level();
        let event = TransactionEventData {
            connection_id: self.id,
            transaction_id: id,
            isolation_level,
            action: TransactionAction::Use,
            savepoint: None,
            elapsed: None,
        };
        let mut native = native;
        for interceptor in self.interceptors.transactions() {
            native = interceptor.transaction_used(&event, native);
        }

        tracing::debug!(connection_id = %self.id, transaction_id = %id, "using external transaction");
        self.current_transaction = Some(RelationalTransaction::new(id, native, false, isolation_level));
        Ok(Some(id))
    }

    // ---- savepoints ----

    /// Create a savepoint in the current transaction.
    pub async fn create_savepoint(&mut self, name: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        self.savepoint_operation(TransactionAction::CreateSavepoint, name, cancel).await
    }

    /// Roll the current transaction back to a savepoint.
    pub async fn rollback_to_savepoint(&mut self, name: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        self.savepoint_operation(TransactionAction::RollbackToSavepoint, name, cancel).await
    }

    /// Release a savepoint. A no-op on providers without a release statement.
    pub async fn release_savepoint(&mut self, name: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        self.savepoint_operation(TransactionAction::ReleaseSavepoint, name, cancel).await
    }

    /// Whether the native connection supports savepoints.
    #[must_use]
    pub fn supports_savepoints(&self) -> bool {
        self.native.as_ref().is_some_and(|n| n.savepoint_dialect().supports_savepoints())
    }

    /// Whether a non-query should run inside an automatic savepoint: the
    /// option is on, the current transaction was adopted rather than started
    /// here, and the provider supports savepoints.
    pub(crate) fn wants_auto_savepoint(&self) -> bool {
        self.options.auto_savepoints
            && self.current_transaction.as_ref().is_some_and(|t| !t.is_owned())
            && self.supports_savepoints()
    }

    async fn savepoint_operation(
        &mut self,
        action: TransactionAction,
        name: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        validate_identifier(name)?;

        let transaction = self.current_transaction.as_ref().ok_or(Error::NoActiveTransaction)?;
        let native_transaction = Arc::clone(transaction.native());
        let mut event = self.transaction_event(transaction, action, Some(name));

        let dialect = self.native_connection()?.savepoint_dialect();
        let sql = match action {
            TransactionAction::CreateSavepoint => dialect.create_sql(name),
            TransactionAction::RollbackToSavepoint => dialect.rollback_sql(name),
            _ => dialect.release_sql(name),
        };
        let Some(sql) = sql else {
            if dialect.supports_savepoints() {
                tracing::debug!(savepoint = name, "savepoint release has no statement on this provider");
                return Ok(());
            }
            return Err(Error::SavepointsNotSupported);
        };

        let interceptors = Arc::clone(&self.interceptors);
        let mut intercepted = InterceptionResult::NotIntercepted;
        for interceptor in interceptors.transactions() {
            intercepted = interceptor.transaction_operating(&event, intercepted);
        }

        let span = diagnostics::transaction_span(action, self.id, event.transaction_id);
        let start = Instant::now();
        let timeout = self.command_timeout();
        let outcome = if intercepted.is_suppressed() {
            Ok(())
        } else {
            let mut command = self.native_connection()?.create_command();
            command.set_text(&sql);
            command.set_timeout(timeout);
            command.set_transaction(Some(native_transaction));
            let result = cancellable(cancel, async {
                command.execute_non_query().await.map(|_| ()).map_err(Error::Driver)
            })
            .instrument(span.clone())
            .await;
            command.dispose();
            result
        };
        event.elapsed = Some(start.elapsed());
        diagnostics::record_outcome(&span, start.elapsed(), &outcome);

        match outcome {
            Ok(()) => {
                for interceptor in interceptors.transactions() {
                    interceptor.transaction_operated(&event);
                }
                tracing::debug!(
                    transaction_id = %event.transaction_id,
                    savepoint = name,
                    action = ?action,
                    "savepoint operation completed"
                );
                Ok(())
            }
            Err(e) => {
                for interceptor in interceptors.transactions() {
                    interceptor.transaction_failed(&event, &e);
                }
                Err(e)
            }
        }
    }

    fn transaction_event<'a>(
        &self,
        transaction: &RelationalTransaction,
        action: TransactionAction,
        savepoint: Option<&'a str>,
    ) -> TransactionEventData<'a> {
        TransactionEventData {
            connection_id: self.id,
            transaction_id: transaction.id(),
            isolation_level: transaction.isolation_level(),
            action,
            savepoint,
            elapsed: None,
        }
    }

    // ---- lifecycle ----

    /// Reset logical state and release an owned native connection.
    pub async fn dispose(&mut self) -> Result<()> {
        self.reset_state(true).await
    }

    /// Reset logical state so the wrapper can be reused; an owned native
    /// connection is closed but kept.
    pub async fn reset(&mut self) -> Result<()> {
        self.reset_state(false).await
    }

    async fn reset_state(&mut self, drop_native: bool) -> Result<()> {
        self.clear_transactions(true);
        self.opened_count = 0;
        self.opened_internally = false;
        self.pending_close = false;
        self.command_timeout = None;

        let mut result = Ok(());
        if self.owns_native {
            if self.state() != ConnectionState::Closed {
                result = self.close_physical().await;
            }
            if drop_native {
                self.native = None;
                self.owns_native = false;
            }
        }
        tracing::debug!(connection_id = %self.id, dropped = drop_native, "reset connection");
        result
    }

    /// Take the cached command, or a fresh one.
    pub fn rent_command(&mut self) -> Command {
        self.cached_command.take().unwrap_or_default()
    }

    /// Return a command to the single-slot cache.
    pub fn return_command(&mut self, command: Command) {
        if self.cached_command.is_none() {
            self.cached_command = Some(command);
        }
    }

    pub(crate) fn rent_reader_state(&mut self, command_id: Uuid) -> ReaderState {
        match self.reader_state.take() {
            Some(mut state) => {
                state.reset(command_id);
                state
            }
            None => ReaderState::new(command_id),
        }
    }

    pub(crate) fn return_reader_state(&mut self, state: ReaderState) {
        if self.reader_state.is_none() {
            self.reader_state = Some(state);
        }
    }
}

impl Drop for RelationalConnection {
    fn drop(&mut self) {
        self.clear_transactions(true);
    }
}

impl fmt::Debug for RelationalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("opened_count", &self.opened_count)
            .field("opened_internally", &self.opened_internally)
            .field("current_transaction", &self.current_transaction)
            .finish_non_exhaustive()
    }
}
