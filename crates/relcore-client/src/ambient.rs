//! Ambient transactions.
//!
//! An ambient transaction is a unit of work established outside any single
//! connection. Callers make one current through an [`AmbientContext`] handed
//! to the connection; every time the connection opens it reconciles with the
//! context, enlisting in transactions it has not seen yet.
//!
//! Completion is signalled by [`AmbientTransaction::complete`], which may run
//! on any thread. Each connection keeps a stack of the transactions it
//! enlisted in, paired one-to-one with completion subscriptions, and pops the
//! innermost entry when its transaction completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transaction::IsolationLevel;

/// Identifies a completion subscription on an [`AmbientTransaction`].
pub type SubscriptionId = u64;

type CompletionCallback = Box<dyn Fn(&Arc<AmbientTransaction>) + Send + Sync>;

/// How an ambient transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// The work was committed.
    Committed,
    /// The work was rolled back.
    Aborted,
}

/// A transaction that spans connections.
pub struct AmbientTransaction {
    id: Uuid,
    isolation_level: IsolationLevel,
    next_subscription: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, CompletionCallback)>>,
    outcome: Mutex<Option<TransactionOutcome>>,
}

impl AmbientTransaction {
    /// Create a pending ambient transaction.
    #[must_use]
    pub fn new(isolation_level: IsolationLevel) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            isolation_level,
            next_subscription: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
            outcome: Mutex::new(None),
        })
    }

    /// Unique identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Isolation level.
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Outcome, once completed.
    #[must_use]
    pub fn outcome(&self) -> Option<TransactionOutcome> {
        *self.outcome.lock()
    }

    /// Register a callback invoked once when the transaction completes.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Arc<AmbientTransaction>) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push((id, Box::new(callback)));
        id
    }

    /// Remove a subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self, subscription: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != subscription);
        subscribers.len() != before
    }

    /// Number of registered completion callbacks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Complete the transaction and notify every subscriber.
    ///
    /// Subscribers are detached before they run, so a callback may freely
    /// call back into this transaction. Completing twice notifies nobody.
    pub fn complete(self: &Arc<Self>, outcome: TransactionOutcome) {
        {
            let mut current = self.outcome.lock();
            if current.is_some() {
                return;
            }
            *current = Some(outcome);
        }
        let subscribers = std::mem::take(&mut *self.subscribers.lock());
        tracing::debug!(
            transaction_id = %self.id,
            outcome = ?outcome,
            subscribers = subscribers.len(),
            "ambient transaction completed"
        );
        for (_, callback) in subscribers {
            callback(self);
        }
    }

    /// Whether two handles refer to the same transaction.
    #[must_use]
    pub fn ptr_eq(a: &Arc<Self>, b: &Arc<Self>) -> bool {
        Arc::ptr_eq(a, b)
    }
}

impl std::fmt::Debug for AmbientTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbientTransaction")
            .field("id", &self.id)
            .field("isolation_level", &self.isolation_level)
            .field("outcome", &self.outcome())
            .finish_non_exhaustive()
    }
}

/// Holds the ambient transaction current for a group of connections.
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct AmbientContext {
    current: Arc<Mutex<Option<Arc<AmbientTransaction>>>>,
}

impl AmbientContext {
    /// Create a context with no current transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current ambient transaction.
    #[must_use]
    pub fn current(&self) -> Option<Arc<AmbientTransaction>> {
        self.current.lock().clone()
    }

    /// Make `transaction` current until the returned scope is dropped.
    #[must_use = "the transaction stops being current when the scope is dropped"]
    pub fn enter(&self, transaction: Arc<AmbientTransaction>) -> AmbientScope {
        let previous = self.current.lock().replace(transaction);
        AmbientScope {
            context: self.clone(),
            previous,
        }
    }

    /// Replace the current transaction.
    pub fn set(&self, transaction: Option<Arc<AmbientTransaction>>) {
        *self.current.lock() = transaction;
    }
}

/// Restores the previously current ambient transaction on drop.
#[derive(Debug)]
pub struct AmbientScope {
    context: AmbientContext,
    previous: Option<Arc<AmbientTransaction>>,
}

impl Drop for AmbientScope {
    fn drop(&mut self) {
        *self.context.current.lock() = self.previous.take();
    }
}

#[derive(Debug)]
struct AmbientEntry {
    transaction: Arc<AmbientTransaction>,
    subscription: Option<SubscriptionId>,
}

#[derive(Debug, Default)]
struct StackState {
    entries: Vec<AmbientEntry>,
    /// A completion that arrived for a transaction that was not innermost.
    mismatched: Option<Uuid>,
}

/// The ambient transactions a connection is enlisted in, innermost last.
///
/// Completion callbacks hold a weak reference to the stack, so a dropped
/// connection never keeps it alive. A completion that cannot be applied is
/// remembered and surfaced by [`AmbientStack::take_mismatch`].
#[derive(Debug, Clone, Default)]
pub(crate) struct AmbientStack {
    state: Arc<Mutex<StackState>>,
}

impl AmbientStack {
    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub(crate) fn contains(&self, transaction: &Arc<AmbientTransaction>) -> bool {
        self.state
            .lock()
            .entries
            .iter()
            .any(|e| Arc::ptr_eq(&e.transaction, transaction))
    }

    /// Push `transaction` as the innermost entry, then subscribe to its
    /// completion.
    ///
    /// The entry exists before the callback can fire, so a completion racing
    /// with this call always finds it on top. Returns false, tracking
    /// nothing, when the transaction had already completed.
    pub(crate) fn track(&self, transaction: &Arc<AmbientTransaction>, connection_id: Uuid) -> bool {
        self.state.lock().entries.push(AmbientEntry {
            transaction: Arc::clone(transaction),
            subscription: None,
        });

        let subscription = self.subscribe(transaction, connection_id);
        if let Some(entry) = self
            .state
            .lock()
            .entries
            .iter_mut()
            .rev()
            .find(|e| Arc::ptr_eq(&e.transaction, transaction))
        {
            entry.subscription = Some(subscription);
        }

        if transaction.outcome().is_some() {
            self.discard(transaction);
            return false;
        }
        true
    }

    fn subscribe(&self, transaction: &Arc<AmbientTransaction>, connection_id: Uuid) -> SubscriptionId {
        let weak: Weak<Mutex<StackState>> = Arc::downgrade(&self.state);
        transaction.subscribe(move |completed| {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let stack = AmbientStack { state };
            if let Err(e) = stack.complete(completed) {
                tracing::warn!(
                    connection_id = %connection_id,
                    transaction_id = %completed.id(),
                    error = %e,
                    "ambient transaction completed out of order"
                );
                stack.state.lock().mismatched = Some(completed.id());
            }
        })
    }

    /// Pop the innermost entry, which must belong to `transaction`.
    pub(crate) fn complete(&self, transaction: &Arc<AmbientTransaction>) -> Result<()> {
        let entry = {
            let mut state = self.state.lock();
            match state.entries.last() {
                Some(top) if Arc::ptr_eq(&top.transaction, transaction) => state.entries.pop(),
                _ => return Err(Error::AmbientTransactionMismatch),
            }
        };
        if let Some(subscription) = entry.and_then(|e| e.subscription) {
            transaction.unsubscribe(subscription);
        }
        Ok(())
    }

    /// Remove the entry for `transaction` wherever it sits.
    pub(crate) fn discard(&self, transaction: &Arc<AmbientTransaction>) {
        let entry = {
            let mut state = self.state.lock();
            state
                .entries
                .iter()
                .rposition(|e| Arc::ptr_eq(&e.transaction, transaction))
                .map(|i| state.entries.remove(i))
        };
        if let Some(subscription) = entry.and_then(|e| e.subscription) {
            transaction.unsubscribe(subscription);
        }
    }

    /// The transaction whose completion could not be applied, if any.
    /// Reading it clears it.
    pub(crate) fn take_mismatch(&self) -> Option<Uuid> {
        self.state.lock().mismatched.take()
    }

    /// Pop every entry and drop its subscription.
    pub(crate) fn clear(&self) {
        let entries = {
            let mut state = self.state.lock();
            state.mismatched = None;
            std::mem::take(&mut state.entries)
        };
        for entry in entries.into_iter().rev() {
            if let Some(subscription) = entry.subscription {
                entry.transaction.unsubscribe(subscription);
            }
        }
    }
}
