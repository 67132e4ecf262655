//! Transaction, savepoint and ambient transaction tests.
//!
//! Run with:
//! ```bash
//! cargo test -p relcore-testing --test transactions
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use relcore_client::{
    AUTO_SAVEPOINT_NAME, AmbientContext, AmbientTransaction, Command, CommandArgs, ConnectionState, Error,
    IsolationLevel, RelationalConnection, RelationalOptions, SavepointDialect, TransactionOutcome,
};
use relcore_testing::{DriverEvent, FakeDriver, FakeResponse, RecordingInterceptor};

fn connection(driver: &FakeDriver) -> RelationalConnection {
    RelationalConnection::new(RelationalOptions::new(), driver.factory())
}

fn count(driver: &FakeDriver, event: &DriverEvent) -> usize {
    driver.count(|e| e == event)
}

// =============================================================================
// Explicit Transactions
// =============================================================================

mod explicit {
    use super::*;

    #[tokio::test]
    async fn test_commit_releases_the_connection() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);
        let command = Command::new("UPDATE t SET a = 1", Vec::new());

        let mut tx = conn.begin_transaction(IsolationLevel::Serializable, None).await.unwrap();
        assert_eq!(tx.isolation_level(), Some(IsolationLevel::Serializable));
        assert_eq!(tx.opened_count(), 1);

        command.execute_non_query(&mut *tx, CommandArgs::new()).await.unwrap();
        tx.commit(None).await.unwrap();
        assert!(!tx.is_active());
        drop(tx);

        assert!(conn.current_transaction().is_none());
        assert_eq!(conn.opened_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);
        let events = driver.events();
        assert_eq!(
            events[..2],
            [DriverEvent::Open, DriverEvent::Begin(IsolationLevel::Serializable)]
        );
        assert!(matches!(events[2], DriverEvent::Execute { in_transaction: true, .. }));
        assert_eq!(
            events[3..],
            [
                DriverEvent::ParametersCleared,
                DriverEvent::CommandDisposed,
                DriverEvent::Commit,
                DriverEvent::TransactionDisposed,
                DriverEvent::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_rollback() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);

        let mut tx = conn.begin_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();
        tx.rollback(None).await.unwrap();
        assert!(matches!(tx.commit(None).await, Err(Error::NoActiveTransaction)));
        drop(tx);

        assert_eq!(count(&driver, &DriverEvent::Rollback), 1);
        assert_eq!(count(&driver, &DriverEvent::Commit), 0);
        assert_eq!(conn.opened_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_guard_disposes_transaction() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);

        {
            let _tx = conn.begin_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();
        }

        assert!(conn.current_transaction().is_none());
        assert_eq!(conn.opened_count(), 0);
        assert!(conn.has_pending_close());
        assert_eq!(count(&driver, &DriverEvent::TransactionDisposed), 1);

        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_second_transaction_is_rejected() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);

        conn.start_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();
        let err = conn
            .start_transaction(IsolationLevel::ReadCommitted, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransactionAlreadyStarted));
        assert!(err.is_state_error());
        assert_eq!(conn.opened_count(), 1);
        assert_eq!(driver.count(|e| matches!(e, DriverEvent::Begin(_))), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_transaction_current() {
        let driver = FakeDriver::builder().fail_commits(1).build();
        let mut conn = connection(&driver);

        conn.start_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();
        let err = conn.commit_transaction(None).await.unwrap_err();
        assert!(err.is_transient());
        assert!(conn.current_transaction().is_some());

        conn.rollback_transaction(None).await.unwrap();
        assert!(conn.current_transaction().is_none());
        assert_eq!(conn.opened_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_without_transaction() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);
        assert!(matches!(
            conn.commit_transaction(None).await,
            Err(Error::NoActiveTransaction)
        ));
    }

    #[tokio::test]
    async fn test_transaction_hooks() {
        let driver = FakeDriver::builder().build();
        let recorder = RecordingInterceptor::new();
        let mut conn = connection(&driver).with_interceptors(recorder.registered());

        conn.start_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();
        conn.commit_transaction(None).await.unwrap();

        let hooks: Vec<_> = recorder
            .hooks()
            .into_iter()
            .filter(|h| h.starts_with("transaction_"))
            .collect();
        assert_eq!(
            hooks,
            vec![
                "transaction_starting",
                "transaction_started",
                "transaction_operating",
                "transaction_operated"
            ]
        );
    }
}

// =============================================================================
// External Transactions
// =============================================================================

mod external {
    use super::*;

    #[tokio::test]
    async fn test_adopted_transaction_is_attached_but_not_owned() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);
        let external = driver.external_transaction(IsolationLevel::Snapshot);

        let id = conn
            .use_transaction(Some(Arc::clone(&external)), None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conn.opened_count(), 1);
        assert!(!conn.current_transaction().unwrap().is_owned());
        assert_eq!(
            conn.current_transaction().unwrap().isolation_level(),
            IsolationLevel::Snapshot
        );

        let again = conn.use_transaction(Some(Arc::clone(&external)), None, None).await.unwrap();
        assert_eq!(again, Some(id));
        assert_eq!(conn.opened_count(), 1);

        Command::new("UPDATE t SET a = 1", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap();
        assert!(matches!(
            driver.last_execute(),
            Some(DriverEvent::Execute { in_transaction: true, .. })
        ));

        conn.commit_transaction(None).await.unwrap();
        assert_eq!(count(&driver, &DriverEvent::Commit), 1);
        assert_eq!(count(&driver, &DriverEvent::TransactionDisposed), 0);
    }

    #[tokio::test]
    async fn test_non_query_in_adopted_transaction_uses_a_savepoint() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);
        let external = driver.external_transaction(IsolationLevel::ReadCommitted);

        conn.use_transaction(Some(external), None, None).await.unwrap();
        Command::new("UPDATE t SET a = 1", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap();

        assert_eq!(
            driver.executed(),
            vec![
                format!("SAVEPOINT {AUTO_SAVEPOINT_NAME}"),
                "UPDATE t SET a = 1".to_string(),
                format!("RELEASE SAVEPOINT {AUTO_SAVEPOINT_NAME}"),
            ]
        );
        assert_eq!(conn.opened_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_non_query_rolls_back_to_the_savepoint() {
        let driver = FakeDriver::builder()
            .with_response("UPDATE t SET a = 1", FakeResponse::error("constraint violation"))
            .build();
        let mut conn = connection(&driver);
        let external = driver.external_transaction(IsolationLevel::ReadCommitted);

        conn.use_transaction(Some(external), None, None).await.unwrap();
        let err = Command::new("UPDATE t SET a = 1", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Driver(_)));
        assert_eq!(
            driver.executed(),
            vec![
                format!("SAVEPOINT {AUTO_SAVEPOINT_NAME}"),
                "UPDATE t SET a = 1".to_string(),
                format!("ROLLBACK TO SAVEPOINT {AUTO_SAVEPOINT_NAME}"),
            ]
        );
        assert!(conn.current_transaction().is_some());
        assert_eq!(count(&driver, &DriverEvent::Rollback), 0);
    }

    #[tokio::test]
    async fn test_auto_savepoints_can_be_disabled() {
        let driver = FakeDriver::builder().build();
        let options = RelationalOptions::new().auto_savepoints(false);
        let mut conn = RelationalConnection::new(options, driver.factory());
        let external = driver.external_transaction(IsolationLevel::ReadCommitted);

        conn.use_transaction(Some(external), None, None).await.unwrap();
        Command::new("UPDATE t SET a = 1", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap();

        assert_eq!(driver.executed(), vec!["UPDATE t SET a = 1"]);
    }

    #[tokio::test]
    async fn test_owned_transaction_gets_no_savepoint() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);

        conn.start_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();
        Command::new("UPDATE t SET a = 1", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap();

        assert_eq!(driver.executed(), vec!["UPDATE t SET a = 1"]);
    }

    #[tokio::test]
    async fn test_provider_without_savepoints_runs_plainly() {
        let driver = FakeDriver::builder()
            .with_savepoint_dialect(SavepointDialect::Unsupported)
            .build();
        let mut conn = connection(&driver);
        let external = driver.external_transaction(IsolationLevel::ReadCommitted);

        conn.use_transaction(Some(external), None, None).await.unwrap();
        Command::new("UPDATE t SET a = 1", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap();

        assert_eq!(driver.executed(), vec!["UPDATE t SET a = 1"]);
    }

    #[tokio::test]
    async fn test_stop_tracking_external_transaction() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);
        let external = driver.external_transaction(IsolationLevel::ReadCommitted);

        conn.use_transaction(Some(external), None, None).await.unwrap();
        assert_eq!(conn.use_transaction(None, None, None).await.unwrap(), None);

        assert!(conn.current_transaction().is_none());
        assert_eq!(conn.opened_count(), 0);
        assert_eq!(count(&driver, &DriverEvent::TransactionDisposed), 0);
    }
}

// =============================================================================
// Savepoints
// =============================================================================

mod savepoints {
    use super::*;

    #[tokio::test]
    async fn test_standard_savepoint_commands() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);

        let mut tx = conn.begin_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();
        let savepoint = tx.create_savepoint("before_update", None).await.unwrap();
        tx.rollback_to_savepoint(&savepoint, None).await.unwrap();
        tx.release_savepoint(&savepoint, None).await.unwrap();
        tx.commit(None).await.unwrap();
        drop(tx);

        assert_eq!(
            driver.executed(),
            vec![
                "SAVEPOINT before_update",
                "ROLLBACK TO SAVEPOINT before_update",
                "RELEASE SAVEPOINT before_update",
            ]
        );
        assert_eq!(
            driver.count(|e| matches!(e, DriverEvent::Execute { in_transaction: true, .. })),
            3
        );
    }

    #[tokio::test]
    async fn test_sql_server_release_is_a_no_op() {
        let driver = FakeDriver::builder()
            .with_savepoint_dialect(SavepointDialect::SqlServer)
            .build();
        let mut conn = connection(&driver);

        conn.start_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();
        conn.create_savepoint("sp1", None).await.unwrap();
        conn.release_savepoint("sp1", None).await.unwrap();

        assert_eq!(driver.executed(), vec!["SAVE TRANSACTION sp1"]);
    }

    #[tokio::test]
    async fn test_unsupported_savepoints() {
        let driver = FakeDriver::builder()
            .with_savepoint_dialect(SavepointDialect::Unsupported)
            .build();
        let mut conn = connection(&driver);

        conn.start_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();
        assert!(!conn.supports_savepoints());
        assert!(matches!(
            conn.create_savepoint("sp1", None).await,
            Err(Error::SavepointsNotSupported)
        ));
    }

    #[tokio::test]
    async fn test_savepoint_names_are_validated() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);

        conn.start_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();
        assert!(matches!(
            conn.create_savepoint("sp; DROP TABLE users", None).await,
            Err(Error::InvalidIdentifier(_))
        ));
        assert!(driver.executed().is_empty());
    }

    #[tokio::test]
    async fn test_savepoint_requires_transaction() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);
        assert!(matches!(
            conn.create_savepoint("sp1", None).await,
            Err(Error::NoActiveTransaction)
        ));
    }
}

// =============================================================================
// Ambient Transactions
// =============================================================================

mod ambient {
    use super::*;

    #[tokio::test]
    async fn test_open_enlists_once_per_transaction() {
        let driver = FakeDriver::builder().build();
        let context = AmbientContext::new();
        let mut conn = connection(&driver).with_ambient_context(context.clone());
        let ambient = AmbientTransaction::new(IsolationLevel::ReadCommitted);

        let scope = context.enter(Arc::clone(&ambient));
        conn.open(None).await.unwrap();
        conn.close().await.unwrap();
        conn.open(None).await.unwrap();
        assert_eq!(conn.ambient_transaction_count(), 1);
        assert_eq!(count(&driver, &DriverEvent::Enlist(Some(ambient.id()))), 1);

        let err = conn
            .start_transaction(IsolationLevel::ReadCommitted, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingAmbientTransaction));
        assert_eq!(conn.opened_count(), 1);

        conn.close().await.unwrap();
        ambient.complete(TransactionOutcome::Committed);
        assert_eq!(conn.ambient_transaction_count(), 0);
        assert_eq!(ambient.subscriber_count(), 0);

        drop(scope);
        conn.open(None).await.unwrap();
        assert_eq!(driver.count(|e| matches!(e, DriverEvent::Enlist(_))), 1);
    }

    #[tokio::test]
    async fn test_open_fails_while_abandoned_transaction_is_tracked() {
        let driver = FakeDriver::builder().build();
        let context = AmbientContext::new();
        let mut conn = connection(&driver).with_ambient_context(context.clone());
        let ambient = AmbientTransaction::new(IsolationLevel::ReadCommitted);

        {
            let _scope = context.enter(Arc::clone(&ambient));
            conn.open(None).await.unwrap();
            conn.close().await.unwrap();
        }

        assert!(matches!(
            conn.open(None).await,
            Err(Error::PendingAmbientTransaction)
        ));
        assert_eq!(conn.opened_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_out_of_order_completion_fails_next_open() {
        let driver = FakeDriver::builder().build();
        let context = AmbientContext::new();
        let mut conn = connection(&driver).with_ambient_context(context.clone());
        let outer = AmbientTransaction::new(IsolationLevel::ReadCommitted);
        let inner = AmbientTransaction::new(IsolationLevel::ReadCommitted);

        let _outer_scope = context.enter(Arc::clone(&outer));
        conn.open(None).await.unwrap();
        conn.close().await.unwrap();
        {
            let _inner_scope = context.enter(Arc::clone(&inner));
            conn.open(None).await.unwrap();
            conn.close().await.unwrap();
        }
        assert_eq!(conn.ambient_transaction_count(), 2);

        outer.complete(TransactionOutcome::Committed);
        assert_eq!(conn.ambient_transaction_count(), 2);

        let err = conn.open(None).await.unwrap_err();
        assert!(matches!(err, Error::AmbientTransactionMismatch));
        assert!(err.is_state_error());
        assert_eq!(conn.opened_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);

        assert!(conn.handle_ambient_completion(&outer).is_err());
        conn.handle_ambient_completion(&inner).unwrap();
        assert_eq!(conn.ambient_transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_completed_transaction_is_not_enlisted() {
        let driver = FakeDriver::builder().build();
        let context = AmbientContext::new();
        let mut conn = connection(&driver).with_ambient_context(context.clone());
        let ambient = AmbientTransaction::new(IsolationLevel::ReadCommitted);
        ambient.complete(TransactionOutcome::Aborted);

        let _scope = context.enter(Arc::clone(&ambient));
        conn.open(None).await.unwrap();

        assert_eq!(conn.ambient_transaction_count(), 0);
        assert_eq!(ambient.subscriber_count(), 0);
        assert_eq!(driver.count(|e| matches!(e, DriverEvent::Enlist(_))), 0);
    }

    #[tokio::test]
    async fn test_provider_without_ambient_support() {
        let driver = FakeDriver::builder().without_ambient_support().build();
        let context = AmbientContext::new();
        let mut conn = connection(&driver).with_ambient_context(context.clone());
        let ambient = AmbientTransaction::new(IsolationLevel::ReadCommitted);

        let _scope = context.enter(ambient);
        conn.open(None).await.unwrap();

        assert_eq!(conn.ambient_transaction_count(), 0);
        assert_eq!(driver.count(|e| matches!(e, DriverEvent::Enlist(_))), 0);
    }

    #[tokio::test]
    async fn test_explicit_enlistment_conflicts_with_transactions() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);
        let ambient = AmbientTransaction::new(IsolationLevel::ReadCommitted);

        conn.open(None).await.unwrap();
        conn.enlist_transaction(Some(Arc::clone(&ambient))).unwrap();
        conn.enlist_transaction(Some(Arc::clone(&ambient))).unwrap();
        assert_eq!(count(&driver, &DriverEvent::Enlist(Some(ambient.id()))), 1);

        let err = conn
            .start_transaction(IsolationLevel::ReadCommitted, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingEnlistedTransaction));
        assert_eq!(conn.opened_count(), 1);

        conn.enlist_transaction(None).unwrap();
        assert!(conn.enlisted_transaction().is_none());
        assert_eq!(count(&driver, &DriverEvent::Enlist(None)), 1);
        conn.start_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();

        assert!(matches!(
            conn.enlist_transaction(Some(ambient)),
            Err(Error::TransactionAlreadyStarted)
        ));
    }
}
