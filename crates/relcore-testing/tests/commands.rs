//! Command execution tests against the fake driver.
//!
//! Run with:
//! ```bash
//! cargo test -p relcore-testing --test commands
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use relcore_client::{
    CancellationToken, Command, CommandArgs, CommandBuilder, CommandParameter, ConnectionState, Error,
    IsolationLevel, ParameterValue, ParameterValues, ReaderColumn, RelationalConnection, RelationalOptions,
};
use relcore_testing::{DriverEvent, FakeDriver, FakeDriverError, FakeResponse, RecordingInterceptor, ScriptedInterceptor};
use relcore_types::{ModelType, SqlServerTypeMappingSource, SqlValue, TypeError, TypeMapping};

fn connection(driver: &FakeDriver) -> RelationalConnection {
    RelationalConnection::new(RelationalOptions::new(), driver.factory())
}

fn int_mapping() -> TypeMapping {
    SqlServerTypeMappingSource::sql_server()
        .find_mapping_for_type(&ModelType::I32)
        .unwrap()
}

fn users_driver() -> FakeDriver {
    FakeDriver::builder()
        .with_response(
            "SELECT Id, Name FROM users",
            FakeResponse::rows(
                &["Id", "Name"],
                vec![
                    vec![SqlValue::Int(1), SqlValue::from("Alice")],
                    vec![SqlValue::Int(2), SqlValue::Null],
                ],
            ),
        )
        .build()
}

// =============================================================================
// Execution Modes
// =============================================================================

mod execution {
    use super::*;

    #[tokio::test]
    async fn test_non_query_opens_and_closes_around_execution() {
        let driver = FakeDriver::builder()
            .with_response("DELETE FROM users", FakeResponse::RowsAffected(3))
            .build();
        let mut conn = connection(&driver);

        let rows = Command::new("DELETE FROM users", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap();

        assert_eq!(rows, 3);
        assert_eq!(conn.opened_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);

        let events = driver.events();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], DriverEvent::Open);
        assert!(matches!(&events[1], DriverEvent::Execute { method: "non_query", in_transaction: false, .. }));
        assert_eq!(
            events[2..],
            [DriverEvent::ParametersCleared, DriverEvent::CommandDisposed, DriverEvent::Close]
        );
    }

    #[tokio::test]
    async fn test_scalar() {
        let driver = FakeDriver::builder()
            .with_response("SELECT COUNT(*) FROM users", FakeResponse::scalar(42))
            .build();
        let mut conn = connection(&driver);

        let value = Command::new("SELECT COUNT(*) FROM users", Vec::new())
            .execute_scalar(&mut conn, CommandArgs::new())
            .await
            .unwrap();

        assert_eq!(value, SqlValue::Int(42));
    }

    #[tokio::test]
    async fn test_open_connection_is_left_open() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);
        conn.open(None).await.unwrap();

        Command::new("UPDATE t SET a = 1", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap();

        assert_eq!(conn.opened_count(), 1);
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_driver_error_is_passed_through() {
        let driver = FakeDriver::builder()
            .with_response("BAD", FakeResponse::error("syntax error"))
            .build();
        let recorder = RecordingInterceptor::new();
        let mut conn = connection(&driver).with_interceptors(recorder.registered());

        let err = Command::new("BAD", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_driver::<FakeDriverError>(),
            Some(FakeDriverError::Scripted(m)) if m == "syntax error"
        ));
        assert!(!err.is_transient());
        assert!(recorder.fired("command_failed"));
        assert_eq!(conn.opened_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_command_runs_inside_current_transaction() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);
        let command = Command::new("UPDATE t SET a = 1", Vec::new());

        conn.start_transaction(IsolationLevel::ReadCommitted, None).await.unwrap();
        command.execute_non_query(&mut conn, CommandArgs::new()).await.unwrap();

        assert!(matches!(
            driver.last_execute(),
            Some(DriverEvent::Execute { in_transaction: true, .. })
        ));
        conn.rollback_transaction(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_builder_redacts_log_text_only() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);

        let mut builder = CommandBuilder::new(false);
        builder
            .append("UPDATE users SET name = ")
            .append_redacted("N'secret'", true);
        let command = builder.build();
        assert_eq!(command.log_text(), "UPDATE users SET name = ?");

        command.execute_non_query(&mut conn, CommandArgs::new()).await.unwrap();
        assert_eq!(driver.executed(), vec!["UPDATE users SET name = N'secret'"]);
    }
}

// =============================================================================
// Parameters
// =============================================================================

mod parameters {
    use super::*;

    #[tokio::test]
    async fn test_values_are_bound_in_declaration_order() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);

        let mut builder = CommandBuilder::new(false);
        builder
            .append("UPDATE t SET a = @a WHERE id IN (@i0, @i1, @i2) AND b = @b")
            .add_parameter(CommandParameter::type_mapped("a", "@a", int_mapping(), Some(false)))
            .add_parameter(CommandParameter::composite(
                "ids",
                vec![
                    CommandParameter::type_mapped("i0", "@i0", int_mapping(), None),
                    CommandParameter::type_mapped("i1", "@i1", int_mapping(), None),
                    CommandParameter::type_mapped("i2", "@i2", int_mapping(), None),
                ],
            ))
            .add_parameter(CommandParameter::type_mapped("b", "@b", int_mapping(), None));
        let command = builder.build();

        let values = ParameterValues::new()
            .with("a", 7)
            .with_list(
                "ids",
                vec![ParameterValue::value(10), ParameterValue::value(20), ParameterValue::value(30)],
            )
            .with("b", 8);
        command
            .execute_non_query(&mut conn, CommandArgs::new().values(&values))
            .await
            .unwrap();

        let Some(DriverEvent::Execute { parameters, .. }) = driver.last_execute() else {
            panic!("expected an execute event");
        };
        let bound: Vec<_> = parameters.iter().map(|p| (p.name.as_str(), p.value.clone())).collect();
        assert_eq!(
            bound,
            vec![
                ("@a", SqlValue::Int(7)),
                ("@i0", SqlValue::Int(10)),
                ("@i1", SqlValue::Int(20)),
                ("@i2", SqlValue::Int(30)),
                ("@b", SqlValue::Int(8)),
            ]
        );
        assert!(!parameters[0].is_nullable);
    }

    #[tokio::test]
    async fn test_failed_execution_clears_parameters_before_release() {
        let driver = FakeDriver::builder()
            .with_response("UPDATE t SET a = @a", FakeResponse::error("deadlock"))
            .build();
        let mut conn = connection(&driver);
        let command = Command::new(
            "UPDATE t SET a = @a",
            vec![CommandParameter::type_mapped("a", "@a", int_mapping(), None)],
        );
        let values = ParameterValues::new().with("a", 1);

        command
            .execute_non_query(&mut conn, CommandArgs::new().values(&values))
            .await
            .unwrap_err();

        let events = driver.events();
        assert!(matches!(
            &events[1],
            DriverEvent::Execute { parameters, .. } if parameters.len() == 1
        ));
        assert_eq!(
            events[2..],
            [DriverEvent::ParametersCleared, DriverEvent::CommandDisposed, DriverEvent::Close]
        );
        assert_eq!(driver.count(|e| *e == DriverEvent::Close), 1);
        assert_eq!(conn.opened_count(), 0);
    }

    #[tokio::test]
    async fn test_conversion_errors_name_the_parameter_when_detailed() {
        let driver = FakeDriver::builder().build();
        let tinyint = SqlServerTypeMappingSource::sql_server()
            .find_mapping_for_type(&ModelType::U8)
            .unwrap();
        let command = Command::new(
            "UPDATE t SET flags = @flags",
            vec![CommandParameter::type_mapped("flags", "@flags", tinyint, None)],
        );
        let values = ParameterValues::new().with("flags", 300);

        let mut plain = connection(&driver);
        let err = command
            .execute_non_query(&mut plain, CommandArgs::new().values(&values))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Type(TypeError::OutOfRange { .. })));

        let mut detailed = RelationalConnection::new(RelationalOptions::new().detailed_errors(true), driver.factory());
        let err = command
            .execute_non_query(&mut detailed, CommandArgs::new().values(&values))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::ParameterConversion { .. }));
        assert!(message.contains("@flags"));
        assert!(message.contains("tinyint"));
        assert!(message.contains("300"));
        assert!(driver.executed().is_empty());
    }

    #[tokio::test]
    async fn test_missing_value_fails_before_opening() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);
        let command = Command::new(
            "UPDATE t SET a = @a",
            vec![CommandParameter::type_mapped("a", "@a", int_mapping(), None)],
        );

        let err = command
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingParameterValue { ref name } if name == "a"));
        assert_eq!(
            driver.events(),
            vec![DriverEvent::ParametersCleared, DriverEvent::CommandDisposed]
        );
        assert_eq!(conn.opened_count(), 0);
    }
}

// =============================================================================
// Interception
// =============================================================================

mod interception {
    use super::*;

    #[tokio::test]
    async fn test_hooks_fire_in_execution_order() {
        let driver = FakeDriver::builder().build();
        let recorder = RecordingInterceptor::new();
        let mut conn = connection(&driver).with_interceptors(recorder.registered());

        Command::new("UPDATE t SET a = 1", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap();

        assert_eq!(
            recorder.hooks(),
            vec![
                "command_creating",
                "command_created",
                "connection_opening",
                "connection_opened",
                "non_query_executing",
                "non_query_executed",
                "connection_closing",
                "connection_closed",
            ]
        );
    }

    #[tokio::test]
    async fn test_suppressed_non_query_skips_the_driver() {
        let driver = FakeDriver::builder().build();
        let command = Command::new("UPDATE t SET a = 1", Vec::new());

        let mut conn = connection(&driver).with_interceptors(ScriptedInterceptor::new().non_query_result(5).registered());
        assert_eq!(command.execute_non_query(&mut conn, CommandArgs::new()).await.unwrap(), 5);

        let mut conn = connection(&driver).with_interceptors(ScriptedInterceptor::new().suppress_non_query().registered());
        assert_eq!(command.execute_non_query(&mut conn, CommandArgs::new()).await.unwrap(), -1);

        assert!(driver.executed().is_empty());
    }

    #[tokio::test]
    async fn test_suppressed_scalar() {
        let driver = FakeDriver::builder().build();
        let command = Command::new("SELECT 1", Vec::new());

        let mut conn = connection(&driver).with_interceptors(ScriptedInterceptor::new().scalar_result("cached").registered());
        assert_eq!(
            command.execute_scalar(&mut conn, CommandArgs::new()).await.unwrap(),
            SqlValue::from("cached")
        );

        let mut conn = connection(&driver).with_interceptors(ScriptedInterceptor::new().suppress_scalar().registered());
        assert_eq!(
            command.execute_scalar(&mut conn, CommandArgs::new()).await.unwrap(),
            SqlValue::Null
        );
        assert!(driver.executed().is_empty());
    }

    #[tokio::test]
    async fn test_executed_hook_replaces_result() {
        let driver = FakeDriver::builder()
            .with_default_response(FakeResponse::RowsAffected(1))
            .build();
        let mut conn = connection(&driver).with_interceptors(ScriptedInterceptor::new().override_rows(9).registered());

        let rows = Command::new("UPDATE t SET a = 1", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap();

        assert_eq!(rows, 9);
        assert_eq!(driver.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_interceptor_never_fires() {
        let driver = FakeDriver::builder()
            .with_default_response(FakeResponse::RowsAffected(1))
            .build();
        let interceptor = ScriptedInterceptor::new().non_query_result(5).disabled();
        let mut conn = connection(&driver).with_interceptors(interceptor.registered());

        let rows = Command::new("UPDATE t SET a = 1", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new())
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }
}

// =============================================================================
// Readers
// =============================================================================

mod readers {
    use super::*;

    #[tokio::test]
    async fn test_live_reader_holds_connection_until_closed() {
        let driver = users_driver();
        let mut conn = connection(&driver);
        let command = Command::new("SELECT Id, Name FROM users", Vec::new());

        let mut reader = command.execute_reader(&mut conn, CommandArgs::new()).await.unwrap();
        assert!(!reader.is_buffered());
        assert_eq!(reader.field_count(), 2);
        assert_eq!(reader.column_name(1), Some("Name"));

        assert!(reader.read().await.unwrap());
        assert_eq!(reader.get::<i32>(0).unwrap(), 1);
        assert_eq!(reader.get::<String>(1).unwrap(), "Alice");
        assert!(reader.read().await.unwrap());
        assert!(reader.is_null(1).unwrap());
        assert!(!reader.read().await.unwrap());
        assert_eq!(reader.read_count(), 2);

        assert_eq!(driver.count(|e| matches!(e, DriverEvent::Close)), 0);
        reader.close().await.unwrap();

        assert_eq!(conn.opened_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);
        let events = driver.events();
        let tail = &events[events.len() - 4..];
        assert_eq!(
            tail,
            [
                DriverEvent::ReaderClosed,
                DriverEvent::ParametersCleared,
                DriverEvent::CommandDisposed,
                DriverEvent::Close,
            ]
        );
    }

    #[tokio::test]
    async fn test_buffered_reader_releases_connection_immediately() {
        let driver = users_driver();
        let mut conn = connection(&driver);
        let command = Command::new("SELECT Id, Name FROM users", Vec::new());
        let columns = [
            ReaderColumn::new(ModelType::I32, false),
            ReaderColumn::new(ModelType::String, true),
        ];

        let mut reader = command
            .execute_reader(&mut conn, CommandArgs::new().columns(&columns))
            .await
            .unwrap();

        assert!(reader.is_buffered());
        assert_eq!(reader.row_count(), Some(2));
        assert_eq!(driver.count(|e| matches!(e, DriverEvent::Close)), 1);

        assert!(reader.read().await.unwrap());
        assert_eq!(reader.get::<i32>(0).unwrap(), 1);
        assert!(reader.read().await.unwrap());
        assert!(!reader.read().await.unwrap());
        reader.close().await.unwrap();
        assert_eq!(conn.opened_count(), 0);
    }

    #[tokio::test]
    async fn test_null_in_required_column_fails_buffering() {
        let driver = users_driver();
        let mut conn = connection(&driver);
        let command = Command::new("SELECT Id, Name FROM users", Vec::new());
        let columns = [
            ReaderColumn::new(ModelType::I32, false),
            ReaderColumn::new(ModelType::String, false),
        ];

        let err = command
            .execute_reader(&mut conn, CommandArgs::new().columns(&columns))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Type(TypeError::UnexpectedNull)));
        assert_eq!(conn.opened_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_into_buffered_detaches_rows() {
        let driver = users_driver();
        let mut conn = connection(&driver);
        let command = Command::new("SELECT Id, Name FROM users", Vec::new());
        let columns = [
            ReaderColumn::new(ModelType::I32, false).named("UserId"),
            ReaderColumn::new(ModelType::String, true),
        ];

        let reader = command.execute_reader(&mut conn, CommandArgs::new()).await.unwrap();
        let mut buffered = reader.into_buffered(&columns).await.unwrap();

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(buffered.ordinal("userid"), Some(0));
        assert_eq!(buffered.column_name(1), Some("Name"));
        assert!(buffered.read());
        assert_eq!(buffered.get::<String>(1).unwrap(), "Alice");
    }
}

// =============================================================================
// Cancellation
// =============================================================================

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_token_fails_before_any_work() {
        let driver = FakeDriver::builder().build();
        let mut conn = connection(&driver);
        let token = CancellationToken::new();
        token.cancel();

        let err = Command::new("UPDATE t SET a = 1", Vec::new())
            .execute_non_query(&mut conn, CommandArgs::new().cancellation(&token))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(driver.events().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_during_execution_releases_connection() {
        let driver = FakeDriver::builder().with_delay(Duration::from_secs(30)).build();
        let mut conn = connection(&driver);
        let token = CancellationToken::new();
        let command = Command::new("UPDATE t SET a = 1", Vec::new());

        let (result, ()) = tokio::join!(
            command.execute_non_query(&mut conn, CommandArgs::new().cancellation(&token)),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            }
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(driver.executed().is_empty());
        assert_eq!(conn.opened_count(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_execution_defers_close() {
        let driver = FakeDriver::builder().with_delay(Duration::from_secs(30)).build();
        let mut conn = connection(&driver);
        let command = Command::new("UPDATE t SET a = 1", Vec::new());

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            command.execute_non_query(&mut conn, CommandArgs::new()),
        )
        .await;

        assert!(timed_out.is_err());
        assert_eq!(conn.opened_count(), 0);
        assert!(conn.has_pending_close());
        assert_eq!(driver.count(|e| matches!(e, DriverEvent::CommandDisposed)), 1);

        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
