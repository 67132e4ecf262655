//! # relcore-client
//!
//! Command execution, connection lifecycle and transactions over a native
//! database driver.
//!
//! The native driver is abstracted by the traits in [`native`]; this crate
//! supplies everything above it:
//!
//! - **Commands**: [`CommandBuilder`] accumulates text and logical
//!   parameters into an immutable [`Command`], executed as a non-query, a
//!   scalar or a reader
//! - **Parameters**: type-mapped, raw, composite and dynamic
//!   [`CommandParameter`]s bound against [`ParameterValues`]
//! - **Connections**: [`RelationalConnection`] with reference-counted opens
//!   and guaranteed cleanup
//! - **Transactions**: explicit transactions with savepoints, adopted
//!   external transactions and ambient transactions
//! - **Interception**: hooks around commands, connections and transactions
//! - **Retries**: an opt-in [`RetryingExecutionStrategy`]
//!
//! ## Connection Lifecycle
//!
//! ```text
//! Closed -> Open (open(): count 0 -> 1, physical open)
//! Open -> Open (open()/close(): count n -> n +/- 1)
//! Open -> Closed (close(): count 1 -> 0, physical close if opened internally)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use relcore_client::{CommandArgs, CommandBuilder, CommandParameter, ParameterValues,
//!     RelationalConnection, RelationalOptions, IsolationLevel};
//! use relcore_types::{ModelType, SqlServerTypeMappingSource};
//!
//! let options = RelationalOptions::from_connection_string("Server=db;Command Timeout=30")?;
//! let mut connection = RelationalConnection::new(options, factory);
//!
//! let source = SqlServerTypeMappingSource::sql_server();
//! let mapping = source.find_mapping_for_type(&ModelType::String).unwrap();
//!
//! let mut builder = CommandBuilder::new(false);
//! builder
//!     .append("UPDATE users SET name = @name")
//!     .add_parameter(CommandParameter::type_mapped("name", "@name", mapping, Some(false)));
//! let command = builder.build();
//!
//! let values = ParameterValues::new().with("name", "Alice");
//! let mut tx = connection.begin_transaction(IsolationLevel::ReadCommitted, None).await?;
//! command.execute_non_query(&mut tx, CommandArgs::new().values(&values)).await?;
//! tx.commit(None).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod ambient;
pub mod blocking;
pub mod builder;
pub mod cancel;
pub mod command;
pub mod config;
pub mod connection;
pub mod creator;
pub mod diagnostics;
pub mod error;
pub mod execution_strategy;
pub mod interception;
pub mod native;
pub mod parameter;
pub mod reader;
pub mod transaction;

// Re-export commonly used types
pub use ambient::{AmbientContext, AmbientScope, AmbientTransaction, SubscriptionId, TransactionOutcome};
pub use builder::{CommandBuilder, IndentGuard, IndentedStringBuilder};
pub use cancel::CancellationToken;
pub use command::{AUTO_SAVEPOINT_NAME, Command, CommandArgs};
pub use config::{RelationalOptions, RetryPolicy};
pub use connection::RelationalConnection;
pub use creator::{DatabaseCreator, MigrationCommand, MigrationCommandExecutor, MigrationCommandProducer};
pub use diagnostics::SanitizationConfig;
pub use error::{Error, Result};
pub use execution_strategy::RetryingExecutionStrategy;
pub use interception::{
    CommandEventData, CommandInterceptor, ConnectionEventData, ConnectionInterceptor, ExecuteMethod,
    InterceptionResult, Interceptors, TransactionAction, TransactionEventData, TransactionInterceptor,
};
pub use native::{
    ConnectionState, DriverError, DriverResult, NativeCommand, NativeConnection, NativeConnectionFactory,
    NativeReader, NativeTransaction, SavepointDialect,
};
pub use parameter::{CommandParameter, ParameterValue, ParameterValues, ValueMappingSource, bind_parameters};
pub use reader::{BufferedDataReader, ReadFn, ReaderColumn, RelationalDataReader};
pub use relcore_types::{DbParameter, FromSql, SqlValue, ToSql};
pub use transaction::{IsolationLevel, RelationalTransaction, SavePoint, Transaction, validate_identifier};
