//! # relcore-testing
//!
//! Test infrastructure for relcore.
//!
//! This crate provides an in-memory native driver and interceptors that let
//! tests drive `relcore-client` end to end without a database server.
//!
//! ## Features
//!
//! - Scriptable fake driver with per-command responses
//! - Failure injection for opens, commits and individual commands
//! - Recorded driver events for asserting call sequences
//! - Recording and result-replacing interceptors
//! - Test database fixture for the database creator
//!
//! ## Example
//!
//! ```rust,ignore
//! use relcore_client::{Command, CommandArgs, RelationalConnection, RelationalOptions};
//! use relcore_testing::{DriverEvent, FakeDriver, FakeResponse};
//!
//! #[tokio::test]
//! async fn test_with_fake_driver() {
//!     let driver = FakeDriver::builder()
//!         .with_response("DELETE FROM users", FakeResponse::RowsAffected(2))
//!         .build();
//!     let mut connection = RelationalConnection::new(RelationalOptions::new(), driver.factory());
//!
//!     let rows = Command::new("DELETE FROM users", Vec::new())
//!         .execute_non_query(&mut connection, CommandArgs::new())
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(rows, 2);
//!     assert_eq!(driver.count(|e| matches!(e, DriverEvent::Close)), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fake_driver;
pub mod fixtures;
pub mod interceptors;

pub use fake_driver::{DriverEvent, FakeConnection, FakeDriver, FakeDriverBuilder, FakeDriverError, FakeReader, FakeResponse};
pub use fixtures::TestDatabase;
pub use interceptors::{RecordingInterceptor, ScriptedInterceptor};
