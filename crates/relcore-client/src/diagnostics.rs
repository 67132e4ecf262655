//! Diagnostics for connection, command and transaction operations.
//!
//! Every operation emits `tracing` events with structured fields. Command
//! text is logged through a [`SanitizationConfig`]: literal values are masked
//! unless sensitive-data logging is enabled.
//!
//! Driver calls run inside debug-level spans named by [`span_names`]:
//! - `relcore.open` / `relcore.close`: physical connection changes
//! - `relcore.execute`: command execution, tagged with its SQL verb
//! - `relcore.begin_transaction`, `relcore.commit`, `relcore.rollback`
//! - `relcore.savepoint`
//!
//! Elapsed time, rows affected and failures are recorded on the span under
//! the [`attributes`] names once the call returns.

use std::time::Duration;

use tracing::Span;
use tracing::field::{Empty, display};
use uuid::Uuid;

use crate::interception::{Interceptors, TransactionAction};

/// Span names for database operations.
pub mod span_names {
    /// Span name for a physical open.
    pub const OPEN: &str = "relcore.open";
    /// Span name for a physical close.
    pub const CLOSE: &str = "relcore.close";
    /// Span name for command execution.
    pub const EXECUTE: &str = "relcore.execute";
    /// Span name for beginning a transaction.
    pub const BEGIN_TRANSACTION: &str = "relcore.begin_transaction";
    /// Span name for committing a transaction.
    pub const COMMIT: &str = "relcore.commit";
    /// Span name for rolling back a transaction.
    pub const ROLLBACK: &str = "relcore.rollback";
    /// Span name for savepoint operations.
    pub const SAVEPOINT: &str = "relcore.savepoint";
}

/// Fields recorded on a span after its call returns.
pub mod attributes {
    /// Elapsed milliseconds.
    pub const ELAPSED_MS: &str = "elapsed_ms";
    /// Rows affected.
    pub const ROWS_AFFECTED: &str = "rows_affected";
    /// Failure message.
    pub const ERROR: &str = "error";
}

/// Span around a physical open or close.
pub(crate) fn connection_span(closing: bool, connection_id: Uuid) -> Span {
    if closing {
        tracing::debug_span!(span_names::CLOSE, connection_id = %connection_id, elapsed_ms = Empty, error = Empty)
    } else {
        tracing::debug_span!(span_names::OPEN, connection_id = %connection_id, elapsed_ms = Empty, error = Empty)
    }
}

/// Span around one command execution.
pub(crate) fn execute_span(command_id: Uuid, connection_id: Uuid, method: &'static str, operation: &'static str) -> Span {
    tracing::debug_span!(
        span_names::EXECUTE,
        command_id = %command_id,
        connection_id = %connection_id,
        method,
        operation,
        elapsed_ms = Empty,
        rows_affected = Empty,
        error = Empty
    )
}

/// Span around a transaction or savepoint operation.
pub(crate) fn transaction_span(action: TransactionAction, connection_id: Uuid, transaction_id: Uuid) -> Span {
    match action {
        TransactionAction::Start => tracing::debug_span!(
            span_names::BEGIN_TRANSACTION,
            connection_id = %connection_id,
            transaction_id = %transaction_id,
            elapsed_ms = Empty,
            error = Empty
        ),
        TransactionAction::Commit => tracing::debug_span!(
            span_names::COMMIT,
            connection_id = %connection_id,
            transaction_id = %transaction_id,
            elapsed_ms = Empty,
            error = Empty
        ),
        TransactionAction::Rollback => tracing::debug_span!(
            span_names::ROLLBACK,
            connection_id = %connection_id,
            transaction_id = %transaction_id,
            elapsed_ms = Empty,
            error = Empty
        ),
        _ => tracing::debug_span!(
            span_names::SAVEPOINT,
            connection_id = %connection_id,
            transaction_id = %transaction_id,
            elapsed_ms = Empty,
            error = Empty
        ),
    }
}

/// Record how a spanned call ended.
pub(crate) fn record_outcome<T, E: std::fmt::Display>(span: &Span, elapsed: Duration, outcome: &Result<T, E>) {
    span.record(attributes::ELAPSED_MS, elapsed.as_millis() as u64);
    if let Err(e) = outcome {
        span.record(attributes::ERROR, display(e));
    }
}

/// Record the rows-affected count of a non-query.
pub(crate) fn record_rows(span: &Span, rows: i64) {
    span.record(attributes::ROWS_AFFECTED, rows);
}

/// Configuration for SQL statement sanitization.
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Whether to sanitize SQL statements.
    pub enabled: bool,
    /// Maximum length of statement to record, in characters.
    pub max_length: usize,
    /// Placeholder to use for sanitized values.
    pub placeholder: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_length: 2048,
            placeholder: "?".to_string(),
        }
    }
}

impl SanitizationConfig {
    /// Create a configuration that doesn't sanitize statements.
    #[must_use]
    pub fn no_sanitization() -> Self {
        Self {
            enabled: false,
            max_length: usize::MAX,
            placeholder: String::new(),
        }
    }

    /// The configuration matching a sensitive-data logging flag.
    #[must_use]
    pub fn for_sensitive_logging(sensitive_data_logging: bool) -> Self {
        if sensitive_data_logging {
            Self {
                enabled: false,
                ..Self::default()
            }
        } else {
            Self::default()
        }
    }

    /// Sanitize a SQL statement according to the configuration.
    #[must_use]
    pub fn sanitize(&self, sql: &str) -> String {
        if !self.enabled {
            return truncate_string(sql, self.max_length);
        }
        let sanitized = sanitize_sql(sql, &self.placeholder);
        truncate_string(&sanitized, self.max_length)
    }
}

/// Replace literal values with a placeholder.
///
/// Parameter names such as `@p0` are kept; digits only count as a literal
/// when they do not continue an identifier.
fn sanitize_sql(sql: &str, placeholder: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_string = false;
    let mut string_char = ' ';

    while let Some(c) = chars.next() {
        if in_string {
            if c == string_char {
                if chars.peek() == Some(&string_char) {
                    chars.next();
                    continue;
                }
                in_string = false;
                result.push_str(placeholder);
            }
            continue;
        }

        if c == '\'' {
            // N'...' literals lose their prefix too
            if result.ends_with('N')
                && !result[..result.len() - 1].ends_with(|ch: char| ch.is_alphanumeric() || ch == '_')
            {
                result.pop();
            }
            in_string = true;
            string_char = c;
            continue;
        }

        if c.is_ascii_digit() && !result.ends_with(|ch: char| ch.is_alphanumeric() || ch == '_' || ch == '@') {
            while chars.peek().is_some_and(|ch| ch.is_ascii_digit() || *ch == '.') {
                chars.next();
            }
            result.push_str(placeholder);
            continue;
        }

        result.push(c);
    }

    if in_string {
        result.push_str(placeholder);
    }

    result
}

/// Truncate to at most `max_len` characters, marking the cut with `...`.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Extract the operation type from a SQL statement.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    let sql_upper = sql.trim_start().to_uppercase();

    if sql_upper.starts_with("SELECT") {
        "SELECT"
    } else if sql_upper.starts_with("INSERT") {
        "INSERT"
    } else if sql_upper.starts_with("UPDATE") {
        "UPDATE"
    } else if sql_upper.starts_with("DELETE") {
        "DELETE"
    } else if sql_upper.starts_with("MERGE") {
        "MERGE"
    } else if sql_upper.starts_with("EXEC") {
        "EXECUTE"
    } else if sql_upper.starts_with("BEGIN TRAN") {
        "BEGIN"
    } else if sql_upper.starts_with("COMMIT") {
        "COMMIT"
    } else if sql_upper.starts_with("ROLLBACK") {
        "ROLLBACK"
    } else if sql_upper.starts_with("SAVE") || sql_upper.starts_with("RELEASE") {
        "SAVEPOINT"
    } else if sql_upper.starts_with("CREATE") {
        "CREATE"
    } else if sql_upper.starts_with("ALTER") {
        "ALTER"
    } else if sql_upper.starts_with("DROP") {
        "DROP"
    } else {
        "OTHER"
    }
}

/// Decides, once per operation, whether anything will observe it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Observation {
    pub(crate) log: bool,
    pub(crate) intercept: bool,
    pub(crate) id: Uuid,
}

impl Observation {
    /// Command-level observation: a correlation id is only generated when a
    /// debug event or an enabled command interceptor will see it.
    pub(crate) fn for_command(interceptors: &Interceptors) -> Self {
        let log = tracing::enabled!(tracing::Level::DEBUG);
        let intercept = interceptors.command_enabled();
        let id = if log || intercept { Uuid::new_v4() } else { Uuid::nil() };
        Self { log, intercept, id }
    }
}
