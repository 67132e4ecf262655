//! Client error types.

use relcore_types::TypeError;
use thiserror::Error;

use crate::native::DriverError;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Error reported by the native driver, carried unchanged.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Type conversion or mapping lookup error.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// A parameter value could not be converted by its mapping. Only raised
    /// with detailed errors enabled; otherwise the bare [`Error::Type`] is
    /// returned.
    #[error("failed to convert value {value} for parameter '{name}' mapped to '{store_type}': {source}")]
    ParameterConversion {
        /// Parameter name as it appears in command text.
        name: String,
        /// Store type of the mapping.
        store_type: String,
        /// Debug rendering of the model value.
        value: String,
        /// Underlying conversion failure.
        #[source]
        source: TypeError,
    },

    /// A type-mapped parameter had no value in the value lookup.
    #[error("no value was provided for the required parameter '{name}'")]
    MissingParameterValue {
        /// Invariant name of the parameter.
        name: String,
    },

    /// The value supplied for a composite parameter was not a value list.
    #[error("the value provided for composite parameter '{name}' must be a list of values")]
    InvalidCompositeValue {
        /// Invariant name of the parameter.
        name: String,
    },

    /// The value supplied for a parameter has the wrong shape.
    #[error("the value provided for parameter '{name}' cannot be bound to it")]
    InvalidParameterValue {
        /// Invariant name of the parameter.
        name: String,
    },

    /// No mapping could be found for the runtime value of a dynamic parameter.
    #[error("no mapping to a relational type can be found for a value of type '{type_name}'")]
    UnsupportedValueType {
        /// Name of the value's type.
        type_name: String,
    },

    /// A transaction is already current on the connection.
    #[error("the connection is already in a transaction and cannot participate in another transaction")]
    TransactionAlreadyStarted,

    /// An ambient transaction is active.
    #[error("an ambient transaction has been detected; the ambient transaction needs to be completed first")]
    ConflictingAmbientTransaction,

    /// The connection is enlisted in a transaction.
    #[error("the connection is currently enlisted in a transaction; the enlisted transaction needs to be completed first")]
    ConflictingEnlistedTransaction,

    /// The connection string or native connection cannot change while open.
    #[error("the connection string or native connection cannot be changed while the connection is open")]
    CannotChangeWhileOpen,

    /// No transaction is current.
    #[error("no transaction is in use on the connection")]
    NoActiveTransaction,

    /// The ambient transaction was completed but the connection still tracks it.
    #[error("the connection was not closed before the ambient transaction completed")]
    PendingAmbientTransaction,

    /// An ambient completion arrived for a transaction other than the innermost one.
    #[error("the completed ambient transaction does not match the innermost tracked transaction")]
    AmbientTransactionMismatch,

    /// The provider does not support savepoints.
    #[error("the provider does not support savepoints")]
    SavepointsNotSupported,

    /// Neither a native connection nor a factory was configured.
    #[error("no native connection or connection factory has been configured")]
    NoConnection,

    /// A column ordinal was outside the reader's field count.
    #[error("column ordinal {ordinal} is out of range for a reader with {field_count} fields")]
    ColumnOutOfRange {
        /// Requested ordinal.
        ordinal: usize,
        /// Number of fields in the reader.
        field_count: usize,
    },

    /// A value was requested before the first `read` or after the last row.
    #[error("the reader is not positioned on a row")]
    NoCurrentRow,

    /// Invalid identifier (potential SQL injection attempt).
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    ///
    /// Only driver errors can be transient; a driver error is transient
    /// when it wraps a timed-out, interrupted or reset I/O error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Driver(e) => e.downcast_ref::<std::io::Error>().is_some_and(|io| {
                matches!(
                    io.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                )
            }),
            _ => false,
        }
    }

    /// Check if this error is a connection or transaction state conflict.
    #[must_use]
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::TransactionAlreadyStarted
                | Self::ConflictingAmbientTransaction
                | Self::ConflictingEnlistedTransaction
                | Self::CannotChangeWhileOpen
                | Self::NoActiveTransaction
                | Self::PendingAmbientTransaction
                | Self::AmbientTransactionMismatch
        )
    }

    /// Wrap a driver error.
    pub fn driver<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Driver(Box::new(error))
    }

    /// The driver error, if this is one.
    #[must_use]
    pub fn as_driver_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Driver(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// Downcast the wrapped driver error to a concrete type.
    #[must_use]
    pub fn downcast_driver<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Driver(e) => e.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_is_transparent() {
        let err = Error::driver(std::io::Error::other("socket gone"));
        assert_eq!(err.to_string(), "socket gone");
        assert!(err.downcast_driver::<std::io::Error>().is_some());
        assert!(err.as_driver_error().is_some());
    }

    #[test]
    fn test_is_transient() {
        let timeout = Error::driver(std::io::Error::new(std::io::ErrorKind::TimedOut, "t"));
        assert!(timeout.is_transient());
        let denied = Error::driver(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "d"));
        assert!(!denied.is_transient());
        assert!(!Error::TransactionAlreadyStarted.is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn test_state_errors() {
        assert!(Error::NoActiveTransaction.is_state_error());
        assert!(Error::AmbientTransactionMismatch.is_state_error());
        assert!(!Error::Cancelled.is_state_error());
        assert!(
            !Error::MissingParameterValue {
                name: "p".into()
            }
            .is_state_error()
        );
    }

    #[test]
    fn test_type_error_conversion() {
        let err: Error = TypeError::UnexpectedNull.into();
        assert!(matches!(err, Error::Type(TypeError::UnexpectedNull)));
    }

    #[test]
    fn test_parameter_conversion_message() {
        let err = Error::ParameterConversion {
            name: "@p0".into(),
            store_type: "tinyint".into(),
            value: "Int(300)".into(),
            source: TypeError::OutOfRange {
                target_type: "u8",
            },
        };
        let message = err.to_string();
        assert!(message.contains("Int(300)"));
        assert!(message.contains("@p0"));
        assert!(message.contains("tinyint"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
