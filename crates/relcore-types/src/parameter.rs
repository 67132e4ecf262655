//! Native parameter primitives shared with drivers.

use crate::value::SqlValue;

/// Database type hint attached to a native parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DbType {
    /// Variable-length non-unicode text.
    AnsiString,
    /// Fixed-length non-unicode text.
    AnsiStringFixedLength,
    /// Variable-length binary.
    Binary,
    /// Boolean.
    Boolean,
    /// Unsigned 8-bit integer.
    Byte,
    /// Money.
    Currency,
    /// Date only.
    Date,
    /// Legacy date and time.
    DateTime,
    /// High-precision date and time.
    DateTime2,
    /// Date and time with offset.
    DateTimeOffset,
    /// Fixed-point decimal.
    Decimal,
    /// 64-bit float.
    Double,
    /// UUID.
    Guid,
    /// 16-bit integer.
    Int16,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Provider-specific or unknown.
    Object,
    /// 32-bit float.
    Single,
    /// Variable-length unicode text.
    String,
    /// Fixed-length unicode text.
    StringFixedLength,
    /// Time of day.
    Time,
    /// XML document.
    Xml,
}

/// Direction of a native parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterDirection {
    /// Sent to the server.
    #[default]
    Input,
    /// Returned by the server.
    Output,
    /// Sent and returned.
    InputOutput,
    /// Procedure return value.
    ReturnValue,
}

/// A native command parameter.
///
/// Drivers receive these fully configured; a NULL value is sent as
/// [`SqlValue::Null`].
#[derive(Debug, Clone, PartialEq)]
pub struct DbParameter {
    /// Parameter name as it appears in command text.
    pub name: String,
    /// Provider value.
    pub value: SqlValue,
    /// Parameter direction.
    pub direction: ParameterDirection,
    /// Database type hint.
    pub db_type: Option<DbType>,
    /// Whether NULL is an acceptable value.
    pub is_nullable: bool,
    /// Size in characters or bytes; `-1` means unbounded.
    pub size: Option<i32>,
    /// Numeric precision.
    pub precision: Option<u32>,
    /// Numeric scale.
    pub scale: Option<u32>,
}

impl DbParameter {
    /// Create an input parameter with no type hints.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            is_nullable: value.is_null(),
            value,
            direction: ParameterDirection::Input,
            db_type: None,
            size: None,
            precision: None,
            scale: None,
        }
    }

    /// Set the database type hint.
    #[must_use]
    pub fn with_db_type(mut self, db_type: DbType) -> Self {
        self.db_type = Some(db_type);
        self
    }

    /// Set the direction.
    #[must_use]
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Set the size.
    #[must_use]
    pub fn with_size(mut self, size: i32) -> Self {
        self.size = Some(size);
        self
    }
}
