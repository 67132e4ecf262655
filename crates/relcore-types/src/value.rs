//! SQL value representation.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::model_type::{EnumType, ModelType};

/// A value flowing between the model and a native driver.
///
/// The same representation is used for model values (before conversion) and
/// provider values (after conversion); only [`SqlValue::Enum`] is model-only.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    /// NULL value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// 8-bit unsigned integer.
    TinyInt(u8),
    /// 16-bit signed integer.
    SmallInt(i16),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 32-bit floating point.
    Float(f32),
    /// 64-bit floating point.
    Double(f64),
    /// Decimal value.
    Decimal(Decimal),
    /// Single character.
    Char(char),
    /// String value.
    String(String),
    /// Binary value.
    Binary(Bytes),
    /// UUID value.
    Uuid(Uuid),
    /// Date value.
    Date(NaiveDate),
    /// Time-of-day value.
    Time(NaiveTime),
    /// Date and time without offset.
    DateTime(NaiveDateTime),
    /// Date and time with offset.
    DateTimeOffset(DateTime<FixedOffset>),
    /// Enum member value (model side only).
    Enum(EnumValue),
}

/// A value of an integer-backed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    enum_type: Arc<EnumType>,
    value: i64,
}

impl EnumValue {
    /// Create an enum value. Values outside the declared members are allowed.
    #[must_use]
    pub fn new(enum_type: Arc<EnumType>, value: i64) -> Self {
        Self { enum_type, value }
    }

    /// The enum definition.
    #[must_use]
    pub fn enum_type(&self) -> &Arc<EnumType> {
        &self.enum_type
    }

    /// Numeric value.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.value
    }

    /// Member name, or the number when the value is not a declared member.
    #[must_use]
    pub fn name(&self) -> String {
        self.enum_type
            .member_name(self.value)
            .map_or_else(|| self.value.to_string(), str::to_string)
    }
}

impl SqlValue {
    /// Check if the value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the value as a bool, if it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as an i64 if it is any integer or an enum value.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::BigInt(v) => Some(*v),
            Self::Int(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::TinyInt(v) => Some(i64::from(*v)),
            Self::Enum(v) => Some(v.value),
            _ => None,
        }
    }

    /// Get the value as an f64, if it is one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Float(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    /// Get the value as a string slice, if it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Get the value as bytes, if it is binary.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Check whether the value is a plain integer (not an enum).
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::TinyInt(_) | Self::SmallInt(_) | Self::Int(_) | Self::BigInt(_)
        )
    }

    /// Length used for parameter sizing: characters for text, bytes for binary.
    #[must_use]
    pub fn length(&self) -> Option<usize> {
        match self {
            Self::String(s) => Some(s.chars().count()),
            Self::Binary(b) => Some(b.len()),
            _ => None,
        }
    }

    /// The model type this value naturally belongs to.
    ///
    /// Returns `None` for NULL.
    #[must_use]
    pub fn model_type(&self) -> Option<ModelType> {
        let t = match self {
            Self::Null => return None,
            Self::Bool(_) => ModelType::Bool,
            Self::TinyInt(_) => ModelType::U8,
            Self::SmallInt(_) => ModelType::I16,
            Self::Int(_) => ModelType::I32,
            Self::BigInt(_) => ModelType::I64,
            Self::Float(_) => ModelType::F32,
            Self::Double(_) => ModelType::F64,
            Self::Decimal(_) => ModelType::Decimal,
            Self::Char(_) => ModelType::Char,
            Self::String(_) => ModelType::String,
            Self::Binary(_) => ModelType::Bytes,
            Self::Uuid(_) => ModelType::Uuid,
            Self::Date(_) => ModelType::Date,
            Self::Time(_) => ModelType::Time,
            Self::DateTime(_) => ModelType::DateTime,
            Self::DateTimeOffset(_) => ModelType::DateTimeOffset,
            Self::Enum(e) => ModelType::Enum(Arc::clone(&e.enum_type)),
        };
        Some(t)
    }

    /// Culture-independent text form, parseable by [`ModelType::parse_invariant`].
    ///
    /// Returns `None` for NULL and binary values.
    #[must_use]
    pub fn to_invariant_string(&self) -> Option<String> {
        let s = match self {
            Self::Null | Self::Binary(_) => return None,
            Self::Bool(v) => v.to_string(),
            Self::TinyInt(v) => v.to_string(),
            Self::SmallInt(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::BigInt(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Double(v) => v.to_string(),
            Self::Decimal(v) => v.to_string(),
            Self::Char(v) => v.to_string(),
            Self::String(v) => v.clone(),
            Self::Uuid(v) => v.hyphenated().to_string(),
            Self::Date(v) => v.format("%Y-%m-%d").to_string(),
            Self::Time(v) => v.format("%H:%M:%S%.f").to_string(),
            Self::DateTime(v) => v.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
            Self::DateTimeOffset(v) => v.to_rfc3339_opts(SecondsFormat::AutoSi, false),
            Self::Enum(v) => v.name(),
        };
        Some(s)
    }

    /// Get the type name as a string.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::TinyInt(_) => "u8",
            Self::SmallInt(_) => "i16",
            Self::Int(_) => "i32",
            Self::BigInt(_) => "i64",
            Self::Float(_) => "f32",
            Self::Double(_) => "f64",
            Self::Decimal(_) => "decimal",
            Self::Char(_) => "char",
            Self::String(_) => "string",
            Self::Binary(_) => "bytes",
            Self::Uuid(_) => "uuid",
            Self::Date(_) => "date",
            Self::Time(_) => "time",
            Self::DateTime(_) => "datetime",
            Self::DateTimeOffset(_) => "datetimeoffset",
            Self::Enum(_) => "enum",
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u8> for SqlValue {
    fn from(v: u8) -> Self {
        Self::TinyInt(v)
    }
}

impl From<i16> for SqlValue {
    fn from(v: i16) -> Self {
        Self::SmallInt(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::BigInt(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<char> for SqlValue {
    fn from(v: char) -> Self {
        Self::Char(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(v))
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(v))
    }
}

impl From<Bytes> for SqlValue {
    fn from(v: Bytes) -> Self {
        Self::Binary(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        Self::Uuid(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveTime> for SqlValue {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<DateTime<FixedOffset>> for SqlValue {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Self::DateTimeOffset(v)
    }
}

impl From<EnumValue> for SqlValue {
    fn from(v: EnumValue) -> Self {
        Self::Enum(v)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}
