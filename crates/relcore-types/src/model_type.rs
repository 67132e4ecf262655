//! Model (host-side) value types.
//!
//! A [`ModelType`] names the in-memory type a property or parameter carries
//! before any value conversion. Type mappings pair one model type with one
//! store type.

use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::error::TypeError;
use crate::value::{EnumValue, SqlValue};

/// The in-memory type of a mapped value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelType {
    /// `bool`.
    Bool,
    /// `u8`.
    U8,
    /// `i16`.
    I16,
    /// `i32`.
    I32,
    /// `i64`.
    I64,
    /// `f32`.
    F32,
    /// `f64`.
    F64,
    /// `rust_decimal::Decimal`.
    Decimal,
    /// `char`.
    Char,
    /// `String`.
    String,
    /// Byte array.
    Bytes,
    /// `uuid::Uuid`.
    Uuid,
    /// `chrono::NaiveDate`.
    Date,
    /// `chrono::NaiveTime`.
    Time,
    /// `chrono::NaiveDateTime`.
    DateTime,
    /// `chrono::DateTime<FixedOffset>`.
    DateTimeOffset,
    /// A user enum backed by an integer.
    Enum(Arc<EnumType>),
    /// Optional wrapper around another type.
    Nullable(Box<ModelType>),
    /// A type known only by name, resolved through named mapping factories.
    Named(Arc<str>),
}

impl ModelType {
    /// Create a named type.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self::Named(Arc::from(name))
    }

    /// Wrap this type in a nullable wrapper (idempotent).
    #[must_use]
    pub fn nullable(self) -> Self {
        match self {
            Self::Nullable(_) => self,
            other => Self::Nullable(Box::new(other)),
        }
    }

    /// Strip a nullable wrapper, if present.
    #[must_use]
    pub fn unwrap_nullable(&self) -> &ModelType {
        match self {
            Self::Nullable(inner) => inner.unwrap_nullable(),
            other => other,
        }
    }

    /// Check whether this is a nullable wrapper.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        matches!(self, Self::Nullable(_))
    }

    /// Get the enum definition, looking through a nullable wrapper.
    #[must_use]
    pub fn as_enum(&self) -> Option<&Arc<EnumType>> {
        match self.unwrap_nullable() {
            Self::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Check whether this is one of the integer types.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(
            self.unwrap_nullable(),
            Self::U8 | Self::I16 | Self::I32 | Self::I64
        )
    }

    /// Full type name, used as the key of named mapping factories.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Bool => "bool".into(),
            Self::U8 => "u8".into(),
            Self::I16 => "i16".into(),
            Self::I32 => "i32".into(),
            Self::I64 => "i64".into(),
            Self::F32 => "f32".into(),
            Self::F64 => "f64".into(),
            Self::Decimal => "decimal".into(),
            Self::Char => "char".into(),
            Self::String => "string".into(),
            Self::Bytes => "bytes".into(),
            Self::Uuid => "uuid".into(),
            Self::Date => "date".into(),
            Self::Time => "time".into(),
            Self::DateTime => "datetime".into(),
            Self::DateTimeOffset => "datetimeoffset".into(),
            Self::Enum(e) => e.name().to_string(),
            Self::Nullable(inner) => format!("Option<{}>", inner.name()),
            Self::Named(name) => name.to_string(),
        }
    }

    /// Build an integer value of this type, checking range.
    ///
    /// Enums produce an [`SqlValue::Enum`] after checking the underlying range.
    pub fn integer_value(&self, value: i64) -> Result<SqlValue, TypeError> {
        match self.unwrap_nullable() {
            Self::U8 => u8::try_from(value)
                .map(SqlValue::TinyInt)
                .map_err(|_| TypeError::OutOfRange { target_type: "u8" }),
            Self::I16 => i16::try_from(value)
                .map(SqlValue::SmallInt)
                .map_err(|_| TypeError::OutOfRange { target_type: "i16" }),
            Self::I32 => i32::try_from(value)
                .map(SqlValue::Int)
                .map_err(|_| TypeError::OutOfRange { target_type: "i32" }),
            Self::I64 => Ok(SqlValue::BigInt(value)),
            Self::Enum(e) => {
                e.underlying().integer_value(value)?;
                Ok(SqlValue::Enum(EnumValue::new(Arc::clone(e), value)))
            }
            other => Err(TypeError::UnsupportedConversion {
                from: "integer".into(),
                to: other.name(),
            }),
        }
    }

    /// Parse invariant text produced by [`SqlValue::to_invariant_string`].
    pub fn parse_invariant(&self, text: &str) -> Result<SqlValue, TypeError> {
        let parse_err = || TypeError::Parse {
            text: text.to_string(),
            target: self.name(),
        };
        let value = match self.unwrap_nullable() {
            Self::Bool => match text {
                "1" => SqlValue::Bool(true),
                "0" => SqlValue::Bool(false),
                _ => SqlValue::Bool(text.parse().map_err(|_| parse_err())?),
            },
            Self::U8 | Self::I16 | Self::I32 | Self::I64 => {
                let v: i64 = text.trim().parse().map_err(|_| parse_err())?;
                self.integer_value(v)?
            }
            Self::F32 => SqlValue::Float(text.trim().parse().map_err(|_| parse_err())?),
            Self::F64 => SqlValue::Double(text.trim().parse().map_err(|_| parse_err())?),
            Self::Decimal => SqlValue::Decimal(
                text.trim().parse::<Decimal>().map_err(|_| parse_err())?,
            ),
            Self::Char => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => SqlValue::Char(c),
                    _ => return Err(parse_err()),
                }
            }
            Self::String => SqlValue::String(text.to_string()),
            Self::Uuid => SqlValue::Uuid(text.trim().parse().map_err(|_| parse_err())?),
            Self::Date => SqlValue::Date(text.trim().parse().map_err(|_| parse_err())?),
            Self::Time => SqlValue::Time(text.trim().parse().map_err(|_| parse_err())?),
            Self::DateTime => SqlValue::DateTime(text.trim().parse().map_err(|_| parse_err())?),
            Self::DateTimeOffset => SqlValue::DateTimeOffset(
                chrono::DateTime::parse_from_rfc3339(text.trim()).map_err(|_| parse_err())?,
            ),
            Self::Enum(e) => SqlValue::Enum(e.parse(text)?),
            Self::Bytes | Self::Named(_) | Self::Nullable(_) => return Err(parse_err()),
        };
        Ok(value)
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Definition of an integer-backed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumType {
    name: String,
    underlying: ModelType,
    members: Vec<(String, i64)>,
}

impl EnumType {
    /// Define an enum with the given underlying integer type and members.
    ///
    /// A non-integer underlying type falls back to `i32`.
    #[must_use]
    pub fn new<S, I>(name: impl Into<String>, underlying: ModelType, members: I) -> Arc<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, i64)>,
    {
        let underlying = if underlying.is_integer() {
            underlying.unwrap_nullable().clone()
        } else {
            ModelType::I32
        };
        Arc::new(Self {
            name: name.into(),
            underlying,
            members: members.into_iter().map(|(n, v)| (n.into(), v)).collect(),
        })
    }

    /// Enum type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The integer type the enum is stored as.
    #[must_use]
    pub fn underlying(&self) -> &ModelType {
        &self.underlying
    }

    /// Declared members in declaration order.
    #[must_use]
    pub fn members(&self) -> &[(String, i64)] {
        &self.members
    }

    /// Name of the member with the given value.
    #[must_use]
    pub fn member_name(&self, value: i64) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(n, _)| n.as_str())
    }

    /// Value of the member with the given name (case-insensitive fallback).
    #[must_use]
    pub fn member_value(&self, name: &str) -> Option<i64> {
        self.members
            .iter()
            .find(|(n, _)| n == name)
            .or_else(|| self.members.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)))
            .map(|(_, v)| *v)
    }

    /// Parse a member name or a number into a value of this enum.
    pub fn parse(self: &Arc<Self>, text: &str) -> Result<EnumValue, TypeError> {
        let text = text.trim();
        let value = match self.member_value(text) {
            Some(v) => v,
            None => text.parse::<i64>().map_err(|_| TypeError::InvalidEnumValue {
                enum_name: self.name.clone(),
                value: text.to_string(),
            })?,
        };
        Ok(EnumValue::new(Arc::clone(self), value))
    }
}
