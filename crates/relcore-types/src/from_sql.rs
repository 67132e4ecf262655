//! Extraction of host values from [`SqlValue`]s.

use bytes::Bytes;

use crate::error::TypeError;
use crate::value::{EnumValue, SqlValue};

/// Types that can be read back from provider or model values.
pub trait FromSql: Sized {
    /// Convert from a SQL value to this type.
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Convert from an optional SQL value.
    ///
    /// Returns `None` if the value is NULL.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_sql(value).map(Some)
        }
    }
}

fn unexpected(expected: &'static str, value: &SqlValue) -> TypeError {
    if value.is_null() {
        TypeError::UnexpectedNull
    } else {
        TypeError::TypeMismatch {
            expected,
            actual: value.type_name().to_string(),
        }
    }
}

// Integers (and enum values) convert to any integer type that can hold them.
macro_rules! impl_from_sql_integer {
    ($($ty:ty),*) => {
        $(
            impl FromSql for $ty {
                fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
                    let n = value.as_i64().ok_or_else(|| unexpected(stringify!($ty), value))?;
                    <$ty>::try_from(n).map_err(|_| TypeError::OutOfRange {
                        target_type: stringify!($ty),
                    })
                }
            }
        )*
    };
}

impl_from_sql_integer!(u8, i16, i32, i64);

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Bool(v) => Ok(*v),
            other if other.is_integer() => Ok(other.as_i64() != Some(0)),
            other => Err(unexpected("bool", other)),
        }
    }
}

impl FromSql for f32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Float(v) => Ok(*v),
            other => Err(unexpected("f32", other)),
        }
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        value.as_f64().ok_or_else(|| unexpected("f64", value))
    }
}

impl FromSql for char {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Char(c) => Ok(*c),
            SqlValue::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(TypeError::Parse {
                        text: s.clone(),
                        target: "char".into(),
                    }),
                }
            }
            other => Err(unexpected("char", other)),
        }
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::String(v) => Ok(v.clone()),
            SqlValue::Char(c) => Ok(c.to_string()),
            other => Err(unexpected("string", other)),
        }
    }
}

impl FromSql for Bytes {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Binary(v) => Ok(v.clone()),
            other => Err(unexpected("bytes", other)),
        }
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Bytes::from_sql(value).map(|b| b.to_vec())
    }
}

impl FromSql for EnumValue {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Enum(v) => Ok(v.clone()),
            other => Err(unexpected("enum", other)),
        }
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        T::from_sql_nullable(value)
    }
}

impl FromSql for uuid::Uuid {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Uuid(v) => Ok(*v),
            SqlValue::Binary(b) => uuid::Uuid::from_slice(b).map_err(|e| TypeError::Parse {
                text: e.to_string(),
                target: "uuid".into(),
            }),
            SqlValue::String(s) => s.parse().map_err(|_| TypeError::Parse {
                text: s.clone(),
                target: "uuid".into(),
            }),
            other => Err(unexpected("uuid", other)),
        }
    }
}

impl FromSql for rust_decimal::Decimal {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Decimal(v) => Ok(*v),
            other if other.is_integer() => Ok(rust_decimal::Decimal::from(other.as_i64().unwrap_or_default())),
            other => Err(unexpected("decimal", other)),
        }
    }
}

impl FromSql for chrono::NaiveDate {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Date(v) => Ok(*v),
            SqlValue::DateTime(v) => Ok(v.date()),
            other => Err(unexpected("date", other)),
        }
    }
}

impl FromSql for chrono::NaiveTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Time(v) => Ok(*v),
            other => Err(unexpected("time", other)),
        }
    }
}

impl FromSql for chrono::NaiveDateTime {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::DateTime(v) => Ok(*v),
            other => Err(unexpected("datetime", other)),
        }
    }
}

impl FromSql for chrono::DateTime<chrono::FixedOffset> {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::DateTimeOffset(v) => Ok(*v),
            other => Err(unexpected("datetimeoffset", other)),
        }
    }
}

impl FromSql for SqlValue {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Ok(value.clone())
    }
}
