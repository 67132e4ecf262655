//! Conversion of host values into [`SqlValue`]s.

use bytes::Bytes;

use crate::error::TypeError;
use crate::model_type::ModelType;
use crate::value::{EnumValue, SqlValue};

/// Types that can be bound as command parameter values.
///
/// `model_type` names the type used to resolve a mapping when the value is
/// bound dynamically.
pub trait ToSql {
    /// Convert this value to a SQL value.
    fn to_sql(&self) -> Result<SqlValue, TypeError>;

    /// Model type of this value.
    fn model_type(&self) -> ModelType;
}

macro_rules! impl_to_sql {
    ($($ty:ty => $variant:ident, $model:ident;)*) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> Result<SqlValue, TypeError> {
                    Ok(SqlValue::$variant(self.clone()))
                }

                fn model_type(&self) -> ModelType {
                    ModelType::$model
                }
            }
        )*
    };
}

impl_to_sql! {
    bool => Bool, Bool;
    u8 => TinyInt, U8;
    i16 => SmallInt, I16;
    i32 => Int, I32;
    i64 => BigInt, I64;
    f32 => Float, F32;
    f64 => Double, F64;
    char => Char, Char;
    String => String, String;
    Bytes => Binary, Bytes;
    uuid::Uuid => Uuid, Uuid;
    rust_decimal::Decimal => Decimal, Decimal;
    chrono::NaiveDate => Date, Date;
    chrono::NaiveTime => Time, Time;
    chrono::NaiveDateTime => DateTime, DateTime;
    chrono::DateTime<chrono::FixedOffset> => DateTimeOffset, DateTimeOffset;
}

impl ToSql for str {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::String(self.to_owned()))
    }

    fn model_type(&self) -> ModelType {
        ModelType::String
    }
}

impl ToSql for [u8] {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Binary(Bytes::copy_from_slice(self)))
    }

    fn model_type(&self) -> ModelType {
        ModelType::Bytes
    }
}

impl ToSql for Vec<u8> {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        self.as_slice().to_sql()
    }

    fn model_type(&self) -> ModelType {
        ModelType::Bytes
    }
}

impl ToSql for EnumValue {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(SqlValue::Enum(self.clone()))
    }

    fn model_type(&self) -> ModelType {
        ModelType::Enum(self.enum_type().clone())
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        Ok(self.clone())
    }

    /// `String` for NULL, which has no type of its own.
    fn model_type(&self) -> ModelType {
        SqlValue::model_type(self).unwrap_or(ModelType::String)
    }
}

impl<T: ToSql> ToSql for Option<T> {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        match self {
            Some(v) => v.to_sql(),
            None => Ok(SqlValue::Null),
        }
    }

    fn model_type(&self) -> ModelType {
        match self {
            Some(v) => v.model_type().nullable(),
            None => ModelType::String.nullable(),
        }
    }
}

impl<T: ToSql + ?Sized> ToSql for &T {
    fn to_sql(&self) -> Result<SqlValue, TypeError> {
        (*self).to_sql()
    }

    fn model_type(&self) -> ModelType {
        (*self).model_type()
    }
}
