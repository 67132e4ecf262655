//! Value converters.
//!
//! A [`ValueConverter`] is a pair of functions translating between a model
//! type and the provider type actually sent to the driver. Converters are
//! immutable and cheap to clone; identity (used in resolution cache keys) is
//! the identity of the shared function pair, so clones compare equal and
//! independently constructed converters do not.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::TypeError;
use crate::model_type::{EnumType, ModelType};
use crate::value::{EnumValue, SqlValue};

type ConvertFn = dyn Fn(&SqlValue) -> Result<SqlValue, TypeError> + Send + Sync;

/// Facet hints a converter contributes to the provider-side mapping lookup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConverterMappingHints {
    /// Suggested size.
    pub size: Option<i32>,
    /// Suggested precision.
    pub precision: Option<u32>,
    /// Suggested scale.
    pub scale: Option<u32>,
    /// Suggested unicode flag.
    pub unicode: Option<bool>,
    /// Suggested fixed-length flag.
    pub fixed_length: Option<bool>,
}

impl ConverterMappingHints {
    /// Hints with only a size.
    #[must_use]
    pub fn with_size(size: i32) -> Self {
        Self {
            size: Some(size),
            ..Self::default()
        }
    }

    /// Fill unset facets of `self` from `other`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self {
            size: self.size.or(other.size),
            precision: self.precision.or(other.precision),
            scale: self.scale.or(other.scale),
            unicode: self.unicode.or(other.unicode),
            fixed_length: self.fixed_length.or(other.fixed_length),
        }
    }
}

struct ConverterFns {
    name: Cow<'static, str>,
    model_type: ModelType,
    provider_type: ModelType,
    to_provider: Box<ConvertFn>,
    from_provider: Box<ConvertFn>,
}

/// A model-to-provider value conversion.
#[derive(Clone)]
pub struct ValueConverter {
    fns: Arc<ConverterFns>,
    hints: Option<ConverterMappingHints>,
}

impl ValueConverter {
    /// Create a converter from a pair of conversion functions.
    ///
    /// NULL never reaches either function; it passes through unchanged.
    pub fn new<F, G>(
        name: impl Into<Cow<'static, str>>,
        model_type: ModelType,
        provider_type: ModelType,
        to_provider: F,
        from_provider: G,
    ) -> Self
    where
        F: Fn(&SqlValue) -> Result<SqlValue, TypeError> + Send + Sync + 'static,
        G: Fn(&SqlValue) -> Result<SqlValue, TypeError> + Send + Sync + 'static,
    {
        Self {
            fns: Arc::new(ConverterFns {
                name: name.into(),
                model_type,
                provider_type,
                to_provider: Box::new(to_provider),
                from_provider: Box::new(from_provider),
            }),
            hints: None,
        }
    }

    /// Attach facet hints.
    #[must_use]
    pub fn with_hints(mut self, hints: ConverterMappingHints) -> Self {
        self.hints = Some(hints);
        self
    }

    /// Converter name, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.fns.name
    }

    /// Type on the model side.
    #[must_use]
    pub fn model_type(&self) -> &ModelType {
        &self.fns.model_type
    }

    /// Type on the provider side.
    #[must_use]
    pub fn provider_type(&self) -> &ModelType {
        &self.fns.provider_type
    }

    /// Facet hints, if any.
    #[must_use]
    pub fn hints(&self) -> Option<ConverterMappingHints> {
        self.hints
    }

    /// Convert a model value to its provider representation.
    pub fn convert_to_provider(&self, value: &SqlValue) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        (self.fns.to_provider)(value)
    }

    /// Convert a provider value back to the model representation.
    pub fn convert_from_provider(&self, value: &SqlValue) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        (self.fns.from_provider)(value)
    }

    /// Compose `self` (A to B) with `next` (B to C) into a converter from A to C.
    ///
    /// Hints of the outer converter win over the inner converter's.
    #[must_use]
    pub fn then(&self, next: &ValueConverter) -> ValueConverter {
        let first = self.clone();
        let second = next.clone();
        let (back_first, back_second) = (self.clone(), next.clone());
        let hints = match (self.hints, next.hints) {
            (Some(a), Some(b)) => Some(a.or(b)),
            (a, b) => a.or(b),
        };
        let composed = Self::new(
            format!("{} -> {}", self.name(), next.name()),
            self.model_type().clone(),
            next.provider_type().clone(),
            move |v| second.convert_to_provider(&first.convert_to_provider(v)?),
            move |v| back_first.convert_from_provider(&back_second.convert_from_provider(v)?),
        );
        Self { hints, ..composed }
    }

    /// Enum to its underlying integer.
    #[must_use]
    pub fn enum_to_number(enum_type: &Arc<EnumType>) -> Self {
        let underlying = enum_type.underlying().clone();
        let to_type = underlying.clone();
        let from_enum = Arc::clone(enum_type);
        Self::new(
            format!("{} to number", enum_type.name()),
            ModelType::Enum(Arc::clone(enum_type)),
            underlying,
            move |v| match v.as_i64() {
                Some(n) => to_type.integer_value(n),
                None => Err(mismatch("enum", v)),
            },
            move |v| match v.as_i64() {
                Some(n) => Ok(SqlValue::Enum(EnumValue::new(Arc::clone(&from_enum), n))),
                None => Err(mismatch("integer", v)),
            },
        )
    }

    /// Enum to its member name; undeclared values use their number.
    #[must_use]
    pub fn enum_to_string(enum_type: &Arc<EnumType>) -> Self {
        let to_enum = Arc::clone(enum_type);
        let from_enum = Arc::clone(enum_type);
        Self::new(
            format!("{} to string", enum_type.name()),
            ModelType::Enum(Arc::clone(enum_type)),
            ModelType::String,
            move |v| match v {
                SqlValue::Enum(e) => Ok(SqlValue::String(e.name())),
                other => match other.as_i64() {
                    Some(n) => Ok(SqlValue::String(EnumValue::new(Arc::clone(&to_enum), n).name())),
                    None => Err(mismatch("enum", other)),
                },
            },
            move |v| match v {
                SqlValue::String(s) => Ok(SqlValue::Enum(from_enum.parse(s)?)),
                other => Err(mismatch("string", other)),
            },
        )
    }

    /// Any value with an invariant text form to string and back.
    #[must_use]
    pub fn to_string_converter(model_type: ModelType) -> Self {
        let parse_type = model_type.clone();
        Self::new(
            format!("{model_type} to string"),
            model_type,
            ModelType::String,
            |v| {
                v.to_invariant_string()
                    .map(SqlValue::String)
                    .ok_or_else(|| mismatch("text-convertible value", v))
            },
            move |v| match v {
                SqlValue::String(s) => parse_type.parse_invariant(s),
                other => Err(mismatch("string", other)),
            },
        )
    }

    /// `bool` to an integer type (`true` is 1).
    #[must_use]
    pub fn bool_to_number(provider_type: ModelType) -> Self {
        let to_type = provider_type.clone();
        Self::new(
            format!("bool to {provider_type}"),
            ModelType::Bool,
            provider_type,
            move |v| match v {
                SqlValue::Bool(b) => to_type.integer_value(i64::from(*b)),
                other => Err(mismatch("bool", other)),
            },
            |v| match v.as_i64() {
                Some(n) => Ok(SqlValue::Bool(n != 0)),
                None => Err(mismatch("integer", v)),
            },
        )
    }

    /// UUID to its 16-byte big-endian form.
    #[must_use]
    pub fn uuid_to_bytes() -> Self {
        Self::new(
            "uuid to bytes",
            ModelType::Uuid,
            ModelType::Bytes,
            |v| match v {
                SqlValue::Uuid(u) => Ok(SqlValue::Binary(Bytes::copy_from_slice(u.as_bytes()))),
                other => Err(mismatch("uuid", other)),
            },
            |v| match v {
                SqlValue::Binary(b) => uuid::Uuid::from_slice(b)
                    .map(SqlValue::Uuid)
                    .map_err(|e| TypeError::Parse {
                        text: e.to_string(),
                        target: "uuid".into(),
                    }),
                other => Err(mismatch("bytes", other)),
            },
        )
        .with_hints(ConverterMappingHints::with_size(16))
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.fns) as *const () as usize
    }
}

fn mismatch(expected: &'static str, actual: &SqlValue) -> TypeError {
    TypeError::TypeMismatch {
        expected,
        actual: actual.type_name().to_string(),
    }
}

impl PartialEq for ValueConverter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fns, &other.fns) && self.hints == other.hints
    }
}

impl Eq for ValueConverter {}

impl Hash for ValueConverter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
        self.hints.hash(state);
    }
}

impl fmt::Debug for ValueConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueConverter")
            .field("name", &self.fns.name)
            .field("model_type", &self.fns.model_type)
            .field("provider_type", &self.fns.provider_type)
            .field("hints", &self.hints)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn size() -> Arc<EnumType> {
        EnumType::new("Size", ModelType::I16, [("Small", 1), ("Large", 3)])
    }

    #[test]
    fn test_enum_to_number_round_trip() {
        let e = size();
        let conv = ValueConverter::enum_to_number(&e);
        let model = SqlValue::Enum(EnumValue::new(Arc::clone(&e), 3));
        let provider = conv.convert_to_provider(&model).unwrap();
        assert_eq!(provider, SqlValue::SmallInt(3));
        assert_eq!(conv.convert_from_provider(&provider).unwrap(), model);
    }

    #[test]
    fn test_enum_to_string_uses_number_for_undeclared() {
        let e = size();
        let conv = ValueConverter::enum_to_string(&e);
        let v = SqlValue::Enum(EnumValue::new(Arc::clone(&e), 9));
        assert_eq!(
            conv.convert_to_provider(&v).unwrap(),
            SqlValue::String("9".into())
        );
        assert_eq!(conv.convert_from_provider(&SqlValue::from("9")).unwrap(), v);
    }

    #[test]
    fn test_null_passes_through() {
        let conv = ValueConverter::bool_to_number(ModelType::U8);
        assert_eq!(conv.convert_to_provider(&SqlValue::Null).unwrap(), SqlValue::Null);
    }

    #[test]
    fn test_composition() {
        let e = size();
        let composed = ValueConverter::enum_to_number(&e)
            .then(&ValueConverter::to_string_converter(ModelType::I16));
        assert_eq!(composed.model_type(), &ModelType::Enum(Arc::clone(&e)));
        assert_eq!(composed.provider_type(), &ModelType::String);
        let v = SqlValue::Enum(EnumValue::new(Arc::clone(&e), 1));
        let p = composed.convert_to_provider(&v).unwrap();
        assert_eq!(p, SqlValue::String("1".into()));
        assert_eq!(composed.convert_from_provider(&p).unwrap(), v);
    }

    #[test]
    fn test_identity_equality() {
        let a = ValueConverter::uuid_to_bytes();
        let b = a.clone();
        let c = ValueConverter::uuid_to_bytes();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
