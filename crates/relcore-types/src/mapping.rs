//! Type mappings.
//!
//! A [`TypeMapping`] pairs one model type with one store type and carries
//! everything needed to move values across that boundary: facets, an
//! optional value converter, a literal formatter, a parameter configurator
//! and a provider-value comparer.
//!
//! Mappings are immutable. Every `with_*` method returns a new mapping and
//! leaves the receiver untouched; the underlying data is shared behind an
//! [`Arc`], so clones are cheap and resolution caches hand the same instance
//! to every caller.
//!
//! The rendered store type is never stored independently of its parts. It is
//! re-derived from the base name, the [`StoreTypePostfix`] policy and the
//! facets whenever any of them changes.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::converter::ValueConverter;
use crate::error::TypeError;
use crate::literal::{self, LiteralFormatter};
use crate::model_type::ModelType;
use crate::parameter::{DbParameter, DbType, ParameterDirection};
use crate::value::SqlValue;

/// Adjusts a freshly created native parameter for provider rules.
pub type ParameterConfigurator = fn(&TypeMapping, &mut DbParameter);

/// Which facets appear in the rendered store type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StoreTypePostfix {
    /// Bare base name.
    #[default]
    None,
    /// `base(size)`, with `-1` rendered as `base(max)`.
    Size,
    /// `base(precision)`.
    Precision,
    /// `base(precision,scale)`, or `base(precision)` without a scale.
    PrecisionAndScale,
}

/// Provider-specific behavior for spatial (or other opaque) store types.
pub trait SpatialCapability: Send + Sync + fmt::Debug {
    /// Full model type name, used as the key of named mapping factories.
    fn type_name(&self) -> &str;

    /// Convert a model value to what the driver expects.
    fn to_provider(&self, value: &SqlValue) -> Result<SqlValue, TypeError> {
        Ok(value.clone())
    }

    /// Convert a driver value to the model value.
    fn from_provider(&self, value: &SqlValue) -> Result<SqlValue, TypeError> {
        Ok(value.clone())
    }

    /// Render a provider value as SQL literal text.
    fn generate_literal(&self, mapping: &TypeMapping, value: &SqlValue)
    -> Result<String, TypeError>;
}

/// The provider-side shape of a mapping.
#[derive(Debug, Clone)]
pub enum TypeKind {
    /// Boolean / bit.
    Bool,
    /// Unsigned byte.
    Byte,
    /// 16-bit integer.
    Int16,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Single-precision float.
    Float,
    /// Double-precision float.
    Double,
    /// Fixed-point decimal.
    Decimal,
    /// Single character.
    Char,
    /// Text.
    String,
    /// Binary.
    ByteArray,
    /// Date only.
    Date,
    /// Time of day.
    Time,
    /// Date and time.
    DateTime,
    /// Date and time with offset.
    DateTimeOffset,
    /// UUID.
    Guid,
    /// Opaque provider type with its own conversion and literal rules.
    Spatial(Arc<dyn SpatialCapability>),
}

/// Defaults a [`TypeKind`] contributes to a new mapping.
#[derive(Debug, Clone)]
pub struct KindDefaults {
    /// Model type the kind maps naturally.
    pub model_type: ModelType,
    /// Native parameter type hint.
    pub db_type: Option<DbType>,
    /// Postfix policy.
    pub postfix: StoreTypePostfix,
    /// Literal formatter.
    pub literal: LiteralFormatter,
    /// Provider-value comparer.
    pub comparer: ValueComparer,
}

impl TypeKind {
    /// Short name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Byte => "byte",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float => "float",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Char => "char",
            Self::String => "string",
            Self::ByteArray => "byte_array",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::DateTimeOffset => "datetimeoffset",
            Self::Guid => "guid",
            Self::Spatial(_) => "spatial",
        }
    }

    /// Kind table entry.
    #[must_use]
    pub fn defaults(&self) -> KindDefaults {
        use StoreTypePostfix as P;

        let (model_type, db_type, postfix, literal, comparer): (
            ModelType,
            Option<DbType>,
            StoreTypePostfix,
            LiteralFormatter,
            ValueComparer,
        ) = match self {
            Self::Bool => (ModelType::Bool, Some(DbType::Boolean), P::None, literal::bool_literal, ValueComparer::DEFAULT),
            Self::Byte => (ModelType::U8, Some(DbType::Byte), P::None, literal::integer_literal, ValueComparer::DEFAULT),
            Self::Int16 => (ModelType::I16, Some(DbType::Int16), P::None, literal::integer_literal, ValueComparer::DEFAULT),
            Self::Int32 => (ModelType::I32, Some(DbType::Int32), P::None, literal::integer_literal, ValueComparer::DEFAULT),
            Self::Int64 => (ModelType::I64, Some(DbType::Int64), P::None, literal::integer_literal, ValueComparer::DEFAULT),
            Self::Float => (ModelType::F32, Some(DbType::Single), P::None, literal::float_literal, ValueComparer::FLOATING),
            Self::Double => (ModelType::F64, Some(DbType::Double), P::None, literal::double_literal, ValueComparer::FLOATING),
            Self::Decimal => (ModelType::Decimal, Some(DbType::Decimal), P::PrecisionAndScale, literal::decimal_literal, ValueComparer::DEFAULT),
            Self::Char => (ModelType::Char, Some(DbType::StringFixedLength), P::Size, literal::char_literal, ValueComparer::DEFAULT),
            Self::String => (ModelType::String, Some(DbType::String), P::Size, literal::string_literal, ValueComparer::DEFAULT),
            Self::ByteArray => (ModelType::Bytes, Some(DbType::Binary), P::Size, literal::bytes_literal, ValueComparer::BYTES),
            Self::Date => (ModelType::Date, Some(DbType::Date), P::None, literal::temporal_literal, ValueComparer::DEFAULT),
            Self::Time => (ModelType::Time, Some(DbType::Time), P::None, literal::temporal_literal, ValueComparer::DEFAULT),
            Self::DateTime => (ModelType::DateTime, Some(DbType::DateTime), P::None, literal::temporal_literal, ValueComparer::DEFAULT),
            Self::DateTimeOffset => (ModelType::DateTimeOffset, Some(DbType::DateTimeOffset), P::None, literal::temporal_literal, ValueComparer::DEFAULT),
            Self::Guid => (ModelType::Uuid, Some(DbType::Guid), P::None, literal::guid_literal, ValueComparer::DEFAULT),
            Self::Spatial(cap) => (ModelType::named(cap.type_name()), Some(DbType::Object), P::None, literal::spatial_literal, ValueComparer::DEFAULT),
        };
        KindDefaults {
            model_type,
            db_type,
            postfix,
            literal,
            comparer,
        }
    }

    fn is_text(&self) -> bool {
        matches!(self, Self::String | Self::Char)
    }
}

impl PartialEq for TypeKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Spatial(a), Self::Spatial(b)) => Arc::ptr_eq(a, b),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

/// Equality and snapshotting of provider values.
#[derive(Clone, Copy)]
pub struct ValueComparer {
    name: &'static str,
    equals: fn(&SqlValue, &SqlValue) -> bool,
    snapshot: fn(&SqlValue) -> SqlValue,
}

impl ValueComparer {
    /// Structural equality, snapshot by clone.
    pub const DEFAULT: Self = Self {
        name: "default",
        equals: |a, b| a == b,
        snapshot: SqlValue::clone,
    };

    /// Structural equality where NaN equals NaN.
    pub const FLOATING: Self = Self {
        name: "floating",
        equals: floating_equals,
        snapshot: SqlValue::clone,
    };

    /// Content equality with a deep-copy snapshot, so a snapshot never shares
    /// a buffer with the live value.
    pub const BYTES: Self = Self {
        name: "bytes",
        equals: |a, b| a == b,
        snapshot: bytes_snapshot,
    };

    /// Custom comparer.
    #[must_use]
    pub const fn new(
        name: &'static str,
        equals: fn(&SqlValue, &SqlValue) -> bool,
        snapshot: fn(&SqlValue) -> SqlValue,
    ) -> Self {
        Self {
            name,
            equals,
            snapshot,
        }
    }

    /// Compare two provider values.
    #[must_use]
    pub fn equals(&self, a: &SqlValue, b: &SqlValue) -> bool {
        (self.equals)(a, b)
    }

    /// Copy a provider value so later changes to the original are not seen.
    #[must_use]
    pub fn snapshot(&self, value: &SqlValue) -> SqlValue {
        (self.snapshot)(value)
    }
}

fn floating_equals(a: &SqlValue, b: &SqlValue) -> bool {
    match (a, b) {
        (SqlValue::Double(x), SqlValue::Double(y)) => x == y || (x.is_nan() && y.is_nan()),
        (SqlValue::Float(x), SqlValue::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
        _ => a == b,
    }
}

fn bytes_snapshot(value: &SqlValue) -> SqlValue {
    match value {
        SqlValue::Binary(b) => SqlValue::Binary(Bytes::copy_from_slice(b)),
        other => other.clone(),
    }
}

impl fmt::Debug for ValueComparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueComparer").field(&self.name).finish()
    }
}

/// A store type name split into base and facets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedStoreType {
    /// Name before any `(`, trimmed, case preserved.
    pub base: String,
    /// Single-number facet (`max` is `-1`).
    pub size: Option<i32>,
    /// First number of a `(p,s)` pair.
    pub precision: Option<u32>,
    /// Second number of a `(p,s)` pair.
    pub scale: Option<u32>,
}

impl ParsedStoreType {
    /// Split a store type name. Malformed facet text is ignored.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let Some(open) = name.find('(') else {
            return Self {
                base: name.trim().to_string(),
                ..Self::default()
            };
        };

        let base = name[..open].trim().to_string();
        let rest = &name[open + 1..];
        let inner = rest.rfind(')').map_or(rest, |close| &rest[..close]).trim();

        let mut parsed = Self {
            base,
            ..Self::default()
        };
        if let Some((p, s)) = inner.split_once(',') {
            if let (Ok(p), Ok(s)) = (p.trim().parse::<u32>(), s.trim().parse::<u32>()) {
                parsed.precision = Some(p);
                parsed.scale = Some(s);
            }
        } else if inner.eq_ignore_ascii_case("max") {
            parsed.size = Some(-1);
        } else {
            parsed.size = inner.parse::<i32>().ok().filter(|n| *n >= 0);
        }
        parsed
    }

    /// The single number read as a precision, when it was not a `(p,s)` pair.
    #[must_use]
    pub fn precision_or_size(&self) -> Option<u32> {
        self.precision
            .or_else(|| self.size.and_then(|s| u32::try_from(s).ok()))
    }
}

/// Render a store type from its base and facets.
#[must_use]
pub fn render_store_type(
    base: &str,
    postfix: StoreTypePostfix,
    size: Option<i32>,
    precision: Option<u32>,
    scale: Option<u32>,
) -> String {
    match postfix {
        StoreTypePostfix::Size => match size {
            Some(-1) => format!("{base}(max)"),
            Some(n) if n >= 0 => format!("{base}({n})"),
            _ => base.to_string(),
        },
        StoreTypePostfix::Precision => match precision {
            Some(p) => format!("{base}({p})"),
            None => base.to_string(),
        },
        StoreTypePostfix::PrecisionAndScale => match (precision, scale) {
            (Some(p), Some(s)) => format!("{base}({p},{s})"),
            (Some(p), None) => format!("{base}({p})"),
            _ => base.to_string(),
        },
        StoreTypePostfix::None => base.to_string(),
    }
}

#[derive(Clone)]
struct MappingData {
    kind: TypeKind,
    model_type: ModelType,
    store_type: String,
    store_type_base: String,
    postfix: StoreTypePostfix,
    db_type: Option<DbType>,
    size: Option<i32>,
    precision: Option<u32>,
    scale: Option<u32>,
    fixed_length: bool,
    unicode: bool,
    converter: Option<ValueConverter>,
    literal: LiteralFormatter,
    configure: Option<ParameterConfigurator>,
    comparer: ValueComparer,
}

impl MappingData {
    fn refresh_store_type(&mut self) {
        self.store_type = render_store_type(
            &self.store_type_base,
            self.postfix,
            self.size,
            self.precision,
            self.scale,
        );
    }

    fn refresh_text_db_type(&mut self) {
        if self.kind.is_text() {
            self.db_type = Some(match (self.unicode, self.fixed_length) {
                (true, false) => DbType::String,
                (true, true) => DbType::StringFixedLength,
                (false, false) => DbType::AnsiString,
                (false, true) => DbType::AnsiStringFixedLength,
            });
        }
    }

    // Substitute facets allowed by the postfix policy; others are dropped.
    fn apply_facets(&mut self, size: Option<i32>, precision: Option<u32>, scale: Option<u32>) {
        match self.postfix {
            StoreTypePostfix::Size => {
                if size.is_some() {
                    self.size = size;
                }
            }
            StoreTypePostfix::Precision => {
                if let Some(p) = precision.or_else(|| size.and_then(|s| u32::try_from(s).ok())) {
                    self.precision = Some(p);
                }
            }
            StoreTypePostfix::PrecisionAndScale => {
                if let Some(p) = precision.or_else(|| size.and_then(|s| u32::try_from(s).ok())) {
                    self.precision = Some(p);
                    self.scale = scale;
                } else if scale.is_some() && self.precision.is_some() {
                    self.scale = scale;
                }
            }
            StoreTypePostfix::None => {}
        }
    }
}

/// An immutable model-type to store-type pairing.
#[derive(Clone)]
pub struct TypeMapping {
    data: Arc<MappingData>,
}

impl TypeMapping {
    /// Create a mapping with the kind's default postfix policy.
    ///
    /// Facets written in `store_type` (`nvarchar(50)`, `decimal(18,2)`) are
    /// read into the mapping as far as the policy allows.
    #[must_use]
    pub fn new(store_type: &str, kind: TypeKind) -> Self {
        let postfix = kind.defaults().postfix;
        Self::with_postfix_policy(store_type, kind, postfix)
    }

    /// Create a mapping with an explicit postfix policy.
    #[must_use]
    pub fn with_postfix_policy(store_type: &str, kind: TypeKind, postfix: StoreTypePostfix) -> Self {
        let parsed = ParsedStoreType::parse(store_type);
        let defaults = kind.defaults();
        let unicode = kind.is_text();
        let mut data = MappingData {
            kind,
            model_type: defaults.model_type,
            store_type: String::new(),
            store_type_base: parsed.base.clone(),
            postfix,
            db_type: defaults.db_type,
            size: None,
            precision: None,
            scale: None,
            fixed_length: false,
            unicode,
            converter: None,
            literal: defaults.literal,
            configure: None,
            comparer: defaults.comparer,
        };
        data.apply_facets(parsed.size, parsed.precision, parsed.scale);
        data.refresh_store_type();
        Self {
            data: Arc::new(data),
        }
    }

    fn map(&self, f: impl FnOnce(&mut MappingData)) -> Self {
        let mut data = (*self.data).clone();
        f(&mut data);
        data.refresh_store_type();
        Self {
            data: Arc::new(data),
        }
    }

    // ----- accessors -----

    /// Provider-side kind.
    #[must_use]
    pub fn kind(&self) -> &TypeKind {
        &self.data.kind
    }

    /// Model type, after any converter (the converter's model side).
    #[must_use]
    pub fn model_type(&self) -> &ModelType {
        &self.data.model_type
    }

    /// Rendered store type, e.g. `nvarchar(256)`.
    #[must_use]
    pub fn store_type(&self) -> &str {
        &self.data.store_type
    }

    /// Store type without facets, e.g. `nvarchar`.
    #[must_use]
    pub fn store_type_base(&self) -> &str {
        &self.data.store_type_base
    }

    /// Postfix policy.
    #[must_use]
    pub fn store_type_postfix(&self) -> StoreTypePostfix {
        self.data.postfix
    }

    /// Native parameter type hint.
    #[must_use]
    pub fn db_type(&self) -> Option<DbType> {
        self.data.db_type
    }

    /// Size facet (`-1` is max).
    #[must_use]
    pub fn size(&self) -> Option<i32> {
        self.data.size
    }

    /// Precision facet.
    #[must_use]
    pub fn precision(&self) -> Option<u32> {
        self.data.precision
    }

    /// Scale facet.
    #[must_use]
    pub fn scale(&self) -> Option<u32> {
        self.data.scale
    }

    /// Whether the store type has a fixed length.
    #[must_use]
    pub fn is_fixed_length(&self) -> bool {
        self.data.fixed_length
    }

    /// Whether text is stored as unicode.
    #[must_use]
    pub fn is_unicode(&self) -> bool {
        self.data.unicode
    }

    /// The model-to-provider converter, if any.
    #[must_use]
    pub fn converter(&self) -> Option<&ValueConverter> {
        self.data.converter.as_ref()
    }

    /// Provider-value comparer.
    #[must_use]
    pub fn comparer(&self) -> ValueComparer {
        self.data.comparer
    }

    /// Whether two handles share the same mapping instance.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.data, &b.data)
    }

    // ----- cloning with overrides -----

    /// Change the postfix policy.
    #[must_use]
    pub fn with_postfix(&self, postfix: StoreTypePostfix) -> Self {
        self.map(|d| d.postfix = postfix)
    }

    /// Set the size facet.
    #[must_use]
    pub fn with_size(&self, size: i32) -> Self {
        self.map(|d| d.size = Some(size))
    }

    /// Set the precision facet.
    #[must_use]
    pub fn with_precision(&self, precision: u32) -> Self {
        self.map(|d| d.precision = Some(precision))
    }

    /// Set precision and scale.
    #[must_use]
    pub fn with_precision_and_scale(&self, precision: u32, scale: u32) -> Self {
        self.map(|d| {
            d.precision = Some(precision);
            d.scale = Some(scale);
        })
    }

    /// Set the unicode flag.
    #[must_use]
    pub fn with_unicode(&self, unicode: bool) -> Self {
        self.map(|d| {
            d.unicode = unicode;
            d.refresh_text_db_type();
        })
    }

    /// Set the fixed-length flag.
    #[must_use]
    pub fn with_fixed_length(&self, fixed_length: bool) -> Self {
        self.map(|d| {
            d.fixed_length = fixed_length;
            d.refresh_text_db_type();
        })
    }

    /// Override the native parameter type hint.
    #[must_use]
    pub fn with_db_type(&self, db_type: Option<DbType>) -> Self {
        self.map(|d| d.db_type = db_type)
    }

    /// Override the model type.
    #[must_use]
    pub fn with_model_type(&self, model_type: ModelType) -> Self {
        self.map(|d| d.model_type = model_type)
    }

    /// Override the literal formatter.
    #[must_use]
    pub fn with_literal_formatter(&self, literal: LiteralFormatter) -> Self {
        self.map(|d| d.literal = literal)
    }

    /// Install a parameter configurator.
    #[must_use]
    pub fn with_parameter_configurator(&self, configure: ParameterConfigurator) -> Self {
        self.map(|d| d.configure = Some(configure))
    }

    /// Override the provider-value comparer.
    #[must_use]
    pub fn with_comparer(&self, comparer: ValueComparer) -> Self {
        self.map(|d| d.comparer = comparer)
    }

    /// Substitute facets as far as the postfix policy allows.
    ///
    /// Returns a handle to the same instance when nothing changes.
    #[must_use]
    pub fn with_facets(&self, size: Option<i32>, precision: Option<u32>, scale: Option<u32>) -> Self {
        let mut data = (*self.data).clone();
        data.apply_facets(size, precision, scale);
        if data.size == self.data.size
            && data.precision == self.data.precision
            && data.scale == self.data.scale
        {
            return self.clone();
        }
        data.refresh_store_type();
        Self {
            data: Arc::new(data),
        }
    }

    /// Clone under a new base name (as the caller wrote it) and facets.
    #[must_use]
    pub fn with_store_type_base(
        &self,
        base: &str,
        size: Option<i32>,
        precision: Option<u32>,
        scale: Option<u32>,
    ) -> Self {
        self.map(|d| {
            d.store_type_base = base.to_string();
            d.apply_facets(size, precision, scale);
        })
    }

    /// Put `converter` in front of any existing converter.
    ///
    /// The model type becomes the converter's model type; facets and the
    /// store type are preserved.
    #[must_use]
    pub fn with_composed_converter(&self, converter: Option<&ValueConverter>) -> Self {
        let Some(outer) = converter else {
            return self.clone();
        };
        self.map(|d| {
            d.converter = Some(match &d.converter {
                Some(inner) => outer.then(inner),
                None => outer.clone(),
            });
            d.model_type = outer.model_type().clone();
        })
    }

    // ----- values -----

    /// Align integer and enum representations with the model type.
    ///
    /// An integer given for an enum mapping becomes an enum value, an enum
    /// given for an integer mapping becomes its number, and integers are
    /// widened or narrowed (range-checked) to the mapped integer type.
    pub fn normalize_model_value(&self, value: SqlValue) -> Result<SqlValue, TypeError> {
        let target = self.model_type().unwrap_nullable();
        let Some(n) = value.as_i64() else {
            return Ok(value);
        };
        match (&value, target) {
            (SqlValue::Enum(e), ModelType::Enum(t)) if e.enum_type() == t => Ok(value),
            (_, ModelType::Enum(_)) => target.integer_value(n),
            (_, t) if t.is_integer() && value.model_type().as_ref() != Some(t) => t.integer_value(n),
            _ => Ok(value),
        }
    }

    /// Model value to provider value.
    pub fn convert_to_provider(&self, value: &SqlValue) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let value = self.normalize_model_value(value.clone())?;
        let value = match &self.data.converter {
            Some(c) => c.convert_to_provider(&value)?,
            None => value,
        };
        match &self.data.kind {
            TypeKind::Spatial(cap) => cap.to_provider(&value),
            _ => Ok(value),
        }
    }

    /// Provider value to model value.
    pub fn convert_from_provider(&self, value: &SqlValue) -> Result<SqlValue, TypeError> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let value = match &self.data.kind {
            TypeKind::Spatial(cap) => cap.from_provider(value)?,
            _ => value.clone(),
        };
        let value = match &self.data.converter {
            Some(c) => c.convert_from_provider(&value)?,
            None => value,
        };
        self.normalize_model_value(value)
    }

    /// SQL literal for a model value; the converter is applied first.
    pub fn generate_sql_literal(&self, value: &SqlValue) -> Result<String, TypeError> {
        if value.is_null() {
            return Ok("NULL".to_string());
        }
        let provider = self.convert_to_provider(value)?;
        self.generate_provider_value_sql_literal(&provider)
    }

    /// SQL literal for a value already in provider form.
    pub fn generate_provider_value_sql_literal(&self, value: &SqlValue) -> Result<String, TypeError> {
        if value.is_null() {
            return Ok("NULL".to_string());
        }
        (self.data.literal)(self, value)
    }

    /// Create an input parameter carrying `value` in provider form.
    pub fn create_parameter(
        &self,
        name: &str,
        value: &SqlValue,
        nullable: Option<bool>,
    ) -> Result<DbParameter, TypeError> {
        let mut parameter = DbParameter::new(name, self.convert_to_provider(value)?)
            .with_direction(ParameterDirection::Input);
        if let Some(nullable) = nullable {
            parameter.is_nullable = nullable;
        }
        parameter.db_type = self.data.db_type;
        parameter.size = self.data.size.filter(|s| *s != -1);
        parameter.precision = self.data.precision;
        parameter.scale = self.data.scale;
        if let Some(configure) = self.data.configure {
            configure(self, &mut parameter);
        }
        Ok(parameter)
    }
}

impl fmt::Debug for TypeMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMapping")
            .field("store_type", &self.data.store_type)
            .field("model_type", &self.data.model_type)
            .field("kind", &self.data.kind.name())
            .field("size", &self.data.size)
            .field("precision", &self.data.precision)
            .field("scale", &self.data.scale)
            .field("unicode", &self.data.unicode)
            .field("fixed_length", &self.data.fixed_length)
            .field("converter", &self.data.converter)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for TypeMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data.store_type)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model_type::EnumType;
    use crate::value::EnumValue;

    #[test]
    fn test_parse_store_type() {
        let p = ParsedStoreType::parse("decimal(18, 2)");
        assert_eq!(p.base, "decimal");
        assert_eq!((p.precision, p.scale), (Some(18), Some(2)));

        let p = ParsedStoreType::parse("VARCHAR(max)");
        assert_eq!(p.base, "VARCHAR");
        assert_eq!(p.size, Some(-1));

        let p = ParsedStoreType::parse("nvarchar(abc)");
        assert_eq!(p.base, "nvarchar");
        assert_eq!(p.size, None);

        let p = ParsedStoreType::parse("national character varying");
        assert_eq!(p.base, "national character varying");
    }

    #[test]
    fn test_render_store_type() {
        use StoreTypePostfix as P;
        assert_eq!(render_store_type("nvarchar", P::Size, Some(-1), None, None), "nvarchar(max)");
        assert_eq!(render_store_type("nvarchar", P::Size, Some(50), None, None), "nvarchar(50)");
        assert_eq!(render_store_type("decimal", P::PrecisionAndScale, None, Some(10), None), "decimal(10)");
        assert_eq!(render_store_type("int", P::None, Some(4), Some(10), None), "int");
    }

    #[test]
    fn test_new_reads_facets() {
        let m = TypeMapping::new("decimal(18,2)", TypeKind::Decimal);
        assert_eq!(m.store_type(), "decimal(18,2)");
        assert_eq!(m.store_type_base(), "decimal");
        assert_eq!((m.precision(), m.scale()), (Some(18), Some(2)));

        let m = TypeMapping::new("nvarchar(max)", TypeKind::String);
        assert_eq!(m.size(), Some(-1));
        assert!(m.is_unicode());
        assert_eq!(m.db_type(), Some(DbType::String));
    }

    #[test]
    fn test_clones_never_mutate() {
        let m = TypeMapping::new("varchar", TypeKind::String).with_unicode(false);
        let sized = m.with_facets(Some(20), None, None);
        assert_eq!(m.store_type(), "varchar");
        assert_eq!(sized.store_type(), "varchar(20)");
        assert_eq!(sized.db_type(), Some(DbType::AnsiString));
    }

    #[test]
    fn test_facets_never_widen_postfix() {
        let m = TypeMapping::new("int", TypeKind::Int32);
        let same = m.with_facets(Some(10), Some(5), Some(2));
        assert!(TypeMapping::ptr_eq(&m, &same));
        assert_eq!(same.store_type(), "int");
    }

    #[test]
    fn test_precision_postfix_reads_single_number() {
        let m = TypeMapping::with_postfix_policy("float(24)", TypeKind::Float, StoreTypePostfix::Precision);
        assert_eq!(m.precision(), Some(24));
        assert_eq!(m.store_type(), "float(24)");
    }

    #[test]
    fn test_composed_converter_keeps_facets() {
        let e = EnumType::new("Mood", ModelType::I32, [("Happy", 1)]);
        let base = TypeMapping::new("nvarchar(20)", TypeKind::String);
        let m = base.with_composed_converter(Some(&ValueConverter::enum_to_string(&e)));
        assert_eq!(m.store_type(), "nvarchar(20)");
        assert_eq!(m.model_type(), &ModelType::Enum(Arc::clone(&e)));
        let v = SqlValue::Enum(EnumValue::new(Arc::clone(&e), 1));
        assert_eq!(m.generate_sql_literal(&v).unwrap(), "'Happy'");
        assert_eq!(m.convert_from_provider(&SqlValue::from("Happy")).unwrap(), v);
    }

    #[test]
    fn test_normalization() {
        let e = EnumType::new("Mood", ModelType::I32, [("Happy", 1)]);
        let m = TypeMapping::new("bigint", TypeKind::Int64);
        assert_eq!(
            m.convert_to_provider(&SqlValue::Int(7)).unwrap(),
            SqlValue::BigInt(7)
        );
        assert_eq!(
            m.convert_to_provider(&SqlValue::Enum(EnumValue::new(e, 1))).unwrap(),
            SqlValue::BigInt(1)
        );
    }

    #[test]
    fn test_literals() {
        let d = TypeMapping::new("float", TypeKind::Double);
        assert_eq!(d.generate_sql_literal(&SqlValue::Double(1.0)).unwrap(), "1.0");
        assert_eq!(d.generate_sql_literal(&SqlValue::Double(f64::NAN)).unwrap(), "NaN");
        assert_eq!(d.generate_sql_literal(&SqlValue::Null).unwrap(), "NULL");

        let b = TypeMapping::new("varbinary", TypeKind::ByteArray);
        assert_eq!(
            b.generate_sql_literal(&SqlValue::from(vec![0x0A_u8, 0xFF])).unwrap(),
            "X'0AFF'"
        );

        let s = TypeMapping::new("text", TypeKind::String);
        assert_eq!(s.generate_sql_literal(&SqlValue::from("O'Brien")).unwrap(), "'O''Brien'");
    }

    #[test]
    fn test_create_parameter() {
        let m = TypeMapping::new("nvarchar(max)", TypeKind::String);
        let p = m.create_parameter("@p0", &SqlValue::from("x"), Some(false)).unwrap();
        assert_eq!(p.name, "@p0");
        assert_eq!(p.direction, ParameterDirection::Input);
        assert_eq!(p.db_type, Some(DbType::String));
        assert_eq!(p.size, None);
        assert!(!p.is_nullable);

        let m = TypeMapping::new("decimal(10,3)", TypeKind::Decimal);
        let p = m.create_parameter("@p1", &SqlValue::Null, Some(true)).unwrap();
        assert_eq!(p.value, SqlValue::Null);
        assert_eq!((p.precision, p.scale), (Some(10), Some(3)));
    }

    #[test]
    fn test_comparers() {
        assert!(ValueComparer::FLOATING.equals(&SqlValue::Double(f64::NAN), &SqlValue::Double(f64::NAN)));
        assert!(!ValueComparer::DEFAULT.equals(&SqlValue::Double(f64::NAN), &SqlValue::Double(f64::NAN)));

        let live = SqlValue::from(vec![1_u8, 2, 3]);
        let snap = ValueComparer::BYTES.snapshot(&live);
        assert!(ValueComparer::BYTES.equals(&live, &snap));
        match (&live, &snap) {
            (SqlValue::Binary(a), SqlValue::Binary(b)) => assert_ne!(a.as_ptr(), b.as_ptr()),
            _ => unreachable!(),
        }
    }
}
