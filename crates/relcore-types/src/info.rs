//! Resolution inputs.
//!
//! [`MappingInfo`] is the full input of one type-mapping resolution and the
//! key under which its result is memoized: two infos are equal only when
//! every component (including converter identity) is equal.

use crate::converter::{ConverterMappingHints, ValueConverter};
use crate::mapping::ParsedStoreType;
use crate::model_type::ModelType;

/// Facets of a model property, as supplied by a metadata model.
///
/// Only `name` and `model_type` are required. A facet the property leaves
/// unset is inherited from its principals (the properties it references
/// through foreign keys), in the order returned by [`principals`].
///
/// [`principals`]: PropertyFacets::principals
pub trait PropertyFacets {
    /// Property name.
    fn name(&self) -> &str;

    /// In-memory type of the property.
    fn model_type(&self) -> &ModelType;

    /// Configured column type, e.g. `nvarchar(100)`.
    fn store_type(&self) -> Option<&str> {
        None
    }

    /// Maximum length (`-1` for unbounded).
    fn max_length(&self) -> Option<i32> {
        None
    }

    /// Numeric precision.
    fn precision(&self) -> Option<u32> {
        None
    }

    /// Numeric scale.
    fn scale(&self) -> Option<u32> {
        None
    }

    /// Unicode flag for text.
    fn unicode(&self) -> Option<bool> {
        None
    }

    /// Fixed-length flag.
    fn fixed_length(&self) -> Option<bool> {
        None
    }

    /// Part of a primary or alternate key.
    fn is_key(&self) -> bool {
        false
    }

    /// Part of a foreign key.
    fn is_foreign_key(&self) -> bool {
        false
    }

    /// Part of an index.
    fn is_index(&self) -> bool {
        false
    }

    /// Used for optimistic concurrency.
    fn is_concurrency_token(&self) -> bool {
        false
    }

    /// Concurrency token generated by the store on every write.
    fn is_row_version(&self) -> bool {
        false
    }

    /// Type to convert to before storing.
    fn provider_type(&self) -> Option<&ModelType> {
        None
    }

    /// Explicitly configured converter.
    fn converter(&self) -> Option<&ValueConverter> {
        None
    }

    /// Properties this one inherits facets from.
    fn principals(&self) -> Vec<&dyn PropertyFacets> {
        Vec::new()
    }
}

fn inherited<'a, T>(
    property: &'a dyn PropertyFacets,
    facet: &dyn Fn(&'a dyn PropertyFacets) -> Option<T>,
) -> Option<T> {
    facet(property).or_else(|| {
        property
            .principals()
            .into_iter()
            .find_map(|principal| inherited(principal, facet))
    })
}

/// Everything a resolution depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MappingInfo {
    model_type: Option<ModelType>,
    store_type_name: Option<String>,
    store_type_base: Option<String>,
    size: Option<i32>,
    precision: Option<u32>,
    scale: Option<u32>,
    unicode: Option<bool>,
    fixed_length: Option<bool>,
    is_key_or_index: bool,
    is_row_version: bool,
    provider_type: Option<ModelType>,
    converter: Option<ValueConverter>,
}

impl MappingInfo {
    /// Resolve by model type only.
    #[must_use]
    pub fn for_type(model_type: ModelType) -> Self {
        Self {
            model_type: Some(model_type),
            ..Self::default()
        }
    }

    /// Resolve by store type name only.
    #[must_use]
    pub fn for_store_type(store_type: &str) -> Self {
        Self::default().with_store_type(store_type)
    }

    /// Resolve by model type and store type name.
    #[must_use]
    pub fn for_type_and_store_type(model_type: ModelType, store_type: &str) -> Self {
        Self::for_type(model_type).with_store_type(store_type)
    }

    /// Build the resolution input for a model property.
    ///
    /// Facets set on the property win over those parsed from its store type.
    #[must_use]
    pub fn from_property(property: &dyn PropertyFacets) -> Self {
        let store_type = inherited(property, &|p| p.store_type().map(str::to_string));
        let mut info = Self::for_type(property.model_type().clone());
        if let Some(store_type) = store_type {
            info = info.with_store_type(&store_type);
        }

        let size = inherited(property, &|p| p.max_length());
        let precision = inherited(property, &|p| p.precision());
        let scale = inherited(property, &|p| p.scale());
        info.size = size.or(info.size);
        info.precision = precision.or(info.precision);
        info.scale = scale.or(info.scale);
        info.unicode = inherited(property, &|p| p.unicode());
        info.fixed_length = inherited(property, &|p| p.fixed_length());
        info.is_key_or_index = property.is_key() || property.is_foreign_key() || property.is_index();
        info.is_row_version = property.is_row_version();
        info.provider_type = inherited(property, &|p| p.provider_type().cloned());
        info.converter = inherited(property, &|p| p.converter().cloned());
        info
    }

    /// Set the store type name; facets parsed from it fill only unset facets.
    #[must_use]
    pub fn with_store_type(mut self, store_type: &str) -> Self {
        let parsed = ParsedStoreType::parse(store_type);
        self.size = self.size.or(parsed.size);
        self.precision = self.precision.or(parsed.precision);
        self.scale = self.scale.or(parsed.scale);
        self.store_type_base = Some(parsed.base);
        self.store_type_name = Some(store_type.trim().to_string());
        self
    }

    /// Replace the model type.
    #[must_use]
    pub fn with_model_type(mut self, model_type: Option<ModelType>) -> Self {
        self.model_type = model_type;
        self
    }

    /// Set the size facet.
    #[must_use]
    pub fn with_size(mut self, size: i32) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the precision facet.
    #[must_use]
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    /// Set the scale facet.
    #[must_use]
    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Set the unicode facet.
    #[must_use]
    pub fn with_unicode(mut self, unicode: bool) -> Self {
        self.unicode = Some(unicode);
        self
    }

    /// Set the fixed-length facet.
    #[must_use]
    pub fn with_fixed_length(mut self, fixed_length: bool) -> Self {
        self.fixed_length = Some(fixed_length);
        self
    }

    /// Mark as part of a key or index.
    #[must_use]
    pub fn with_key_or_index(mut self, is_key_or_index: bool) -> Self {
        self.is_key_or_index = is_key_or_index;
        self
    }

    /// Mark as a row version.
    #[must_use]
    pub fn with_row_version(mut self, is_row_version: bool) -> Self {
        self.is_row_version = is_row_version;
        self
    }

    /// Request a specific provider type.
    #[must_use]
    pub fn with_provider_type(mut self, provider_type: Option<ModelType>) -> Self {
        self.provider_type = provider_type;
        self
    }

    /// Supply a converter to compose onto the result.
    #[must_use]
    pub fn with_converter(mut self, converter: Option<ValueConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Fill unset facets from converter hints.
    #[must_use]
    pub fn with_hints(mut self, hints: Option<ConverterMappingHints>) -> Self {
        if let Some(h) = hints {
            self.size = self.size.or(h.size);
            self.precision = self.precision.or(h.precision);
            self.scale = self.scale.or(h.scale);
            self.unicode = self.unicode.or(h.unicode);
            self.fixed_length = self.fixed_length.or(h.fixed_length);
        }
        self
    }

    /// Model type.
    #[must_use]
    pub fn model_type(&self) -> Option<&ModelType> {
        self.model_type.as_ref()
    }

    /// Store type name as given.
    #[must_use]
    pub fn store_type_name(&self) -> Option<&str> {
        self.store_type_name.as_deref()
    }

    /// Store type name without facets.
    #[must_use]
    pub fn store_type_base(&self) -> Option<&str> {
        self.store_type_base.as_deref()
    }

    /// Size facet.
    #[must_use]
    pub fn size(&self) -> Option<i32> {
        self.size
    }

    /// Precision facet.
    #[must_use]
    pub fn precision(&self) -> Option<u32> {
        self.precision
    }

    /// Scale facet.
    #[must_use]
    pub fn scale(&self) -> Option<u32> {
        self.scale
    }

    /// Unicode facet.
    #[must_use]
    pub fn unicode(&self) -> Option<bool> {
        self.unicode
    }

    /// Fixed-length facet.
    #[must_use]
    pub fn fixed_length(&self) -> Option<bool> {
        self.fixed_length
    }

    /// Key-or-index flag.
    #[must_use]
    pub fn is_key_or_index(&self) -> bool {
        self.is_key_or_index
    }

    /// Row-version flag.
    #[must_use]
    pub fn is_row_version(&self) -> bool {
        self.is_row_version
    }

    /// Requested provider type.
    #[must_use]
    pub fn provider_type(&self) -> Option<&ModelType> {
        self.provider_type.as_ref()
    }

    /// Supplied converter.
    #[must_use]
    pub fn converter(&self) -> Option<&ValueConverter> {
        self.converter.as_ref()
    }
}

/// A plain [`PropertyFacets`] implementation.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    name: String,
    model_type: ModelType,
    store_type: Option<String>,
    max_length: Option<i32>,
    precision: Option<u32>,
    scale: Option<u32>,
    unicode: Option<bool>,
    fixed_length: Option<bool>,
    is_key: bool,
    is_foreign_key: bool,
    is_index: bool,
    is_concurrency_token: bool,
    is_row_version: bool,
    provider_type: Option<ModelType>,
    converter: Option<ValueConverter>,
    principals: Vec<PropertyDescriptor>,
}

impl PropertyDescriptor {
    /// Create a property with no facets set.
    #[must_use]
    pub fn new(name: impl Into<String>, model_type: ModelType) -> Self {
        Self {
            name: name.into(),
            model_type,
            store_type: None,
            max_length: None,
            precision: None,
            scale: None,
            unicode: None,
            fixed_length: None,
            is_key: false,
            is_foreign_key: false,
            is_index: false,
            is_concurrency_token: false,
            is_row_version: false,
            provider_type: None,
            converter: None,
            principals: Vec::new(),
        }
    }

    /// Set the column type.
    #[must_use]
    pub fn store_type(mut self, store_type: impl Into<String>) -> Self {
        self.store_type = Some(store_type.into());
        self
    }

    /// Set the maximum length.
    #[must_use]
    pub fn max_length(mut self, max_length: i32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Set precision and scale.
    #[must_use]
    pub fn precision(mut self, precision: u32, scale: Option<u32>) -> Self {
        self.precision = Some(precision);
        self.scale = scale;
        self
    }

    /// Set the unicode flag.
    #[must_use]
    pub fn unicode(mut self, unicode: bool) -> Self {
        self.unicode = Some(unicode);
        self
    }

    /// Set the fixed-length flag.
    #[must_use]
    pub fn fixed_length(mut self, fixed_length: bool) -> Self {
        self.fixed_length = Some(fixed_length);
        self
    }

    /// Mark as a key.
    #[must_use]
    pub fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    /// Mark as an index column.
    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.is_index = true;
        self
    }

    /// Mark as a store-generated row version.
    #[must_use]
    pub fn row_version(mut self) -> Self {
        self.is_concurrency_token = true;
        self.is_row_version = true;
        self
    }

    /// Convert to `provider_type` before storing.
    #[must_use]
    pub fn provider_type(mut self, provider_type: ModelType) -> Self {
        self.provider_type = Some(provider_type);
        self
    }

    /// Use an explicit converter.
    #[must_use]
    pub fn converter(mut self, converter: ValueConverter) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Reference `principal` through a foreign key.
    #[must_use]
    pub fn references(mut self, principal: PropertyDescriptor) -> Self {
        self.is_foreign_key = true;
        self.principals.push(principal);
        self
    }
}

impl PropertyFacets for PropertyDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_type(&self) -> &ModelType {
        &self.model_type
    }

    fn store_type(&self) -> Option<&str> {
        self.store_type.as_deref()
    }

    fn max_length(&self) -> Option<i32> {
        self.max_length
    }

    fn precision(&self) -> Option<u32> {
        self.precision
    }

    fn scale(&self) -> Option<u32> {
        self.scale
    }

    fn unicode(&self) -> Option<bool> {
        self.unicode
    }

    fn fixed_length(&self) -> Option<bool> {
        self.fixed_length
    }

    fn is_key(&self) -> bool {
        self.is_key
    }

    fn is_foreign_key(&self) -> bool {
        self.is_foreign_key
    }

    fn is_index(&self) -> bool {
        self.is_index
    }

    fn is_concurrency_token(&self) -> bool {
        self.is_concurrency_token
    }

    fn is_row_version(&self) -> bool {
        self.is_row_version
    }

    fn provider_type(&self) -> Option<&ModelType> {
        self.provider_type.as_ref()
    }

    fn converter(&self) -> Option<&ValueConverter> {
        self.converter.as_ref()
    }

    fn principals(&self) -> Vec<&dyn PropertyFacets> {
        self.principals
            .iter()
            .map(|p| p as &dyn PropertyFacets)
            .collect()
    }
}
