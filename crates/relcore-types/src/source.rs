//! Type-mapping resolution.
//!
//! A provider supplies raw mappings through [`TypeMappingProvider`]; the
//! [`TypeMappingSource`] layers the provider-independent algorithm on top:
//!
//! 1. a supplied converter resolves its provider type, then is composed on;
//! 2. a nullable wrapper is stripped;
//! 3. the provider is asked directly (store type first, then model type);
//! 4. an enum without a direct mapping falls back to its underlying integer
//!    type, then to `String`, with the matching enum converter;
//! 5. the converter selector is searched for a provider type the provider
//!    can map, and the winning converter is composed on.
//!
//! Every result, including a miss, is memoized under the full
//! [`MappingInfo`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::{CacheStats, ConcurrentCache};
use crate::converter::ValueConverter;
use crate::error::TypeError;
use crate::info::{MappingInfo, PropertyFacets};
use crate::mapping::TypeMapping;
use crate::model_type::{EnumType, ModelType};
use crate::selector::{DefaultValueConverterSelector, ValueConverterSelector};
use crate::value::SqlValue;

/// Provider-specific raw lookup.
pub trait TypeMappingProvider: Send + Sync {
    /// Find a mapping without converter search or enum fallback.
    ///
    /// The model type in `info` is never a nullable wrapper.
    fn find_raw_mapping(&self, info: &MappingInfo) -> Option<TypeMapping>;
}

/// Builds a mapping for a named (provider-specific) model type.
pub type MappingFactory = Arc<dyn Fn(&MappingInfo) -> Option<TypeMapping> + Send + Sync>;

/// Outcome of a store-type table lookup.
#[derive(Debug, Clone)]
pub enum StoreTypeMatch {
    /// The store type is not in the table.
    NotListed,
    /// The store type is listed, but not for the requested model type.
    Incompatible,
    /// A mapping, with the requested facets applied.
    Found(TypeMapping),
}

/// Lookup tables backing a [`TypeMappingProvider`].
#[derive(Clone, Default)]
pub struct MappingTable {
    store_types: HashMap<String, Vec<TypeMapping>>,
    model_types: HashMap<ModelType, TypeMapping>,
    named: HashMap<String, MappingFactory>,
}

impl MappingTable {
    /// Create empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `mapping` under a store type name (case-insensitive).
    ///
    /// Several mappings may share a name; they are told apart by model type
    /// and the first registered wins when no model type is requested.
    #[must_use]
    pub fn with_store_type(mut self, name: &str, mapping: TypeMapping) -> Self {
        self.store_types
            .entry(name.to_lowercase())
            .or_default()
            .push(mapping);
        self
    }

    /// Register the default mapping for a model type.
    #[must_use]
    pub fn with_model_type(mut self, model_type: ModelType, mapping: TypeMapping) -> Self {
        self.model_types.insert(model_type, mapping);
        self
    }

    /// Register a factory for a model type known by name only.
    #[must_use]
    pub fn with_named_factory(mut self, name: &str, factory: MappingFactory) -> Self {
        self.named.insert(name.to_string(), factory);
        self
    }

    /// Look up by the store type in `info`: the full name, then its base.
    pub fn find_by_store_type(&self, info: &MappingInfo) -> StoreTypeMatch {
        let Some(name) = info.store_type_name() else {
            return StoreTypeMatch::NotListed;
        };
        let base = info.store_type_base().unwrap_or(name);
        let Some(candidates) = self
            .store_types
            .get(&name.to_lowercase())
            .or_else(|| self.store_types.get(&base.to_lowercase()))
        else {
            return StoreTypeMatch::NotListed;
        };

        let chosen = match info.model_type() {
            Some(wanted) => candidates.iter().find(|c| c.model_type() == wanted),
            None => candidates.first(),
        };
        let Some(mapping) = chosen else {
            return StoreTypeMatch::Incompatible;
        };

        let (size, precision, scale) = (info.size(), info.precision(), info.scale());
        if mapping.store_type() == name || mapping.store_type_base() == base {
            StoreTypeMatch::Found(mapping.with_facets(size, precision, scale))
        } else {
            // Keep the base as the caller wrote it.
            StoreTypeMatch::Found(mapping.with_store_type_base(base, size, precision, scale))
        }
    }

    /// Look up by model type: the direct table, then named factories.
    pub fn find_by_model_type(&self, info: &MappingInfo) -> Option<TypeMapping> {
        let model_type = info.model_type()?;
        let mapping = match self.model_types.get(model_type) {
            Some(m) => m.clone(),
            None => (self.named.get(&model_type.name())?)(info)?,
        };
        Some(mapping.with_facets(info.size(), info.precision(), info.scale()))
    }
}

impl TypeMappingProvider for MappingTable {
    fn find_raw_mapping(&self, info: &MappingInfo) -> Option<TypeMapping> {
        match self.find_by_store_type(info) {
            StoreTypeMatch::Found(m) => Some(m),
            StoreTypeMatch::Incompatible => None,
            StoreTypeMatch::NotListed => self.find_by_model_type(info),
        }
    }
}

impl std::fmt::Debug for MappingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingTable")
            .field("store_types", &self.store_types.len())
            .field("model_types", &self.model_types.len())
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Memoizing type-mapping resolver over a provider.
pub struct TypeMappingSource<P> {
    provider: P,
    selector: Arc<dyn ValueConverterSelector>,
    cache: ConcurrentCache<MappingInfo, Option<TypeMapping>>,
    enum_converters: ConcurrentCache<(ModelType, bool), ValueConverter>,
}

impl<P: TypeMappingProvider> TypeMappingSource<P> {
    /// Create a resolver with the built-in converter catalog.
    pub fn new(provider: P) -> Self {
        Self::with_selector(provider, Arc::new(DefaultValueConverterSelector::new()))
    }

    /// Create a resolver with a custom converter catalog.
    pub fn with_selector(provider: P, selector: Arc<dyn ValueConverterSelector>) -> Self {
        Self {
            provider,
            selector,
            cache: ConcurrentCache::new(),
            enum_converters: ConcurrentCache::new(),
        }
    }

    /// The underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Resolution cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Resolve a mapping, or `None` when nothing fits.
    pub fn find_mapping(&self, info: &MappingInfo) -> Option<TypeMapping> {
        self.cache.get_or_insert_with(info.clone(), |key| {
            let resolved = self.resolve(key);
            tracing::trace!(
                model_type = ?key.model_type(),
                store_type = ?key.store_type_name(),
                resolved = ?resolved.as_ref().map(TypeMapping::store_type),
                "type mapping cache miss"
            );
            resolved
        })
    }

    /// Resolve by model type.
    pub fn find_mapping_for_type(&self, model_type: &ModelType) -> Option<TypeMapping> {
        self.find_mapping(&MappingInfo::for_type(model_type.clone()))
    }

    /// Resolve by store type name.
    pub fn find_mapping_for_store_type(&self, store_type: &str) -> Option<TypeMapping> {
        self.find_mapping(&MappingInfo::for_store_type(store_type))
    }

    /// Resolve by model type and store type name.
    pub fn find_mapping_for_type_and_store_type(
        &self,
        model_type: &ModelType,
        store_type: &str,
    ) -> Option<TypeMapping> {
        self.find_mapping(&MappingInfo::for_type_and_store_type(
            model_type.clone(),
            store_type,
        ))
    }

    /// Resolve for a model property, inheriting facets from its principals.
    pub fn find_mapping_for_property(&self, property: &dyn PropertyFacets) -> Option<TypeMapping> {
        self.find_mapping(&MappingInfo::from_property(property))
    }

    /// Resolve from the runtime type of a value. NULL has no mapping.
    pub fn find_mapping_for_value(&self, value: &SqlValue) -> Option<TypeMapping> {
        self.find_mapping_for_type(&value.model_type()?)
    }

    /// Like [`find_mapping_for_type`](Self::find_mapping_for_type), failing on a miss.
    pub fn get_mapping(&self, model_type: &ModelType) -> Result<TypeMapping, TypeError> {
        self.find_mapping_for_type(model_type)
            .ok_or_else(|| TypeError::UnsupportedType {
                model_type: model_type.name(),
            })
    }

    /// Like [`find_mapping_for_store_type`](Self::find_mapping_for_store_type), failing on a miss.
    pub fn get_mapping_for_store_type(&self, store_type: &str) -> Result<TypeMapping, TypeError> {
        self.find_mapping_for_store_type(store_type)
            .ok_or_else(|| TypeError::UnsupportedStoreType {
                store_type: store_type.to_string(),
            })
    }

    /// Like [`find_mapping_for_property`](Self::find_mapping_for_property), failing on a miss.
    pub fn get_mapping_for_property(
        &self,
        property: &dyn PropertyFacets,
    ) -> Result<TypeMapping, TypeError> {
        self.find_mapping_for_property(property)
            .ok_or_else(|| TypeError::UnsupportedProperty {
                property: property.name().to_string(),
                model_type: property.model_type().name(),
            })
    }

    fn resolve(&self, info: &MappingInfo) -> Option<TypeMapping> {
        if let Some(converter) = info.converter() {
            let provider_info = info
                .clone()
                .with_converter(None)
                .with_provider_type(None)
                .with_model_type(Some(converter.provider_type().clone()))
                .with_hints(converter.hints());
            return self
                .find_mapping(&provider_info)
                .map(|m| m.with_composed_converter(Some(converter)));
        }

        let model_type = info.model_type().map(|t| t.unwrap_nullable().clone());
        let wanted = info.provider_type().map(|t| t.unwrap_nullable().clone());
        let info = info.clone().with_model_type(model_type.clone());

        if wanted.is_none() || wanted == model_type {
            let direct = info.clone().with_provider_type(None);
            if let Some(mapping) = self.provider.find_raw_mapping(&direct) {
                return Some(mapping);
            }
        }

        let model_type = model_type?;

        if let (ModelType::Enum(enum_type), None) = (&model_type, &wanted) {
            for to_string in [false, true] {
                let converter = self.enum_converter(enum_type, to_string);
                if let Some(mapping) = self.find_with_converter(&info, &converter) {
                    return Some(mapping);
                }
            }
        }

        let requested = self.selector.select(&model_type, wanted.as_ref());
        let any = wanted
            .as_ref()
            .map(|_| self.selector.select(&model_type, None))
            .into_iter()
            .flatten();
        requested
            .chain(any)
            .find_map(|candidate| self.find_with_converter(&info, &candidate.create()))
    }

    fn find_with_converter(&self, info: &MappingInfo, converter: &ValueConverter) -> Option<TypeMapping> {
        let provider_info = info
            .clone()
            .with_provider_type(None)
            .with_model_type(Some(converter.provider_type().clone()))
            .with_hints(converter.hints());
        self.provider
            .find_raw_mapping(&provider_info)
            .map(|m| m.with_composed_converter(Some(converter)))
    }

    fn enum_converter(&self, enum_type: &Arc<EnumType>, to_string: bool) -> ValueConverter {
        self.enum_converters.get_or_insert_with(
            (ModelType::Enum(Arc::clone(enum_type)), to_string),
            |_| {
                if to_string {
                    ValueConverter::enum_to_string(enum_type)
                } else {
                    ValueConverter::enum_to_number(enum_type)
                }
            },
        )
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for TypeMappingSource<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeMappingSource")
            .field("provider", &self.provider)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mapping::TypeKind;
    use crate::value::EnumValue;

    fn table() -> MappingTable {
        let int = TypeMapping::new("integer", TypeKind::Int32);
        let text = TypeMapping::new("text", TypeKind::String);
        MappingTable::new()
            .with_store_type("integer", int.clone())
            .with_store_type("text", text.clone())
            .with_store_type("varchar", TypeMapping::new("varchar", TypeKind::String).with_unicode(false))
            .with_model_type(ModelType::I32, int)
            .with_model_type(ModelType::String, text)
    }

    #[test]
    fn test_store_type_clone_keeps_caller_case() {
        let source = TypeMappingSource::new(table());
        let m = source.find_mapping_for_store_type("VARCHAR(20)").unwrap();
        assert_eq!(m.store_type(), "VARCHAR(20)");
        assert_eq!(m.size(), Some(20));
    }

    #[test]
    fn test_incompatible_store_type_is_miss() {
        let source = TypeMappingSource::new(table());
        assert!(source
            .find_mapping_for_type_and_store_type(&ModelType::Decimal, "integer")
            .is_none());
    }

    #[test]
    fn test_nullable_is_unwrapped() {
        let source = TypeMappingSource::new(table());
        let m = source.find_mapping_for_type(&ModelType::I32.nullable()).unwrap();
        assert_eq!(m.store_type(), "integer");
    }

    #[test]
    fn test_enum_falls_back_to_underlying() {
        let source = TypeMappingSource::new(table());
        let e = EnumType::new("Status", ModelType::I32, [("Open", 0), ("Closed", 1)]);
        let m = source.find_mapping_for_type(&ModelType::Enum(Arc::clone(&e))).unwrap();
        assert_eq!(m.store_type(), "integer");
        let v = SqlValue::Enum(EnumValue::new(e, 1));
        assert_eq!(m.convert_to_provider(&v).unwrap(), SqlValue::Int(1));
    }

    #[test]
    fn test_selector_composes_converter() {
        let source = TypeMappingSource::new(table());
        let m = source.find_mapping_for_type(&ModelType::Uuid).unwrap();
        // The uuid-to-string converter hints a size of 36.
        assert_eq!(m.store_type(), "text(36)");
        assert_eq!(m.model_type(), &ModelType::Uuid);
    }

    #[test]
    fn test_misses_are_cached() {
        let source = TypeMappingSource::new(table());
        assert!(source.find_mapping_for_type(&ModelType::Bytes).is_none());
        assert!(source.find_mapping_for_type(&ModelType::Bytes).is_none());
        let stats = source.cache_stats();
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_get_mapping_errors() {
        let source = TypeMappingSource::new(table());
        assert_eq!(
            source.get_mapping(&ModelType::Bytes).unwrap_err(),
            TypeError::UnsupportedType {
                model_type: "bytes".into()
            }
        );
        assert!(matches!(
            source.get_mapping_for_store_type("geography"),
            Err(TypeError::UnsupportedStoreType { .. })
        ));
    }
}
