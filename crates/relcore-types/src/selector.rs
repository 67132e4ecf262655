//! Discovery of value converters.
//!
//! The resolver asks a [`ValueConverterSelector`] for converters that can
//! take a model type to some provider type it has a mapping for. Candidates
//! are produced lazily in preference order; the resolver stops at the first
//! one that resolves.

use crate::cache::ConcurrentCache;
use crate::converter::{ConverterMappingHints, ValueConverter};
use crate::model_type::ModelType;

/// One converter candidate.
#[derive(Debug, Clone)]
pub struct ValueConverterInfo {
    converter: ValueConverter,
}

impl ValueConverterInfo {
    /// Wrap a converter.
    #[must_use]
    pub fn new(converter: ValueConverter) -> Self {
        Self { converter }
    }

    /// Model side of the candidate.
    #[must_use]
    pub fn model_type(&self) -> &ModelType {
        self.converter.model_type()
    }

    /// Provider side of the candidate.
    #[must_use]
    pub fn provider_type(&self) -> &ModelType {
        self.converter.provider_type()
    }

    /// Facet hints for the provider-side lookup.
    #[must_use]
    pub fn mapping_hints(&self) -> Option<ConverterMappingHints> {
        self.converter.hints()
    }

    /// The converter.
    #[must_use]
    pub fn create(&self) -> ValueConverter {
        self.converter.clone()
    }
}

/// A catalog of value converters.
pub trait ValueConverterSelector: Send + Sync {
    /// Candidates converting `model_type` to `provider_type` (or to any
    /// provider type when `None`), in preference order.
    ///
    /// Each call returns a fresh iterator.
    fn select<'a>(
        &'a self,
        model_type: &'a ModelType,
        provider_type: Option<&'a ModelType>,
    ) -> Box<dyn Iterator<Item = ValueConverterInfo> + 'a>;
}

/// The built-in catalog.
///
/// Converters are created once per (model, provider) pair and reused, so a
/// given pair always yields the same converter instance.
#[derive(Debug, Default)]
pub struct DefaultValueConverterSelector {
    converters: ConcurrentCache<(ModelType, ModelType), ValueConverter>,
}

impl DefaultValueConverterSelector {
    /// Create a selector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn candidates(model_type: &ModelType) -> Vec<ModelType> {
        match model_type {
            ModelType::Enum(e) => vec![e.underlying().clone(), ModelType::String],
            ModelType::Bool => vec![
                ModelType::U8,
                ModelType::I16,
                ModelType::I32,
                ModelType::I64,
                ModelType::String,
            ],
            ModelType::Uuid => vec![ModelType::String, ModelType::Bytes],
            ModelType::Char
            | ModelType::U8
            | ModelType::I16
            | ModelType::I32
            | ModelType::I64
            | ModelType::F32
            | ModelType::F64
            | ModelType::Decimal
            | ModelType::Date
            | ModelType::Time
            | ModelType::DateTime
            | ModelType::DateTimeOffset => vec![ModelType::String],
            ModelType::String
            | ModelType::Bytes
            | ModelType::Named(_)
            | ModelType::Nullable(_) => Vec::new(),
        }
    }

    fn converter(&self, model_type: &ModelType, provider_type: &ModelType) -> ValueConverter {
        self.converters
            .get_or_insert_with((model_type.clone(), provider_type.clone()), |(m, p)| {
                build(m, p)
            })
    }
}

fn build(model_type: &ModelType, provider_type: &ModelType) -> ValueConverter {
    match (model_type, provider_type) {
        (ModelType::Enum(e), ModelType::String) => ValueConverter::enum_to_string(e),
        (ModelType::Enum(e), _) => ValueConverter::enum_to_number(e),
        (ModelType::Bool, p) if p.is_integer() => ValueConverter::bool_to_number(p.clone()),
        (ModelType::Uuid, ModelType::Bytes) => ValueConverter::uuid_to_bytes(),
        (ModelType::Uuid, _) => ValueConverter::to_string_converter(ModelType::Uuid)
            .with_hints(ConverterMappingHints::with_size(36)),
        (m, _) => ValueConverter::to_string_converter(m.clone()),
    }
}

impl ValueConverterSelector for DefaultValueConverterSelector {
    fn select<'a>(
        &'a self,
        model_type: &'a ModelType,
        provider_type: Option<&'a ModelType>,
    ) -> Box<dyn Iterator<Item = ValueConverterInfo> + 'a> {
        let model_type = model_type.unwrap_nullable();
        let provider_type = provider_type.map(ModelType::unwrap_nullable);
        Box::new(
            Self::candidates(model_type)
                .into_iter()
                .filter(move |p| provider_type.is_none_or(|wanted| wanted == p))
                .map(move |p| ValueConverterInfo::new(self.converter(model_type, &p))),
        )
    }
}
