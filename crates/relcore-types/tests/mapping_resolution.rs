//! Type-mapping resolution behavior.
//!
//! These tests exercise the resolver end to end: facet parsing and
//! rendering, memoization, enum and converter fallbacks, provider tables
//! and literal generation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use proptest::prelude::*;
use relcore_types::mapping::render_store_type;
use relcore_types::{
    EnumType, EnumValue, MappingInfo, MappingTable, ModelType, ParsedStoreType, PropertyDescriptor,
    SpatialCapability, SqlServerTypeMappingProvider, SqlServerTypeMappingSource, SqlValue,
    StoreTypePostfix, TypeError, TypeKind, TypeMapping, TypeMappingSource,
};

fn generic_table() -> MappingTable {
    let int = TypeMapping::new("integer", TypeKind::Int32);
    let text = TypeMapping::new("text", TypeKind::String);
    let blob = TypeMapping::new("blob", TypeKind::ByteArray);
    let real = TypeMapping::new("real", TypeKind::Double);
    MappingTable::new()
        .with_store_type("integer", int.clone())
        .with_store_type("text", text.clone())
        .with_store_type("blob", blob.clone())
        .with_store_type("real", real.clone())
        .with_model_type(ModelType::I32, int)
        .with_model_type(ModelType::String, text)
        .with_model_type(ModelType::Bytes, blob)
        .with_model_type(ModelType::F64, real)
}

// ============================================================================
// Facet Parsing and Rendering
// ============================================================================

mod facets {
    use super::*;

    #[test]
    fn test_decimal_round_trip() {
        let rendered = render_store_type(
            "decimal",
            StoreTypePostfix::PrecisionAndScale,
            None,
            Some(18),
            Some(2),
        );
        assert_eq!(rendered, "decimal(18,2)");

        let parsed = ParsedStoreType::parse(&rendered);
        assert_eq!(parsed.base, "decimal");
        assert_eq!(parsed.precision, Some(18));
        assert_eq!(parsed.scale, Some(2));
    }

    #[test]
    fn test_max_is_minus_one() {
        let parsed = ParsedStoreType::parse("nvarchar(MAX)");
        assert_eq!(parsed.size, Some(-1));
        assert_eq!(
            render_store_type("nvarchar", StoreTypePostfix::Size, Some(-1), None, None),
            "nvarchar(max)"
        );
    }

    #[test]
    fn test_malformed_facets_are_ignored() {
        for name in ["varchar(abc)", "decimal(18,x)", "varchar(", "varchar(-5)"] {
            let parsed = ParsedStoreType::parse(name);
            assert_eq!(parsed.size, None, "{name}");
            assert_eq!(parsed.precision, None, "{name}");
            assert_eq!(parsed.scale, None, "{name}");
        }
    }

    #[test]
    fn test_postfix_policy_limits_substitution() {
        let date = TypeMapping::with_postfix_policy("date", TypeKind::Date, StoreTypePostfix::None);
        let same = date.with_facets(Some(10), Some(3), Some(1));
        assert!(TypeMapping::ptr_eq(&date, &same));
        assert_eq!(same.store_type(), "date");

        let text = TypeMapping::new("varchar", TypeKind::String);
        let sized = text.with_facets(Some(20), Some(5), None);
        assert_eq!(sized.store_type(), "varchar(20)");
        assert_eq!(sized.precision(), None);
        assert_eq!(text.store_type(), "varchar");
    }

    proptest! {
        #[test]
        fn prop_precision_and_scale_round_trip(
            base in "[a-z][a-z ]{0,14}[a-z]",
            precision in 1u32..=38,
            scale_seed in 0u32..=38,
        ) {
            let scale = scale_seed.min(precision);
            let rendered = render_store_type(
                &base,
                StoreTypePostfix::PrecisionAndScale,
                None,
                Some(precision),
                Some(scale),
            );
            let parsed = ParsedStoreType::parse(&rendered);
            prop_assert_eq!(parsed.base, base);
            prop_assert_eq!(parsed.precision, Some(precision));
            prop_assert_eq!(parsed.scale, Some(scale));
        }

        #[test]
        fn prop_size_round_trip(base in "[a-z]{1,16}", size in prop_oneof![Just(-1i32), 0i32..=8000]) {
            let rendered = render_store_type(&base, StoreTypePostfix::Size, Some(size), None, None);
            let parsed = ParsedStoreType::parse(&rendered);
            prop_assert_eq!(parsed.size, Some(size));
            let again = render_store_type(&parsed.base, StoreTypePostfix::Size, parsed.size, None, None);
            prop_assert_eq!(again, rendered);
        }

        #[test]
        fn prop_mapping_store_type_is_derived(size in 1i32..=4000) {
            let mapping = TypeMapping::new("nvarchar", TypeKind::String).with_size(size);
            prop_assert_eq!(mapping.store_type(), format!("nvarchar({size})"));
            let reparsed = TypeMapping::new(mapping.store_type(), TypeKind::String);
            prop_assert_eq!(reparsed.store_type(), mapping.store_type());
            prop_assert_eq!(reparsed.size(), Some(size));
        }
    }
}

// ============================================================================
// Determinism and Caching
// ============================================================================

mod determinism {
    use super::*;

    fn facets(m: &TypeMapping) -> (String, Option<i32>, Option<u32>, Option<u32>, bool) {
        (
            m.store_type().to_string(),
            m.size(),
            m.precision(),
            m.scale(),
            m.is_unicode(),
        )
    }

    #[test]
    fn test_same_input_same_result() {
        let source = SqlServerTypeMappingSource::sql_server();
        let inputs = [
            MappingInfo::for_type(ModelType::String),
            MappingInfo::for_type(ModelType::String).with_key_or_index(true),
            MappingInfo::for_store_type("decimal(10,4)"),
            MappingInfo::for_type_and_store_type(ModelType::Bytes, "varbinary(16)"),
            MappingInfo::for_type(ModelType::DateTime),
        ];
        for info in &inputs {
            let first = source.find_mapping(info).unwrap();
            let second = source.find_mapping(info).unwrap();
            assert_eq!(facets(&first), facets(&second));
            assert!(TypeMapping::ptr_eq(&first, &second));
        }
        assert_eq!(source.cache_stats().hits, inputs.len() as u64);
    }

    #[test]
    fn test_fresh_sources_agree() {
        let a = SqlServerTypeMappingSource::sql_server();
        let b = SqlServerTypeMappingSource::sql_server();
        for t in [ModelType::Decimal, ModelType::Char, ModelType::F32, ModelType::Uuid] {
            assert_eq!(
                facets(&a.find_mapping_for_type(&t).unwrap()),
                facets(&b.find_mapping_for_type(&t).unwrap())
            );
        }
    }

    #[test]
    fn test_concurrent_resolution_shares_instance() {
        let source = Arc::new(SqlServerTypeMappingSource::sql_server());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let source = Arc::clone(&source);
                std::thread::spawn(move || {
                    source
                        .find_mapping(&MappingInfo::for_store_type("nvarchar(128)"))
                        .unwrap()
                })
            })
            .collect();
        let results: Vec<TypeMapping> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let cached = source
            .find_mapping(&MappingInfo::for_store_type("nvarchar(128)"))
            .unwrap();
        for m in &results {
            assert!(TypeMapping::ptr_eq(m, &cached));
        }
    }
}

// ============================================================================
// Enum and Converter Fallbacks
// ============================================================================

mod fallbacks {
    use super::*;

    fn status() -> Arc<EnumType> {
        EnumType::new(
            "Status",
            ModelType::I32,
            [("Draft", 0), ("Published", 1), ("Archived", 2)],
        )
    }

    #[test]
    fn test_enum_against_string_only_store_type() {
        let source = TypeMappingSource::new(generic_table());
        let e = status();
        let mapping = source
            .find_mapping_for_type_and_store_type(&ModelType::Enum(Arc::clone(&e)), "text")
            .unwrap();
        assert_eq!(mapping.store_type(), "text");

        for (name, value) in e.members() {
            let model = SqlValue::Enum(EnumValue::new(Arc::clone(&e), *value));
            let provider = mapping.convert_to_provider(&model).unwrap();
            assert_eq!(provider.as_str(), Some(name.as_str()));
            assert_eq!(mapping.convert_from_provider(&provider).unwrap(), model);
        }
    }

    #[test]
    fn test_enum_prefers_underlying_number() {
        let source = TypeMappingSource::new(generic_table());
        let e = status();
        let mapping = source.find_mapping_for_type(&ModelType::Enum(Arc::clone(&e))).unwrap();
        assert_eq!(mapping.store_type(), "integer");
        assert_eq!(mapping.model_type(), &ModelType::Enum(Arc::clone(&e)));
        assert_eq!(
            mapping.convert_to_provider(&SqlValue::Int(2)).unwrap(),
            SqlValue::Int(2)
        );
        assert_eq!(
            mapping.convert_from_provider(&SqlValue::Int(1)).unwrap(),
            SqlValue::Enum(EnumValue::new(e, 1))
        );
    }

    #[test]
    fn test_requested_provider_type_picks_converter() {
        let source = TypeMappingSource::new(generic_table());
        let info = MappingInfo::for_type(ModelType::Bool).with_provider_type(Some(ModelType::String));
        let mapping = source.find_mapping(&info).unwrap();
        assert_eq!(mapping.store_type(), "text");
        assert_eq!(
            mapping.convert_to_provider(&SqlValue::Bool(true)).unwrap(),
            SqlValue::from("true")
        );
    }

    #[test]
    fn test_provider_type_without_converter_falls_back_to_any() {
        let source = TypeMappingSource::new(generic_table());
        // No char-to-bytes converter exists; the catalog's char-to-string wins.
        let info = MappingInfo::for_type(ModelType::Char).with_provider_type(Some(ModelType::Bytes));
        let mapping = source.find_mapping(&info).unwrap();
        assert_eq!(mapping.store_type(), "text");
    }

    #[test]
    fn test_supplied_converter_is_composed() {
        let source = TypeMappingSource::new(generic_table());
        let conv = relcore_types::ValueConverter::uuid_to_bytes();
        let info = MappingInfo::for_type(ModelType::Uuid).with_converter(Some(conv.clone()));
        let mapping = source.find_mapping(&info).unwrap();
        assert_eq!(mapping.store_type(), "blob(16)");
        assert_eq!(mapping.converter(), Some(&conv));
    }

    #[test]
    fn test_float_double_literals() {
        let source = TypeMappingSource::new(generic_table());
        let real = source.find_mapping_for_type(&ModelType::F64).unwrap();
        assert_eq!(real.generate_sql_literal(&SqlValue::Double(1.0)).unwrap(), "1.0");
        assert_eq!(real.generate_sql_literal(&SqlValue::Double(f64::NAN)).unwrap(), "NaN");
        assert_eq!(real.generate_sql_literal(&SqlValue::Null).unwrap(), "NULL");
    }

    #[test]
    fn test_generic_text_and_binary_literals() {
        let source = TypeMappingSource::new(generic_table());
        let blob = source.find_mapping_for_type(&ModelType::Bytes).unwrap();
        assert_eq!(
            blob.generate_sql_literal(&SqlValue::from(vec![0x0A_u8, 0xFF])).unwrap(),
            "X'0AFF'"
        );
        let text = source.find_mapping_for_type(&ModelType::String).unwrap();
        assert_eq!(
            text.generate_sql_literal(&SqlValue::from("O'Brien")).unwrap(),
            "'O''Brien'"
        );
    }
}

// ============================================================================
// SQL Server Tables
// ============================================================================

mod sql_server {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_store_type_synonyms() {
        let source = SqlServerTypeMappingSource::sql_server();
        let m = source
            .find_mapping_for_store_type("national character varying(30)")
            .unwrap();
        assert_eq!(m.store_type(), "national character varying(30)");
        assert!(m.is_unicode());
        assert_eq!(m.model_type(), &ModelType::String);

        let ts = source.find_mapping_for_store_type("timestamp").unwrap();
        assert_eq!(ts.model_type(), &ModelType::Bytes);
        assert_eq!(ts.size(), Some(8));
    }

    #[test]
    fn test_store_type_case_is_preserved() {
        let source = SqlServerTypeMappingSource::sql_server();
        let m = source.find_mapping_for_store_type("NVARCHAR(40)").unwrap();
        assert_eq!(m.store_type(), "NVARCHAR(40)");
        assert_eq!(m.size(), Some(40));
    }

    #[test]
    fn test_property_inherits_principal_facets() {
        let source = SqlServerTypeMappingSource::sql_server();
        let principal = PropertyDescriptor::new("Code", ModelType::String)
            .key()
            .max_length(64)
            .unicode(false);
        let dependent = PropertyDescriptor::new("CountryCode", ModelType::String).references(principal);
        let m = source.find_mapping_for_property(&dependent).unwrap();
        assert_eq!(m.store_type(), "varchar(64)");
        assert!(!m.is_unicode());
    }

    #[test]
    fn test_unmapped_property_is_an_error() {
        let source = SqlServerTypeMappingSource::sql_server();
        let p = PropertyDescriptor::new("Shape", ModelType::named("geometry"));
        assert!(matches!(
            source.get_mapping_for_property(&p),
            Err(TypeError::UnsupportedProperty { .. })
        ));
    }

    #[test]
    fn test_datetime_literal_uses_precision() {
        let source = SqlServerTypeMappingSource::sql_server();
        let dt = NaiveDate::from_ymd_opt(2020, 1, 31)
            .unwrap()
            .and_hms_milli_opt(10, 0, 0, 250)
            .unwrap();
        let full = source.find_mapping_for_type(&ModelType::DateTime).unwrap();
        assert_eq!(
            full.generate_sql_literal(&SqlValue::DateTime(dt)).unwrap(),
            "'2020-01-31T10:00:00.2500000'"
        );
        let short = source.find_mapping_for_store_type("datetime2(3)").unwrap();
        assert_eq!(
            short.generate_sql_literal(&SqlValue::DateTime(dt)).unwrap(),
            "'2020-01-31T10:00:00.250'"
        );
    }

    #[derive(Debug)]
    struct Geography;

    impl SpatialCapability for Geography {
        fn type_name(&self) -> &str {
            "Point"
        }

        fn generate_literal(&self, _: &TypeMapping, value: &SqlValue) -> Result<String, TypeError> {
            let text = value.as_str().ok_or(TypeError::TypeMismatch {
                expected: "wkt",
                actual: value.type_name().to_string(),
            })?;
            Ok(format!("geography::Parse('{text}')"))
        }
    }

    #[test]
    fn test_named_factory_serves_spatial_type() {
        let capability: Arc<dyn SpatialCapability> = Arc::new(Geography);
        let provider = SqlServerTypeMappingProvider::new().with_named_factory(
            "Point",
            &["geography"],
            Arc::new(move |_info: &MappingInfo| {
                Some(TypeMapping::new("geography", TypeKind::Spatial(Arc::clone(&capability))))
            }),
        );
        let source = SqlServerTypeMappingSource::new(provider);

        let by_type = source.find_mapping_for_type(&ModelType::named("Point")).unwrap();
        assert_eq!(by_type.store_type(), "geography");
        let by_store = source.find_mapping_for_store_type("geography").unwrap();
        assert_eq!(by_store.model_type(), &ModelType::named("Point"));
        assert_eq!(
            by_store
                .generate_sql_literal(&SqlValue::from("POINT(1 2)"))
                .unwrap(),
            "geography::Parse('POINT(1 2)')"
        );
    }
}
