//! # relcore-types
//!
//! Values, type mappings and type-mapping resolution.
//!
//! A [`TypeMapping`] describes how values of one model type are stored in
//! one store type: the rendered store type and its facets, the value
//! converter that takes model values to provider values, how to write a
//! value as a SQL literal and how to configure a native parameter for it.
//!
//! A [`TypeMappingSource`] resolves mappings from a [`MappingInfo`] (model
//! type, store type name, facets, converter) and memoizes every result.
//! Provider-specific tables plug in through [`TypeMappingProvider`];
//! [`SqlServerTypeMappingSource`] ships the SQL Server tables.
//!
//! ## Example
//!
//! ```rust
//! use relcore_types::{ModelType, SqlServerTypeMappingSource, SqlValue};
//!
//! let source = SqlServerTypeMappingSource::sql_server();
//! let mapping = source.find_mapping_for_type(&ModelType::String).unwrap();
//! assert_eq!(mapping.store_type(), "nvarchar(max)");
//! assert_eq!(
//!     mapping.generate_sql_literal(&SqlValue::from("O'Brien")).unwrap(),
//!     "N'O''Brien'"
//! );
//! ```
//!
//! ## Value Mappings
//!
//! | Model type | `SqlValue` | Host type |
//! |------------|------------|-----------|
//! | `Bool` | `Bool` | `bool` |
//! | `U8` | `TinyInt` | `u8` |
//! | `I16` | `SmallInt` | `i16` |
//! | `I32` | `Int` | `i32` |
//! | `I64` | `BigInt` | `i64` |
//! | `F32` | `Float` | `f32` |
//! | `F64` | `Double` | `f64` |
//! | `Decimal` | `Decimal` | `rust_decimal::Decimal` |
//! | `Char` | `Char` | `char` |
//! | `String` | `String` | `String` |
//! | `Bytes` | `Binary` | `bytes::Bytes` |
//! | `Uuid` | `Uuid` | `uuid::Uuid` |
//! | `Date` | `Date` | `chrono::NaiveDate` |
//! | `Time` | `Time` | `chrono::NaiveTime` |
//! | `DateTime` | `DateTime` | `chrono::NaiveDateTime` |
//! | `DateTimeOffset` | `DateTimeOffset` | `chrono::DateTime<FixedOffset>` |
//! | `Enum` | `Enum` | [`EnumValue`] |

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cache;
pub mod converter;
pub mod error;
pub mod from_sql;
pub mod info;
pub mod literal;
pub mod mapping;
pub mod model_type;
pub mod parameter;
pub mod selector;
pub mod source;
pub mod sql_server;
pub mod to_sql;
pub mod value;

pub use cache::{CacheStats, ConcurrentCache};
pub use converter::{ConverterMappingHints, ValueConverter};
pub use error::TypeError;
pub use from_sql::FromSql;
pub use info::{MappingInfo, PropertyDescriptor, PropertyFacets};
pub use literal::LiteralFormatter;
pub use mapping::{
    ParameterConfigurator, ParsedStoreType, SpatialCapability, StoreTypePostfix, TypeKind,
    TypeMapping, ValueComparer,
};
pub use model_type::{EnumType, ModelType};
pub use parameter::{DbParameter, DbType, ParameterDirection};
pub use selector::{DefaultValueConverterSelector, ValueConverterInfo, ValueConverterSelector};
pub use source::{MappingFactory, MappingTable, StoreTypeMatch, TypeMappingProvider, TypeMappingSource};
pub use sql_server::{SqlServerTypeMappingProvider, SqlServerTypeMappingSource};
pub use to_sql::ToSql;
pub use value::{EnumValue, SqlValue};
