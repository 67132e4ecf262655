//! SQL Server type mappings.
//!
//! | Model type | Default store type |
//! |------------|--------------------|
//! | `bool` | `bit` |
//! | `u8` | `tinyint` |
//! | `i16` | `smallint` |
//! | `i32` | `int` |
//! | `i64` | `bigint` |
//! | `f32` | `real` |
//! | `f64` | `float` |
//! | `Decimal` | `decimal(18,2)` |
//! | `char` | `nvarchar(1)` |
//! | `String` | `nvarchar(max)`, `nvarchar(450)` for keys |
//! | bytes | `varbinary(max)`, `varbinary(900)` for keys, `rowversion` for row versions |
//! | `Uuid` | `uniqueidentifier` |
//! | `NaiveDate` | `date` |
//! | `NaiveTime` | `time` |
//! | `NaiveDateTime` | `datetime2` |
//! | `DateTime<FixedOffset>` | `datetimeoffset` |
//!
//! Text and binary parameters are sized so that plans can be reused: the
//! declared size when the value fits, otherwise 4000 (unicode) or 8000,
//! otherwise `-1` (max).

use crate::info::MappingInfo;
use crate::literal;
use crate::mapping::{StoreTypePostfix, TypeKind, TypeMapping};
use crate::model_type::ModelType;
use crate::parameter::{DbParameter, DbType};
use crate::source::{MappingFactory, MappingTable, StoreTypeMatch, TypeMappingProvider, TypeMappingSource};

/// Longest unicode text that is not `max`.
pub const MAX_UNICODE_SIZE: i32 = 4000;
/// Longest non-unicode text or binary that is not `max`.
pub const MAX_SIZE: i32 = 8000;
/// Unicode key column size (fits the 900-byte index key limit).
pub const UNICODE_KEY_SIZE: i32 = 450;
/// Non-unicode and binary key column size.
pub const KEY_SIZE: i32 = 900;

/// The SQL Server resolver.
pub type SqlServerTypeMappingSource = TypeMappingSource<SqlServerTypeMappingProvider>;

impl TypeMappingSource<SqlServerTypeMappingProvider> {
    /// Resolver over the built-in SQL Server tables.
    #[must_use]
    pub fn sql_server() -> Self {
        Self::new(SqlServerTypeMappingProvider::new())
    }
}

fn text(store_type: &str, unicode: bool, fixed_length: bool) -> TypeMapping {
    TypeMapping::new(store_type, TypeKind::String)
        .with_unicode(unicode)
        .with_fixed_length(fixed_length)
        .with_literal_formatter(literal::sql_server_string_literal)
        .with_parameter_configurator(configure_sized_parameter)
}

fn unsized_text(store_type: &str, unicode: bool, db_type: DbType) -> TypeMapping {
    text(store_type, unicode, false)
        .with_postfix(StoreTypePostfix::None)
        .with_db_type(Some(db_type))
}

fn binary(store_type: &str, fixed_length: bool) -> TypeMapping {
    TypeMapping::new(store_type, TypeKind::ByteArray)
        .with_fixed_length(fixed_length)
        .with_literal_formatter(literal::sql_server_bytes_literal)
        .with_parameter_configurator(configure_sized_parameter)
}

fn row_version(store_type: &str) -> TypeMapping {
    binary(store_type, true)
        .with_postfix(StoreTypePostfix::None)
        .with_size(8)
}

fn temporal(store_type: &str, kind: TypeKind, postfix: StoreTypePostfix) -> TypeMapping {
    TypeMapping::with_postfix_policy(store_type, kind, postfix)
        .with_literal_formatter(literal::sql_server_temporal_literal)
}

fn decimal(store_type: &str) -> TypeMapping {
    TypeMapping::new(store_type, TypeKind::Decimal)
}

fn money(store_type: &str) -> TypeMapping {
    TypeMapping::with_postfix_policy(store_type, TypeKind::Decimal, StoreTypePostfix::None)
        .with_db_type(Some(DbType::Currency))
}

fn real() -> TypeMapping {
    TypeMapping::new("real", TypeKind::Float).with_literal_formatter(literal::sql_server_float_literal)
}

fn float() -> TypeMapping {
    TypeMapping::with_postfix_policy("float", TypeKind::Double, StoreTypePostfix::Precision)
}

/// Size a text or binary parameter from its value.
///
/// Fixed-length text whose value does not fill the column is sent as
/// variable-length text so the server does not pad it.
pub fn configure_sized_parameter(mapping: &TypeMapping, parameter: &mut DbParameter) {
    let max_specific = if matches!(mapping.kind(), TypeKind::String) && mapping.is_unicode() {
        MAX_UNICODE_SIZE
    } else {
        MAX_SIZE
    };
    let declared = mapping.size().filter(|n| *n > 0);
    let length = parameter
        .value
        .length()
        .map(|len| i32::try_from(len).unwrap_or(i32::MAX));

    parameter.size = Some(match (declared, length) {
        (Some(n), Some(len)) if len <= n => n,
        (_, Some(len)) if len <= max_specific => max_specific,
        (_, Some(_)) => -1,
        (Some(n), None) => n,
        (None, None) => max_specific,
    });

    if mapping.is_fixed_length() && length.is_some() && length != mapping.size() {
        parameter.db_type = match parameter.db_type {
            Some(DbType::StringFixedLength) => Some(DbType::String),
            Some(DbType::AnsiStringFixedLength) => Some(DbType::AnsiString),
            other => other,
        };
    }
}

/// Store-type and model-type tables for SQL Server.
#[derive(Debug, Clone)]
pub struct SqlServerTypeMappingProvider {
    table: MappingTable,
}

impl Default for SqlServerTypeMappingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlServerTypeMappingProvider {
    /// Build the tables.
    #[must_use]
    pub fn new() -> Self {
        let bit = TypeMapping::new("bit", TypeKind::Bool)
            .with_literal_formatter(literal::sql_server_bool_literal);
        let tinyint = TypeMapping::new("tinyint", TypeKind::Byte);
        let smallint = TypeMapping::new("smallint", TypeKind::Int16);
        let int = TypeMapping::new("int", TypeKind::Int32);
        let bigint = TypeMapping::new("bigint", TypeKind::Int64);
        let uuid = TypeMapping::new("uniqueidentifier", TypeKind::Guid);
        let date = temporal("date", TypeKind::Date, StoreTypePostfix::None);
        let time = temporal("time", TypeKind::Time, StoreTypePostfix::Precision);
        let datetime2 = temporal("datetime2", TypeKind::DateTime, StoreTypePostfix::Precision)
            .with_db_type(Some(DbType::DateTime2));
        let datetimeoffset = temporal("datetimeoffset", TypeKind::DateTimeOffset, StoreTypePostfix::Precision);

        let table = MappingTable::new()
            .with_store_type("bigint", bigint.clone())
            .with_store_type("binary varying", binary("binary varying", false))
            .with_store_type("binary", binary("binary", true))
            .with_store_type("bit", bit.clone())
            .with_store_type("char varying", text("char varying", false, false))
            .with_store_type("char", text("char", false, true))
            .with_store_type("character varying", text("character varying", false, false))
            .with_store_type("character", text("character", false, true))
            .with_store_type("date", date.clone())
            .with_store_type("datetime", temporal("datetime", TypeKind::DateTime, StoreTypePostfix::None).with_precision(3))
            .with_store_type("datetime2", datetime2.clone())
            .with_store_type("datetimeoffset", datetimeoffset.clone())
            .with_store_type("dec", decimal("dec(18,0)"))
            .with_store_type("decimal", decimal("decimal(18,0)"))
            .with_store_type("float", float())
            .with_store_type("image", binary("image", false).with_postfix(StoreTypePostfix::None))
            .with_store_type("int", int.clone())
            .with_store_type("money", money("money"))
            .with_store_type("national char varying", text("national char varying", true, false))
            .with_store_type("national character varying", text("national character varying", true, false))
            .with_store_type("national character", text("national character", true, true))
            .with_store_type("national char", text("national char", true, true))
            .with_store_type("nchar", text("nchar", true, true))
            .with_store_type("ntext", unsized_text("ntext", true, DbType::String))
            .with_store_type("numeric", decimal("numeric(18,0)"))
            .with_store_type("nvarchar", text("nvarchar", true, false))
            .with_store_type("real", real())
            .with_store_type("rowversion", row_version("rowversion"))
            .with_store_type("smalldatetime", temporal("smalldatetime", TypeKind::DateTime, StoreTypePostfix::None).with_precision(0))
            .with_store_type("smallint", smallint.clone())
            .with_store_type("smallmoney", money("smallmoney"))
            .with_store_type("text", unsized_text("text", false, DbType::AnsiString))
            .with_store_type("time", time.clone())
            .with_store_type("timestamp", row_version("timestamp"))
            .with_store_type("tinyint", tinyint.clone())
            .with_store_type("uniqueidentifier", uuid.clone())
            .with_store_type("varbinary", binary("varbinary", false))
            .with_store_type("varchar", text("varchar", false, false))
            .with_store_type("xml", unsized_text("xml", true, DbType::Xml))
            .with_model_type(ModelType::Bool, bit)
            .with_model_type(ModelType::U8, tinyint)
            .with_model_type(ModelType::I16, smallint)
            .with_model_type(ModelType::I32, int)
            .with_model_type(ModelType::I64, bigint)
            .with_model_type(ModelType::F32, real())
            .with_model_type(ModelType::F64, float())
            .with_model_type(ModelType::Decimal, decimal("decimal(18,2)"))
            .with_model_type(
                ModelType::Char,
                TypeMapping::new("nvarchar(1)", TypeKind::Char)
                    .with_literal_formatter(literal::sql_server_string_literal),
            )
            .with_model_type(ModelType::Uuid, uuid)
            .with_model_type(ModelType::Date, date)
            .with_model_type(ModelType::Time, time)
            .with_model_type(ModelType::DateTime, datetime2)
            .with_model_type(ModelType::DateTimeOffset, datetimeoffset);

        Self { table }
    }

    /// Register a mapping factory for a provider-specific named type
    /// (for example a spatial type), together with the store types it serves.
    #[must_use]
    pub fn with_named_factory(mut self, name: &str, store_types: &[&str], factory: MappingFactory) -> Self {
        for store_type in store_types {
            if let Some(mapping) = factory(&MappingInfo::for_store_type(store_type)) {
                self.table = self.table.with_store_type(store_type, mapping);
            }
        }
        self.table = self.table.with_named_factory(name, factory);
        self
    }

    fn string_mapping(info: &MappingInfo) -> TypeMapping {
        let unicode = info.unicode().unwrap_or(true);
        let (max, key_size) = if unicode {
            (MAX_UNICODE_SIZE, UNICODE_KEY_SIZE)
        } else {
            (MAX_SIZE, KEY_SIZE)
        };
        let size = sized(info, max, key_size);
        let fixed = info.fixed_length().unwrap_or(false) && size != -1;
        let base = match (unicode, fixed) {
            (true, true) => "nchar",
            (true, false) => "nvarchar",
            (false, true) => "char",
            (false, false) => "varchar",
        };
        text(base, unicode, fixed).with_size(size)
    }

    fn bytes_mapping(info: &MappingInfo) -> TypeMapping {
        if info.is_row_version() {
            return row_version("rowversion");
        }
        let size = sized(info, MAX_SIZE, KEY_SIZE);
        let fixed = info.fixed_length().unwrap_or(false) && size != -1;
        let base = if fixed { "binary" } else { "varbinary" };
        binary(base, fixed).with_size(size)
    }
}

// Requested size, else the key size for keys, else max; oversize means max.
fn sized(info: &MappingInfo, max: i32, key_size: i32) -> i32 {
    let size = info
        .size()
        .or_else(|| info.is_key_or_index().then_some(key_size));
    match size {
        Some(n) if n > max => -1,
        Some(n) => n,
        None => -1,
    }
}

impl TypeMappingProvider for SqlServerTypeMappingProvider {
    fn find_raw_mapping(&self, info: &MappingInfo) -> Option<TypeMapping> {
        let is_float = info
            .store_type_base()
            .is_some_and(|b| b.eq_ignore_ascii_case("float"));
        if is_float
            && info.precision().or(info.size().and_then(|s| u32::try_from(s).ok())).is_some_and(|p| (1..=24).contains(&p))
            && info.model_type().is_none_or(|t| *t == ModelType::F32)
        {
            return Some(real());
        }

        match self.table.find_by_store_type(info) {
            StoreTypeMatch::Found(mapping) => return Some(mapping),
            StoreTypeMatch::Incompatible => return None,
            StoreTypeMatch::NotListed => {}
        }

        match info.model_type()? {
            ModelType::String => Some(Self::string_mapping(info)),
            ModelType::Bytes => Some(Self::bytes_mapping(info)),
            _ => self.table.find_by_model_type(info),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::value::SqlValue;

    fn source() -> SqlServerTypeMappingSource {
        SqlServerTypeMappingSource::sql_server()
    }

    #[test]
    fn test_string_defaults() {
        let s = source();
        let m = s.find_mapping_for_type(&ModelType::String).unwrap();
        assert_eq!(m.store_type(), "nvarchar(max)");
        assert_eq!(m.size(), Some(-1));

        let key = s
            .find_mapping(&MappingInfo::for_type(ModelType::String).with_key_or_index(true))
            .unwrap();
        assert_eq!(key.store_type(), "nvarchar(450)");

        let ansi = s
            .find_mapping(&MappingInfo::for_type(ModelType::String).with_unicode(false).with_size(9000))
            .unwrap();
        assert_eq!(ansi.store_type(), "varchar(max)");
    }

    #[test]
    fn test_bytes_defaults() {
        let s = source();
        assert_eq!(
            s.find_mapping_for_type(&ModelType::Bytes).unwrap().store_type(),
            "varbinary(max)"
        );
        let rv = s
            .find_mapping(&MappingInfo::for_type(ModelType::Bytes).with_row_version(true))
            .unwrap();
        assert_eq!(rv.store_type(), "rowversion");
        assert_eq!(rv.size(), Some(8));
    }

    #[test]
    fn test_float_precision_selects_real() {
        let s = source();
        assert_eq!(s.find_mapping_for_store_type("float(24)").unwrap().store_type(), "real");
        assert_eq!(s.find_mapping_for_store_type("float(53)").unwrap().store_type(), "float(53)");
    }

    #[test]
    fn test_decimal_defaults() {
        let s = source();
        assert_eq!(
            s.find_mapping_for_type(&ModelType::Decimal).unwrap().store_type(),
            "decimal(18,2)"
        );
        assert_eq!(s.find_mapping_for_store_type("numeric").unwrap().store_type(), "numeric(18,0)");
        assert_eq!(s.find_mapping_for_store_type("decimal(10,4)").unwrap().store_type(), "decimal(10,4)");
    }

    #[test]
    fn test_sql_server_literals() {
        let s = source();
        let nvarchar = s.find_mapping_for_store_type("nvarchar(20)").unwrap();
        assert_eq!(nvarchar.generate_sql_literal(&SqlValue::from("it's")).unwrap(), "N'it''s'");
        let bit = s.find_mapping_for_type(&ModelType::Bool).unwrap();
        assert_eq!(bit.generate_sql_literal(&SqlValue::Bool(true)).unwrap(), "CAST(1 AS bit)");
        let varbinary = s.find_mapping_for_type(&ModelType::Bytes).unwrap();
        assert_eq!(
            varbinary.generate_sql_literal(&SqlValue::from(vec![0x0A_u8, 0xFF])).unwrap(),
            "0x0AFF"
        );
    }

    #[test]
    fn test_parameter_sizing() {
        let s = source();
        let m = s.find_mapping_for_store_type("nvarchar(10)").unwrap();
        let fits = m.create_parameter("@p", &SqlValue::from("abc"), None).unwrap();
        assert_eq!(fits.size, Some(10));
        let long = m.create_parameter("@p", &SqlValue::from("a".repeat(11)), None).unwrap();
        assert_eq!(long.size, Some(MAX_UNICODE_SIZE));
        let huge = m.create_parameter("@p", &SqlValue::from("a".repeat(5000)), None).unwrap();
        assert_eq!(huge.size, Some(-1));
    }

    #[test]
    fn test_fixed_length_short_value_is_variable() {
        let s = source();
        let m = s.find_mapping_for_store_type("char(5)").unwrap();
        let p = m.create_parameter("@p", &SqlValue::from("ab"), None).unwrap();
        assert_eq!(p.db_type, Some(DbType::AnsiString));
        let p = m.create_parameter("@p", &SqlValue::from("abcde"), None).unwrap();
        assert_eq!(p.db_type, Some(DbType::AnsiStringFixedLength));
    }
}
