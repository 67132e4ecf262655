//! Type conversion and type mapping error types.

use thiserror::Error;

/// Errors that can occur during value conversion or mapping lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// Value is null when non-null was expected.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// Type mismatch during conversion.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Actual type name.
        actual: String,
    },

    /// Value is out of range for target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },

    /// Text could not be parsed as the target type.
    #[error("cannot parse '{text}' as {target}")]
    Parse {
        /// Offending text.
        text: String,
        /// Target type name.
        target: String,
    },

    /// Value does not name or number a member of the enum.
    #[error("'{value}' is not a member of enum {enum_name}")]
    InvalidEnumValue {
        /// Enum type name.
        enum_name: String,
        /// Offending value.
        value: String,
    },

    /// Unsupported type conversion.
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion {
        /// Source type.
        from: String,
        /// Target type.
        to: String,
    },

    /// No mapping exists for a model type.
    #[error("no type mapping found for model type '{model_type}'")]
    UnsupportedType {
        /// Model type name.
        model_type: String,
    },

    /// No mapping exists for a store type.
    #[error("no type mapping found for store type '{store_type}'")]
    UnsupportedStoreType {
        /// Requested store type name.
        store_type: String,
    },

    /// No mapping exists for a property.
    #[error("property '{property}' of type '{model_type}' cannot be mapped to a store type")]
    UnsupportedProperty {
        /// Property name.
        property: String,
        /// Property model type name.
        model_type: String,
    },
}
