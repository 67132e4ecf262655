//! Logical command parameters and binding.
//!
//! A [`CommandParameter`] is a named placeholder owned by a
//! [`Command`](crate::Command). At execution time it is bound against a
//! [`ParameterValues`] lookup and contributes zero or more native
//! [`DbParameter`]s to the native command, in declaration order. Binding
//! never mutates the logical parameter.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use relcore_types::{DbParameter, SqlValue, TypeError, TypeMapping, TypeMappingProvider, TypeMappingSource};

use crate::error::{Error, Result};
use crate::native::NativeCommand;

/// Resolves a mapping from the runtime value of a dynamic parameter.
pub trait ValueMappingSource: Send + Sync {
    /// Mapping for `value`, or `None` when the value's type is unmapped.
    fn mapping_for_value(&self, value: &SqlValue) -> Option<TypeMapping>;
}

impl<P: TypeMappingProvider> ValueMappingSource for TypeMappingSource<P> {
    fn mapping_for_value(&self, value: &SqlValue) -> Option<TypeMapping> {
        self.find_mapping_for_value(value)
    }
}

/// A value supplied for a logical parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    /// A model value.
    Value(SqlValue),
    /// Positional values for the sub-parameters of a composite parameter.
    List(Vec<ParameterValue>),
    /// A pre-built native parameter, attached unchanged by dynamic parameters.
    Native(DbParameter),
}

impl ParameterValue {
    /// Wrap a model value.
    pub fn value(value: impl Into<SqlValue>) -> Self {
        Self::Value(value.into())
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::List(_) => "list",
            Self::Native(_) => "native parameter",
        }
    }
}

impl From<SqlValue> for ParameterValue {
    fn from(value: SqlValue) -> Self {
        Self::Value(value)
    }
}

impl From<DbParameter> for ParameterValue {
    fn from(parameter: DbParameter) -> Self {
        Self::Native(parameter)
    }
}

impl From<Vec<ParameterValue>> for ParameterValue {
    fn from(values: Vec<ParameterValue>) -> Self {
        Self::List(values)
    }
}

/// Values for the logical parameters of a command, keyed by invariant name.
#[derive(Debug, Clone, Default)]
pub struct ParameterValues {
    values: HashMap<String, ParameterValue>,
}

impl ParameterValues {
    /// An empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model value.
    #[must_use]
    pub fn with(mut self, invariant_name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(invariant_name, ParameterValue::Value(value.into()));
        self
    }

    /// Add positional values for a composite parameter.
    #[must_use]
    pub fn with_list(mut self, invariant_name: impl Into<String>, values: Vec<ParameterValue>) -> Self {
        self.insert(invariant_name, ParameterValue::List(values));
        self
    }

    /// Add a pre-built native parameter.
    #[must_use]
    pub fn with_native(mut self, invariant_name: impl Into<String>, parameter: DbParameter) -> Self {
        self.insert(invariant_name, ParameterValue::Native(parameter));
        self
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, invariant_name: impl Into<String>, value: ParameterValue) {
        self.values.insert(invariant_name.into(), value);
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, invariant_name: &str) -> Option<&ParameterValue> {
        self.values.get(invariant_name)
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A parameter whose native form is produced by a type mapping.
#[derive(Debug, Clone)]
pub struct TypeMappedParameter {
    /// Name used to look up the value.
    pub invariant_name: String,
    /// Name as it appears in command text.
    pub name: String,
    /// Mapping that converts and configures the value.
    pub mapping: TypeMapping,
    /// Nullability sent to the driver; `None` infers it from the value.
    pub nullable: Option<bool>,
}

/// A pre-built native parameter.
#[derive(Debug, Clone)]
pub struct RawParameter {
    /// Name used to identify the parameter.
    pub invariant_name: String,
    /// The native parameter, attached unchanged.
    pub parameter: DbParameter,
}

/// An ordered group of parameters bound from one list value.
#[derive(Debug, Clone)]
pub struct CompositeParameter {
    /// Name used to look up the value list.
    pub invariant_name: String,
    /// Sub-parameters, bound positionally.
    pub parameters: Vec<CommandParameter>,
}

/// A parameter whose mapping is chosen from its runtime value.
#[derive(Clone)]
pub struct DynamicParameter {
    /// Name used to look up the value.
    pub invariant_name: String,
    /// Name as it appears in command text.
    pub name: String,
    /// Resolver consulted at bind time.
    pub source: Arc<dyn ValueMappingSource>,
}

impl fmt::Debug for DynamicParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicParameter")
            .field("invariant_name", &self.invariant_name)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A logical command parameter.
#[derive(Debug, Clone)]
pub enum CommandParameter {
    /// Converted and configured through a type mapping.
    TypeMapped(TypeMappedParameter),
    /// Pre-built native parameter.
    Raw(RawParameter),
    /// Ordered sub-parameters.
    Composite(CompositeParameter),
    /// Mapping chosen from the runtime value.
    Dynamic(DynamicParameter),
}

impl CommandParameter {
    /// A type-mapped parameter.
    pub fn type_mapped(
        invariant_name: impl Into<String>,
        name: impl Into<String>,
        mapping: TypeMapping,
        nullable: Option<bool>,
    ) -> Self {
        Self::TypeMapped(TypeMappedParameter {
            invariant_name: invariant_name.into(),
            name: name.into(),
            mapping,
            nullable,
        })
    }

    /// A raw parameter.
    pub fn raw(invariant_name: impl Into<String>, parameter: DbParameter) -> Self {
        Self::Raw(RawParameter {
            invariant_name: invariant_name.into(),
            parameter,
        })
    }

    /// A composite parameter.
    pub fn composite(invariant_name: impl Into<String>, parameters: Vec<CommandParameter>) -> Self {
        Self::Composite(CompositeParameter {
            invariant_name: invariant_name.into(),
            parameters,
        })
    }

    /// A dynamic parameter.
    pub fn dynamic(
        invariant_name: impl Into<String>,
        name: impl Into<String>,
        source: Arc<dyn ValueMappingSource>,
    ) -> Self {
        Self::Dynamic(DynamicParameter {
            invariant_name: invariant_name.into(),
            name: name.into(),
            source,
        })
    }

    /// Name used to look up this parameter's value.
    #[must_use]
    pub fn invariant_name(&self) -> &str {
        match self {
            Self::TypeMapped(p) => &p.invariant_name,
            Self::Raw(p) => &p.invariant_name,
            Self::Composite(p) => &p.invariant_name,
            Self::Dynamic(p) => &p.invariant_name,
        }
    }

    /// Attach the native parameters for this logical parameter.
    pub fn add_db_parameters(
        &self,
        command: &mut dyn NativeCommand,
        values: Option<&ParameterValues>,
    ) -> Result<()> {
        let value = values.and_then(|v| v.get(self.invariant_name()));
        self.add_with_value(command, value, false)
    }

    fn add_with_value(
        &self,
        command: &mut dyn NativeCommand,
        value: Option<&ParameterValue>,
        detailed: bool,
    ) -> Result<()> {
        match self {
            Self::Raw(p) => {
                command.add_parameter(p.parameter.clone());
                Ok(())
            }
            Self::TypeMapped(p) => match value {
                Some(ParameterValue::Value(v)) => {
                    let parameter = p
                        .mapping
                        .create_parameter(&p.name, v, p.nullable)
                        .map_err(|e| conversion_error(&p.name, &p.mapping, v, e, detailed))?;
                    command.add_parameter(parameter);
                    Ok(())
                }
                Some(other) => Err(invalid_value(&p.invariant_name, other)),
                None => Err(Error::MissingParameterValue {
                    name: p.invariant_name.clone(),
                }),
            },
            Self::Composite(p) => match value {
                Some(ParameterValue::List(items)) => {
                    for (i, sub) in p.parameters.iter().enumerate() {
                        sub.add_with_value(command, items.get(i), detailed)?;
                    }
                    Ok(())
                }
                Some(_) => Err(Error::InvalidCompositeValue {
                    name: p.invariant_name.clone(),
                }),
                None => Err(Error::MissingParameterValue {
                    name: p.invariant_name.clone(),
                }),
            },
            Self::Dynamic(p) => match value {
                Some(ParameterValue::Native(native)) => {
                    command.add_parameter(native.clone());
                    Ok(())
                }
                Some(ParameterValue::Value(v)) if v.is_null() => {
                    command.add_parameter(DbParameter::new(p.name.as_str(), SqlValue::Null));
                    Ok(())
                }
                Some(ParameterValue::Value(v)) => {
                    let mapping =
                        p.source
                            .mapping_for_value(v)
                            .ok_or_else(|| Error::UnsupportedValueType {
                                type_name: v.type_name().to_string(),
                            })?;
                    let parameter = mapping
                        .create_parameter(&p.name, v, None)
                        .map_err(|e| conversion_error(&p.name, &mapping, v, e, detailed))?;
                    command.add_parameter(parameter);
                    Ok(())
                }
                Some(other) => Err(invalid_value(&p.invariant_name, other)),
                None => Err(Error::MissingParameterValue {
                    name: p.invariant_name.clone(),
                }),
            },
        }
    }
}

fn invalid_value(name: &str, value: &ParameterValue) -> Error {
    tracing::debug!(parameter = name, shape = value.shape(), "parameter value has the wrong shape");
    Error::InvalidParameterValue {
        name: name.to_string(),
    }
}

fn conversion_error(name: &str, mapping: &TypeMapping, value: &SqlValue, source: TypeError, detailed: bool) -> Error {
    if !detailed {
        return Error::Type(source);
    }
    Error::ParameterConversion {
        name: name.to_string(),
        store_type: mapping.store_type().to_string(),
        value: format!("{value:?}"),
        source,
    }
}

/// Attach every logical parameter to `command`, in declaration order.
///
/// Fails before anything executes when a required value is missing.
pub fn bind_parameters(
    command: &mut dyn NativeCommand,
    parameters: &[CommandParameter],
    values: Option<&ParameterValues>,
) -> Result<()> {
    bind(command, parameters, values, false)
}

/// [`bind_parameters`], naming the parameter, its store type and the
/// offending value in conversion errors when `detailed` is set.
pub(crate) fn bind(
    command: &mut dyn NativeCommand,
    parameters: &[CommandParameter],
    values: Option<&ParameterValues>,
    detailed: bool,
) -> Result<()> {
    for parameter in parameters {
        let value = values.and_then(|v| v.get(parameter.invariant_name()));
        parameter.add_with_value(command, value, detailed)?;
    }
    Ok(())
}
