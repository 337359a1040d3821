//! Structured query documents: wire shapes, compilation and execution.
//!
//! Requests use string-or-object polymorphism for resources, fields,
//! sort entries and filter arguments. The types here accept the loose
//! wire form ([`serde_json::Value`]) and normalize it into sum types
//! before any compilation happens.

pub mod compile;
pub mod context;
mod execute;

pub use compile::{CompiledQuery, ProjectedField, SqlParam, compile_query};
pub use context::{ExecutionContext, ResourceDescriptor, ResourceMetadata};
pub use execute::{BatchOutput, QueryExecutor, QueryOutput};

use geo_types::Geometry;
use serde_json::Value;

use crate::error::{DataError, DataResult};
use crate::geometry;
use crate::registry::{MAX_RESULT_ROWS, Operator};

/// Reference to a catalog resource, optionally aliased.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    pub name: String,
    /// Defaults to the resource name.
    pub alias: String,
}

impl ResourceRef {
    fn from_value(value: &Value) -> DataResult<Self> {
        match value {
            Value::String(name) => Ok(Self {
                name: name.clone(),
                alias: name.clone(),
            }),
            Value::Object(entry) => {
                let name = match entry.get("name") {
                    Some(Value::String(name)) => name.clone(),
                    Some(_) => return Err(DataError::ResourceMalformed),
                    None => return Err(DataError::ResourceNameMissing),
                };
                let alias = match entry.get("alias") {
                    Some(Value::String(alias)) => alias.clone(),
                    Some(_) => return Err(DataError::ResourceMalformed),
                    None => name.clone(),
                };
                Ok(Self { name, alias })
            }
            _ => Err(DataError::ResourceMalformed),
        }
    }
}

/// Projected field selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    /// Resource name or alias; inferred by unique containment when
    /// absent.
    pub resource: Option<String>,
    /// Output alias; defaults to the field name.
    pub alias: String,
}

impl FieldSpec {
    fn from_value(value: &Value) -> DataResult<Self> {
        match value {
            Value::String(name) => Ok(Self {
                name: name.clone(),
                resource: None,
                alias: name.clone(),
            }),
            Value::Object(entry) => {
                let name = match entry.get("name") {
                    Some(Value::String(name)) => name.clone(),
                    Some(_) => return Err(DataError::FieldMalformed),
                    None => return Err(DataError::FieldNameMissing),
                };
                let resource = match entry.get("resource") {
                    Some(Value::String(resource)) => Some(resource.clone()),
                    Some(_) => return Err(DataError::FieldMalformed),
                    None => None,
                };
                let alias = match entry.get("alias") {
                    Some(Value::String(alias)) => alias.clone(),
                    Some(_) => return Err(DataError::FieldMalformed),
                    None => name.clone(),
                };
                Ok(Self {
                    name,
                    resource,
                    alias,
                })
            }
            _ => Err(DataError::FieldMalformed),
        }
    }
}

/// Sort selector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub name: String,
    pub resource: Option<String>,
    pub desc: bool,
}

impl SortKey {
    fn from_value(value: &Value) -> DataResult<Self> {
        match value {
            Value::String(name) => Ok(Self {
                name: name.clone(),
                resource: None,
                desc: false,
            }),
            Value::Object(entry) => {
                let name = match entry.get("name") {
                    Some(Value::String(name)) => name.clone(),
                    Some(_) => return Err(DataError::SortMalformed),
                    None => return Err(DataError::SortNameMissing),
                };
                let resource = match entry.get("resource") {
                    Some(Value::String(resource)) => Some(resource.clone()),
                    Some(_) => return Err(DataError::SortMalformed),
                    None => None,
                };
                let desc = match entry.get("desc") {
                    Some(Value::Bool(desc)) => *desc,
                    Some(_) => return Err(DataError::SortMalformed),
                    None => false,
                };
                Ok(Self {
                    name,
                    resource,
                    desc,
                })
            }
            _ => Err(DataError::SortMalformed),
        }
    }
}

/// Field reference inside a filter argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldRef {
    pub name: String,
    pub resource: Option<String>,
}

/// One normalized filter argument.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterArg {
    Field(FieldRef),
    /// Geometry literal, decoded from any object carrying `type` and
    /// `coordinates`.
    Geometry(Geometry<f64>),
    Int(i64),
    Float(f64),
    /// String literal, or a comparison token inside `AREA`/`DISTANCE`.
    Text(String),
}

impl FilterArg {
    fn from_value(value: &Value, operator: &'static str) -> DataResult<Self> {
        match value {
            Value::String(text) => Ok(Self::Text(text.clone())),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Ok(Self::Int(int))
                } else {
                    number
                        .as_f64()
                        .map(Self::Float)
                        .ok_or(DataError::ArgumentParse(operator))
                }
            }
            Value::Object(entry) => {
                if geometry::is_geojson_object(value) {
                    let geom = geometry::from_geojson(value)
                        .map_err(|_| DataError::ArgumentParse(operator))?;
                    return Ok(Self::Geometry(geom));
                }
                let name = match entry.get("name") {
                    Some(Value::String(name)) => name.clone(),
                    _ => return Err(DataError::ArgumentParse(operator)),
                };
                let resource = match entry.get("resource") {
                    Some(Value::String(resource)) => Some(resource.clone()),
                    Some(_) => return Err(DataError::ArgumentParse(operator)),
                    None => None,
                };
                Ok(Self::Field(FieldRef { name, resource }))
            }
            _ => Err(DataError::ArgumentParse(operator)),
        }
    }

    /// Human-readable rendering for error messages.
    pub(crate) fn display(&self) -> String {
        match self {
            Self::Field(field) => field.name.clone(),
            Self::Geometry(_) => "geometry".to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Text(value) => value.clone(),
        }
    }
}

/// One normalized filter node.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub operator: Operator,
    pub args: Vec<FilterArg>,
}

impl Filter {
    fn from_value(value: &Value) -> DataResult<Self> {
        let Value::Object(node) = value else {
            return Err(DataError::FilterNotAnObject);
        };
        let operator = match node.get("operator") {
            Some(Value::String(name)) => {
                Operator::parse(name).ok_or_else(|| DataError::OperatorUnknown(name.clone()))?
            }
            Some(other) => return Err(DataError::OperatorUnknown(other.to_string())),
            None => return Err(DataError::OperatorMissing),
        };
        let arguments = match node.get("arguments") {
            Some(Value::Array(arguments)) if !arguments.is_empty() => arguments,
            Some(_) => return Err(DataError::ArgumentsInvalid),
            None => return Err(DataError::ArgumentsMissing),
        };
        let args = arguments
            .iter()
            .map(|argument| FilterArg::from_value(argument, operator.name()))
            .collect::<DataResult<Vec<_>>>()?;
        Ok(Self { operator, args })
    }
}

/// A fully normalized query document.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryDoc {
    pub limit: i64,
    pub offset: i64,
    pub resources: Vec<ResourceRef>,
    /// Empty means: expand to every field of every queried resource.
    pub fields: Vec<FieldSpec>,
    pub filters: Vec<Filter>,
    pub sort: Vec<SortKey>,
}

impl QueryDoc {
    /// Normalize one queue element.
    pub fn from_value(query: &Value) -> DataResult<Self> {
        let limit = match query.get("limit") {
            Some(Value::Number(number)) => {
                let given = number
                    .as_i64()
                    .or_else(|| number.as_f64().map(|float| float as i64))
                    .ok_or(DataError::LimitNotNumeric)?;
                if given > 0 && given < MAX_RESULT_ROWS {
                    given
                } else {
                    MAX_RESULT_ROWS
                }
            }
            Some(_) => return Err(DataError::LimitNotNumeric),
            None => MAX_RESULT_ROWS,
        };
        let offset = match query.get("offset") {
            Some(Value::Number(number)) => {
                let given = number
                    .as_i64()
                    .or_else(|| number.as_f64().map(|float| float as i64))
                    .ok_or(DataError::OffsetNotNumeric)?;
                given.max(0)
            }
            Some(_) => return Err(DataError::OffsetNotNumeric),
            None => 0,
        };

        let resources = match query.get("resources") {
            Some(Value::Array(entries)) if !entries.is_empty() => entries
                .iter()
                .map(ResourceRef::from_value)
                .collect::<DataResult<Vec<_>>>()?,
            Some(_) => return Err(DataError::ResourcesInvalid),
            None => return Err(DataError::NoResourceSelected),
        };

        let fields = match query.get("fields") {
            Some(Value::Array(entries)) => entries
                .iter()
                .map(FieldSpec::from_value)
                .collect::<DataResult<Vec<_>>>()?,
            Some(_) => return Err(DataError::FieldsInvalid),
            None => Vec::new(),
        };

        let filters = match query.get("filters") {
            Some(Value::Array(entries)) => entries
                .iter()
                .map(Filter::from_value)
                .collect::<DataResult<Vec<_>>>()?,
            Some(_) => return Err(DataError::FiltersInvalid),
            None => Vec::new(),
        };

        let sort = match query.get("sort") {
            Some(Value::Array(entries)) => entries
                .iter()
                .map(SortKey::from_value)
                .collect::<DataResult<Vec<_>>>()?,
            Some(_) => return Err(DataError::SortInvalid),
            None => Vec::new(),
        };

        Ok(Self {
            limit,
            offset,
            resources,
            fields,
            filters,
            sort,
        })
    }
}
