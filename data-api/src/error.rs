//! Error types for query validation, compilation and execution.

use deadpool_postgres::tokio_postgres::Error as TokioPgError;
use deadpool_postgres::{BuildError, PoolError};
use geozero::error::GeozeroError;

/// Result type for all data API operations.
pub type DataResult<T> = Result<T, DataError>;

/// Coarse error category, stable across message wording changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Request envelope problems (CRS, format, queue shape).
    Envelope,
    /// Catalog resource resolution problems.
    Resource,
    /// Field resolution and projection problems.
    Field,
    /// Filter operator and argument problems.
    Operator,
    /// Database and decoding failures.
    Execution,
    /// Statement or batch budget exhaustion.
    Timeout,
}

/// Errors raised while validating, compiling or executing a query batch.
#[derive(thiserror::Error, Debug)]
pub enum DataError {
    /// Requested CRS is outside the supported set.
    #[error("CRS {0} is not supported.")]
    UnsupportedCrs(String),

    /// Requested output format is outside the supported set.
    #[error("Output format {0} is not supported for query results.")]
    UnsupportedFormat(String),

    /// The request envelope carries no `queue` member.
    #[error("Parameter queue is required.")]
    QueueMissing,

    /// The `queue` member is not a non-empty list.
    #[error("Parameter queue should be a list with at least one item.")]
    QueueInvalid,

    /// `limit` is present but not numeric.
    #[error("Parameter limit must be a number.")]
    LimitNotNumeric,

    /// `offset` is present but not numeric.
    #[error("Parameter offset must be a number.")]
    OffsetNotNumeric,

    /// Executor construction was attempted with incomplete settings.
    #[error("Configuration error: {0}")]
    Config(&'static str),

    /// The query names no resources at all.
    #[error("No resource selected.")]
    NoResourceSelected,

    /// The `resources` member is not a non-empty list.
    #[error("Parameter resource should be a list with at least one item.")]
    ResourcesInvalid,

    /// A resource entry object has no `name`.
    #[error("Resource name is missing.")]
    ResourceNameMissing,

    /// A resource entry is neither a string nor an object.
    #[error("Resource parameter is malformed. Instance of string or dictionary is expected.")]
    ResourceMalformed,

    /// The named resource is not in the catalog.
    #[error("Resource {0} does not exist.")]
    ResourceNotFound(String),

    /// One alias would denote two different physical resources.
    #[error("Alias {alias} is bound to resources {first} and {second}.")]
    ResourceAliasConflict {
        alias: String,
        first: String,
        second: String,
    },

    /// Introspection found more than one geometry column.
    #[error("More than 1 geometry columns found in resource {0}")]
    MultipleGeometryColumns(String),

    /// A projected field names a resource outside the query.
    #[error("Resource {resource} for field {field} does not exist.")]
    FieldResourceNotFound { resource: String, field: String },

    /// A sort entry names a resource outside the query.
    #[error("Resource {resource} for sorting field {field} does not exist.")]
    SortResourceNotFound { resource: String, field: String },

    /// The `fields` member is not a list.
    #[error("Parameter fields should be a list.")]
    FieldsInvalid,

    /// A field entry object has no `name`.
    #[error("Field name is missing.")]
    FieldNameMissing,

    /// A field entry is neither a string nor an object.
    #[error("Field is malformed. Instance of string or dictionary is expected.")]
    FieldMalformed,

    /// No queried resource carries the named field.
    #[error("Field {0} does not exist.")]
    FieldNotFound(String),

    /// Several queried resources carry the named field.
    #[error("Field {field} is ambiguous for resources {resources}.")]
    FieldAmbiguous { field: String, resources: String },

    /// The named resource carries no such field.
    #[error("Field {field} does not exist in resource {resource}.")]
    FieldNotInResource { field: String, resource: String },

    /// A filter argument references a field outside its resource.
    #[error("Field {field} does not belong to resource {resource}.")]
    FieldNotInArgumentResource { field: String, resource: String },

    /// Two projected fields share one output alias.
    #[error("Field {field} in resource {resource} is ambiguous.")]
    DuplicateFieldAlias { field: String, resource: String },

    /// The `sort` member is not a list.
    #[error("Parameter sort should be a list.")]
    SortInvalid,

    /// A sort entry object has no `name`.
    #[error("Sorting field name is missing.")]
    SortNameMissing,

    /// A sort entry is neither a string nor a well-formed object.
    #[error("Sorting field is malformed. Instance of string or dictionary is expected.")]
    SortMalformed,

    /// No queried resource carries the named sort field.
    #[error("Sorting field {0} does not exist.")]
    SortFieldNotFound(String),

    /// Several queried resources carry the named sort field.
    #[error("Sorting field {field} is ambiguous for resources {resources}.")]
    SortFieldAmbiguous { field: String, resources: String },

    /// The `filters` member is not a list.
    #[error("Parameter filters should be a list with at least one item.")]
    FiltersInvalid,

    /// A filter node is not an object.
    #[error("Filter must be a dictionary.")]
    FilterNotAnObject,

    /// A filter node has no `operator`.
    #[error("Parameter operator is missing from filter.")]
    OperatorMissing,

    /// The filter operator is outside the supported vocabulary.
    #[error("Operator {0} is not supported.")]
    OperatorUnknown(String),

    /// A filter node has no `arguments`.
    #[error("Parameter arguments is missing from filter.")]
    ArgumentsMissing,

    /// The `arguments` member is not a non-empty list.
    #[error("Parameter arguments must be a list with at least one member.")]
    ArgumentsInvalid,

    /// Wrong number of arguments for the operator.
    #[error("Operator {operator} expects {expected} arguments.")]
    ArgumentCount {
        operator: &'static str,
        expected: &'static str,
    },

    /// An argument value has no usable interpretation.
    #[error("Failed to parse argument value for operator {0}.")]
    ArgumentParse(&'static str),

    /// A geometry value reached a non-spatial comparison.
    #[error("Operator {0} does not support geometry types.")]
    GeometryOperand(&'static str),

    /// `LIKE` received two field references.
    #[error("Operator {0} does not support two fields as arguments.")]
    TwoFieldOperands(&'static str),

    /// `LIKE` received two literals.
    #[error("Operator {0} does not support two fields as literals.")]
    TwoLiteralOperands(&'static str),

    /// `LIKE` against a non-text field.
    #[error("Operator {0} only supports text fields.")]
    TextFieldRequired(&'static str),

    /// The relational token of a spatial filter is not a valid
    /// comparison operator.
    #[error("Expression {expression} for operator {operator} is not valid.")]
    SpatialCompareInvalid {
        expression: String,
        operator: &'static str,
    },

    /// A spatial argument is neither a geometry field nor a literal.
    #[error(
        "{position} argument for operator {operator} must be a geometry field or a GeoJSON encoded geometry."
    )]
    SpatialArgumentNotGeometry {
        position: &'static str,
        operator: &'static str,
    },

    /// The scalar argument of a spatial filter is not numeric.
    #[error("{position} argument for operator {operator} must be a number.")]
    SpatialArgumentNotNumeric {
        position: &'static str,
        operator: &'static str,
    },

    /// GeoJSON output needs exactly one projected geometry column.
    #[error("Format {0} requires exactly one geometry column")]
    GeometryColumnCount(&'static str),

    /// The server cancelled the statement (`statement_timeout`).
    #[error("Execution exceeded timeout.")]
    StatementTimeout(#[source] TokioPgError),

    /// The cumulative batch budget ran out between queries.
    #[error("Execution timeout has expired. Current timeout value is {0} seconds.")]
    BudgetExhausted(u64),

    /// Any other database failure while running a compiled query.
    #[error("Unhandled exception has occurred.")]
    Unhandled(#[source] TokioPgError),

    /// Database failure outside query execution, with context.
    #[error("Postgres error while {1}: {0}")]
    Postgres(#[source] TokioPgError, &'static str),

    /// Cannot build a connection pool.
    #[error("Unable to build a Postgres connection pool {1}: {0}")]
    PoolBuild(#[source] BuildError, String),

    /// Cannot get a connection from a pool.
    #[error("Unable to get a Postgres connection from the pool {1}: {0}")]
    PoolConn(#[source] PoolError, String),

    /// Invalid database connection string.
    #[error("Unable to parse connection string {1}: {0}")]
    BadConnectionString(#[source] TokioPgError, String),

    /// The data database has no PostGIS extension.
    #[error("PostGIS is not installed in database {0}")]
    PostgisMissing(String),

    /// WKB/WKT codec failure.
    #[error("Failed to decode geometry value: {0}")]
    GeometryDecode(#[from] GeozeroError),

    /// Hex transport form of a WKB value is malformed.
    #[error("Invalid hex-encoded geometry: {0}")]
    GeometryHex(#[from] hex::FromHexError),

    /// GeoJSON codec failure.
    #[error("Value is not a GeoJSON geometry: {0}")]
    GeoJson(#[from] geojson::Error),

    /// JSON (de)serialization failure while shaping a response.
    #[error("Malformed JSON value: {0}")]
    Json(#[from] serde_json::Error),

    /// A projected column has a type the row decoder does not cover.
    #[error("Field {field} has unsupported column type {column_type}.")]
    UnsupportedColumnType { field: String, column_type: String },
}

impl DataError {
    /// The category this error belongs to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        use DataError as E;
        match self {
            E::UnsupportedCrs(_)
            | E::UnsupportedFormat(_)
            | E::QueueMissing
            | E::QueueInvalid
            | E::LimitNotNumeric
            | E::OffsetNotNumeric
            | E::Config(_) => ErrorKind::Envelope,

            E::NoResourceSelected
            | E::ResourcesInvalid
            | E::ResourceNameMissing
            | E::ResourceMalformed
            | E::ResourceNotFound(_)
            | E::ResourceAliasConflict { .. }
            | E::MultipleGeometryColumns(_)
            | E::FieldResourceNotFound { .. }
            | E::SortResourceNotFound { .. } => ErrorKind::Resource,

            E::FieldsInvalid
            | E::FieldNameMissing
            | E::FieldMalformed
            | E::FieldNotFound(_)
            | E::FieldAmbiguous { .. }
            | E::FieldNotInResource { .. }
            | E::FieldNotInArgumentResource { .. }
            | E::DuplicateFieldAlias { .. }
            | E::SortInvalid
            | E::SortNameMissing
            | E::SortMalformed
            | E::SortFieldNotFound(_)
            | E::SortFieldAmbiguous { .. } => ErrorKind::Field,

            E::FiltersInvalid
            | E::FilterNotAnObject
            | E::OperatorMissing
            | E::OperatorUnknown(_)
            | E::ArgumentsMissing
            | E::ArgumentsInvalid
            | E::ArgumentCount { .. }
            | E::ArgumentParse(_)
            | E::GeometryOperand(_)
            | E::TwoFieldOperands(_)
            | E::TwoLiteralOperands(_)
            | E::TextFieldRequired(_)
            | E::SpatialCompareInvalid { .. }
            | E::SpatialArgumentNotGeometry { .. }
            | E::SpatialArgumentNotNumeric { .. }
            | E::GeometryColumnCount(_) => ErrorKind::Operator,

            E::StatementTimeout(_) | E::BudgetExhausted(_) => ErrorKind::Timeout,

            E::Unhandled(_)
            | E::Postgres(..)
            | E::PoolBuild(..)
            | E::PoolConn(..)
            | E::BadConnectionString(..)
            | E::PostgisMissing(_)
            | E::GeometryDecode(_)
            | E::GeometryHex(_)
            | E::GeoJson(_)
            | E::Json(_)
            | E::UnsupportedColumnType { .. } => ErrorKind::Execution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_categories() {
        assert_eq!(
            DataError::UnsupportedCrs("EPSG:32633".into()).kind(),
            ErrorKind::Envelope
        );
        assert_eq!(
            DataError::ResourceNotFound("roads".into()).kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            DataError::FieldNotFound("name".into()).kind(),
            ErrorKind::Field
        );
        assert_eq!(
            DataError::GeometryOperand("EQUAL").kind(),
            ErrorKind::Operator
        );
        assert_eq!(DataError::BudgetExhausted(30).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn messages_keep_wire_wording() {
        assert_eq!(
            DataError::QueueInvalid.to_string(),
            "Parameter queue should be a list with at least one item."
        );
        assert_eq!(
            DataError::FieldAmbiguous {
                field: "id".into(),
                resources: "roads,lakes".into()
            }
            .to_string(),
            "Field id is ambiguous for resources roads,lakes."
        );
        assert_eq!(
            DataError::GeometryColumnCount("GeoJSON").to_string(),
            "Format GeoJSON requires exactly one geometry column"
        );
        assert_eq!(
            DataError::BudgetExhausted(30).to_string(),
            "Execution timeout has expired. Current timeout value is 30 seconds."
        );
    }
}
