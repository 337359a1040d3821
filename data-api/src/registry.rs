//! Closed registries: supported CRS codes, output formats and the
//! comparison/spatial operator vocabulary.

use crate::error::{DataError, DataResult};
use serde::{Deserialize, Serialize};

/// CRS identifiers accepted in the request envelope.
pub const CRS_SUPPORTED: [&str; 5] = [
    "EPSG:900913",
    "EPSG:3857",
    "EPSG:4326",
    "EPSG:2100",
    "EPSG:4258",
];

/// SRID the vector store keeps its geometries in.
pub const DATABASE_SRID: i32 = 2100;

/// SRID of query results when the request names no CRS.
pub const DEFAULT_OUTPUT_SRID: i32 = 3857;

/// SRID assumed for geometry literals supplied inside filters,
/// independent of the request CRS.
pub const LITERAL_SRID: i32 = 3857;

/// Hard cap on rows returned by a single query.
pub const MAX_RESULT_ROWS: i64 = 10_000;

/// Default total batch budget in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Resolve a `EPSG:<code>` identifier from the supported set to its
/// integer code.
pub fn parse_crs(crs: &str) -> DataResult<i32> {
    if !CRS_SUPPORTED.contains(&crs) {
        return Err(DataError::UnsupportedCrs(crs.to_string()));
    }
    crs.split_once(':')
        .and_then(|(_, code)| code.parse().ok())
        .ok_or_else(|| DataError::UnsupportedCrs(crs.to_string()))
}

/// Shape of query results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Flat records keyed by output alias.
    #[serde(rename = "JSON")]
    Json,
    /// One `FeatureCollection` per query.
    #[default]
    #[serde(rename = "GeoJSON")]
    GeoJson,
}

impl OutputFormat {
    /// Resolve a format name from the supported set.
    pub fn parse(name: &str) -> DataResult<Self> {
        match name {
            "JSON" => Ok(Self::Json),
            "GeoJSON" => Ok(Self::GeoJson),
            other => Err(DataError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Wire spelling of this format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::GeoJson => "GeoJSON",
        }
    }
}

/// Binary comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Like,
}

impl CompareOp {
    /// Resolve the wire spelling of a comparison operator.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "EQUAL" => Some(Self::Equal),
            "NOT_EQUAL" => Some(Self::NotEqual),
            "GREATER" => Some(Self::Greater),
            "GREATER_OR_EQUAL" => Some(Self::GreaterOrEqual),
            "LESS" => Some(Self::Less),
            "LESS_OR_EQUAL" => Some(Self::LessOrEqual),
            "LIKE" => Some(Self::Like),
            _ => None,
        }
    }

    /// Wire spelling.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Equal => "EQUAL",
            Self::NotEqual => "NOT_EQUAL",
            Self::Greater => "GREATER",
            Self::GreaterOrEqual => "GREATER_OR_EQUAL",
            Self::Less => "LESS",
            Self::LessOrEqual => "LESS_OR_EQUAL",
            Self::Like => "LIKE",
        }
    }

    /// SQL spelling.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Like => "like",
        }
    }

    /// Whether this operator may serve as the relational token inside
    /// `AREA` and `DISTANCE` filters.
    #[must_use]
    pub fn allowed_in_spatial(self) -> bool {
        !matches!(self, Self::NotEqual | Self::Like)
    }
}

/// Spatial filter operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpatialOp {
    Area,
    Distance,
    Contains,
    Intersects,
}

impl SpatialOp {
    /// Resolve the wire spelling of a spatial operator.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AREA" => Some(Self::Area),
            "DISTANCE" => Some(Self::Distance),
            "CONTAINS" => Some(Self::Contains),
            "INTERSECTS" => Some(Self::Intersects),
            _ => None,
        }
    }

    /// Wire spelling.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Area => "AREA",
            Self::Distance => "DISTANCE",
            Self::Contains => "CONTAINS",
            Self::Intersects => "INTERSECTS",
        }
    }
}

/// The full filter operator vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Compare(CompareOp),
    Spatial(SpatialOp),
}

impl Operator {
    /// Resolve any supported operator from its wire spelling.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        CompareOp::from_name(name)
            .map(Self::Compare)
            .or_else(|| SpatialOp::from_name(name).map(Self::Spatial))
    }

    /// Wire spelling.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Compare(op) => op.name(),
            Self::Spatial(op) => op.name(),
        }
    }
}
