//! Lowering of validated query documents into parameterized SQL.
//!
//! The compiler never interpolates user literals into the SQL string:
//! literals travel through positional `$N` placeholders, identifiers
//! are catalog/metadata values emitted through
//! [`escape_identifier`], and table aliases are generated.

use std::collections::BTreeMap;

use deadpool_postgres::tokio_postgres::types::{ToSql, Type};
use log::debug;
use postgres_protocol::escape::escape_identifier;
use serde_json::Value;

use crate::error::{DataError, DataResult};
use crate::geometry;
use crate::query::context::{ExecutionContext, ResourceDescriptor, ResourceMetadata};
use crate::query::{FieldSpec, Filter, FilterArg, QueryDoc, ResourceRef, SortKey};
use crate::registry::{CompareOp, DATABASE_SRID, LITERAL_SRID, Operator, OutputFormat, SpatialOp};

/// A literal bound through a positional placeholder.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlParam {
    /// Postgres type the prepared statement declares for this value.
    #[must_use]
    pub fn pg_type(&self) -> Type {
        match self {
            Self::Int(_) => Type::INT8,
            Self::Float(_) => Type::FLOAT8,
            Self::Text(_) => Type::TEXT,
        }
    }

    /// Borrow as a bindable query parameter.
    #[must_use]
    pub fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Int(value) => value,
            Self::Float(value) => value,
            Self::Text(value) => value,
        }
    }
}

/// One projected output column.
#[derive(Clone, Debug)]
pub struct ProjectedField {
    /// Output alias (response key).
    pub alias: String,
    /// Underlying column name.
    pub name: String,
    /// Canonical name of the owning resource.
    pub resource: String,
    /// Alias-qualified, quoted column reference, e.g. `t1."geom"`.
    pub qualified: String,
    /// Database type tag.
    pub type_name: String,
    pub is_geometry: bool,
    /// Stored SRID, geometry columns only.
    pub srid: Option<i32>,
}

/// Compiler output: one statement plus its ordered argument tuple.
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub projection: Vec<ProjectedField>,
}

/// Compile one queue element against an execution context whose
/// metadata already describes every referenced resource.
pub fn compile_query(context: &ExecutionContext, query: &Value) -> DataResult<CompiledQuery> {
    let doc = QueryDoc::from_value(query)?;
    compile_doc(context, &doc)
}

pub(crate) fn compile_doc(
    context: &ExecutionContext,
    doc: &QueryDoc,
) -> DataResult<CompiledQuery> {
    let scope = Scope::build(context, &doc.resources)?;
    let projection = build_projection(&scope, &doc.fields)?;

    if context.format == OutputFormat::GeoJson {
        let geometry_columns = projection.iter().filter(|f| f.is_geometry).count();
        if geometry_columns != 1 {
            return Err(DataError::GeometryColumnCount(context.format.as_str()));
        }
    }

    let mut params = Params::default();
    let mut predicates = Vec::with_capacity(doc.filters.len());
    for filter in &doc.filters {
        predicates.push(compile_filter(&scope, filter, &mut params)?);
    }
    let order_by = build_order_by(&scope, &doc.sort, &projection)?;

    let select_list = projection
        .iter()
        .map(|field| select_expr(field, context.srid))
        .collect::<Vec<_>>()
        .join(", ");
    let from_list = scope
        .resources
        .iter()
        .filter_map(|name| scope.descriptor(name))
        .map(|descriptor| {
            format!(
                "{} as {}",
                escape_identifier(&descriptor.stub.table),
                descriptor.alias
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("select distinct {select_list} from {from_list}");
    if !predicates.is_empty() {
        sql.push_str(" where ");
        sql.push_str(&predicates.join(" AND "));
    }
    if !order_by.is_empty() {
        sql.push_str(" order by ");
        sql.push_str(&order_by.join(", "));
    }
    sql.push_str(&format!(" limit {} offset {};", doc.limit, doc.offset));
    debug!("SQL: {sql}");

    Ok(CompiledQuery {
        sql,
        params: params.values,
        projection,
    })
}

/// Resolution tables for one query: resource name *and* alias both map
/// to the canonical resource name, and referenced resources keep
/// first-reference order for the `from` clause.
struct Scope<'a> {
    metadata: &'a ResourceMetadata,
    mapping: BTreeMap<String, String>,
    resources: Vec<String>,
}

impl<'a> Scope<'a> {
    fn build(context: &'a ExecutionContext, resources: &[ResourceRef]) -> DataResult<Self> {
        let mut scope = Self {
            metadata: &context.metadata,
            mapping: BTreeMap::new(),
            resources: Vec::with_capacity(resources.len()),
        };
        for resource in resources {
            if !context.resources.contains_key(&resource.name)
                || !context.metadata.contains_key(&resource.name)
            {
                return Err(DataError::ResourceNotFound(resource.name.clone()));
            }
            scope.bind(&resource.name, &resource.name)?;
            scope.bind(&resource.alias, &resource.name)?;
            if !scope.resources.contains(&resource.name) {
                scope.resources.push(resource.name.clone());
            }
        }
        Ok(scope)
    }

    fn bind(&mut self, key: &str, name: &str) -> DataResult<()> {
        if let Some(existing) = self.mapping.get(key) {
            if existing != name {
                return Err(DataError::ResourceAliasConflict {
                    alias: key.to_string(),
                    first: existing.clone(),
                    second: name.to_string(),
                });
            }
        } else {
            self.mapping.insert(key.to_string(), name.to_string());
        }
        Ok(())
    }

    fn canonical(&self, key: &str) -> Option<&str> {
        self.mapping.get(key).map(String::as_str)
    }

    fn descriptor(&self, canonical: &str) -> Option<&'a ResourceDescriptor> {
        self.metadata.get(canonical)
    }

    /// Canonical names of queried resources carrying `field`, in
    /// first-reference order.
    fn resources_with_field(&self, field: &str) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|name| {
                self.metadata
                    .get(name.as_str())
                    .is_some_and(|descriptor| descriptor.field(field).is_some())
            })
            .map(String::as_str)
            .collect()
    }

    /// Resolve a missing `resource` member by unique containment.
    fn infer_resource(&self, field: &str, sorting: bool) -> DataResult<String> {
        let owners = self.resources_with_field(field);
        match owners.as_slice() {
            [] if sorting => Err(DataError::SortFieldNotFound(field.to_string())),
            [] => Err(DataError::FieldNotFound(field.to_string())),
            [owner] => Ok((*owner).to_string()),
            owners if sorting => Err(DataError::SortFieldAmbiguous {
                field: field.to_string(),
                resources: owners.join(","),
            }),
            owners => Err(DataError::FieldAmbiguous {
                field: field.to_string(),
                resources: owners.join(","),
            }),
        }
    }
}

/// A field reference resolved against the scope.
struct ResolvedField {
    table_alias: String,
    name: String,
    type_name: String,
    is_geometry: bool,
    srid: Option<i32>,
}

impl ResolvedField {
    fn qualified(&self) -> String {
        format!("{}.{}", self.table_alias, escape_identifier(&self.name))
    }
}

/// Placeholder allocator; values keep emission order.
#[derive(Default)]
struct Params {
    values: Vec<SqlParam>,
}

impl Params {
    fn push(&mut self, value: SqlParam) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }
}

fn build_projection(scope: &Scope, fields: &[FieldSpec]) -> DataResult<Vec<ProjectedField>> {
    let expanded: Vec<FieldSpec>;
    let specs = if fields.is_empty() {
        // No selection: every field of every queried resource.
        expanded = scope
            .resources
            .iter()
            .filter_map(|name| scope.descriptor(name).map(|descriptor| (name, descriptor)))
            .flat_map(|(name, descriptor)| {
                descriptor.schema.fields.iter().map(|field| FieldSpec {
                    name: field.name.clone(),
                    resource: Some(name.clone()),
                    alias: field.name.clone(),
                })
            })
            .collect();
        &expanded
    } else {
        fields
    };

    let mut projection: Vec<ProjectedField> = Vec::with_capacity(specs.len());
    for spec in specs {
        let resource_key = match &spec.resource {
            Some(resource) => resource.clone(),
            None => scope.infer_resource(&spec.name, false)?,
        };
        let Some(descriptor) = scope
            .canonical(&resource_key)
            .and_then(|canonical| scope.descriptor(canonical))
        else {
            return Err(DataError::FieldResourceNotFound {
                resource: resource_key,
                field: spec.name.clone(),
            });
        };
        let Some(info) = descriptor.field(&spec.name) else {
            return Err(DataError::FieldNotInResource {
                field: spec.name.clone(),
                resource: resource_key,
            });
        };
        if projection.iter().any(|field| field.alias == spec.alias) {
            return Err(DataError::DuplicateFieldAlias {
                field: info.name.clone(),
                resource: resource_key,
            });
        }
        let is_geometry = descriptor.is_geometry(&info.name);
        projection.push(ProjectedField {
            alias: spec.alias.clone(),
            name: info.name.clone(),
            resource: descriptor.stub.table.clone(),
            qualified: format!("{}.{}", descriptor.alias, escape_identifier(&info.name)),
            type_name: info.type_name.clone(),
            is_geometry,
            srid: if is_geometry { descriptor.schema.srid } else { None },
        });
    }
    Ok(projection)
}

fn select_expr(field: &ProjectedField, target_srid: i32) -> String {
    let alias = escape_identifier(&field.alias);
    if field.is_geometry && field.srid != Some(target_srid) {
        format!("ST_Transform({}, {target_srid}) as {alias}", field.qualified)
    } else {
        format!("{} as {alias}", field.qualified)
    }
}

fn build_order_by(
    scope: &Scope,
    sort: &[SortKey],
    projection: &[ProjectedField],
) -> DataResult<Vec<String>> {
    let mut items = Vec::with_capacity(sort.len());
    for key in sort {
        // An output alias sorts by its underlying column.
        let mut name = key.name.clone();
        if let Some(projected) = projection.iter().find(|field| field.alias == name) {
            if projected.name != name {
                name.clone_from(&projected.name);
            }
        }
        let resource_key = match &key.resource {
            Some(resource) => resource.clone(),
            None => scope.infer_resource(&name, true)?,
        };
        let Some(descriptor) = scope
            .canonical(&resource_key)
            .and_then(|canonical| scope.descriptor(canonical))
        else {
            return Err(DataError::SortResourceNotFound {
                resource: resource_key,
                field: name,
            });
        };
        let mut item = format!("{}.{}", descriptor.alias, escape_identifier(&name));
        if key.desc {
            item.push_str(" desc");
        }
        items.push(item);
    }
    Ok(items)
}

fn compile_filter(scope: &Scope, filter: &Filter, params: &mut Params) -> DataResult<String> {
    match filter.operator {
        Operator::Compare(op) => compile_compare(scope, op, &filter.args, params),
        Operator::Spatial(SpatialOp::Area) => compile_area(scope, &filter.args, params),
        Operator::Spatial(SpatialOp::Distance) => compile_distance(scope, &filter.args, params),
        Operator::Spatial(SpatialOp::Contains) => {
            compile_relation(scope, SpatialOp::Contains, "ST_Contains", &filter.args, params)
        }
        Operator::Spatial(SpatialOp::Intersects) => compile_relation(
            scope,
            SpatialOp::Intersects,
            "ST_Intersects",
            &filter.args,
            params,
        ),
    }
}

/// Resolve a filter argument as a field reference; literals yield
/// `None`.
fn resolve_field(scope: &Scope, arg: &FilterArg) -> DataResult<Option<ResolvedField>> {
    let FilterArg::Field(field_ref) = arg else {
        return Ok(None);
    };
    let resource_key = match &field_ref.resource {
        Some(resource) => {
            if scope
                .canonical(resource)
                .and_then(|canonical| scope.descriptor(canonical))
                .is_none()
            {
                return Err(DataError::ResourceNotFound(resource.clone()));
            }
            resource.clone()
        }
        None => scope.infer_resource(&field_ref.name, false)?,
    };
    let Some(descriptor) = scope
        .canonical(&resource_key)
        .and_then(|canonical| scope.descriptor(canonical))
    else {
        return Err(DataError::ResourceNotFound(resource_key));
    };
    let Some(info) = descriptor.field(&field_ref.name) else {
        return Err(DataError::FieldNotInArgumentResource {
            field: field_ref.name.clone(),
            resource: resource_key,
        });
    };
    let is_geometry = descriptor.is_geometry(&info.name);
    Ok(Some(ResolvedField {
        table_alias: descriptor.alias.clone(),
        name: info.name.clone(),
        type_name: info.type_name.clone(),
        is_geometry,
        srid: if is_geometry { descriptor.schema.srid } else { None },
    }))
}

fn literal_param(arg: &FilterArg, operator: &'static str) -> DataResult<SqlParam> {
    match arg {
        FilterArg::Int(value) => Ok(SqlParam::Int(*value)),
        FilterArg::Float(value) => Ok(SqlParam::Float(*value)),
        FilterArg::Text(value) => Ok(SqlParam::Text(value.clone())),
        FilterArg::Field(_) | FilterArg::Geometry(_) => Err(DataError::ArgumentParse(operator)),
    }
}

fn compile_compare(
    scope: &Scope,
    op: CompareOp,
    args: &[FilterArg],
    params: &mut Params,
) -> DataResult<String> {
    if args.len() != 2 {
        return Err(DataError::ArgumentCount {
            operator: op.name(),
            expected: "two",
        });
    }
    if matches!(args[0], FilterArg::Geometry(_)) || matches!(args[1], FilterArg::Geometry(_)) {
        return Err(DataError::GeometryOperand(op.name()));
    }
    let left = resolve_field(scope, &args[0])?;
    let right = resolve_field(scope, &args[1])?;
    if left.as_ref().is_some_and(|f| f.is_geometry)
        || right.as_ref().is_some_and(|f| f.is_geometry)
    {
        return Err(DataError::GeometryOperand(op.name()));
    }

    let expression = op.as_sql();
    match (left, right) {
        (Some(a), Some(b)) => {
            if op == CompareOp::Like {
                return Err(DataError::TwoFieldOperands(op.name()));
            }
            Ok(format!("({} {expression} {})", a.qualified(), b.qualified()))
        }
        (Some(field), None) => compile_field_literal(op, &field, &args[1], params),
        (None, Some(field)) => compile_field_literal(op, &field, &args[0], params),
        (None, None) => {
            if op == CompareOp::Like {
                return Err(DataError::TwoLiteralOperands(op.name()));
            }
            let a = params.push(literal_param(&args[0], op.name())?);
            let b = params.push(literal_param(&args[1], op.name())?);
            Ok(format!("({a} {expression} {b})"))
        }
    }
}

/// The field side is always emitted on the left, whatever the argument
/// order.
fn compile_field_literal(
    op: CompareOp,
    field: &ResolvedField,
    literal: &FilterArg,
    params: &mut Params,
) -> DataResult<String> {
    let expression = op.as_sql();
    if op == CompareOp::Like {
        if field.type_name != "varchar" {
            return Err(DataError::TextFieldRequired(op.name()));
        }
        let pattern = match literal {
            FilterArg::Text(value) => format!("%{value}%"),
            FilterArg::Int(value) => format!("%{value}%"),
            FilterArg::Float(value) => format!("%{value}%"),
            FilterArg::Field(_) | FilterArg::Geometry(_) => {
                return Err(DataError::ArgumentParse(op.name()));
            }
        };
        let placeholder = params.push(SqlParam::Text(pattern));
        return Ok(format!("({} {expression} {placeholder})", field.qualified()));
    }

    // Comparing a text column against a numeric literal casts the
    // column, picked by the literal's type.
    let cast = if field.type_name == "varchar" {
        match literal {
            FilterArg::Int(_) => "::int",
            FilterArg::Float(_) => "::float",
            _ => "",
        }
    } else {
        ""
    };
    let placeholder = params.push(literal_param(literal, op.name())?);
    Ok(format!(
        "({}{cast} {expression} {placeholder})",
        field.qualified()
    ))
}

/// Relational token of `AREA`/`DISTANCE`: a comparison operator name,
/// minus `NOT_EQUAL` and `LIKE`.
fn spatial_compare(arg: &FilterArg, operator: &'static str) -> DataResult<&'static str> {
    let token = match arg {
        FilterArg::Text(token) => CompareOp::from_name(token),
        _ => None,
    };
    token
        .filter(|op| op.allowed_in_spatial())
        .map(CompareOp::as_sql)
        .ok_or_else(|| DataError::SpatialCompareInvalid {
            expression: arg.display(),
            operator,
        })
}

/// Emit one side of a spatial predicate. Geometry fields stored
/// outside the database SRID are wrapped in `ST_Transform`; literals
/// bind as WKT assumed to be in `EPSG:3857`.
fn spatial_side(
    scope: &Scope,
    arg: &FilterArg,
    position: &'static str,
    operator: &'static str,
    params: &mut Params,
    transform_literal: bool,
) -> DataResult<String> {
    if let Some(field) = resolve_field(scope, arg)? {
        if !field.is_geometry {
            return Err(DataError::SpatialArgumentNotGeometry { position, operator });
        }
        let qualified = field.qualified();
        return Ok(if field.srid != Some(DATABASE_SRID) {
            format!("ST_Transform({qualified}, {DATABASE_SRID})")
        } else {
            qualified
        });
    }
    if let FilterArg::Geometry(geom) = arg {
        let wkt = geometry::to_wkt(geom)?;
        let placeholder = params.push(SqlParam::Text(wkt));
        return Ok(if transform_literal {
            format!("ST_Transform(ST_GeomFromText({placeholder}, {LITERAL_SRID}), {DATABASE_SRID})")
        } else {
            format!("ST_GeomFromText({placeholder}, {LITERAL_SRID})")
        });
    }
    Err(DataError::SpatialArgumentNotGeometry { position, operator })
}

fn numeric_param(
    arg: &FilterArg,
    position: &'static str,
    operator: &'static str,
) -> DataResult<SqlParam> {
    match arg {
        FilterArg::Int(value) => Ok(SqlParam::Int(*value)),
        FilterArg::Float(value) => Ok(SqlParam::Float(*value)),
        _ => Err(DataError::SpatialArgumentNotNumeric { position, operator }),
    }
}

fn compile_area(scope: &Scope, args: &[FilterArg], params: &mut Params) -> DataResult<String> {
    const OP: &str = "AREA";
    if args.len() != 3 {
        return Err(DataError::ArgumentCount {
            operator: OP,
            expected: "three",
        });
    }
    let compare = spatial_compare(&args[1], OP)?;
    let side = spatial_side(scope, &args[0], "First", OP, params, false)?;
    let value = params.push(numeric_param(&args[2], "Third", OP)?);
    Ok(format!("(ST_Area({side}) {compare} {value})"))
}

fn compile_distance(scope: &Scope, args: &[FilterArg], params: &mut Params) -> DataResult<String> {
    const OP: &str = "DISTANCE";
    if args.len() != 4 {
        return Err(DataError::ArgumentCount {
            operator: OP,
            expected: "four",
        });
    }
    let compare = spatial_compare(&args[2], OP)?;
    let a = spatial_side(scope, &args[0], "First", OP, params, true)?;
    let b = spatial_side(scope, &args[1], "Second", OP, params, true)?;
    let value = params.push(numeric_param(&args[3], "Fourth", OP)?);
    Ok(format!("(ST_Distance({a}, {b}) {compare} {value})"))
}

fn compile_relation(
    scope: &Scope,
    op: SpatialOp,
    function: &'static str,
    args: &[FilterArg],
    params: &mut Params,
) -> DataResult<String> {
    let name = op.name();
    if args.len() != 2 {
        return Err(DataError::ArgumentCount {
            operator: name,
            expected: "two",
        });
    }
    let a = spatial_side(scope, &args[0], "First", name, params, true)?;
    let b = spatial_side(scope, &args[1], "Second", name, params, true)?;
    Ok(format!("({function}({a}, {b}) = TRUE)"))
}
