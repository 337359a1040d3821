//! Column introspection of physical resource tables.

use deadpool_postgres::Object;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::{DataError, DataResult};

/// A single column surviving introspection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    /// Database type tag (`pg_type.typname`), e.g. `varchar`, `int4`,
    /// `float8`, `geometry`.
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Column layout of one physical table, in declared column order.
#[derive(Clone, Debug, Serialize)]
pub struct ResourceSchema {
    #[serde(serialize_with = "fields_as_map")]
    pub fields: Vec<FieldInfo>,
    /// SRID of the geometry column, when there is one.
    pub srid: Option<i32>,
    /// Name of the single geometry column, when there is one.
    pub geometry_column: Option<String>,
}

impl ResourceSchema {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|field| field.name == name)
    }
}

/// Introspect the columns, geometry column and SRID of one resource
/// table from `pg_class`/`pg_attribute`/`pg_type`/`geometry_columns`.
pub async fn describe_resource(conn: &Object, resource: &str) -> DataResult<ResourceSchema> {
    let rows = conn
        .query(include_str!("scripts/describe_resource.sql"), &[&resource])
        .await
        .map_err(|e| DataError::Postgres(e, "introspecting resource columns"))?;

    let columns = rows
        .iter()
        .map(|row| RawColumn {
            name: row.get("name"),
            type_name: row.get("type"),
            srid: row.get("srid"),
        })
        .collect();
    build_schema(resource, columns)
}

pub(crate) struct RawColumn {
    pub name: String,
    pub type_name: String,
    pub srid: Option<i32>,
}

// Columns whose name starts with '_' are internal to the vector storer
// and never surface as fields.
pub(crate) fn build_schema(resource: &str, columns: Vec<RawColumn>) -> DataResult<ResourceSchema> {
    let mut schema = ResourceSchema {
        fields: Vec::with_capacity(columns.len()),
        srid: None,
        geometry_column: None,
    };
    for column in columns {
        if column.name.starts_with('_') {
            continue;
        }
        if let Some(srid) = column.srid {
            if schema.srid.is_some() {
                return Err(DataError::MultipleGeometryColumns(resource.to_string()));
            }
            schema.srid = Some(srid);
            schema.geometry_column = Some(column.name.clone());
        }
        schema.fields.push(FieldInfo {
            name: column.name,
            type_name: column.type_name,
        });
    }
    Ok(schema)
}

fn fields_as_map<S: Serializer>(fields: &[FieldInfo], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(fields.len()))?;
    for field in fields {
        map.serialize_entry(&field.name, field)?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, type_name: &str, srid: Option<i32>) -> RawColumn {
        RawColumn {
            name: name.to_string(),
            type_name: type_name.to_string(),
            srid,
        }
    }

    #[test]
    fn keeps_declared_column_order() {
        let schema = build_schema(
            "roads",
            vec![
                column("geom", "geometry", Some(2100)),
                column("name", "varchar", None),
                column("lanes", "int4", None),
            ],
        )
        .unwrap();
        let names: Vec<_> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["geom", "name", "lanes"]);
        assert_eq!(schema.geometry_column.as_deref(), Some("geom"));
        assert_eq!(schema.srid, Some(2100));
    }

    #[test]
    fn drops_internal_columns() {
        let schema = build_schema(
            "roads",
            vec![
                column("_version", "int4", None),
                column("_geom_backup", "geometry", Some(2100)),
                column("name", "varchar", None),
            ],
        )
        .unwrap();
        let names: Vec<_> = schema.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["name"]);
        assert_eq!(schema.geometry_column, None);
        assert_eq!(schema.srid, None);
    }

    #[test]
    fn second_geometry_column_is_fatal() {
        let err = build_schema(
            "roads",
            vec![
                column("geom", "geometry", Some(2100)),
                column("geom2", "geometry", Some(4326)),
            ],
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "More than 1 geometry columns found in resource roads"
        );
    }

    #[test]
    fn fields_serialize_as_a_map_keyed_by_name() {
        let schema = build_schema(
            "roads",
            vec![
                column("geom", "geometry", Some(2100)),
                column("name", "varchar", None),
            ],
        )
        .unwrap();
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            value["fields"]["name"],
            serde_json::json!({"name": "name", "type": "varchar"})
        );
        assert_eq!(value["srid"], serde_json::json!(2100));
        assert_eq!(value["geometry_column"], serde_json::json!("geom"));
    }
}
