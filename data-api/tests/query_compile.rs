//! Contract tests for the query compiler, driven through the public
//! API the way the execution engine drives it.

use data_api::pg::{FieldInfo, ResourceMap, ResourceSchema, ResourceStub};
use data_api::query::{ExecutionContext, SqlParam, compile_query};
use data_api::registry::OutputFormat;
use serde_json::json;

fn stub(table: &str) -> ResourceStub {
    ResourceStub {
        table: table.to_string(),
        resource_name: Some(table.to_string()),
        package_title: Some("Road network".to_string()),
        package_notes: None,
        wms: None,
        wms_server: None,
        wms_layer: None,
        geometry_type: Some("LINESTRING".to_string()),
    }
}

fn schema(fields: &[(&str, &str)], geometry: Option<(&str, i32)>) -> ResourceSchema {
    ResourceSchema {
        fields: fields
            .iter()
            .map(|(name, type_name)| FieldInfo {
                name: (*name).to_string(),
                type_name: (*type_name).to_string(),
            })
            .collect(),
        srid: geometry.map(|(_, srid)| srid),
        geometry_column: geometry.map(|(column, _)| column.to_string()),
    }
}

fn catalog_context(format: OutputFormat, srid: i32) -> ExecutionContext {
    let mut context = ExecutionContext::new(format, srid, ResourceMap::new());
    for (name, fields, geometry) in [
        (
            "roads",
            vec![
                ("geom", "geometry"),
                ("name", "varchar"),
                ("code", "varchar"),
            ],
            Some(("geom", 2100)),
        ),
        (
            "settlements",
            vec![("geom", "geometry"), ("name", "varchar"), ("population", "int4")],
            Some(("geom", 4326)),
        ),
    ] {
        context.resources.insert(name.to_string(), stub(name));
        context.insert_descriptor(name, stub(name), schema(&fields, geometry));
    }
    context
}

#[test]
fn geojson_projection_with_crs_transform() {
    let context = catalog_context(OutputFormat::GeoJson, 3857);
    let compiled = compile_query(&context, &json!({"resources": ["roads"]})).unwrap();
    assert_eq!(
        compiled.sql,
        "select distinct ST_Transform(t1.\"geom\", 3857) as \"geom\", \
         t1.\"name\" as \"name\", t1.\"code\" as \"code\" \
         from \"roads\" as t1 limit 10000 offset 0;"
    );
    assert!(compiled.params.is_empty());
}

#[test]
fn full_query_shape() {
    let context = catalog_context(OutputFormat::GeoJson, 3857);
    let compiled = compile_query(
        &context,
        &json!({
            "resources": [{"name": "settlements", "alias": "s"}],
            "fields": [
                {"name": "geom", "resource": "s"},
                {"name": "name", "resource": "s", "alias": "settlement"}
            ],
            "filters": [
                {"operator": "GREATER_OR_EQUAL", "arguments": [{"name": "population"}, 10000]},
                {
                    "operator": "INTERSECTS",
                    "arguments": [
                        {"name": "geom", "resource": "s"},
                        {"type": "Polygon",
                         "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]}
                    ]
                }
            ],
            "sort": [{"name": "settlement", "desc": true}],
            "limit": 50,
            "offset": 10
        }),
    )
    .unwrap();

    assert_eq!(
        compiled.sql,
        "select distinct ST_Transform(t2.\"geom\", 3857) as \"geom\", \
         t2.\"name\" as \"settlement\" from \"settlements\" as t2 \
         where (t2.\"population\" >= $1) \
         AND (ST_Intersects(ST_Transform(t2.\"geom\", 2100), \
         ST_Transform(ST_GeomFromText($2, 3857), 2100)) = TRUE) \
         order by t2.\"name\" desc limit 50 offset 10;"
    );
    assert_eq!(compiled.params[0], SqlParam::Int(10000));
    assert!(matches!(&compiled.params[1], SqlParam::Text(wkt) if wkt.starts_with("POLYGON")));
}

#[test]
fn implicit_cross_product_of_two_resources() {
    let context = catalog_context(OutputFormat::Json, 3857);
    let compiled = compile_query(
        &context,
        &json!({
            "resources": ["roads", "settlements"],
            "fields": ["code", "population"],
            "filters": [{
                "operator": "DISTANCE",
                "arguments": [
                    {"name": "geom", "resource": "roads"},
                    {"name": "geom", "resource": "settlements"},
                    "LESS_OR_EQUAL",
                    250.0
                ]
            }]
        }),
    )
    .unwrap();
    assert!(
        compiled
            .sql
            .contains("from \"roads\" as t1, \"settlements\" as t2")
    );
    assert!(compiled.sql.contains(
        "where (ST_Distance(t1.\"geom\", ST_Transform(t2.\"geom\", 2100)) <= $1)"
    ));
    assert_eq!(compiled.params, vec![SqlParam::Float(250.0)]);
}

#[test]
fn adversarial_literals_stay_out_of_the_statement() {
    let context = catalog_context(OutputFormat::Json, 3857);
    for hostile in ["' or 1=1 --", "\"; select pg_sleep(10); --", "%'; drop --"] {
        let compiled = compile_query(
            &context,
            &json!({
                "resources": ["roads"],
                "fields": ["name"],
                "filters": [
                    {"operator": "LIKE", "arguments": [{"name": "name"}, hostile]}
                ]
            }),
        )
        .unwrap();
        assert!(!compiled.sql.contains(hostile), "literal leaked: {}", compiled.sql);
        assert_eq!(
            compiled.params,
            vec![SqlParam::Text(format!("%{hostile}%"))]
        );
    }
}

#[test]
fn errors_carry_stable_kinds() {
    use data_api::ErrorKind;

    let context = catalog_context(OutputFormat::Json, 3857);
    let err = compile_query(&context, &json!({"resources": ["rivers"]})).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert_eq!(err.to_string(), "Resource rivers does not exist.");

    let err = compile_query(
        &context,
        &json!({
            "resources": ["roads", "settlements"],
            "fields": ["name"]
        }),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Field);
    assert_eq!(
        err.to_string(),
        "Field name is ambiguous for resources roads,settlements."
    );
}
