//! Catalog discovery of vector-storer resources.

use std::collections::BTreeMap;

use deadpool_postgres::Object;
use log::info;
use serde::Serialize;

use crate::error::{DataError, DataResult};

/// One catalog entry. The key (and `table`) is the `db_resource_id`,
/// which doubles as the physical table name in the vector store.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
pub struct ResourceStub {
    pub table: String,
    pub resource_name: Option<String>,
    pub package_title: Option<String>,
    pub package_notes: Option<String>,
    pub wms: Option<String>,
    pub wms_server: Option<String>,
    pub wms_layer: Option<String>,
    pub geometry_type: Option<String>,
}

/// All queryable resources, keyed by `db_resource_id`.
pub type ResourceMap = BTreeMap<String, ResourceStub>;

/// Load every active, current vector-storer resource from the catalog,
/// together with its optional WMS sibling and package metadata.
pub async fn list_resources(conn: &Object) -> DataResult<ResourceMap> {
    let rows = conn
        .query(include_str!("scripts/list_resources.sql"), &[])
        .await
        .map_err(|e| DataError::Postgres(e, "querying catalog resources"))?;

    let mut resources = ResourceMap::new();
    for row in &rows {
        let id: String = row.get("db_resource_id");
        let stub = ResourceStub {
            table: id.clone(),
            resource_name: row.get("resource_name"),
            package_title: row.get("package_title"),
            package_notes: row.get("package_notes"),
            wms: row.get("wms_resource_id"),
            wms_server: row.get("wms_server"),
            wms_layer: row.get("wms_layer"),
            geometry_type: row.get("geometry_type"),
        };
        resources.insert(id, stub);
    }
    info!("Discovered {} vector resources in the catalog", resources.len());
    Ok(resources)
}
