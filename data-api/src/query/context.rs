//! Per-batch execution state.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::pg::{FieldInfo, ResourceMap, ResourceSchema, ResourceStub};
use crate::registry::OutputFormat;

/// Catalog stub augmented with the introspected schema and the table
/// alias assigned for this batch.
#[derive(Clone, Debug, Serialize)]
pub struct ResourceDescriptor {
    #[serde(flatten)]
    pub stub: ResourceStub,
    /// Table alias of the form `t{k}`.
    pub alias: String,
    #[serde(flatten)]
    pub schema: ResourceSchema,
}

impl ResourceDescriptor {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.schema.field(name)
    }

    /// Whether `name` is this resource's geometry column.
    #[must_use]
    pub fn is_geometry(&self, name: &str) -> bool {
        self.schema.geometry_column.as_deref() == Some(name)
    }
}

/// Descriptor cache keyed by resource name. Entries are only ever
/// added, never mutated; it doubles as the `metadata` member of the
/// batch response.
pub type ResourceMetadata = BTreeMap<String, ResourceDescriptor>;

/// State shared by all queries of one batch.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Output shape for every query in the batch.
    pub format: OutputFormat,
    /// Target SRID of projected geometries.
    pub srid: i32,
    /// Catalog discovery result.
    pub resources: ResourceMap,
    /// Resources introspected so far.
    pub metadata: ResourceMetadata,
    /// Cumulative (clamped) query wall time.
    pub elapsed: Duration,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(format: OutputFormat, srid: i32, resources: ResourceMap) -> Self {
        Self {
            format,
            srid,
            resources,
            metadata: ResourceMetadata::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Insert a freshly introspected resource. The table alias is a
    /// function of the cache size, so `t{k}` follows first-reference
    /// order within the batch.
    pub fn insert_descriptor(&mut self, name: &str, stub: ResourceStub, schema: ResourceSchema) {
        let alias = format!("t{}", self.metadata.len() + 1);
        self.metadata
            .insert(name.to_string(), ResourceDescriptor { stub, alias, schema });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::ResourceMap;

    fn stub(table: &str) -> ResourceStub {
        ResourceStub {
            table: table.to_string(),
            resource_name: Some(table.to_string()),
            package_title: None,
            package_notes: None,
            wms: None,
            wms_server: None,
            wms_layer: None,
            geometry_type: None,
        }
    }

    fn schema() -> ResourceSchema {
        ResourceSchema {
            fields: vec![],
            srid: None,
            geometry_column: None,
        }
    }

    #[test]
    fn aliases_follow_first_reference_order() {
        let mut context =
            ExecutionContext::new(OutputFormat::GeoJson, 3857, ResourceMap::new());
        context.insert_descriptor("zebra", stub("zebra"), schema());
        context.insert_descriptor("alpha", stub("alpha"), schema());
        assert_eq!(context.metadata["zebra"].alias, "t1");
        assert_eq!(context.metadata["alpha"].alias, "t2");
    }

    #[test]
    fn descriptors_serialize_flat() {
        let mut context =
            ExecutionContext::new(OutputFormat::GeoJson, 3857, ResourceMap::new());
        context.insert_descriptor("roads", stub("roads"), schema());
        let value = serde_json::to_value(&context.metadata["roads"]).unwrap();
        assert_eq!(value["table"], "roads");
        assert_eq!(value["alias"], "t1");
        assert!(value.get("fields").is_some());
    }
}
