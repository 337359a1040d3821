//! Database access: connection pools and the catalog resolver.

mod introspect;
mod pool;
mod resources;

pub use introspect::{FieldInfo, ResourceSchema, describe_resource};
pub use pool::{PgPool, POOL_SIZE_DEFAULT};
pub use resources::{ResourceMap, ResourceStub, list_resources};
