#![forbid(unsafe_code)]

//! Safe, structured query translator and executor for PostGIS-hosted
//! vector catalogs.
//!
//! Clients submit declarative query documents naming catalog resources,
//! fields, filters (comparison and spatial), sort keys and paging. The
//! library resolves the documents against a catalog of *vector-storer*
//! resources, lowers them into parameterized SQL against the data
//! database, executes them under a global time budget and returns flat
//! records or a GeoJSON `FeatureCollection` in the requested CRS.
//!
//! ```no_run
//! use data_api::{DataConfig, QueryExecutor};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), data_api::DataError> {
//! let config = DataConfig {
//!     catalog: Some("postgresql://ckan@localhost/ckan".into()),
//!     vectorstore: Some("postgresql://data@localhost/vectorstore".into()),
//!     timeout: None,
//! };
//! let executor = QueryExecutor::new(&config).await?;
//! let batch = executor
//!     .execute(&json!({
//!         "crs": "EPSG:4326",
//!         "format": "GeoJSON",
//!         "queue": [{
//!             "resources": ["roads"],
//!             "filters": [
//!                 {"operator": "LIKE", "arguments": [{"name": "name"}, "main"]}
//!             ],
//!             "limit": 100
//!         }]
//!     }))
//!     .await?;
//! println!("{}", serde_json::to_string(&batch)?);
//! # Ok(())
//! # }
//! ```
//!
//! Compilation is pure: given an [`query::ExecutionContext`] holding
//! introspected resource descriptors, [`query::compile_query`] yields
//! the SQL string and its positional argument tuple without touching
//! the database. User literals only ever travel through placeholders.

pub mod config;
pub mod error;
pub mod geometry;
pub mod pg;
pub mod query;
pub mod registry;

pub use config::DataConfig;
pub use error::{DataError, DataResult, ErrorKind};
pub use query::{BatchOutput, QueryExecutor, QueryOutput};
