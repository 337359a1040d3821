//! Batch execution against the catalog and vector store databases.

use std::time::{Duration, Instant};

use deadpool_postgres::Object;
use deadpool_postgres::tokio_postgres::error::SqlState;
use deadpool_postgres::tokio_postgres::types::{FromSql, ToSql, Type};
use deadpool_postgres::tokio_postgres::{Error as TokioPgError, Row};
use futures::future::try_join;
use geo_types::Geometry;
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection};
use geozero::wkb;
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::DataConfig;
use crate::error::{DataError, DataResult};
use crate::geometry;
use crate::pg::{PgPool, describe_resource, list_resources};
use crate::query::compile::{CompiledQuery, ProjectedField, SqlParam, compile_doc};
use crate::query::context::{ExecutionContext, ResourceMetadata};
use crate::query::QueryDoc;
use crate::registry::{DEFAULT_OUTPUT_SRID, OutputFormat, parse_crs};

/// Executes batches of structured queries against one catalog/vector
/// store pair.
///
/// One batch checks out one connection from each pool and runs its
/// queue sequentially; independent batches share nothing but the
/// pools.
#[derive(Clone, Debug)]
pub struct QueryExecutor {
    catalog: PgPool,
    vectorstore: PgPool,
    timeout_ms: u64,
}

/// Response envelope of one batch.
#[derive(Debug, Serialize)]
pub struct BatchOutput {
    pub data: Vec<QueryOutput>,
    pub crs: i32,
    pub metadata: ResourceMetadata,
    pub format: String,
}

/// Result of a single query inside a batch.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QueryOutput {
    /// Flat records keyed by output alias (`JSON` format).
    Records(Vec<Map<String, Value>>),
    /// One feature per row (`GeoJSON` format).
    Features(FeatureCollection),
}

impl QueryExecutor {
    /// Open both database pools and verify the vector store speaks
    /// PostGIS.
    pub async fn new(config: &DataConfig) -> DataResult<Self> {
        let catalog_dsn = config.catalog.as_deref().ok_or(DataError::Config(
            "A catalog connection string must be provided.",
        ))?;
        let vectorstore_dsn = config.vectorstore.as_deref().ok_or(DataError::Config(
            "A vector store connection string must be provided.",
        ))?;
        let (catalog, vectorstore) =
            try_join(PgPool::new(catalog_dsn), PgPool::new(vectorstore_dsn)).await?;
        vectorstore.check_postgis().await?;
        Ok(Self {
            catalog,
            vectorstore,
            timeout_ms: config.timeout_ms(),
        })
    }

    /// Run one batch.
    pub async fn execute(&self, request: &Value) -> DataResult<BatchOutput> {
        self.execute_with_metadata(request, ResourceMetadata::new())
            .await
    }

    /// Run one batch, seeding the descriptor cache. The (grown) cache
    /// comes back in [`BatchOutput::metadata`] for reuse.
    pub async fn execute_with_metadata(
        &self,
        request: &Value,
        metadata: ResourceMetadata,
    ) -> DataResult<BatchOutput> {
        let envelope = Envelope::parse(request)?;

        let catalog_conn = self.catalog.get().await?;
        let mut data_conn = self.vectorstore.get().await?;

        let resources = list_resources(&catalog_conn).await?;
        let mut context = ExecutionContext::new(envelope.format, envelope.srid, resources);
        context.metadata = metadata;

        let mut data = Vec::with_capacity(envelope.queue.len());
        for query in &envelope.queue {
            data.push(
                self.execute_query(&mut context, &mut data_conn, query)
                    .await?,
            );
        }

        Ok(BatchOutput {
            data,
            crs: context.srid,
            metadata: context.metadata,
            format: context.format.as_str().to_string(),
        })
    }

    async fn execute_query(
        &self,
        context: &mut ExecutionContext,
        conn: &mut Object,
        query: &Value,
    ) -> DataResult<QueryOutput> {
        let doc = QueryDoc::from_value(query)?;
        ensure_described(context, conn, &doc).await?;
        let compiled = compile_doc(context, &doc)?;

        let statement_timeout = remaining_timeout_ms(self.timeout_ms, context.elapsed);
        let started = Instant::now();
        let rows = run_statement(conn, &compiled, statement_timeout).await?;
        // Per-query cost enters the budget clamped to one second.
        context.elapsed += started.elapsed().min(Duration::from_secs(1));
        if context.elapsed >= Duration::from_millis(self.timeout_ms) {
            return Err(DataError::BudgetExhausted(self.timeout_ms / 1000));
        }

        match context.format {
            OutputFormat::GeoJson => Ok(QueryOutput::Features(features_from_rows(
                &rows,
                &compiled.projection,
            )?)),
            OutputFormat::Json => Ok(QueryOutput::Records(records_from_rows(
                &rows,
                &compiled.projection,
            )?)),
        }
    }
}

/// Introspect every resource the query references that the batch has
/// not described yet, assigning table aliases in first-reference
/// order.
async fn ensure_described(
    context: &mut ExecutionContext,
    conn: &Object,
    doc: &QueryDoc,
) -> DataResult<()> {
    for resource in &doc.resources {
        let Some(stub) = context.resources.get(&resource.name).cloned() else {
            return Err(DataError::ResourceNotFound(resource.name.clone()));
        };
        if context.metadata.contains_key(&resource.name) {
            continue;
        }
        let schema = describe_resource(conn, &resource.name).await?;
        context.insert_descriptor(&resource.name, stub, schema);
    }
    Ok(())
}

/// Statement budget left for the next query: whatever remains of the
/// batch budget, floored at one second.
pub(crate) fn remaining_timeout_ms(total_ms: u64, elapsed: Duration) -> u64 {
    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    total_ms.saturating_sub(elapsed_ms).max(1000)
}

async fn run_statement(
    conn: &mut Object,
    compiled: &CompiledQuery,
    timeout_ms: u64,
) -> DataResult<Vec<Row>> {
    let types: Vec<Type> = compiled.params.iter().map(SqlParam::pg_type).collect();
    let values: Vec<&(dyn ToSql + Sync)> =
        compiled.params.iter().map(SqlParam::as_sql).collect();

    // SET LOCAL scopes the timeout to the transaction running the
    // statement.
    let tx = conn
        .transaction()
        .await
        .map_err(|e| DataError::Postgres(e, "starting query transaction"))?;
    debug!("statement_timeout={timeout_ms}ms");
    tx.batch_execute(&format!("SET LOCAL statement_timeout TO {timeout_ms};"))
        .await
        .map_err(|e| DataError::Postgres(e, "setting statement timeout"))?;
    let statement = tx
        .prepare_typed(&compiled.sql, &types)
        .await
        .map_err(map_execution_error)?;
    let rows = tx.query(&statement, &values).await.map_err(map_execution_error)?;
    tx.commit()
        .await
        .map_err(|e| DataError::Postgres(e, "committing query transaction"))?;
    Ok(rows)
}

/// SQLSTATE 57014 is the server aborting on `statement_timeout`;
/// everything else stays generic.
fn map_execution_error(error: TokioPgError) -> DataError {
    if error.code() == Some(&SqlState::QUERY_CANCELED) {
        DataError::StatementTimeout(error)
    } else {
        DataError::Unhandled(error)
    }
}

fn features_from_rows(
    rows: &[Row],
    projection: &[ProjectedField],
) -> DataResult<FeatureCollection> {
    let mut features = Vec::with_capacity(rows.len());
    let mut feature_id: i64 = 0;
    for row in rows {
        feature_id += 1;
        let mut properties = Map::new();
        let mut geometry = None;
        for (column, field) in projection.iter().enumerate() {
            if field.is_geometry {
                geometry = decode_geometry(row, column)?;
            } else {
                properties.insert(field.alias.clone(), decode_value(row, column, field)?);
            }
        }
        features.push(Feature {
            bbox: None,
            geometry,
            id: Some(Id::Number(feature_id.into())),
            properties: Some(properties),
            foreign_members: None,
        });
    }
    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

fn records_from_rows(
    rows: &[Row],
    projection: &[ProjectedField],
) -> DataResult<Vec<Map<String, Value>>> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let mut record = Map::new();
        for (column, field) in projection.iter().enumerate() {
            let value = if field.is_geometry {
                match decode_geometry(row, column)? {
                    Some(geometry) => serde_json::to_value(geometry)?,
                    None => Value::Null,
                }
            } else {
                decode_value(row, column, field)?
            };
            record.insert(field.alias.clone(), value);
        }
        records.push(record);
    }
    Ok(records)
}

fn decode_geometry(row: &Row, column: usize) -> DataResult<Option<geojson::Geometry>> {
    let decoded: wkb::Decode<Geometry<f64>> = row
        .try_get(column)
        .map_err(|e| DataError::Postgres(e, "decoding geometry column"))?;
    Ok(decoded.geometry.map(|g| geometry::to_geojson(&g)))
}

/// Decode one non-geometry column, driven by the introspected type
/// tag.
fn decode_value(row: &Row, column: usize, field: &ProjectedField) -> DataResult<Value> {
    fn get<'a, T>(row: &'a Row, column: usize) -> DataResult<Option<T>>
    where
        T: FromSql<'a>,
    {
        row.try_get(column)
            .map_err(|e| DataError::Postgres(e, "decoding column value"))
    }

    let value = match field.type_name.as_str() {
        "bool" => get::<bool>(row, column)?.map_or(Value::Null, Value::from),
        "int2" => get::<i16>(row, column)?.map_or(Value::Null, Value::from),
        "int4" => get::<i32>(row, column)?.map_or(Value::Null, Value::from),
        "int8" => get::<i64>(row, column)?.map_or(Value::Null, Value::from),
        "float4" => get::<f32>(row, column)?.map_or(Value::Null, Value::from),
        "float8" => get::<f64>(row, column)?.map_or(Value::Null, Value::from),
        "varchar" | "text" | "bpchar" | "name" => {
            get::<String>(row, column)?.map_or(Value::Null, Value::from)
        }
        "json" | "jsonb" => get::<Value>(row, column)?.unwrap_or(Value::Null),
        other => {
            return Err(DataError::UnsupportedColumnType {
                field: field.alias.clone(),
                column_type: other.to_string(),
            });
        }
    };
    Ok(value)
}

/// Validated request envelope.
#[derive(Debug)]
struct Envelope {
    format: OutputFormat,
    srid: i32,
    queue: Vec<Value>,
}

impl Envelope {
    fn parse(request: &Value) -> DataResult<Self> {
        let mut format = OutputFormat::default();
        let mut srid = DEFAULT_OUTPUT_SRID;

        if let Some(crs) = request.get("crs") {
            let name = crs
                .as_str()
                .ok_or_else(|| DataError::UnsupportedCrs(crs.to_string()))?;
            srid = parse_crs(name)?;
        }
        if let Some(value) = request.get("format") {
            let name = value
                .as_str()
                .ok_or_else(|| DataError::UnsupportedFormat(value.to_string()))?;
            format = OutputFormat::parse(name)?;
        }
        let queue = match request.get("queue") {
            Some(Value::Array(queue)) if !queue.is_empty() => queue.clone(),
            Some(_) => return Err(DataError::QueueInvalid),
            None => return Err(DataError::QueueMissing),
        };
        Ok(Self {
            format,
            srid,
            queue,
        })
    }
}
