//! Connection pooling for the catalog and vector store databases.

use deadpool_postgres::tokio_postgres::Config;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use log::debug;
use postgres::NoTls;

use crate::error::{DataError, DataResult};

pub const POOL_SIZE_DEFAULT: usize = 4;

/// A pool of connections to one database.
#[derive(Clone, Debug)]
pub struct PgPool {
    id: String,
    pool: Pool,
}

impl PgPool {
    /// Build a pool from a libpq-style connection string.
    pub async fn new(conn_str: &str) -> DataResult<Self> {
        let pg_cfg: Config = conn_str
            .parse()
            .map_err(|e| DataError::BadConnectionString(e, conn_str.to_string()))?;
        let id = pg_cfg.get_dbname().map_or_else(
            || format!("{:?}", pg_cfg.get_hosts().first()),
            ToString::to_string,
        );

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_cfg, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(POOL_SIZE_DEFAULT)
            .build()
            .map_err(|e| DataError::PoolBuild(e, id.clone()))?;

        Ok(Self { id, pool })
    }

    /// Check out one connection.
    pub async fn get(&self) -> DataResult<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| DataError::PoolConn(e, self.id.clone()))
    }

    /// Verify the PostGIS extension is installed (the vector store
    /// database needs it, the catalog database does not).
    pub async fn check_postgis(&self) -> DataResult<()> {
        let conn = self.get().await?;
        let version: String = conn
            .query_one("select PostGIS_Lib_Version() as version;", &[])
            .await
            .map(|row| row.get("version"))
            .map_err(|_| DataError::PostgisMissing(self.id.clone()))?;
        debug!("PostGIS {version} in database {}", self.id);
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.id.as_str()
    }
}
