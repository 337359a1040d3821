//! Executor configuration.

use crate::error::{DataError, DataResult};
use crate::registry::DEFAULT_TIMEOUT_MS;
use serde::{Deserialize, Serialize};

/// Connection and budget settings for one [`QueryExecutor`](crate::QueryExecutor).
///
/// The serde aliases keep configuration files written for the legacy
/// key names (`sqlalchemy.catalog`, `sqlalchemy.vectorstore`) loadable.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Catalog database connection string.
    #[serde(alias = "sqlalchemy.catalog")]
    pub catalog: Option<String>,
    /// Vector store (data) database connection string.
    #[serde(alias = "sqlalchemy.vectorstore")]
    pub vectorstore: Option<String>,
    /// Total batch budget in milliseconds [DEFAULT: 30000].
    pub timeout: Option<u64>,
}

impl DataConfig {
    /// Check that both connection strings are present.
    pub fn validate(&self) -> DataResult<()> {
        if self.catalog.is_none() {
            return Err(DataError::Config(
                "A catalog connection string must be provided.",
            ));
        }
        if self.vectorstore.is_none() {
            return Err(DataError::Config(
                "A vector store connection string must be provided.",
            ));
        }
        Ok(())
    }

    /// Effective batch budget in milliseconds.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn parse_plain_keys() {
        let config: DataConfig = serde_json::from_str(indoc! {r#"
            {
              "catalog": "postgresql://ckan@localhost/ckan",
              "vectorstore": "postgresql://data@localhost/vectorstore",
              "timeout": 10000
            }
        "#})
        .unwrap();
        assert_eq!(
            config,
            DataConfig {
                catalog: some("postgresql://ckan@localhost/ckan"),
                vectorstore: some("postgresql://data@localhost/vectorstore"),
                timeout: Some(10_000),
            }
        );
        assert_eq!(config.timeout_ms(), 10_000);
        config.validate().unwrap();
    }

    #[test]
    fn parse_legacy_keys() {
        let config: DataConfig = serde_json::from_str(indoc! {r#"
            {
              "sqlalchemy.catalog": "postgresql://ckan@localhost/ckan",
              "sqlalchemy.vectorstore": "postgresql://data@localhost/vectorstore"
            }
        "#})
        .unwrap();
        assert_eq!(config.catalog, some("postgresql://ckan@localhost/ckan"));
        assert_eq!(config.timeout, None);
        assert_eq!(config.timeout_ms(), 30_000);
    }

    #[test]
    fn missing_connection_strings_fail_validation() {
        let err = DataConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("catalog connection string"));

        let err = DataConfig {
            catalog: some("postgresql://ckan@localhost/ckan"),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("vector store connection string"));
    }
}
