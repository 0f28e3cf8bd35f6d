use crate::{
    error::ConnectorError,
    memory::MemoryDatabase,
    sql::{
        base::{destination::TargetDataSource, source::RowReader},
        postgres::adapter::PgAdapter,
    },
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Postgres,
    Memory,
}

impl FromStr for DataFormat {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(DataFormat::Postgres),
            "memory" | "mem" => Ok(DataFormat::Memory),
            other => Err(ConnectorError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataFormat::Postgres => f.write_str("postgres"),
            DataFormat::Memory => f.write_str("memory"),
        }
    }
}

/// A connected data source usable as migration target and as reader.
#[derive(Clone)]
pub enum Adapter {
    Postgres(PgAdapter),
    Memory(Arc<MemoryDatabase>),
}

impl Adapter {
    pub async fn connect(format: DataFormat, conn_str: &str) -> Result<Self, ConnectorError> {
        match format {
            DataFormat::Postgres => Ok(Adapter::Postgres(PgAdapter::connect(conn_str).await?)),
            DataFormat::Memory => Ok(Adapter::Memory(Arc::new(MemoryDatabase::new()))),
        }
    }

    /// The same data source behind its own connection. The in-memory
    /// database has no connections and is shared as is.
    pub async fn reconnect(&self) -> Result<Self, ConnectorError> {
        match self {
            Adapter::Postgres(adapter) => Ok(Adapter::Postgres(adapter.reconnect().await?)),
            Adapter::Memory(db) => Ok(Adapter::Memory(db.clone())),
        }
    }

    pub fn target(&self) -> Arc<dyn TargetDataSource> {
        match self {
            Adapter::Postgres(adapter) => Arc::new(adapter.clone()),
            Adapter::Memory(db) => db.clone(),
        }
    }

    pub fn reader(&self) -> Arc<dyn RowReader> {
        match self {
            Adapter::Postgres(adapter) => Arc::new(adapter.clone()),
            Adapter::Memory(db) => db.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_format_aliases() {
        assert_eq!("pg".parse::<DataFormat>().unwrap(), DataFormat::Postgres);
        assert_eq!("Memory".parse::<DataFormat>().unwrap(), DataFormat::Memory);
        assert!("oracle".parse::<DataFormat>().is_err());
    }

    #[tokio::test]
    async fn reconnecting_memory_keeps_the_database() {
        let db = Arc::new(MemoryDatabase::new());
        let adapter = Adapter::Memory(db.clone());
        match adapter.reconnect().await.unwrap() {
            Adapter::Memory(other) => assert!(Arc::ptr_eq(&db, &other)),
            Adapter::Postgres(_) => panic!("expected a memory adapter"),
        }
    }
}
