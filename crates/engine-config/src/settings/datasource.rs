use connectors::{
    adapter::DataFormat,
    metadata::{provider::StaticMetadataProvider, table::TableMetadata},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataSourceConfig {
    pub format: DataFormat,
    #[serde(default)]
    pub url: String,
}

impl DataSourceConfig {
    pub fn memory() -> Self {
        Self {
            format: DataFormat::Memory,
            url: String::new(),
        }
    }
}

/// Mapping of one source table onto its target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableConfig {
    pub source: String,
    /// Defaults to the source table name.
    #[serde(default)]
    pub target: Option<String>,
    pub primary_keys: Vec<String>,
    /// Sharding or unique columns added to UPDATE/DELETE predicates.
    #[serde(default)]
    pub unique_keys: Vec<String>,
}

impl TableConfig {
    pub fn target_table(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.source)
    }

    pub fn metadata(&self) -> TableMetadata {
        TableMetadata::new(self.target_table(), self.primary_keys.clone())
            .with_unique_keys(self.unique_keys.clone())
    }
}

pub fn metadata_provider(tables: &[TableConfig]) -> StaticMetadataProvider {
    tables
        .iter()
        .fold(StaticMetadataProvider::new(), |provider, table| {
            provider.with_table(table.source.clone(), table.metadata())
        })
}

/// One independently progressing partition: a source node and the tables
/// read from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ShardItemConfig {
    pub source: DataSourceConfig,
    pub tables: Vec<String>,
}
