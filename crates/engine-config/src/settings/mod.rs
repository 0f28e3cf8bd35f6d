use crate::{error::ConfigError, settings::validator::SettingsValidator};
use algorithm::AlgorithmConfig;
use connectors::metadata::provider::StaticMetadataProvider;
use datasource::{DataSourceConfig, ShardItemConfig, TableConfig};
use model::core::identifiers::JobId;
use pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod algorithm;
pub mod datasource;
pub mod pipeline;
pub mod validator;

pub const DEFAULT_CHECK_ALGORITHM: &str = "DATA_MATCH";

/// Everything needed to run one migration job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MigrationJobConfig {
    /// Generated when absent.
    #[serde(default)]
    pub job_id: Option<String>,
    pub target: DataSourceConfig,
    pub shard_items: Vec<ShardItemConfig>,
    pub tables: Vec<TableConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default = "default_check_algorithm")]
    pub consistency_check: AlgorithmConfig,
}

fn default_check_algorithm() -> AlgorithmConfig {
    AlgorithmConfig::new(DEFAULT_CHECK_ALGORITHM)
}

impl MigrationJobConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parses and validates in one step.
    pub fn load_validated(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        SettingsValidator::new(self).validate()
    }

    pub fn job_id(&self) -> JobId {
        match &self.job_id {
            Some(id) => JobId::new(id.clone()),
            None => JobId::generate(),
        }
    }

    pub fn table(&self, source: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.source == source)
    }

    pub fn metadata_provider(&self) -> StaticMetadataProvider {
        datasource::metadata_provider(&self.tables)
    }
}
