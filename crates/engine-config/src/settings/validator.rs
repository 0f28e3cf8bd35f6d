use crate::{
    error::ConfigError,
    settings::{MigrationJobConfig, datasource::DataSourceConfig},
};
use connectors::adapter::DataFormat;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Checks a job configuration once, before anything is started.
pub struct SettingsValidator<'a> {
    config: &'a MigrationJobConfig,
}

impl<'a> SettingsValidator<'a> {
    pub fn new(config: &'a MigrationJobConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_tables(&mut errors);
        self.validate_shard_items(&mut errors);
        self.validate_pipeline(&mut errors);
        self.validate_algorithms(&mut errors);

        if !errors.is_empty() {
            return Err(ConfigError::ValidationFailed(errors));
        }

        info!(
            shard_items = self.config.shard_items.len(),
            tables = self.config.tables.len(),
            "Configuration validation completed successfully"
        );
        Ok(())
    }

    fn validate_data_source(&self, what: &str, source: &DataSourceConfig, errors: &mut Vec<String>) {
        if source.format == DataFormat::Postgres && source.url.trim().is_empty() {
            errors.push(format!("{what}: postgres data source requires a url"));
        }
    }

    fn validate_tables(&self, errors: &mut Vec<String>) {
        if self.config.tables.is_empty() {
            errors.push("at least one table mapping is required".to_string());
        }

        let mut seen = BTreeSet::new();
        for table in &self.config.tables {
            if !seen.insert(table.source.as_str()) {
                errors.push(format!("table `{}` is mapped more than once", table.source));
            }
            if table.primary_keys.is_empty() {
                errors.push(format!("table `{}` has no primary key columns", table.source));
            }
        }
    }

    fn validate_shard_items(&self, errors: &mut Vec<String>) {
        self.validate_data_source("target", &self.config.target, errors);

        if self.config.shard_items.is_empty() {
            errors.push("at least one shard item is required".to_string());
        }

        for (index, item) in self.config.shard_items.iter().enumerate() {
            self.validate_data_source(&format!("shard item {index}"), &item.source, errors);

            if item.tables.is_empty() {
                errors.push(format!("shard item {index} has no tables"));
            }

            let mut seen = BTreeSet::new();
            for table in &item.tables {
                if self.config.table(table).is_none() {
                    errors.push(format!(
                        "shard item {index} references unmapped table `{table}`"
                    ));
                }
                if !seen.insert(table.as_str()) {
                    errors.push(format!("shard item {index} lists `{table}` twice"));
                }
            }
        }
    }

    fn validate_pipeline(&self, errors: &mut Vec<String>) {
        let pipeline = &self.config.pipeline;
        let sizes = [
            ("read.batch-size", pipeline.read.batch_size),
            ("write.batch-size", pipeline.write.batch_size),
            ("channel.capacity", pipeline.channel.capacity),
        ];
        for (name, value) in sizes {
            if value == 0 {
                errors.push(format!("{name} must be greater than zero"));
            }
        }

        if pipeline.channel.capacity < pipeline.read.batch_size {
            errors.push(format!(
                "channel.capacity ({}) is smaller than read.batch-size ({})",
                pipeline.channel.capacity, pipeline.read.batch_size
            ));
        }
        if pipeline.channel.capacity < pipeline.write.batch_size {
            errors.push(format!(
                "channel.capacity ({}) is smaller than write.batch-size ({})",
                pipeline.channel.capacity, pipeline.write.batch_size
            ));
        }
        if pipeline.fetch_timeout_ms == 0 {
            errors.push("fetch-timeout-ms must be greater than zero".to_string());
        }

        if pipeline.write.batch_size > 100_000 {
            warn!(
                batch_size = pipeline.write.batch_size,
                "Write batch size is very large, may cause memory issues"
            );
        }
    }

    fn validate_algorithms(&self, errors: &mut Vec<String>) {
        if let Some(limiter) = &self.config.pipeline.write.rate_limiter {
            if let Err(err) = limiter.rate_limiter() {
                errors.push(err.to_string());
            }
        }

        if self.config.consistency_check.name.trim().is_empty() {
            errors.push("consistency-check.name must not be empty".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{
        algorithm::AlgorithmConfig,
        datasource::{ShardItemConfig, TableConfig},
        pipeline::PipelineConfig,
    };

    fn config() -> MigrationJobConfig {
        MigrationJobConfig {
            job_id: Some("j1".into()),
            target: DataSourceConfig::memory(),
            shard_items: vec![ShardItemConfig {
                source: DataSourceConfig::memory(),
                tables: vec!["t_order".into()],
            }],
            tables: vec![TableConfig {
                source: "t_order".into(),
                target: None,
                primary_keys: vec!["id".into()],
                unique_keys: vec![],
            }],
            pipeline: PipelineConfig::default(),
            consistency_check: AlgorithmConfig::new("COUNT"),
        }
    }

    fn errors(config: &MigrationJobConfig) -> Vec<String> {
        match config.validate() {
            Err(ConfigError::ValidationFailed(errors)) => errors,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn accepts_minimal_config() {
        config().validate().unwrap();
    }

    #[test]
    fn rejects_channel_smaller_than_batches() {
        let mut config = config();
        config.pipeline.channel.capacity = 10;
        config.pipeline.read.batch_size = 100;
        config.pipeline.write.batch_size = 50;

        let errors = errors(&config);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("read.batch-size"));
        assert!(errors[1].contains("write.batch-size"));
    }

    #[test]
    fn rejects_zero_sizes() {
        let mut config = config();
        config.pipeline.write.batch_size = 0;
        assert!(
            errors(&config)
                .iter()
                .any(|e| e == "write.batch-size must be greater than zero")
        );
    }

    #[test]
    fn rejects_unknown_rate_limiter() {
        let mut config = config();
        config.pipeline.write.rate_limiter = Some(AlgorithmConfig::new("LEAKY"));
        assert!(errors(&config)[0].contains("LEAKY"));

        config.pipeline.write.rate_limiter = Some(AlgorithmConfig::new("QPS").with_prop("qps", 0));
        assert!(errors(&config)[0].contains("qps"));
    }

    #[test]
    fn rejects_unmapped_tables_and_missing_keys() {
        let mut config = config();
        config.shard_items[0].tables.push("t_user".into());
        config.tables[0].primary_keys.clear();
        config.target.format = DataFormat::Postgres;

        let errors = errors(&config);
        assert!(errors.iter().any(|e| e.contains("no primary key")));
        assert!(errors.iter().any(|e| e.contains("unmapped table `t_user`")));
        assert!(errors.iter().any(|e| e.contains("target: postgres")));
    }
}
