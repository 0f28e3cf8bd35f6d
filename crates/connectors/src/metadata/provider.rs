use crate::metadata::table::TableMetadata;
use std::{collections::BTreeMap, sync::Arc};

/// Resolves source tables to target tables and their key layout.
pub trait TableMetadataProvider: Send + Sync {
    /// Target table a source table is migrated into.
    fn target_table(&self, source_table: &str) -> Option<String>;

    fn table_metadata(&self, target_table: &str) -> Option<Arc<TableMetadata>>;

    /// All `(source, target)` table pairs.
    fn table_pairs(&self) -> Vec<(String, String)>;

    fn metadata_for_source(&self, source_table: &str) -> Option<Arc<TableMetadata>> {
        self.target_table(source_table)
            .and_then(|target| self.table_metadata(&target))
    }
}

/// Provider built once from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadataProvider {
    mapping: BTreeMap<String, String>,
    tables: BTreeMap<String, Arc<TableMetadata>>,
}

impl StaticMetadataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, source_table: impl Into<String>, meta: TableMetadata) -> Self {
        self.add_table(source_table, meta);
        self
    }

    pub fn add_table(&mut self, source_table: impl Into<String>, meta: TableMetadata) {
        self.mapping.insert(source_table.into(), meta.name.clone());
        self.tables.insert(meta.name.clone(), Arc::new(meta));
    }
}

impl TableMetadataProvider for StaticMetadataProvider {
    fn target_table(&self, source_table: &str) -> Option<String> {
        self.mapping.get(source_table).cloned()
    }

    fn table_metadata(&self, target_table: &str) -> Option<Arc<TableMetadata>> {
        self.tables.get(target_table).cloned()
    }

    fn table_pairs(&self) -> Vec<(String, String)> {
        self.mapping
            .iter()
            .map(|(s, t)| (s.clone(), t.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_source_to_target_metadata() {
        let provider = StaticMetadataProvider::new().with_table(
            "t_order",
            TableMetadata::new("t_order_0", vec!["order_id".into()])
                .with_unique_keys(vec!["user_id".into()]),
        );

        assert_eq!(provider.target_table("t_order").as_deref(), Some("t_order_0"));
        let meta = provider.metadata_for_source("t_order").unwrap();
        assert!(meta.is_primary_key("ORDER_ID"));
        assert_eq!(
            meta.extra_predicate_columns().collect::<Vec<_>>(),
            vec!["user_id"]
        );
        assert!(provider.metadata_for_source("missing").is_none());
    }
}
