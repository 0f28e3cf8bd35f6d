use serde::{Deserialize, Serialize};

/// What the importer needs to know about a target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub primary_keys: Vec<String>,
    /// Sharding or unique columns added to UPDATE/DELETE predicates.
    pub unique_keys: Vec<String>,
}

impl TableMetadata {
    pub fn new(name: impl Into<String>, primary_keys: Vec<String>) -> Self {
        Self {
            name: name.into(),
            primary_keys,
            unique_keys: Vec::new(),
        }
    }

    pub fn with_unique_keys(mut self, unique_keys: Vec<String>) -> Self {
        self.unique_keys = unique_keys;
        self
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_keys
            .iter()
            .any(|k| k.eq_ignore_ascii_case(column))
    }

    /// Non-key columns that also constrain UPDATE/DELETE.
    pub fn extra_predicate_columns(&self) -> impl Iterator<Item = &String> {
        self.unique_keys.iter().filter(|c| !self.is_primary_key(c))
    }
}
