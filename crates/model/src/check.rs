use crate::core::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountCheckResult {
    pub source_count: u64,
    pub target_count: u64,
    pub matched: bool,
}

impl CountCheckResult {
    pub fn new(source_count: u64, target_count: u64) -> Self {
        Self {
            source_count,
            target_count,
            matched: source_count == target_count,
        }
    }
}

/// First chunk whose content differs between source and target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDivergence {
    pub table: String,
    pub chunk_index: u64,
    /// First primary key of the divergent chunk (source side, else target side).
    pub first_key: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentCheckResult {
    pub matched: bool,
    pub divergence: Option<ChunkDivergence>,
}

impl ContentCheckResult {
    pub fn matched() -> Self {
        Self {
            matched: true,
            divergence: None,
        }
    }

    pub fn diverged(divergence: ChunkDivergence) -> Self {
        Self {
            matched: false,
            divergence: Some(divergence),
        }
    }
}

/// Result of checking one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyCheckResult {
    pub count_check: CountCheckResult,
    pub content_check: ContentCheckResult,
}

impl ConsistencyCheckResult {
    pub fn matched(&self) -> bool {
        self.count_check.matched && self.content_check.matched
    }
}

/// Aggregated outcome of a consistency check over all tables of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCheckResult {
    pub matched: bool,
    pub algorithm: String,
    pub tables: BTreeMap<String, bool>,
    pub checked_at: DateTime<Utc>,
}

impl JobCheckResult {
    pub fn aggregate(algorithm: &str, results: &BTreeMap<String, ConsistencyCheckResult>) -> Self {
        let tables: BTreeMap<String, bool> = results
            .iter()
            .map(|(table, result)| (table.clone(), result.matched()))
            .collect();
        Self {
            matched: tables.values().all(|m| *m),
            algorithm: algorithm.to_string(),
            tables,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(count: (u64, u64), content: bool) -> ConsistencyCheckResult {
        ConsistencyCheckResult {
            count_check: CountCheckResult::new(count.0, count.1),
            content_check: if content {
                ContentCheckResult::matched()
            } else {
                ContentCheckResult::diverged(ChunkDivergence {
                    table: "t".into(),
                    chunk_index: 0,
                    first_key: vec![Value::Int(1)],
                })
            },
        }
    }

    #[test]
    fn aggregate_requires_every_table() {
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), result((3, 3), true));
        assert!(JobCheckResult::aggregate("DATA_MATCH", &results).matched);

        results.insert("b".to_string(), result((3, 3), false));
        let job = JobCheckResult::aggregate("DATA_MATCH", &results);
        assert!(!job.matched);
        assert_eq!(job.tables.get("a"), Some(&true));
        assert_eq!(job.tables.get("b"), Some(&false));
    }

    #[test]
    fn count_mismatch_fails_table() {
        assert!(!result((3, 2), true).matched());
    }
}
