//! Source/target verification.
//!
//! Source tables are grouped by the target table they migrate into, so the
//! data nodes of one sharded table are checked together: their summed row
//! count against the target count, then their rows merged in key order
//! against the target's primary-key ordered chunks through the configured
//! algorithm. Every side is read concurrently. The first divergent chunk ends
//! the content scan.

use crate::error::CheckError;
use connectors::{
    error::DbError,
    metadata::{provider::TableMetadataProvider, table::TableMetadata},
    sql::base::source::RowReader,
};
use engine_core::rate_limit::RateLimitAlgorithm;
use futures::future::try_join_all;
use model::{
    check::{
        ChunkDivergence, ConsistencyCheckResult, ContentCheckResult, CountCheckResult,
        JobCheckResult,
    },
    core::value::{Value, compare_keys},
    records::row::RowData,
};
use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod algorithm;

use algorithm::ContentCheckAlgorithm;

/// A source table and the reader it lives behind.
#[derive(Clone)]
pub struct SourceTable {
    pub reader: Arc<dyn RowReader>,
    pub table: String,
}

impl SourceTable {
    pub fn new(reader: Arc<dyn RowReader>, table: impl Into<String>) -> Self {
        Self {
            reader,
            table: table.into(),
        }
    }
}

pub struct ConsistencyChecker {
    target: Arc<dyn RowReader>,
    metadata: Arc<dyn TableMetadataProvider>,
    algorithm: Arc<dyn ContentCheckAlgorithm>,
    rate_limiter: Option<Arc<dyn RateLimitAlgorithm>>,
}

impl ConsistencyChecker {
    pub fn new(
        target: Arc<dyn RowReader>,
        metadata: Arc<dyn TableMetadataProvider>,
        algorithm: Arc<dyn ContentCheckAlgorithm>,
    ) -> Self {
        Self {
            target,
            metadata,
            algorithm,
            rate_limiter: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Option<Arc<dyn RateLimitAlgorithm>>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    /// Checks every target table fed by `tables`, keyed by target table name.
    pub async fn check(
        &self,
        tables: &[SourceTable],
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, ConsistencyCheckResult>, CheckError> {
        let mut groups: BTreeMap<String, (Arc<TableMetadata>, Vec<SourceTable>)> = BTreeMap::new();
        for table in tables {
            let meta = self
                .metadata
                .metadata_for_source(&table.table)
                .ok_or_else(|| CheckError::MissingMetadata(table.table.clone()))?;
            groups
                .entry(meta.name.clone())
                .or_insert_with(|| (meta, Vec::new()))
                .1
                .push(table.clone());
        }

        let mut results = BTreeMap::new();
        for (target_table, (meta, sources)) in groups {
            let result = self.check_table(&meta, &sources, cancel).await?;
            results.insert(target_table, result);
        }

        let matched = results.values().filter(|r| r.matched()).count();
        info!(
            algorithm = self.algorithm.name(),
            tables = results.len(),
            matched,
            "Consistency check finished"
        );
        Ok(results)
    }

    /// Runs [`check`](Self::check) and folds the outcome into a job result.
    pub async fn check_job(
        &self,
        tables: &[SourceTable],
        cancel: &CancellationToken,
    ) -> Result<JobCheckResult, CheckError> {
        let results = self.check(tables, cancel).await?;
        Ok(JobCheckResult::aggregate(self.algorithm.name(), &results))
    }

    /// Compares the union of `sources` with the target table `meta`.
    pub async fn check_table(
        &self,
        meta: &TableMetadata,
        sources: &[SourceTable],
        cancel: &CancellationToken,
    ) -> Result<ConsistencyCheckResult, CheckError> {
        let (source_counts, target_count) = tokio::try_join!(
            try_join_all(sources.iter().map(|source| async move {
                source
                    .reader
                    .count(&source.table)
                    .await
                    .map_err(read_error("source", &source.table))
            })),
            async {
                self.target
                    .count(&meta.name)
                    .await
                    .map_err(read_error("target", &meta.name))
            },
        )?;
        let source_count: u64 = source_counts.iter().sum();
        let count_check = CountCheckResult::new(source_count, target_count);

        let content_check = if self.algorithm.checks_content() {
            self.check_content(meta, sources, cancel).await?
        } else {
            ContentCheckResult::matched()
        };

        let result = ConsistencyCheckResult {
            count_check,
            content_check,
        };
        if result.matched() {
            info!(
                table = %meta.name,
                sources = sources.len(),
                rows = source_count,
                "Table is consistent"
            );
        } else {
            warn!(
                table = %meta.name,
                sources = sources.len(),
                source_count,
                target_count,
                divergence = ?result.content_check.divergence,
                "Table is inconsistent"
            );
        }
        Ok(result)
    }

    async fn check_content(
        &self,
        meta: &TableMetadata,
        sources: &[SourceTable],
        cancel: &CancellationToken,
    ) -> Result<ContentCheckResult, CheckError> {
        let key_columns = &meta.primary_keys;
        let chunk_size = self.algorithm.chunk_size();
        let mut source_after: Vec<Option<Vec<Value>>> = vec![None; sources.len()];
        let mut target_after: Option<Vec<Value>> = None;
        let mut chunk_index = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(CheckError::Cancelled);
            }
            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire(1).await;
            }

            let (source_pages, target_rows) = tokio::try_join!(
                try_join_all(sources.iter().zip(&source_after).map(|(source, after)| async move {
                    source
                        .reader
                        .fetch_page(&source.table, key_columns, after.as_deref(), chunk_size)
                        .await
                        .map_err(read_error("source", &source.table))
                })),
                async {
                    self.target
                        .fetch_page(&meta.name, key_columns, target_after.as_deref(), chunk_size)
                        .await
                        .map_err(read_error("target", &meta.name))
                },
            )?;

            let source_rows = merge_pages(source_pages, key_columns, chunk_size, &mut source_after);
            if source_rows.is_empty() && target_rows.is_empty() {
                return Ok(ContentCheckResult::matched());
            }

            if !self.algorithm.chunk_matches(&source_rows, &target_rows) {
                let first = source_rows.first().or(target_rows.first());
                return Ok(ContentCheckResult::diverged(ChunkDivergence {
                    table: meta.name.clone(),
                    chunk_index,
                    first_key: first
                        .map(|row| row.key_values(key_columns))
                        .unwrap_or_default(),
                }));
            }

            target_after = target_rows
                .last()
                .map(|row| row.key_values(key_columns))
                .or(target_after);
            chunk_index += 1;
        }
    }
}

/// Merges one page per source into the `limit` lowest keys and moves each
/// source cursor past the rows it contributed. Rows of a page that did not
/// make the cut are read again with the next chunk.
fn merge_pages(
    pages: Vec<Vec<RowData>>,
    key_columns: &[String],
    limit: usize,
    cursors: &mut [Option<Vec<Value>>],
) -> Vec<RowData> {
    let mut rows: Vec<(Vec<Value>, usize, RowData)> = pages
        .into_iter()
        .enumerate()
        .flat_map(|(idx, page)| {
            page.into_iter()
                .map(move |row| (row.key_values(key_columns), idx, row))
        })
        .collect();
    rows.sort_by(|(a, ..), (b, ..)| compare_keys(a, b).unwrap_or(Ordering::Equal));
    rows.truncate(limit);

    for (key, idx, _) in &rows {
        cursors[*idx] = Some(key.clone());
    }
    rows.into_iter().map(|(_, _, row)| row).collect()
}

fn read_error(side: &'static str, table: &str) -> impl FnOnce(DbError) -> CheckError {
    let table = table.to_string();
    move |source| CheckError::Read {
        side,
        table,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use algorithm::CheckAlgorithmRegistry;
    use connectors::{
        memory::MemoryDatabase,
        metadata::{provider::StaticMetadataProvider, table::TableMetadata},
    };
    use engine_core::props::Props;
    use serde_json::json;

    fn metadata() -> Arc<dyn TableMetadataProvider> {
        Arc::new(
            StaticMetadataProvider::new()
                .with_table("t_order_0", TableMetadata::new("t_order", vec!["id".into()]))
                .with_table("t_order_1", TableMetadata::new("t_order", vec!["id".into()])),
        )
    }

    fn table(name: &str, rows: &[(i64, &str)]) -> Arc<MemoryDatabase> {
        let db = Arc::new(MemoryDatabase::new());
        db.create_table(name, &["id"]);
        for (id, status) in rows {
            db.insert_row(name, vec![("id", Value::Int(*id)), ("status", Value::from(*status))])
                .unwrap();
        }
        db
    }

    const ROWS: [(i64, &str); 5] = [(1, "ok"), (2, "ok"), (3, "ok"), (4, "ok"), (5, "ok")];

    fn checker(target: &Arc<MemoryDatabase>, algorithm: &str) -> ConsistencyChecker {
        let props = Props::from([("chunk-size".to_string(), json!(2))]);
        ConsistencyChecker::new(
            target.clone(),
            metadata(),
            CheckAlgorithmRegistry::create(algorithm, &props).unwrap(),
        )
    }

    fn tables(source: &Arc<MemoryDatabase>) -> Vec<SourceTable> {
        vec![SourceTable::new(source.clone(), "t_order_0")]
    }

    fn order_meta() -> TableMetadata {
        TableMetadata::new("t_order", vec!["id".into()])
    }

    #[tokio::test]
    async fn identical_tables_match() {
        let source = table("t_order_0", &ROWS);
        let target = table("t_order", &ROWS);
        for algorithm in CheckAlgorithmRegistry::NAMES {
            let result = checker(&target, algorithm)
                .check_job(&tables(&source), &CancellationToken::new())
                .await
                .unwrap();
            assert!(result.matched, "{algorithm}");
            assert_eq!(result.algorithm, algorithm);
            assert_eq!(result.tables.get("t_order"), Some(&true));
        }
    }

    #[tokio::test]
    async fn one_differing_row_reports_its_chunk() {
        let source = table("t_order_0", &ROWS);
        let mut changed = ROWS;
        changed[2] = (3, "failed");
        let target = table("t_order", &changed);

        // Chunks of two rows put id 3 into the second chunk.
        for algorithm in ["DATA_MATCH", "CHECKSUM_MATCH"] {
            let results = checker(&target, algorithm)
                .check(&tables(&source), &CancellationToken::new())
                .await
                .unwrap();
            let result = &results["t_order"];
            assert!(result.count_check.matched);
            assert!(!result.matched());
            let divergence = result.content_check.divergence.as_ref().unwrap();
            assert_eq!(divergence.chunk_index, 1);
            assert_eq!(divergence.first_key, vec![Value::Int(3)]);
        }
    }

    #[tokio::test]
    async fn missing_row_fails_count_and_content() {
        let source = table("t_order_0", &ROWS);
        let target = table("t_order", &ROWS[..4]);

        let result = checker(&target, "DATA_MATCH")
            .check_table(&order_meta(), &tables(&source), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.count_check.source_count, 5);
        assert_eq!(result.count_check.target_count, 4);
        assert!(!result.content_check.matched);
    }

    #[tokio::test]
    async fn count_algorithm_ignores_content() {
        let source = table("t_order_0", &ROWS);
        let target = table("t_order", &[(1, "x"), (2, "x"), (3, "x"), (4, "x"), (5, "x")]);

        let result = checker(&target, "COUNT")
            .check_table(&order_meta(), &tables(&source), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.matched());
    }

    #[tokio::test]
    async fn unknown_table_and_cancel_are_errors() {
        let source = table("t_order_0", &ROWS);
        let target = table("t_order", &ROWS);
        let err = checker(&target, "DATA_MATCH")
            .check(
                &[SourceTable::new(source.clone(), "t_missing")],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::MissingMetadata(_)));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = checker(&target, "DATA_MATCH")
            .check(&tables(&source), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::Cancelled));
    }

    #[tokio::test]
    async fn shards_are_checked_together_against_one_target() {
        // Interleaved keys make every chunk draw from both shards.
        let even: Vec<(i64, &str)> = (1..=10).filter(|id| id % 2 == 0).map(|id| (id, "ok")).collect();
        let odd: Vec<(i64, &str)> = (1..=10).filter(|id| id % 2 == 1).map(|id| (id, "ok")).collect();
        let all: Vec<(i64, &str)> = (1..=10).map(|id| (id, "ok")).collect();
        let shard_0 = table("t_order_0", &even);
        let shard_1 = table("t_order_1", &odd);
        let target = table("t_order", &all);
        let sources = vec![
            SourceTable::new(shard_0.clone(), "t_order_0"),
            SourceTable::new(shard_1.clone(), "t_order_1"),
        ];

        for algorithm in CheckAlgorithmRegistry::NAMES {
            let results = checker(&target, algorithm)
                .check(&sources, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(results.len(), 1, "{algorithm}");
            let result = &results["t_order"];
            assert_eq!(result.count_check.source_count, 10);
            assert_eq!(result.count_check.target_count, 10);
            assert!(result.matched(), "{algorithm}");
        }

        let mut changed = all.clone();
        changed[6] = (7, "failed");
        let target = table("t_order", &changed);
        let results = checker(&target, "DATA_MATCH")
            .check(&sources, &CancellationToken::new())
            .await
            .unwrap();
        let divergence = results["t_order"].content_check.divergence.clone().unwrap();
        assert_eq!(divergence.table, "t_order");
        assert_eq!(divergence.chunk_index, 3);
        assert_eq!(divergence.first_key, vec![Value::Int(7)]);
    }
}
