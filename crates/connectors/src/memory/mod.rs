//! In-process database used for dry runs and tests.
//!
//! Implements both the target and reader contracts, and keeps a change log so
//! it can also act as the source of an incremental capture.

use crate::{
    error::DbError,
    sql::base::{
        destination::{TargetDataSource, temporary_object_prefix},
        source::RowReader,
        statement::{Statement, StatementKind},
    },
};
use async_trait::async_trait;
use model::{
    core::value::{Value, compare_keys},
    position::Position,
    records::{
        record::{DataRecord, RecordType},
        row::{Field, RowData},
    },
};
use parking_lot::Mutex;
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    io,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering},
};

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    key_columns: Vec<String>,
    rows: Vec<Vec<Field>>,
}

impl MemoryTable {
    fn find(&self, predicate: &[(String, Value)]) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                predicate
                    .iter()
                    .all(|(name, value)| field_value(row, name) == Some(value))
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    fn key_of(&self, row: &[Field]) -> Vec<Value> {
        self.key_columns
            .iter()
            .map(|k| field_value(row, k).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

fn field_value<'a>(row: &'a [Field], name: &str) -> Option<&'a Value> {
    row.iter()
        .find(|f| f.name.eq_ignore_ascii_case(name))
        .map(|f| &f.value)
}

fn assign(row: &mut Vec<Field>, name: &str, value: Value) {
    match row.iter_mut().find(|f| f.name.eq_ignore_ascii_case(name)) {
        Some(field) => field.value = value,
        None => row.push(Field {
            name: name.to_string(),
            value,
        }),
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, MemoryTable>,
    log: Vec<DataRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
    next_lsn: AtomicU64,
    fail_batches: AtomicUsize,
    batches: AtomicU64,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, name: &str, key_columns: &[&str]) {
        self.state.lock().tables.insert(
            name.to_string(),
            MemoryTable {
                key_columns: key_columns.iter().map(|k| k.to_string()).collect(),
                rows: Vec::new(),
            },
        );
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.state.lock().tables.contains_key(name)
    }

    /// Seeds a row without recording a change.
    pub fn insert_row(&self, table: &str, row: Vec<(&str, Value)>) -> Result<(), DbError> {
        let mut state = self.state.lock();
        let t = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::UnknownTable(table.to_string()))?;
        t.rows.push(
            row.into_iter()
                .map(|(name, value)| Field::from((name, value)))
                .collect(),
        );
        Ok(())
    }

    /// All rows of `table` ordered by its key.
    pub fn rows(&self, table: &str) -> Vec<RowData> {
        let state = self.state.lock();
        let Some(t) = state.tables.get(table) else {
            return Vec::new();
        };
        sorted_rows(t, table)
    }

    /// Fails the next `n` batches with a transient I/O error.
    pub fn fail_next_batches(&self, n: usize) {
        self.fail_batches.store(n, AtomicOrdering::SeqCst);
    }

    /// Number of committed batches.
    pub fn batches_committed(&self) -> u64 {
        self.batches.load(AtomicOrdering::SeqCst)
    }

    /// Applies a source-side change and appends it to the change log with a
    /// fresh log position. Returns the logged record.
    pub fn apply_change(&self, record: DataRecord) -> Result<DataRecord, DbError> {
        let mut state = self.state.lock();
        let table_name = record.table_name.clone();
        let table = state
            .tables
            .get_mut(&table_name)
            .ok_or_else(|| DbError::UnknownTable(table_name.clone()))?;

        let identity: Vec<(String, Value)> = record
            .primary_key_columns()
            .map(|c| (c.name.clone(), c.original_value().clone()))
            .collect();

        match record.record_type {
            RecordType::Insert => {
                if !table.find(&identity).is_empty() {
                    return Err(DbError::Write(format!(
                        "duplicate key {} in '{table_name}'",
                        record.key()
                    )));
                }
                table.rows.push(
                    record
                        .columns
                        .iter()
                        .map(|c| Field::from((c.name.clone(), c.value.clone())))
                        .collect(),
                );
            }
            RecordType::Update => {
                for idx in table.find(&identity) {
                    for column in record.columns.iter().filter(|c| c.is_updated) {
                        assign(&mut table.rows[idx], &column.name, column.value.clone());
                    }
                }
            }
            RecordType::Delete => {
                let matched = table.find(&identity);
                for idx in matched.into_iter().rev() {
                    table.rows.remove(idx);
                }
            }
        }

        let lsn = self.next_lsn.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        let mut logged = record;
        logged.position = Position::Log { lsn };
        state.log.push(logged.clone());
        Ok(logged)
    }

    /// Latest log position (no change yet maps to `Log { lsn: 0 }`).
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn.load(AtomicOrdering::SeqCst)
    }

    /// Changes logged strictly after `lsn`, oldest first, at most `limit`.
    pub fn changes_after(&self, lsn: u64, limit: usize) -> Vec<DataRecord> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|r| matches!(r.position, Position::Log { lsn: l } if l > lsn))
            .take(limit)
            .cloned()
            .collect()
    }

    fn apply_statement(tables: &mut BTreeMap<String, MemoryTable>, stmt: &Statement) -> Result<u64, DbError> {
        let table = tables
            .get_mut(&stmt.table)
            .ok_or_else(|| DbError::UnknownTable(stmt.table.clone()))?;

        match stmt.kind {
            StatementKind::Upsert => {
                let matched = if stmt.predicate.is_empty() {
                    Vec::new()
                } else {
                    table.find(&stmt.predicate)
                };
                match matched.first() {
                    Some(idx) => {
                        for (name, value) in &stmt.values {
                            assign(&mut table.rows[*idx], name, value.clone());
                        }
                    }
                    None => table.rows.push(
                        stmt.values
                            .iter()
                            .map(|(name, value)| Field::from((name.clone(), value.clone())))
                            .collect(),
                    ),
                }
                Ok(1)
            }
            StatementKind::Update => {
                let matched = table.find(&stmt.predicate);
                for idx in &matched {
                    for (name, value) in &stmt.values {
                        assign(&mut table.rows[*idx], name, value.clone());
                    }
                }
                Ok(matched.len() as u64)
            }
            StatementKind::Delete => {
                let matched = table.find(&stmt.predicate);
                for idx in matched.iter().rev() {
                    table.rows.remove(*idx);
                }
                Ok(matched.len() as u64)
            }
        }
    }
}

fn sorted_rows(table: &MemoryTable, name: &str) -> Vec<RowData> {
    let mut rows: Vec<&Vec<Field>> = table.rows.iter().collect();
    rows.sort_by(|a, b| {
        compare_keys(&table.key_of(a), &table.key_of(b)).unwrap_or(Ordering::Equal)
    });
    rows.into_iter()
        .map(|fields| RowData::new(name, fields.clone()))
        .collect()
}

#[async_trait]
impl TargetDataSource for MemoryDatabase {
    async fn execute_batch(&self, statements: &[Statement]) -> Result<u64, DbError> {
        let pending_failures = self.fail_batches.load(AtomicOrdering::SeqCst);
        if pending_failures > 0 {
            self.fail_batches
                .store(pending_failures - 1, AtomicOrdering::SeqCst);
            return Err(DbError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected transient failure",
            )));
        }

        let mut state = self.state.lock();
        // Work on a copy so a failing statement leaves nothing behind.
        let mut tables = state.tables.clone();
        let mut affected = 0;
        for stmt in statements {
            affected += Self::apply_statement(&mut tables, stmt)?;
        }
        state.tables = tables;
        self.batches.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(affected)
    }

    async fn cleanup(&self, job_id: &str) -> Result<(), DbError> {
        let prefix = temporary_object_prefix(job_id);
        self.state
            .lock()
            .tables
            .retain(|name, _| !name.starts_with(&prefix));
        Ok(())
    }
}

#[async_trait]
impl RowReader for MemoryDatabase {
    async fn count(&self, table: &str) -> Result<u64, DbError> {
        let state = self.state.lock();
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| DbError::UnknownTable(table.to_string()))?;
        Ok(t.rows.len() as u64)
    }

    async fn fetch_page(
        &self,
        table: &str,
        key_columns: &[String],
        after: Option<&[Value]>,
        limit: usize,
    ) -> Result<Vec<RowData>, DbError> {
        let state = self.state.lock();
        let t = state
            .tables
            .get(table)
            .ok_or_else(|| DbError::UnknownTable(table.to_string()))?;

        let mut rows: Vec<(Vec<Value>, &Vec<Field>)> = t
            .rows
            .iter()
            .map(|row| {
                let key = key_columns
                    .iter()
                    .map(|k| field_value(row, k).cloned().unwrap_or(Value::Null))
                    .collect();
                (key, row)
            })
            .collect();
        rows.sort_by(|(a, _), (b, _)| compare_keys(a, b).unwrap_or(Ordering::Equal));

        Ok(rows
            .into_iter()
            .filter(|(key, _)| match after {
                Some(after) => compare_keys(key, after) == Some(Ordering::Greater),
                None => true,
            })
            .take(limit)
            .map(|(_, fields)| RowData::new(table, fields.clone()))
            .collect())
    }
}
