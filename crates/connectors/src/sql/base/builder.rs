use crate::{
    error::DbError,
    metadata::table::TableMetadata,
    sql::base::{
        dialect::{Dialect, MySql, Postgres},
        renderer::Renderer,
        statement::{Statement, StatementKind},
    },
};
use model::{
    core::value::Value,
    records::{
        column::Column,
        record::{DataRecord, RecordType},
    },
};
use std::sync::Arc;

/// Translates captured records into target statements.
pub trait SqlBuilder: Send + Sync {
    /// Returns `None` when the record changes nothing on the target (an
    /// UPDATE without updated columns).
    fn build(
        &self,
        record: &DataRecord,
        meta: &TableMetadata,
    ) -> Result<Option<Statement>, DbError>;
}

#[derive(Clone)]
pub struct DialectSqlBuilder {
    dialect: Arc<dyn Dialect>,
}

impl DialectSqlBuilder {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self { dialect }
    }

    pub fn postgres() -> Self {
        Self::new(Arc::new(Postgres))
    }

    pub fn mysql() -> Self {
        Self::new(Arc::new(MySql))
    }

    fn is_key(column: &Column, meta: &TableMetadata) -> bool {
        column.is_primary_key || meta.is_primary_key(&column.name)
    }

    /// Primary key (pre-change values) plus configured sharding/unique columns.
    fn identity_predicate(
        record: &DataRecord,
        meta: &TableMetadata,
    ) -> Result<Vec<(String, Value)>, DbError> {
        let mut predicate: Vec<(String, Value)> = record
            .columns
            .iter()
            .filter(|c| Self::is_key(c, meta))
            .map(|c| (c.name.clone(), c.original_value().clone()))
            .collect();

        if predicate.is_empty() {
            return Err(DbError::QueryBuildError(format!(
                "{} on table '{}' has no primary key columns",
                record.record_type, meta.name
            )));
        }

        for extra in meta.extra_predicate_columns() {
            if let Some(column) = record.column(extra) {
                predicate.push((column.name.clone(), column.original_value().clone()));
            }
        }
        Ok(predicate)
    }

    fn build_upsert(&self, record: &DataRecord, meta: &TableMetadata) -> Statement {
        let values: Vec<(String, Value)> = record
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect();
        let predicate: Vec<(String, Value)> = record
            .columns
            .iter()
            .filter(|c| Self::is_key(c, meta))
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect();
        let columns: Vec<String> = values.iter().map(|(name, _)| name.clone()).collect();
        let keys: Vec<String> = predicate.iter().map(|(name, _)| name.clone()).collect();

        let mut r = Renderer::new(self.dialect.as_ref());
        r.sql.push_str("INSERT INTO ");
        r.push_ident(&meta.name);
        r.sql.push_str(" (");
        r.push_ident_list(&columns);
        r.sql.push_str(") VALUES (");
        for (i, (_, value)) in values.iter().enumerate() {
            if i > 0 {
                r.sql.push_str(", ");
            }
            r.add_param(value.clone());
        }
        r.sql.push(')');
        if !keys.is_empty() {
            self.dialect.render_upsert(&mut r, &keys, &columns);
        }
        let (sql, params) = r.finish();

        Statement {
            kind: StatementKind::Upsert,
            table: meta.name.clone(),
            values,
            predicate,
            sql,
            params,
        }
    }

    fn build_update(
        &self,
        record: &DataRecord,
        meta: &TableMetadata,
    ) -> Result<Option<Statement>, DbError> {
        let values: Vec<(String, Value)> = record
            .columns
            .iter()
            .filter(|c| c.is_updated)
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect();
        if values.is_empty() {
            return Ok(None);
        }
        let predicate = Self::identity_predicate(record, meta)?;

        let mut r = Renderer::new(self.dialect.as_ref());
        r.sql.push_str("UPDATE ");
        r.push_ident(&meta.name);
        r.sql.push_str(" SET ");
        r.push_assignments(&values);
        r.sql.push_str(" WHERE ");
        r.push_predicate(&predicate);
        let (sql, params) = r.finish();

        Ok(Some(Statement {
            kind: StatementKind::Update,
            table: meta.name.clone(),
            values,
            predicate,
            sql,
            params,
        }))
    }

    fn build_delete(&self, record: &DataRecord, meta: &TableMetadata) -> Result<Statement, DbError> {
        let predicate = Self::identity_predicate(record, meta)?;

        let mut r = Renderer::new(self.dialect.as_ref());
        r.sql.push_str("DELETE FROM ");
        r.push_ident(&meta.name);
        r.sql.push_str(" WHERE ");
        r.push_predicate(&predicate);
        let (sql, params) = r.finish();

        Ok(Statement {
            kind: StatementKind::Delete,
            table: meta.name.clone(),
            values: Vec::new(),
            predicate,
            sql,
            params,
        })
    }
}

impl SqlBuilder for DialectSqlBuilder {
    fn build(
        &self,
        record: &DataRecord,
        meta: &TableMetadata,
    ) -> Result<Option<Statement>, DbError> {
        match record.record_type {
            RecordType::Insert => Ok(Some(self.build_upsert(record, meta))),
            RecordType::Update => self.build_update(record, meta),
            RecordType::Delete => self.build_delete(record, meta).map(Some),
        }
    }
}
