use crate::{
    error::{ConnectorError, DbError},
    sql::{
        base::{
            destination::{TargetDataSource, temporary_object_prefix},
            dialect::{Dialect, Postgres},
            renderer::Renderer,
            source::RowReader,
            statement::Statement,
        },
        postgres::{params::PgParamStore, row::to_row_data, utils::connect_client},
    },
};
use async_trait::async_trait;
use model::{core::value::Value, records::row::RowData};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tokio_postgres::Client;
use tracing::{debug, info};

const QUERY_TEMPORARY_TABLES_SQL: &str = include_str!("sql/temporary_tables.sql");

#[derive(Clone)]
pub struct PgAdapter {
    client: Arc<RwLock<Client>>,
    url: Arc<str>,
    dialect: Postgres,
}

impl PgAdapter {
    pub async fn connect(url: &str) -> Result<Self, ConnectorError> {
        let client = Arc::new(RwLock::new(connect_client(url).await?));
        Ok(PgAdapter {
            client,
            url: Arc::from(url),
            dialect: Postgres,
        })
    }

    /// Opens another client to the same database. Clones share one client.
    pub async fn reconnect(&self) -> Result<Self, ConnectorError> {
        Self::connect(&self.url).await
    }
}

/// Keyset pagination: rows strictly after `after`, ordered by the key.
fn page_query(
    dialect: &dyn Dialect,
    table: &str,
    key_columns: &[String],
    after: Option<&[Value]>,
    limit: usize,
) -> (String, Vec<Value>) {
    let mut r = Renderer::new(dialect);
    r.sql.push_str("SELECT * FROM ");
    r.push_ident(table);

    if let Some(after) = after {
        r.sql.push_str(" WHERE (");
        r.push_ident_list(key_columns);
        r.sql.push_str(") > (");
        for (i, value) in after.iter().enumerate() {
            if i > 0 {
                r.sql.push_str(", ");
            }
            r.add_param(value.clone());
        }
        r.sql.push(')');
    }

    r.sql.push_str(" ORDER BY ");
    r.push_ident_list(key_columns);
    r.sql.push_str(&format!(" LIMIT {limit}"));
    r.finish()
}

#[async_trait]
impl TargetDataSource for PgAdapter {
    async fn execute_batch(&self, statements: &[Statement]) -> Result<u64, DbError> {
        if statements.is_empty() {
            return Ok(0);
        }

        let mut client = self.client.write().await;
        let tx = client.transaction().await?;
        let mut prepared: HashMap<&str, tokio_postgres::Statement> = HashMap::new();
        let mut affected = 0;

        for statement in statements {
            let prepared_stmt = match prepared.get(statement.sql.as_str()) {
                Some(stmt) => stmt.clone(),
                None => {
                    let stmt = tx.prepare(&statement.sql).await?;
                    prepared.insert(statement.sql.as_str(), stmt.clone());
                    stmt
                }
            };
            let bindings = PgParamStore::for_types(statement.params.clone(), prepared_stmt.params());
            affected += tx.execute(&prepared_stmt, &bindings.as_refs()).await?;
        }

        tx.commit().await?;
        debug!(statements = statements.len(), affected, "Committed batch");
        Ok(affected)
    }

    async fn cleanup(&self, job_id: &str) -> Result<(), DbError> {
        let prefix = temporary_object_prefix(job_id);
        let client = self.client.read().await;
        let rows = client.query(QUERY_TEMPORARY_TABLES_SQL, &[&prefix]).await?;
        let tables = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<Result<Vec<_>, _>>()?;

        for table in &tables {
            let sql = format!("DROP TABLE IF EXISTS {}", self.dialect.quote_identifier(table));
            client.batch_execute(&sql).await?;
        }

        info!(job_id, dropped = tables.len(), "Cleaned up temporary tables");
        Ok(())
    }
}

#[async_trait]
impl RowReader for PgAdapter {
    async fn count(&self, table: &str) -> Result<u64, DbError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.dialect.quote_identifier(table));
        let client = self.client.read().await;
        let row = client.query_one(&sql, &[]).await?;
        let count: i64 = row.try_get(0)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn fetch_page(
        &self,
        table: &str,
        key_columns: &[String],
        after: Option<&[Value]>,
        limit: usize,
    ) -> Result<Vec<RowData>, DbError> {
        let (sql, params) = page_query(&self.dialect, table, key_columns, after, limit);
        let client = self.client.read().await;
        let stmt = client.prepare(&sql).await?;
        let bindings = PgParamStore::for_types(params, stmt.params());
        let rows = client.query(&stmt, &bindings.as_refs()).await?;
        Ok(rows.iter().map(|row| to_row_data(row, table)).collect())
    }
}
