use crate::error::DbError;
use async_trait::async_trait;
use model::{core::value::Value, records::row::RowData};

/// Paginated, primary-key ordered access to a table.
#[async_trait]
pub trait RowReader: Send + Sync {
    async fn count(&self, table: &str) -> Result<u64, DbError>;

    /// Rows whose key is strictly greater than `after` (all rows when `None`),
    /// ordered by `key_columns`, at most `limit` of them.
    async fn fetch_page(
        &self,
        table: &str,
        key_columns: &[String],
        after: Option<&[Value]>,
        limit: usize,
    ) -> Result<Vec<RowData>, DbError>;
}
