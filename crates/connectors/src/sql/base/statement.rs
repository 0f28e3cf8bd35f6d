use model::core::value::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Upsert,
    Update,
    Delete,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementKind::Upsert => f.write_str("UPSERT"),
            StatementKind::Update => f.write_str("UPDATE"),
            StatementKind::Delete => f.write_str("DELETE"),
        }
    }
}

/// A single-row write against the target.
///
/// Carries both the rendered SQL with its parameters and the structured
/// column/predicate lists it was rendered from.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub table: String,
    /// Inserted columns (upsert) or assignments (update). Empty for delete.
    pub values: Vec<(String, Value)>,
    /// Row identity: conflict key for upserts, WHERE predicate otherwise.
    pub predicate: Vec<(String, Value)>,
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    /// Statements with equal shape differ only in bound values and can be
    /// executed as one homogeneous batch.
    pub fn same_shape(&self, other: &Statement) -> bool {
        self.sql == other.sql
    }
}
