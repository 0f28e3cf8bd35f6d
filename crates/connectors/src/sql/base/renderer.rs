//! Accumulates SQL text and bound parameters.

use crate::sql::base::dialect::Dialect;
use model::core::value::Value;

/// A context that holds the state during the rendering process.
///
/// It accumulates the SQL string and the parameters, and provides
/// access to the dialect for syntax-specific details.
pub struct Renderer<'a> {
    pub sql: String,
    pub params: Vec<Value>,
    pub dialect: &'a dyn Dialect,
}

impl<'a> Renderer<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
            dialect,
        }
    }

    /// Consumes the renderer and returns the final SQL string and parameters.
    pub fn finish(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }

    pub fn add_param(&mut self, value: Value) {
        self.params.push(value);
        let placeholder = self.dialect.get_placeholder(self.params.len() - 1);
        self.sql.push_str(&placeholder);
    }

    pub fn push_ident(&mut self, ident: &str) {
        let quoted = self.dialect.quote_identifier(ident);
        self.sql.push_str(&quoted);
    }

    pub fn push_ident_list(&mut self, idents: &[String]) {
        for (i, ident) in idents.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.push_ident(ident);
        }
    }

    /// `"a" = $1, "b" = $2`
    pub fn push_assignments(&mut self, assignments: &[(String, Value)]) {
        for (i, (column, value)) in assignments.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.push_ident(column);
            self.sql.push_str(" = ");
            self.add_param(value.clone());
        }
    }

    /// `"a" = $1 AND "b" IS NULL`
    pub fn push_predicate(&mut self, conditions: &[(String, Value)]) {
        for (i, (column, value)) in conditions.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(" AND ");
            }
            self.push_ident(column);
            if value.is_null() {
                self.sql.push_str(" IS NULL");
            } else {
                self.sql.push_str(" = ");
                self.add_param(value.clone());
            }
        }
    }
}
