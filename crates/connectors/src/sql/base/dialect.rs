//! Database-specific SQL syntax.

use crate::sql::base::renderer::Renderer;

pub trait Dialect: Send + Sync {
    /// Wraps an identifier (like a table or column name) in the correct
    /// quotation marks for the dialect.
    ///
    /// - PostgreSQL uses double quotes: `"my_column"`
    /// - MySQL uses backticks: `` `my_column` ``
    fn quote_identifier(&self, ident: &str) -> String;

    /// Returns the placeholder for a parameterized query.
    ///
    /// - PostgreSQL uses `$1`, `$2`, etc.
    /// - MySQL uses `?`
    fn get_placeholder(&self, index: usize) -> String;

    /// Returns the name of the dialect (e.g., "PostgreSQL", "MySQL").
    fn name(&self) -> String;

    /// Appends the clause that turns a plain INSERT into an upsert keyed on
    /// `keys`, overwriting `columns` on conflict.
    fn render_upsert(&self, r: &mut Renderer, keys: &[String], columns: &[String]);
}

#[derive(Debug, Clone)]
pub struct Postgres;

impl Dialect for Postgres {
    fn quote_identifier(&self, ident: &str) -> String {
        format!(r#""{}""#, ident.replace('"', "\"\""))
    }

    fn get_placeholder(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    fn name(&self) -> String {
        "PostgreSQL".into()
    }

    fn render_upsert(&self, r: &mut Renderer, keys: &[String], columns: &[String]) {
        r.sql.push_str(" ON CONFLICT (");
        r.push_ident_list(keys);
        r.sql.push(')');

        let updates: Vec<&String> = columns
            .iter()
            .filter(|c| !keys.iter().any(|k| k.eq_ignore_ascii_case(c)))
            .collect();
        if updates.is_empty() {
            r.sql.push_str(" DO NOTHING");
            return;
        }

        r.sql.push_str(" DO UPDATE SET ");
        for (i, column) in updates.iter().enumerate() {
            if i > 0 {
                r.sql.push_str(", ");
            }
            let quoted = self.quote_identifier(column);
            r.sql.push_str(&format!("{quoted} = EXCLUDED.{quoted}"));
        }
    }
}

#[derive(Debug, Clone)]
pub struct MySql;

impl Dialect for MySql {
    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn get_placeholder(&self, _index: usize) -> String {
        "?".into()
    }

    fn name(&self) -> String {
        "MySQL".into()
    }

    fn render_upsert(&self, r: &mut Renderer, keys: &[String], columns: &[String]) {
        r.sql.push_str(" ON DUPLICATE KEY UPDATE ");
        let updates: Vec<&String> = columns
            .iter()
            .filter(|c| !keys.iter().any(|k| k.eq_ignore_ascii_case(c)))
            .collect();

        // A key-only row still needs an assignment for the clause to parse.
        let targets: Vec<&String> = if updates.is_empty() {
            keys.iter().take(1).collect()
        } else {
            updates
        };
        for (i, column) in targets.iter().enumerate() {
            if i > 0 {
                r.sql.push_str(", ");
            }
            let quoted = self.quote_identifier(column);
            if keys.iter().any(|k| k == *column) {
                r.sql.push_str(&format!("{quoted} = {quoted}"));
            } else {
                r.sql.push_str(&format!("{quoted} = VALUES({quoted})"));
            }
        }
    }
}
