use crate::core::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

impl<N: Into<String>> From<(N, Value)> for Field {
    fn from((name, value): (N, Value)) -> Self {
        Field {
            name: name.into(),
            value,
        }
    }
}

/// A row as returned by a primary-key ordered scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowData {
    pub entity: String,
    pub fields: Vec<Field>,
}

impl RowData {
    pub fn new(entity: &str, fields: Vec<Field>) -> Self {
        RowData {
            entity: entity.to_string(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(field))
    }

    pub fn get_value(&self, field: &str) -> Value {
        self.get(field)
            .map(|f| f.value.clone())
            .unwrap_or(Value::Null)
    }

    /// Values of the given key columns, in the order given.
    pub fn key_values(&self, key_columns: &[String]) -> Vec<Value> {
        key_columns.iter().map(|k| self.get_value(k)).collect()
    }

    /// Stable byte encoding of the row content (column names and values),
    /// independent of the entity name so source and target rows compare.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.fields.len() * 16);
        for field in &self.fields {
            out.extend_from_slice(field.name.to_ascii_lowercase().as_bytes());
            out.push(b'=');
            field.value.write_canonical(&mut out);
            out.push(b';');
        }
        out
    }

    /// Content equality ignoring the entity name.
    pub fn same_content(&self, other: &RowData) -> bool {
        self.fields.len() == other.fields.len()
            && self.fields.iter().zip(other.fields.iter()).all(|(a, b)| {
                a.name.eq_ignore_ascii_case(&b.name) && a.value == b.value
            })
    }
}
