use crate::{
    core::value::Value,
    position::Position,
    records::{column::Column, row::RowData},
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    Insert,
    Update,
    Delete,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Insert => "INSERT",
            RecordType::Update => "UPDATE",
            RecordType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a logical row: table plus primary-key values in column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub table: String,
    pub values: Vec<Value>,
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self
            .values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}({values})", self.table)
    }
}

/// A single-row change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    pub table_name: String,
    pub record_type: RecordType,
    pub position: Position,
    pub columns: Vec<Column>,
}

impl DataRecord {
    pub fn new(table_name: impl Into<String>, record_type: RecordType, position: Position) -> Self {
        Self {
            table_name: table_name.into(),
            record_type,
            position,
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Builds an INSERT from a row read by a primary-key ordered scan.
    pub fn from_row(row: RowData, key_columns: &[String], position: Position) -> Self {
        let columns = row
            .fields
            .into_iter()
            .map(|field| {
                let is_key = key_columns
                    .iter()
                    .any(|k| k.eq_ignore_ascii_case(&field.name));
                Column::new(field.name, field.value, is_key)
            })
            .collect();

        Self {
            table_name: row.entity,
            record_type: RecordType::Insert,
            position,
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_primary_key)
    }

    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.is_primary_key)
    }

    /// Current identity of the row.
    pub fn key(&self) -> RowKey {
        RowKey {
            table: self.table_name.clone(),
            values: self.primary_key_columns().map(|c| c.value.clone()).collect(),
        }
    }

    /// Identity of the row before this change (differs from `key` only when an
    /// update moved the primary key).
    pub fn old_key(&self) -> RowKey {
        RowKey {
            table: self.table_name.clone(),
            values: self
                .primary_key_columns()
                .map(|c| c.original_value().clone())
                .collect(),
        }
    }

    pub fn is_primary_key_changed(&self) -> bool {
        self.primary_key_columns().any(Column::is_value_changed)
    }

    pub fn size_bytes(&self) -> usize {
        self.columns.iter().map(|c| c.value.size_bytes()).sum()
    }
}

impl fmt::Display for DataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} at {}", self.record_type, self.old_key(), self.position)
    }
}

/// No more records will arrive on the channel for now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedRecord {
    pub position: Position,
}

/// Advances the position without carrying a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderRecord {
    pub position: Position,
}

/// Everything that travels through a pipeline channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Data(DataRecord),
    Finished(FinishedRecord),
    Placeholder(PlaceholderRecord),
}

impl Record {
    pub fn finished(position: Position) -> Self {
        Record::Finished(FinishedRecord { position })
    }

    pub fn placeholder(position: Position) -> Self {
        Record::Placeholder(PlaceholderRecord { position })
    }

    pub fn position(&self) -> &Position {
        match self {
            Record::Data(r) => &r.position,
            Record::Finished(r) => &r.position,
            Record::Placeholder(r) => &r.position,
        }
    }

    pub fn as_data(&self) -> Option<&DataRecord> {
        match self {
            Record::Data(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Record::Finished(_))
    }
}

impl From<DataRecord> for Record {
    fn from(record: DataRecord) -> Self {
        Record::Data(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update_moving_key() -> DataRecord {
        DataRecord::new("t_order", RecordType::Update, Position::Log { lsn: 7 })
            .with_column(Column::key("id", 2).with_old_value(1))
            .with_column(Column::value("amount", 10))
    }

    #[test]
    fn old_key_prefers_old_value() {
        let record = update_moving_key();
        assert_eq!(record.key().values, vec![Value::Int(2)]);
        assert_eq!(record.old_key().values, vec![Value::Int(1)]);
        assert!(record.is_primary_key_changed());
    }

    #[test]
    fn old_value_equal_to_value_is_not_a_key_change() {
        let record = DataRecord::new("t", RecordType::Update, Position::Placeholder)
            .with_column(Column::key("id", 1).with_old_value(1));
        assert!(!record.is_primary_key_changed());
    }

    #[test]
    fn builds_insert_from_scanned_row() {
        let row = RowData::new(
            "t_order",
            vec![("id", Value::Int(5)).into(), ("status", Value::from("ok")).into()],
        );
        let record = DataRecord::from_row(row, &["id".to_string()], Position::Placeholder);
        assert_eq!(record.record_type, RecordType::Insert);
        assert!(record.column("ID").is_some_and(|c| c.is_primary_key));
        assert!(record.column("status").is_some_and(|c| !c.is_primary_key));
    }

    #[test]
    fn record_exposes_position() {
        let record = Record::finished(Position::Log { lsn: 3 });
        assert!(record.is_finished());
        assert_eq!(record.position(), &Position::Log { lsn: 3 });
        assert!(record.as_data().is_none());
    }
}
