use crate::records::record::{DataRecord, RecordType};

/// Merged records of one table, split by operation so each group can be
/// applied with a single statement shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupedDataRecord {
    pub table_name: String,
    pub inserts: Vec<DataRecord>,
    pub updates: Vec<DataRecord>,
    pub deletes: Vec<DataRecord>,
}

impl GroupedDataRecord {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, record: DataRecord) {
        match record.record_type {
            RecordType::Insert => self.inserts.push(record),
            RecordType::Update => self.updates.push(record),
            RecordType::Delete => self.deletes.push(record),
        }
    }

    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records in application order: inserts, updates, then deletes.
    pub fn iter(&self) -> impl Iterator<Item = &DataRecord> {
        self.inserts
            .iter()
            .chain(self.updates.iter())
            .chain(self.deletes.iter())
    }
}
