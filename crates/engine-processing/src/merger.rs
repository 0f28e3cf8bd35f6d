//! Collapses a window of captured changes into the minimal equivalent set.
//!
//! Changes of the same row (matched by primary key) fold into one record.
//! The window is split into segments: inside a segment every record touches
//! a distinct key, so records of one segment may be applied in any order,
//! while segments are applied one after another. A new segment starts when a
//! record would reuse a key vacated by a primary-key update in the current
//! segment, or move a row onto a key another entry holds.

use crate::error::MergeError;
use model::records::{
    grouped::GroupedDataRecord,
    record::{DataRecord, RecordType, RowKey},
};
use std::collections::{HashMap, HashSet};

/// Merges `records` and returns them in application order.
pub fn merge(records: Vec<DataRecord>) -> Result<Vec<DataRecord>, MergeError> {
    Ok(segments(records)?
        .into_iter()
        .flat_map(Segment::into_records)
        .collect())
}

/// Merges `records` and partitions every segment per table. Groups are
/// returned in application order.
pub fn group(records: Vec<DataRecord>) -> Result<Vec<GroupedDataRecord>, MergeError> {
    let mut groups = Vec::new();
    for segment in segments(records)? {
        let passthrough = segment.passthrough;
        let mut tables: Vec<GroupedDataRecord> = Vec::new();
        for record in segment.into_records() {
            if passthrough {
                // Rows without a key keep their exact order.
                let mut group = GroupedDataRecord::new(record.table_name.clone());
                group.push(record);
                groups.push(group);
                continue;
            }
            match tables.iter_mut().find(|g| g.table_name == record.table_name) {
                Some(group) => group.push(record),
                None => {
                    let mut group = GroupedDataRecord::new(record.table_name.clone());
                    group.push(record);
                    tables.push(group);
                }
            }
        }
        groups.extend(tables);
    }
    Ok(groups)
}

fn segments(records: Vec<DataRecord>) -> Result<Vec<Segment>, MergeError> {
    let mut tracker = RowStateTracker::default();
    let mut done = Vec::new();
    let mut current = Segment::default();

    for record in records {
        tracker.observe(&record)?;

        if !record.has_primary_key() {
            if !current.passthrough && !current.is_empty() {
                done.push(std::mem::take(&mut current));
            }
            current.passthrough = true;
            current.entries.push(Some(Entry::new(record)));
            continue;
        }

        if current.passthrough || current.must_cut(&record) {
            if !current.is_empty() {
                done.push(std::mem::take(&mut current));
            } else {
                current = Segment::default();
            }
        }
        current.apply(record)?;
    }

    if !current.is_empty() {
        done.push(current);
    }
    Ok(done)
}

fn violation(earlier: &DataRecord, later: &DataRecord, reason: &'static str) -> MergeError {
    MergeError {
        table: later.table_name.clone(),
        key: later
            .old_key()
            .values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        earlier: earlier.record_type,
        later: later.record_type,
        reason,
    }
}

/// Last known existence of every key seen in the window, across segments.
#[derive(Default)]
struct RowStateTracker {
    last: HashMap<RowKey, (DataRecord, bool)>,
}

impl RowStateTracker {
    fn observe(&mut self, record: &DataRecord) -> Result<(), MergeError> {
        if !record.has_primary_key() {
            return Ok(());
        }
        let identity = record.old_key();

        if let Some((earlier, present)) = self.last.get(&identity) {
            let reason = match (record.record_type, *present) {
                (RecordType::Insert, true) if earlier.record_type == RecordType::Insert => {
                    Some("duplicate insert")
                }
                (RecordType::Insert, true) => Some("insert of existing row"),
                (RecordType::Update, false) => Some("update of deleted row"),
                (RecordType::Delete, false) => Some("duplicate delete"),
                _ => None,
            };
            if let Some(reason) = reason {
                return Err(violation(earlier, record, reason));
            }
        }

        match record.record_type {
            RecordType::Insert => {
                self.last.insert(identity, (record.clone(), true));
            }
            RecordType::Update => {
                let key = record.key();
                if key != identity {
                    self.last.insert(identity, (record.clone(), false));
                }
                self.last.insert(key, (record.clone(), true));
            }
            RecordType::Delete => {
                self.last.insert(identity, (record.clone(), false));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Entry {
    record: DataRecord,
    /// An INSERT that replaced a DELETE of the same key in this window.
    supersedes_delete: bool,
}

impl Entry {
    fn new(record: DataRecord) -> Self {
        Self {
            record,
            supersedes_delete: false,
        }
    }
}

#[derive(Debug, Default)]
struct Segment {
    entries: Vec<Option<Entry>>,
    /// Current key of every live entry.
    index: HashMap<RowKey, usize>,
    /// Original keys vacated by primary-key updates.
    freed: HashSet<RowKey>,
    passthrough: bool,
}

impl Segment {
    fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }

    fn into_records(self) -> impl Iterator<Item = DataRecord> {
        self.entries.into_iter().flatten().map(|e| e.record)
    }

    fn must_cut(&self, record: &DataRecord) -> bool {
        let identity = record.old_key();
        if self.freed.contains(&identity) {
            return true;
        }
        if record.is_primary_key_changed() {
            let key = record.key();
            if self.freed.contains(&key) || self.index.contains_key(&key) {
                return true;
            }
            if let Some(entry) = self.entry(&identity) {
                // Folding the move into the insert would lose the delete.
                if entry.supersedes_delete {
                    return true;
                }
            }
        }
        false
    }

    fn entry(&self, key: &RowKey) -> Option<&Entry> {
        self.index
            .get(key)
            .and_then(|idx| self.entries[*idx].as_ref())
    }

    fn apply(&mut self, record: DataRecord) -> Result<(), MergeError> {
        let identity = record.old_key();
        let Some(idx) = self.index.get(&identity).copied() else {
            if record.is_primary_key_changed() {
                self.freed.insert(identity);
            }
            self.index.insert(record.key(), self.entries.len());
            self.entries.push(Some(Entry::new(record)));
            return Ok(());
        };

        let Some(earlier) = self.entries[idx].take() else {
            self.index.remove(&identity);
            return self.apply(record);
        };

        match fold(earlier, record)? {
            Folded::Keep(entry) => {
                let key = entry.record.key();
                if key != identity {
                    self.index.remove(&identity);
                }
                if entry.record.record_type == RecordType::Update
                    && entry.record.is_primary_key_changed()
                {
                    self.freed.insert(entry.record.old_key());
                }
                self.index.insert(key, idx);
                self.entries[idx] = Some(entry);
            }
            Folded::Dropped => {
                self.index.remove(&identity);
            }
        }
        Ok(())
    }
}

enum Folded {
    Keep(Entry),
    Dropped,
}

fn fold(earlier: Entry, later: DataRecord) -> Result<Folded, MergeError> {
    use RecordType::*;

    let Entry {
        record: earlier,
        supersedes_delete,
    } = earlier;

    match (earlier.record_type, later.record_type) {
        (Insert, Insert) => Err(violation(&earlier, &later, "duplicate insert")),
        (Update, Insert) => Err(violation(&earlier, &later, "insert of existing row")),
        (Delete, Update) => Err(violation(&earlier, &later, "update of deleted row")),
        (Delete, Delete) => Err(violation(&earlier, &later, "duplicate delete")),

        (Insert, Update) => Ok(Folded::Keep(Entry {
            record: insert_with_update(earlier, later),
            supersedes_delete,
        })),
        (Insert, Delete) if supersedes_delete => Ok(Folded::Keep(Entry::new(later))),
        (Insert, Delete) => Ok(Folded::Dropped),

        (Update, Update) => Ok(Folded::Keep(Entry::new(merge_updates(earlier, later)))),
        (Update, Delete) => Ok(Folded::Keep(Entry::new(delete_original(&earlier, later)))),

        (Delete, Insert) => Ok(Folded::Keep(Entry {
            record: later,
            supersedes_delete: true,
        })),
    }
}

/// The inserted row with the update's values, under the update's key.
fn insert_with_update(mut insert: DataRecord, update: DataRecord) -> DataRecord {
    for column in update.columns.into_iter().filter(|c| c.is_updated) {
        match insert
            .columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(&column.name))
        {
            Some(existing) => existing.value = column.value,
            None => insert.columns.push(column),
        }
    }
    for column in &mut insert.columns {
        column.old_value = None;
        column.is_updated = true;
    }
    insert.position = update.position;
    insert
}

fn merge_updates(mut earlier: DataRecord, later: DataRecord) -> DataRecord {
    for column in later.columns {
        match earlier
            .columns
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(&column.name))
        {
            Some(existing) => {
                existing.old_value = existing.old_value.take().or(column.old_value);
                existing.value = column.value;
                existing.is_updated |= column.is_updated;
                existing.is_primary_key |= column.is_primary_key;
            }
            None => earlier.columns.push(column),
        }
    }
    earlier.position = later.position;
    earlier
}

/// A delete of the row as it was before `update` touched it.
fn delete_original(update: &DataRecord, mut delete: DataRecord) -> DataRecord {
    for column in delete.columns.iter_mut().filter(|c| c.is_primary_key) {
        if let Some(original) = update.column(&column.name) {
            column.value = original.original_value().clone();
        }
        column.old_value = None;
    }
    delete
}
