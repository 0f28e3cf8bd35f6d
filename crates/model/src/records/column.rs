use crate::core::value::Value;
use serde::{Deserialize, Serialize};

/// One column of a captured row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub value: Value,
    /// Only set for updates that change a primary-key column.
    pub old_value: Option<Value>,
    pub is_primary_key: bool,
    pub is_updated: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, value: impl Into<Value>, is_primary_key: bool) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            old_value: None,
            is_primary_key,
            is_updated: true,
        }
    }

    /// A primary-key column.
    pub fn key(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(name, value, true)
    }

    /// A non-key column.
    pub fn value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(name, value, false)
    }

    pub fn with_old_value(mut self, old: impl Into<Value>) -> Self {
        self.old_value = Some(old.into());
        self
    }

    pub fn with_updated(mut self, updated: bool) -> Self {
        self.is_updated = updated;
        self
    }

    /// The value identifying the row before this change.
    pub fn original_value(&self) -> &Value {
        self.old_value.as_ref().unwrap_or(&self.value)
    }

    pub fn is_value_changed(&self) -> bool {
        self.old_value.as_ref().is_some_and(|old| *old != self.value)
    }
}
