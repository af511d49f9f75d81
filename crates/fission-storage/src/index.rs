//! In-memory table indexes.

use std::collections::{BTreeMap, BTreeSet};

use fission_common::types::{Row, RowId, Value};

/// An ordered index over one or more columns of a table.
///
/// Keys are the projected column values; each key maps to the set of rows
/// carrying it. Unique indexes additionally reject a second row per key.
#[derive(Debug, Clone)]
pub struct TableIndex {
    name: String,
    columns: Vec<usize>,
    unique: bool,
    entries: BTreeMap<Vec<Value>, BTreeSet<RowId>>,
}

impl TableIndex {
    /// Creates an empty index over the given column positions.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<usize>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            unique,
            entries: BTreeMap::new(),
        }
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the indexed column positions.
    #[must_use]
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Returns true if this index enforces uniqueness.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Projects a row onto this index's key.
    #[must_use]
    pub fn key_of(&self, row: &Row) -> Vec<Value> {
        self.columns
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Returns true if inserting `row` would collide with another row's key.
    #[must_use]
    pub fn would_conflict(&self, row: &Row, self_id: Option<RowId>) -> bool {
        if !self.unique {
            return false;
        }
        match self.entries.get(&self.key_of(row)) {
            Some(ids) => ids.iter().any(|&id| Some(id) != self_id),
            None => false,
        }
    }

    /// Adds a row to the index.
    pub fn insert(&mut self, row: &Row, row_id: RowId) {
        self.entries.entry(self.key_of(row)).or_default().insert(row_id);
    }

    /// Removes a row from the index.
    pub fn remove(&mut self, row: &Row, row_id: RowId) {
        if let Some(ids) = self.entries.get_mut(&self.key_of(row)) {
            ids.remove(&row_id);
            if ids.is_empty() {
                self.entries.remove(&self.key_of(row));
            }
        }
    }

    /// Probes the index for a key; returns the matching row ids.
    #[must_use]
    pub fn probe(&self, key: &[Value]) -> Vec<RowId> {
        self.entries
            .get(key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Probes the index for a unique key; returns at most one row id.
    #[must_use]
    pub fn probe_unique(&self, key: &[Value]) -> Option<RowId> {
        self.entries
            .get(key)
            .and_then(|ids| ids.iter().next().copied())
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
