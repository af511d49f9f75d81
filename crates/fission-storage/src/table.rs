//! Persistent (per-partition) table storage.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use fission_catalog::TableSpec;
use fission_common::types::{Row, RowId, TableId, Value};
use fission_common::{EngineError, EngineResult};

use crate::index::TableIndex;

/// Opaque handle of a view handler in the engine's handler registry.
///
/// Source tables keep these instead of references to the handlers
/// themselves; the relationship is non-owning in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewHandlerId(u64);

impl ViewHandlerId {
    /// Creates a handler id from its registry key.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw registry key.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// A table shared between the registry, executors, view handlers, and
/// in-flight undo actions. The longest holder keeps it alive, which is what
/// makes table deletion two-phase: a table dropped from the catalog stays
/// allocated until the last undo quantum referencing it is released.
pub type SharedTable = Arc<RwLock<PersistentTable>>;

/// Row storage plus indexes for one catalog table.
#[derive(Debug)]
pub struct PersistentTable {
    spec: Arc<TableSpec>,
    rows: BTreeMap<RowId, Row>,
    next_row_id: RowId,
    primary: Option<TableIndex>,
    secondary: Vec<TableIndex>,
    delta: Option<Vec<Row>>,
    handlers: Vec<ViewHandlerId>,
    pending_delete: bool,
}

impl PersistentTable {
    /// Creates an empty table from its catalog spec.
    #[must_use]
    pub fn new(spec: Arc<TableSpec>) -> Self {
        let primary = if spec.primary_key.is_empty() {
            None
        } else {
            Some(TableIndex::new(
                format!("{}_pk", spec.name),
                spec.primary_key.clone(),
                true,
            ))
        };
        let secondary = spec
            .indexes
            .iter()
            .map(|ix| TableIndex::new(ix.name.clone(), ix.columns.clone(), ix.unique))
            .collect();
        Self {
            spec,
            rows: BTreeMap::new(),
            next_row_id: RowId::FIRST,
            primary,
            secondary,
            delta: None,
            handlers: Vec::new(),
            pending_delete: false,
        }
    }

    /// Returns the catalog spec this table was built from.
    #[must_use]
    pub fn spec(&self) -> &Arc<TableSpec> {
        &self.spec
    }

    /// Returns the table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Returns the catalog-local table id.
    #[must_use]
    pub fn table_id(&self) -> TableId {
        self.spec.table_id
    }

    /// Returns the table's signature hash.
    #[must_use]
    pub fn signature_hash(&self) -> u64 {
        self.spec.signature_hash()
    }

    /// Returns the number of active rows (ignores delta mode).
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Inserts a row, enforcing NOT NULL and uniqueness constraints.
    pub fn insert(&mut self, row: Row) -> EngineResult<RowId> {
        self.check_shape(&row)?;
        self.check_not_null(&row)?;
        if let Some(primary) = &self.primary {
            if primary.would_conflict(&row, None) {
                return Err(EngineError::constraint(
                    self.name(),
                    format!("duplicate primary key {:?}", primary.key_of(&row)),
                ));
            }
        }
        for index in &self.secondary {
            if index.would_conflict(&row, None) {
                return Err(EngineError::constraint(
                    self.name(),
                    format!("duplicate key in unique index '{}'", index.name()),
                ));
            }
        }

        let row_id = self.next_row_id;
        self.next_row_id = self.next_row_id.next();
        self.index_row(&row, row_id);
        self.rows.insert(row_id, row);
        Ok(row_id)
    }

    /// Re-inserts a previously removed row under its original id.
    ///
    /// Used by undo replay; the row was valid when first inserted, so no
    /// constraint checks run.
    pub fn insert_with_id(&mut self, row_id: RowId, row: Row) -> EngineResult<()> {
        if self.rows.contains_key(&row_id) {
            return Err(EngineError::internal(format!(
                "row {row_id} already present in table '{}'",
                self.name()
            )));
        }
        self.index_row(&row, row_id);
        self.rows.insert(row_id, row);
        Ok(())
    }

    /// Removes a row by id, returning it.
    pub fn remove(&mut self, row_id: RowId) -> EngineResult<Row> {
        let row = self.rows.remove(&row_id).ok_or_else(|| {
            EngineError::internal(format!(
                "row {row_id} missing from table '{}'",
                self.name()
            ))
        })?;
        self.unindex_row(&row, row_id);
        Ok(row)
    }

    /// Replaces the row stored under `row_id`, returning the old row.
    ///
    /// `refresh_primary` controls whether the primary-key index is
    /// re-touched; view maintenance passes `false` because a merge never
    /// changes the group-by key.
    pub fn update(
        &mut self,
        row_id: RowId,
        new_row: Row,
        refresh_primary: bool,
    ) -> EngineResult<Row> {
        self.check_shape(&new_row)?;
        let old_row = self.rows.get(&row_id).cloned().ok_or_else(|| {
            EngineError::internal(format!(
                "row {row_id} missing from table '{}'",
                self.name()
            ))
        })?;

        if refresh_primary {
            if let Some(primary) = &self.primary {
                if primary.would_conflict(&new_row, Some(row_id)) {
                    return Err(EngineError::constraint(
                        self.name(),
                        format!("duplicate primary key {:?}", primary.key_of(&new_row)),
                    ));
                }
            }
        }
        for index in &self.secondary {
            if index.would_conflict(&new_row, Some(row_id)) {
                return Err(EngineError::constraint(
                    self.name(),
                    format!("duplicate key in unique index '{}'", index.name()),
                ));
            }
        }

        if refresh_primary {
            if let Some(primary) = &mut self.primary {
                primary.remove(&old_row, row_id);
                primary.insert(&new_row, row_id);
            }
        }
        for index in &mut self.secondary {
            index.remove(&old_row, row_id);
            index.insert(&new_row, row_id);
        }
        self.rows.insert(row_id, new_row);
        Ok(old_row)
    }

    fn index_row(&mut self, row: &Row, row_id: RowId) {
        if let Some(primary) = &mut self.primary {
            primary.insert(row, row_id);
        }
        for index in &mut self.secondary {
            index.insert(row, row_id);
        }
    }

    fn unindex_row(&mut self, row: &Row, row_id: RowId) {
        if let Some(primary) = &mut self.primary {
            primary.remove(row, row_id);
        }
        for index in &mut self.secondary {
            index.remove(row, row_id);
        }
    }

    fn check_shape(&self, row: &Row) -> EngineResult<()> {
        if row.num_columns() != self.spec.column_count() {
            return Err(EngineError::Serialization {
                message: format!(
                    "row has {} columns, table '{}' has {}",
                    row.num_columns(),
                    self.name(),
                    self.spec.column_count()
                ),
            });
        }
        Ok(())
    }

    fn check_not_null(&self, row: &Row) -> EngineResult<()> {
        for (column, value) in self.spec.columns.iter().zip(row.iter()) {
            if !column.nullable && value.is_null() {
                return Err(EngineError::constraint(
                    self.name(),
                    format!("NOT NULL column '{}' set to NULL", column.name),
                ));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Probes the primary-key index.
    #[must_use]
    pub fn lookup_primary(&self, key: &[Value]) -> Option<(RowId, Row)> {
        let primary = self.primary.as_ref()?;
        let row_id = primary.probe_unique(key)?;
        self.rows.get(&row_id).map(|row| (row_id, row.clone()))
    }

    /// Finds the id of a row equal to `row`.
    ///
    /// Uses the primary key when one exists, otherwise scans.
    #[must_use]
    pub fn find_row_id(&self, row: &Row) -> Option<RowId> {
        if let Some(primary) = &self.primary {
            let row_id = primary.probe_unique(&primary.key_of(row))?;
            return self.rows.get(&row_id).filter(|r| *r == row).map(|_| row_id);
        }
        self.rows
            .iter()
            .find(|(_, r)| *r == row)
            .map(|(&row_id, _)| row_id)
    }

    /// Returns the first row in storage order, if any.
    ///
    /// This is the single-row fetch used by group-by-less view maintenance.
    #[must_use]
    pub fn first_row(&self) -> Option<(RowId, Row)> {
        self.rows
            .iter()
            .next()
            .map(|(&row_id, row)| (row_id, row.clone()))
    }

    /// Returns the rows a scan sees right now.
    ///
    /// In delta mode that is exactly the delta rows; otherwise every active
    /// row in storage order.
    #[must_use]
    pub fn scan_visible(&self) -> Vec<Row> {
        match &self.delta {
            Some(delta) => delta.clone(),
            None => self.rows.values().cloned().collect(),
        }
    }

    /// Returns every active row in storage order, ignoring delta mode.
    #[must_use]
    pub fn all_rows(&self) -> Vec<Row> {
        self.rows.values().cloned().collect()
    }

    // =========================================================================
    // Delta mode
    // =========================================================================

    /// Enters delta mode: scans see only `rows` until
    /// [`exit_delta_mode`](Self::exit_delta_mode).
    pub fn enter_delta_mode(&mut self, rows: Vec<Row>) {
        debug_assert!(self.delta.is_none(), "delta mode is not re-entrant");
        self.delta = Some(rows);
    }

    /// Leaves delta mode.
    pub fn exit_delta_mode(&mut self) {
        self.delta = None;
    }

    /// Returns true while the table is in delta mode.
    #[must_use]
    pub fn in_delta_mode(&self) -> bool {
        self.delta.is_some()
    }

    // =========================================================================
    // View handler back references
    // =========================================================================

    /// Attaches a view handler to be notified of mutations.
    pub fn attach_handler(&mut self, id: ViewHandlerId) {
        if !self.handlers.contains(&id) {
            self.handlers.push(id);
        }
    }

    /// Detaches a view handler.
    pub fn detach_handler(&mut self, id: ViewHandlerId) {
        self.handlers.retain(|&h| h != id);
    }

    /// Returns the attached handler ids in attachment order.
    #[must_use]
    pub fn handlers(&self) -> &[ViewHandlerId] {
        &self.handlers
    }

    // =========================================================================
    // Two-phase deletion
    // =========================================================================

    /// Marks this table as dropped from the catalog.
    ///
    /// Storage is freed when the last `Arc` (registry, undo actions,
    /// executors) lets go.
    pub fn mark_pending_delete(&mut self) {
        self.pending_delete = true;
    }

    /// Returns true once the table has been dropped from the catalog.
    #[must_use]
    pub fn is_pending_delete(&self) -> bool {
        self.pending_delete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fission_catalog::ColumnSpec;
    use fission_common::types::DataType;

    fn spec() -> Arc<TableSpec> {
        Arc::new(TableSpec {
            name: "t".to_string(),
            table_id: TableId::new(0),
            signature: "t|int:a,int:b".to_string(),
            is_replicated: false,
            is_streamed: false,
            columns: vec![
                ColumnSpec::not_null("a", DataType::Int),
                ColumnSpec::nullable("b", DataType::Int),
            ],
            primary_key: vec![0],
            indexes: vec![],
            view: None,
        })
    }

    fn row(a: i32, b: i32) -> Row {
        Row::new(vec![Value::Int(a), Value::Int(b)])
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut table = PersistentTable::new(spec());
        table.insert(row(1, 10)).unwrap();
        table.insert(row(2, 20)).unwrap();

        let (_, found) = table.lookup_primary(&[Value::Int(2)]).unwrap();
        assert_eq!(found, row(2, 20));
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn test_duplicate_primary_key_rejected() {
        let mut table = PersistentTable::new(spec());
        table.insert(row(1, 10)).unwrap();
        let err = table.insert(row(1, 99)).unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation { .. }));
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_not_null_enforced() {
        let mut table = PersistentTable::new(spec());
        let err = table
            .insert(Row::new(vec![Value::Null, Value::Int(1)]))
            .unwrap_err();
        assert!(matches!(err, EngineError::ConstraintViolation { .. }));
    }

    #[test]
    fn test_remove_and_reinsert_with_id() {
        let mut table = PersistentTable::new(spec());
        let row_id = table.insert(row(1, 10)).unwrap();
        let removed = table.remove(row_id).unwrap();
        assert_eq!(table.row_count(), 0);
        assert!(table.lookup_primary(&[Value::Int(1)]).is_none());

        table.insert_with_id(row_id, removed).unwrap();
        assert!(table.lookup_primary(&[Value::Int(1)]).is_some());
    }

    #[test]
    fn test_update_without_primary_refresh() {
        let mut table = PersistentTable::new(spec());
        let row_id = table.insert(row(1, 10)).unwrap();
        let old = table.update(row_id, row(1, 99), false).unwrap();
        assert_eq!(old, row(1, 10));
        let (_, current) = table.lookup_primary(&[Value::Int(1)]).unwrap();
        assert_eq!(current, row(1, 99));
    }

    #[test]
    fn test_delta_mode_scopes_scans() {
        let mut table = PersistentTable::new(spec());
        table.insert(row(1, 10)).unwrap();
        table.insert(row(2, 20)).unwrap();

        table.enter_delta_mode(vec![row(2, 20)]);
        assert_eq!(table.scan_visible(), vec![row(2, 20)]);
        table.exit_delta_mode();
        assert_eq!(table.scan_visible().len(), 2);
    }

    #[test]
    fn test_handler_attach_detach() {
        let mut table = PersistentTable::new(spec());
        let a = ViewHandlerId::new(1);
        let b = ViewHandlerId::new(2);
        table.attach_handler(a);
        table.attach_handler(b);
        table.attach_handler(a); // idempotent
        assert_eq!(table.handlers(), &[a, b]);
        table.detach_handler(a);
        assert_eq!(table.handlers(), &[b]);
    }

    #[test]
    fn test_find_row_id_requires_full_match() {
        let mut table = PersistentTable::new(spec());
        table.insert(row(1, 10)).unwrap();
        assert!(table.find_row_id(&row(1, 10)).is_some());
        // Same key, different payload: not the same row.
        assert!(table.find_row_id(&row(1, 11)).is_none());
    }
}
