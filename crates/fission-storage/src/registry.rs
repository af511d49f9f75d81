//! The triple-indexed table registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use fission_common::types::TableId;
use fission_common::{EngineError, EngineResult};

use crate::streamed::SharedStream;
use crate::table::{PersistentTable, SharedTable};

/// Name/id/signature lookup over the live tables of one partition.
///
/// Three parallel indexes resolve the same table set; they are rebuilt
/// together after every catalog mutation and must stay mutually consistent
/// at the end of any catalog operation. Streamed tables live in their own
/// name index; they never participate in plan execution.
#[derive(Debug, Default)]
pub struct TableRegistry {
    by_id: HashMap<TableId, SharedTable>,
    by_name: HashMap<String, SharedTable>,
    by_signature: HashMap<u64, SharedTable>,
    streams: HashMap<String, SharedStream>,
}

impl TableRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered persistent tables.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.by_id.len()
    }

    /// Registers a table under all three indexes.
    pub fn insert(&mut self, table: SharedTable) {
        let (table_id, name, signature_hash) = {
            let guard = table.read();
            (guard.table_id(), guard.name().to_string(), guard.signature_hash())
        };
        self.by_id.insert(table_id, Arc::clone(&table));
        self.by_name.insert(name, Arc::clone(&table));
        self.by_signature.insert(signature_hash, table);
    }

    /// Drops a table from all three indexes, returning it.
    ///
    /// The table's storage survives as long as any undo action still holds
    /// the `Arc`.
    pub fn remove(&mut self, name: &str) -> Option<SharedTable> {
        let table = self.by_name.remove(name)?;
        let (table_id, signature_hash) = {
            let guard = table.read();
            (guard.table_id(), guard.signature_hash())
        };
        self.by_id.remove(&table_id);
        self.by_signature.remove(&signature_hash);
        debug!(table = name, "dropped table from registry");
        Some(table)
    }

    /// Rebuilds every index from the given table set.
    pub fn rebuild<I>(&mut self, tables: I)
    where
        I: IntoIterator<Item = SharedTable>,
    {
        self.by_id.clear();
        self.by_name.clear();
        self.by_signature.clear();
        for table in tables {
            self.insert(table);
        }
        debug!(tables = self.by_id.len(), "rebuilt table registry");
    }

    /// Re-registers only replicated tables, leaving partitioned entries
    /// untouched.
    ///
    /// Used by the lowest site after publishing a replicated catalog
    /// change; the indexes stay consistent because insertion updates all
    /// three together.
    pub fn rebuild_replicated<I>(&mut self, tables: I)
    where
        I: IntoIterator<Item = SharedTable>,
    {
        for table in tables {
            let is_replicated = table.read().spec().is_replicated;
            debug_assert!(is_replicated, "partial rebuild is replicated-only");
            if is_replicated {
                self.insert(table);
            }
        }
    }

    /// Looks a table up by catalog id.
    #[must_use]
    pub fn get_by_id(&self, table_id: TableId) -> Option<SharedTable> {
        self.by_id.get(&table_id).cloned()
    }

    /// Looks a table up by name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<SharedTable> {
        self.by_name.get(name).cloned()
    }

    /// Looks a table up by signature hash.
    #[must_use]
    pub fn get_by_signature_hash(&self, hash: u64) -> Option<SharedTable> {
        self.by_signature.get(&hash).cloned()
    }

    /// Looks a table up by id, failing with `TableNotFound`.
    pub fn require_by_id(&self, table_id: TableId) -> EngineResult<SharedTable> {
        self.get_by_id(table_id)
            .ok_or(EngineError::TableNotFound { table_id })
    }

    /// Looks a table up by name, failing with `TableNotFound`.
    pub fn require_by_name(&self, name: &str) -> EngineResult<SharedTable> {
        self.get_by_name(name).ok_or_else(|| {
            EngineError::internal(format!("table '{name}' not found in registry"))
        })
    }

    /// Returns every registered persistent table.
    #[must_use]
    pub fn all_tables(&self) -> Vec<SharedTable> {
        self.by_id.values().cloned().collect()
    }

    /// Registers a streamed table.
    pub fn insert_stream(&mut self, stream: SharedStream) {
        let name = stream.lock().name().to_string();
        self.streams.insert(name, stream);
    }

    /// Drops a streamed table.
    pub fn remove_stream(&mut self, name: &str) -> Option<SharedStream> {
        self.streams.remove(name)
    }

    /// Looks a streamed table up by name.
    #[must_use]
    pub fn get_stream(&self, name: &str) -> Option<SharedStream> {
        self.streams.get(name).cloned()
    }

    /// Returns every registered streamed table.
    #[must_use]
    pub fn all_streams(&self) -> Vec<SharedStream> {
        self.streams.values().cloned().collect()
    }

    /// Wraps a table for registration.
    #[must_use]
    pub fn share(table: PersistentTable) -> SharedTable {
        Arc::new(RwLock::new(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fission_catalog::{ColumnSpec, TableSpec};
    use fission_common::types::DataType;

    fn shared(name: &str, id: i32) -> SharedTable {
        TableRegistry::share(PersistentTable::new(Arc::new(TableSpec {
            name: name.to_string(),
            table_id: TableId::new(id),
            signature: format!("{name}|int:a"),
            is_replicated: false,
            is_streamed: false,
            columns: vec![ColumnSpec::not_null("a", DataType::Int)],
            primary_key: vec![0],
            indexes: vec![],
            view: None,
        })))
    }

    #[test]
    fn test_all_indexes_resolve_same_table() {
        let mut registry = TableRegistry::new();
        let table = shared("t", 3);
        let hash = table.read().signature_hash();
        registry.insert(table);

        let by_id = registry.get_by_id(TableId::new(3)).unwrap();
        let by_name = registry.get_by_name("t").unwrap();
        let by_sig = registry.get_by_signature_hash(hash).unwrap();
        assert!(Arc::ptr_eq(&by_id, &by_name));
        assert!(Arc::ptr_eq(&by_id, &by_sig));
    }

    #[test]
    fn test_remove_clears_all_indexes() {
        let mut registry = TableRegistry::new();
        let table = shared("t", 3);
        let hash = table.read().signature_hash();
        registry.insert(table);
        registry.remove("t").unwrap();

        assert!(registry.get_by_id(TableId::new(3)).is_none());
        assert!(registry.get_by_name("t").is_none());
        assert!(registry.get_by_signature_hash(hash).is_none());
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let mut registry = TableRegistry::new();
        registry.insert(shared("old", 0));
        registry.rebuild(vec![shared("a", 1), shared("b", 2)]);

        assert_eq!(registry.table_count(), 2);
        assert!(registry.get_by_name("old").is_none());
        assert!(registry.get_by_name("a").is_some());
    }

    #[test]
    fn test_require_by_id_errors() {
        let registry = TableRegistry::new();
        assert!(matches!(
            registry.require_by_id(TableId::new(5)).unwrap_err(),
            EngineError::TableNotFound { .. }
        ));
    }
}
