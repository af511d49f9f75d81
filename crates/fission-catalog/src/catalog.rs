//! Immutable catalog snapshots and snapshot diffing.

use std::collections::HashMap;
use std::sync::Arc;

use fission_common::types::{CatalogVersion, TableId};
use fission_common::{EngineError, EngineResult};

use crate::spec::{CatalogSpec, TableSpec};

/// An immutable catalog snapshot.
///
/// Replacement is atomic: loading or updating produces a whole new
/// `Catalog`; the engine swaps its reference and rebuilds the table
/// registry from the result.
#[derive(Debug, Clone)]
pub struct Catalog {
    version: CatalogVersion,
    tables: Vec<Arc<TableSpec>>,
    by_name: HashMap<String, usize>,
}

impl Catalog {
    /// Parses a serialized catalog payload into a snapshot at `version`.
    ///
    /// Rejects duplicate table names or ids as malformed.
    pub fn parse(version: CatalogVersion, payload: &[u8]) -> EngineResult<Self> {
        let spec: CatalogSpec =
            serde_json::from_slice(payload).map_err(|e| EngineError::Serialization {
                message: format!("malformed catalog payload: {e}"),
            })?;
        Self::from_spec(version, spec)
    }

    /// Builds a snapshot from an already-parsed spec.
    pub fn from_spec(version: CatalogVersion, spec: CatalogSpec) -> EngineResult<Self> {
        let mut by_name = HashMap::with_capacity(spec.tables.len());
        let mut seen_ids: HashMap<TableId, &str> = HashMap::new();
        for (index, table) in spec.tables.iter().enumerate() {
            if by_name.insert(table.name.clone(), index).is_some() {
                return Err(EngineError::Serialization {
                    message: format!("duplicate table name '{}' in catalog", table.name),
                });
            }
            if let Some(other) = seen_ids.insert(table.table_id, &table.name) {
                return Err(EngineError::Serialization {
                    message: format!(
                        "table id {} shared by '{}' and '{}'",
                        table.table_id, other, table.name
                    ),
                });
            }
        }
        Ok(Self {
            version,
            tables: spec.tables.into_iter().map(Arc::new).collect(),
            by_name,
        })
    }

    /// Serializes this snapshot back to its payload form.
    pub fn to_payload(&self) -> EngineResult<Vec<u8>> {
        let spec = CatalogSpec {
            tables: self.tables.iter().map(|t| (**t).clone()).collect(),
        };
        serde_json::to_vec(&spec).map_err(|e| EngineError::Serialization {
            message: format!("unserializable catalog: {e}"),
        })
    }

    /// Returns the snapshot version.
    #[must_use]
    pub fn version(&self) -> CatalogVersion {
        self.version
    }

    /// Returns all tables in catalog order.
    #[must_use]
    pub fn tables(&self) -> &[Arc<TableSpec>] {
        &self.tables
    }

    /// Looks a table up by name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&Arc<TableSpec>> {
        self.by_name.get(name).map(|&i| &self.tables[i])
    }

    /// Diffs this (installed) snapshot against a newer one.
    ///
    /// A table counts as modified when any part of its spec changed,
    /// including a renumbered catalog-local id (the registry is id-keyed);
    /// unchanged tables keep their storage.
    #[must_use]
    pub fn diff(&self, newer: &Catalog) -> CatalogDelta {
        let mut delta = CatalogDelta::default();
        for table in &newer.tables {
            match self.table(&table.name) {
                None => delta.additions.push(Arc::clone(table)),
                Some(current) if !specs_equivalent(current, table) => {
                    delta.modifications.push(Arc::clone(table));
                }
                Some(_) => {}
            }
        }
        for table in &self.tables {
            if newer.table(&table.name).is_none() {
                delta.deletions.push(Arc::clone(table));
            }
        }
        delta
    }
}

fn specs_equivalent(a: &TableSpec, b: &TableSpec) -> bool {
    a.table_id == b.table_id
        && a.signature == b.signature
        && a.columns == b.columns
        && a.primary_key == b.primary_key
        && a.indexes == b.indexes
        && a.view == b.view
        && a.is_replicated == b.is_replicated
        && a.is_streamed == b.is_streamed
}

/// The difference between two catalog snapshots.
///
/// The engine applies additions, then deletions, then modifications.
#[derive(Debug, Default)]
pub struct CatalogDelta {
    /// Tables present only in the newer snapshot.
    pub additions: Vec<Arc<TableSpec>>,
    /// Tables present only in the installed snapshot.
    pub deletions: Vec<Arc<TableSpec>>,
    /// Tables present in both but changed.
    pub modifications: Vec<Arc<TableSpec>>,
}

impl CatalogDelta {
    /// Returns true if the snapshots are table-for-table identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty() && self.modifications.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ColumnSpec;
    use fission_common::types::DataType;

    fn spec(names: &[(&str, i32)]) -> CatalogSpec {
        CatalogSpec {
            tables: names
                .iter()
                .map(|&(name, id)| TableSpec {
                    name: name.to_string(),
                    table_id: TableId::new(id),
                    signature: format!("{name}|int:a"),
                    is_replicated: false,
                    is_streamed: false,
                    columns: vec![ColumnSpec::not_null("a", DataType::Int)],
                    primary_key: vec![0],
                    indexes: vec![],
                    view: None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_parse_and_lookup() {
        let payload = serde_json::to_vec(&spec(&[("t", 0), ("u", 1)])).unwrap();
        let catalog = Catalog::parse(CatalogVersion::new(1), &payload).unwrap();
        assert_eq!(catalog.version(), CatalogVersion::new(1));
        assert_eq!(catalog.tables().len(), 2);
        assert!(catalog.table("t").is_some());
        assert!(catalog.table("missing").is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let payload = serde_json::to_vec(&spec(&[("t", 0), ("t", 1)])).unwrap();
        assert!(Catalog::parse(CatalogVersion::new(1), &payload).is_err());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let payload = serde_json::to_vec(&spec(&[("t", 0), ("u", 0)])).unwrap();
        assert!(Catalog::parse(CatalogVersion::new(1), &payload).is_err());
    }

    #[test]
    fn test_payload_roundtrip_is_identity() {
        let original = Catalog::from_spec(CatalogVersion::new(1), spec(&[("t", 0)])).unwrap();
        let reloaded =
            Catalog::parse(CatalogVersion::new(2), &original.to_payload().unwrap()).unwrap();
        assert!(original.diff(&reloaded).is_empty());
    }

    #[test]
    fn test_diff_addition_and_deletion() {
        let old = Catalog::from_spec(CatalogVersion::new(1), spec(&[("t", 0)])).unwrap();
        let new = Catalog::from_spec(CatalogVersion::new(2), spec(&[("u", 1)])).unwrap();
        let delta = old.diff(&new);
        assert_eq!(delta.additions.len(), 1);
        assert_eq!(delta.additions[0].name, "u");
        assert_eq!(delta.deletions.len(), 1);
        assert_eq!(delta.deletions[0].name, "t");
        assert!(delta.modifications.is_empty());
    }

    #[test]
    fn test_diff_modification() {
        let old = Catalog::from_spec(CatalogVersion::new(1), spec(&[("t", 0)])).unwrap();
        let mut changed = spec(&[("t", 0)]);
        changed.tables[0]
            .columns
            .push(ColumnSpec::nullable("b", DataType::BigInt));
        changed.tables[0].signature = "t|int:a,bigint:b".to_string();
        let new = Catalog::from_spec(CatalogVersion::new(2), changed).unwrap();
        let delta = old.diff(&new);
        assert!(delta.additions.is_empty());
        assert!(delta.deletions.is_empty());
        assert_eq!(delta.modifications.len(), 1);
    }

    #[test]
    fn test_diff_sees_table_id_renumbering() {
        // The registry is keyed by id, so a renumbered table must be
        // rebuilt even though its shape is unchanged.
        let old = Catalog::from_spec(CatalogVersion::new(1), spec(&[("t", 0)])).unwrap();
        let new = Catalog::from_spec(CatalogVersion::new(2), spec(&[("t", 9)])).unwrap();
        let delta = old.diff(&new);
        assert_eq!(delta.modifications.len(), 1);
        assert!(delta.additions.is_empty());
        assert!(delta.deletions.is_empty());
    }
}
