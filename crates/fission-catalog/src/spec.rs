//! Serialized catalog payload model.

use serde::{Deserialize, Serialize};

use fission_common::types::{DataType, TableId};
use fission_plan::{AggregateSpec, PlanFragment};

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub dtype: DataType,
    /// Whether NULL is accepted.
    #[serde(default = "default_true")]
    pub nullable: bool,
}

fn default_true() -> bool {
    true
}

impl ColumnSpec {
    /// Creates a nullable column.
    #[must_use]
    pub fn nullable(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
            nullable: true,
        }
    }

    /// Creates a NOT NULL column.
    #[must_use]
    pub fn not_null(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
            nullable: false,
        }
    }
}

/// One secondary index of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Indexed column positions.
    pub columns: Vec<usize>,
    /// Whether the index enforces uniqueness.
    #[serde(default)]
    pub unique: bool,
}

/// Materialized-view definition attached to its destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSpec {
    /// Names of the source tables the view is derived from.
    pub source_tables: Vec<String>,
    /// Number of leading group-by columns in the destination table.
    pub group_by_count: usize,
    /// Aggregate per non-group-by destination column, in column order.
    pub aggregates: Vec<AggregateSpec>,
    /// The view's create-query plan; executed in delta mode on every
    /// source mutation.
    pub create_query: PlanFragment,
    /// One fallback recomputation plan per MIN/MAX aggregate column, in
    /// min/max column order.
    #[serde(default)]
    pub fallback_queries: Vec<PlanFragment>,
}

/// One table (or export stream, or view destination) in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name, unique within the catalog.
    pub name: String,
    /// Catalog-local table id.
    pub table_id: TableId,
    /// Stable signature; survives catalog updates that keep the table's
    /// shape.
    pub signature: String,
    /// Whether the table is replicated to every partition.
    #[serde(default)]
    pub is_replicated: bool,
    /// Whether the table is an append-only export stream.
    #[serde(default)]
    pub is_streamed: bool,
    /// Columns, in declaration order.
    pub columns: Vec<ColumnSpec>,
    /// Primary-key column positions.
    #[serde(default)]
    pub primary_key: Vec<usize>,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    /// Materialized-view definition, if this table is a view destination.
    #[serde(default)]
    pub view: Option<ViewSpec>,
}

impl TableSpec {
    /// Returns the number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the column data types in declaration order.
    #[must_use]
    pub fn column_types(&self) -> Vec<DataType> {
        self.columns.iter().map(|c| c.dtype).collect()
    }

    /// Hashes the signature to the registry's 64-bit key.
    ///
    /// FNV-1a: deterministic across processes, unlike the std hasher.
    #[must_use]
    pub fn signature_hash(&self) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut hash = FNV_OFFSET;
        for byte in self.signature.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }
}

/// The complete serialized catalog for one partition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalogSpec {
    /// All tables, streams, and view destinations.
    pub tables: Vec<TableSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, id: i32) -> TableSpec {
        TableSpec {
            name: name.to_string(),
            table_id: TableId::new(id),
            signature: format!("{name}|int:a,int:b"),
            is_replicated: false,
            is_streamed: false,
            columns: vec![
                ColumnSpec::not_null("a", DataType::Int),
                ColumnSpec::nullable("b", DataType::Int),
            ],
            primary_key: vec![0],
            indexes: vec![],
            view: None,
        }
    }

    #[test]
    fn test_signature_hash_deterministic() {
        let a = table("t", 0);
        let b = table("t", 5);
        // Same signature, different id: same hash.
        assert_eq!(a.signature_hash(), b.signature_hash());
        let c = table("u", 0);
        assert_ne!(a.signature_hash(), c.signature_hash());
    }

    #[test]
    fn test_spec_json_roundtrip() {
        let spec = CatalogSpec {
            tables: vec![table("t", 0), table("u", 1)],
        };
        let json = serde_json::to_vec(&spec).unwrap();
        let decoded: CatalogSpec = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn test_optional_fields_default() {
        let json = r#"{
            "name": "t",
            "table_id": 0,
            "signature": "t|",
            "columns": [{"name": "a", "dtype": "int"}]
        }"#;
        let spec: TableSpec = serde_json::from_str(json).unwrap();
        assert!(!spec.is_replicated);
        assert!(spec.columns[0].nullable);
        assert!(spec.primary_key.is_empty());
        assert!(spec.view.is_none());
    }
}
