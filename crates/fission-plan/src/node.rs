//! Plan fragment structure.

use serde::{Deserialize, Serialize};

use fission_common::{EngineError, EngineResult};

use crate::aggregate::AggregateOp;
use crate::expr::Expr;

/// One aggregate column computed by an [`PlanNode::Aggregate`] node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// The aggregate operator.
    pub op: AggregateOp,
    /// Input column the aggregate consumes; `None` for `COUNT(*)`.
    #[serde(default)]
    pub column: Option<usize>,
}

impl AggregateSpec {
    /// Creates a new aggregate spec.
    #[must_use]
    pub fn new(op: AggregateOp, column: Option<usize>) -> Self {
        Self { op, column }
    }
}

/// One executor step in a plan fragment pipeline.
///
/// Each node consumes the row set produced by its predecessor; the first
/// node in a fragment must be a source ([`PlanNode::SeqScan`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanNode {
    /// Sequential scan of a table, optionally filtered.
    ///
    /// When the scanned table is in delta mode, only the delta rows are
    /// visible.
    SeqScan {
        /// Name of the table to scan.
        table: String,
        /// Optional filter predicate.
        #[serde(default)]
        predicate: Option<Expr>,
    },
    /// Materializes literal/parameter rows (the source of an
    /// `INSERT … VALUES`).
    Materialize {
        /// One expression list per produced row.
        rows: Vec<Vec<Expr>>,
    },
    /// Hash aggregation.
    ///
    /// Output rows are the group-by columns (in declaration order) followed
    /// by one column per aggregate. With no group-by columns, exactly one
    /// output row is produced, even over empty input.
    Aggregate {
        /// Input columns forming the group key.
        #[serde(default)]
        group_by: Vec<usize>,
        /// Aggregate columns.
        aggregates: Vec<AggregateSpec>,
    },
    /// Row-wise projection.
    Projection {
        /// One expression per output column.
        exprs: Vec<Expr>,
    },
    /// Inserts every input row into the named table.
    Insert {
        /// Destination table name.
        table: String,
    },
    /// Deletes every input row from the named table.
    ///
    /// Input rows must be full rows of the target table.
    Delete {
        /// Target table name.
        table: String,
    },
    /// Truncates the input to the first `count` rows.
    Limit {
        /// Maximum number of rows to pass through.
        count: usize,
    },
    /// Produces the fragment's input dependency, fetched from the host.
    ///
    /// An unavailable dependency produces an empty row set.
    Receive,
    /// Marshals the final row set for cross-partition shipment.
    ///
    /// Stripped from fragments executed locally.
    Send,
}

impl PlanNode {
    /// Returns true for the cross-partition marshalling node.
    #[must_use]
    pub const fn is_send(&self) -> bool {
        matches!(self, Self::Send)
    }
}

/// A pre-compiled plan fragment: an ordered executor pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFragment {
    /// The executor pipeline, source first.
    pub nodes: Vec<PlanNode>,
}

impl PlanFragment {
    /// Creates a fragment from an ordered node list.
    #[must_use]
    pub fn new(nodes: Vec<PlanNode>) -> Self {
        Self { nodes }
    }

    /// Parses a fragment from its JSON wire form.
    pub fn from_json(payload: &[u8]) -> EngineResult<Self> {
        serde_json::from_slice(payload).map_err(|e| EngineError::Serialization {
            message: format!("malformed plan payload: {e}"),
        })
    }

    /// Serializes this fragment to its JSON wire form.
    pub fn to_json(&self) -> EngineResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| EngineError::Serialization {
            message: format!("unserializable plan: {e}"),
        })
    }
}
