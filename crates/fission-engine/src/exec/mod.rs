//! Executor chains and fragment execution.
//!
//! A compiled [`ExecutorVector`] is the runtime form of a plan fragment:
//! an ordered chain of executors, each consuming the temp table its
//! predecessor produced. Vectors are built once (on plan-cache miss or view
//! install) and shared between the cache and whoever is currently running
//! them.

mod aggregate;
mod context;
pub mod mutate;
mod pipeline;
mod scan;
mod temp;

pub use context::ExecContext;
pub use temp::TempTable;

use std::sync::Arc;

use fission_common::types::FragmentId;
use fission_common::{EngineError, EngineResult};
use fission_plan::{PlanFragment, PlanNode};

/// One executor step.
///
/// Executors are stateless: per-run state lives in the [`ExecContext`] and
/// in the temp tables flowing through the chain, which is what lets a
/// cached vector be re-run concurrently with its cache entry.
pub trait Executor: Send + Sync {
    /// Runs this step over the predecessor's output.
    ///
    /// Source executors (scans, receive) are handed `None`.
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        input: Option<TempTable>,
    ) -> EngineResult<TempTable>;

    /// Short name for diagnostics.
    fn name(&self) -> &'static str;
}

/// The runtime representation of a plan fragment.
pub struct ExecutorVector {
    fragment_id: FragmentId,
    executors: Vec<Box<dyn Executor>>,
}

impl ExecutorVector {
    /// Compiles a fragment IR into an executor chain.
    pub fn from_fragment(fragment_id: FragmentId, fragment: &PlanFragment) -> EngineResult<Self> {
        if fragment.nodes.is_empty() {
            return Err(EngineError::Serialization {
                message: format!("fragment {fragment_id} has no executors"),
            });
        }
        let executors = fragment
            .nodes
            .iter()
            .map(build_executor)
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self {
            fragment_id,
            executors,
        })
    }

    /// Returns the fragment id this vector was compiled from.
    #[must_use]
    pub fn fragment_id(&self) -> FragmentId {
        self.fragment_id
    }

    /// Returns the executor chain in execution order.
    #[must_use]
    pub fn executors(&self) -> &[Box<dyn Executor>] {
        &self.executors
    }

    /// Drops a trailing send executor.
    ///
    /// The send step only matters when a fragment's output leaves the
    /// partition; locally executed vectors run without it.
    pub fn strip_send_executor(&mut self) {
        if self
            .executors
            .last()
            .is_some_and(|e| e.name() == "send")
        {
            self.executors.pop();
        }
    }
}

impl std::fmt::Debug for ExecutorVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorVector")
            .field("fragment_id", &self.fragment_id)
            .field(
                "executors",
                &self.executors.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn build_executor(node: &PlanNode) -> EngineResult<Box<dyn Executor>> {
    Ok(match node {
        PlanNode::SeqScan { table, predicate } => {
            Box::new(scan::SeqScanExecutor::new(table.clone(), predicate.clone()))
        }
        PlanNode::Aggregate {
            group_by,
            aggregates,
        } => Box::new(aggregate::AggregateExecutor::new(
            group_by.clone(),
            aggregates.clone(),
        )),
        PlanNode::Materialize { rows } => {
            Box::new(pipeline::MaterializeExecutor::new(rows.clone()))
        }
        PlanNode::Projection { exprs } => Box::new(pipeline::ProjectionExecutor::new(exprs.clone())),
        PlanNode::Insert { table } => Box::new(mutate::InsertExecutor::new(table.clone())),
        PlanNode::Delete { table } => Box::new(mutate::DeleteExecutor::new(table.clone())),
        PlanNode::Limit { count } => Box::new(pipeline::LimitExecutor::new(*count)),
        PlanNode::Receive => Box::new(pipeline::ReceiveExecutor),
        PlanNode::Send => Box::new(pipeline::SendExecutor),
    })
}

/// Runs a full executor chain, returning the final temp table.
pub fn run_fragment(
    ctx: &mut ExecContext<'_>,
    vector: &ExecutorVector,
) -> EngineResult<TempTable> {
    let mut current: Option<TempTable> = None;
    for executor in vector.executors() {
        current = Some(executor.execute(ctx, current.take())?);
    }
    current.ok_or_else(|| EngineError::internal("executor vector produced no output"))
}

/// Convenience alias for shared executor vectors.
pub type SharedVector = Arc<ExecutorVector>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_send_executor() {
        let fragment = PlanFragment::new(vec![
            PlanNode::SeqScan {
                table: "t".to_string(),
                predicate: None,
            },
            PlanNode::Send,
        ]);
        let mut vector = ExecutorVector::from_fragment(FragmentId::new(1), &fragment).unwrap();
        assert_eq!(vector.executors().len(), 2);
        vector.strip_send_executor();
        assert_eq!(vector.executors().len(), 1);
        // Idempotent when no send remains.
        vector.strip_send_executor();
        assert_eq!(vector.executors().len(), 1);
    }

    #[test]
    fn test_empty_fragment_rejected() {
        let fragment = PlanFragment::new(vec![]);
        assert!(ExecutorVector::from_fragment(FragmentId::new(1), &fragment).is_err());
    }
}
