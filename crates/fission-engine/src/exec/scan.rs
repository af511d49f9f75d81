//! Sequential scan executor.

use fission_common::EngineResult;
use fission_plan::Expr;

use super::context::ExecContext;
use super::temp::TempTable;
use super::Executor;

/// Scans a table, optionally filtering rows.
///
/// A table in delta mode exposes only its delta rows to the scan; this is
/// what scopes a view's create-query to the just-changed tuples.
pub struct SeqScanExecutor {
    table: String,
    predicate: Option<Expr>,
}

impl SeqScanExecutor {
    pub fn new(table: String, predicate: Option<Expr>) -> Self {
        Self { table, predicate }
    }
}

impl Executor for SeqScanExecutor {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        _input: Option<TempTable>,
    ) -> EngineResult<TempTable> {
        let table = ctx.registry.require_by_name(&self.table)?;
        let visible = table.read().scan_visible();

        let mut output = TempTable::new();
        for row in visible {
            let keep = match &self.predicate {
                Some(predicate) => ctx.eval_predicate(predicate, &row)?,
                None => true,
            };
            if keep {
                output.push(row, ctx.temp_limit)?;
            }
        }
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "seqscan"
    }
}
