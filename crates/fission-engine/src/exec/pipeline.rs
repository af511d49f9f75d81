//! Row-pipeline executors: projection, limit, receive, send.

use fission_common::types::Row;
use fission_common::EngineResult;
use fission_plan::Expr;

use super::context::ExecContext;
use super::temp::TempTable;
use super::Executor;

/// Computes one expression per output column for every input row.
pub struct ProjectionExecutor {
    exprs: Vec<Expr>,
}

impl ProjectionExecutor {
    pub fn new(exprs: Vec<Expr>) -> Self {
        Self { exprs }
    }
}

impl Executor for ProjectionExecutor {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        input: Option<TempTable>,
    ) -> EngineResult<TempTable> {
        let input = input.unwrap_or_default();
        let mut output = TempTable::new();
        for row in input.rows() {
            let mut values = Vec::with_capacity(self.exprs.len());
            for expr in &self.exprs {
                values.push(ctx.eval_value(expr, row)?);
            }
            output.push(Row::new(values), ctx.temp_limit)?;
        }
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "projection"
    }
}

/// Materializes literal/parameter rows from thin air.
///
/// The expressions are evaluated against an empty row, so column
/// references are invalid here; literals and parameters are the point.
pub struct MaterializeExecutor {
    rows: Vec<Vec<Expr>>,
}

impl MaterializeExecutor {
    pub fn new(rows: Vec<Vec<Expr>>) -> Self {
        Self { rows }
    }
}

impl Executor for MaterializeExecutor {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        _input: Option<TempTable>,
    ) -> EngineResult<TempTable> {
        let empty = Row::new(Vec::new());
        let mut output = TempTable::new();
        for exprs in &self.rows {
            let mut values = Vec::with_capacity(exprs.len());
            for expr in exprs {
                values.push(ctx.eval_value(expr, &empty)?);
            }
            output.push(Row::new(values), ctx.temp_limit)?;
        }
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "materialize"
    }
}

/// Passes through the first `count` input rows.
pub struct LimitExecutor {
    count: usize,
}

impl LimitExecutor {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl Executor for LimitExecutor {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        input: Option<TempTable>,
    ) -> EngineResult<TempTable> {
        let input = input.unwrap_or_default();
        let mut output = TempTable::new();
        for row in input.rows().iter().take(self.count) {
            output.push(row.clone(), ctx.temp_limit)?;
        }
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "limit"
    }
}

/// Produces the fragment's input dependency fetched from the host.
///
/// A missing dependency produces an empty row set.
pub struct ReceiveExecutor;

impl Executor for ReceiveExecutor {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        _input: Option<TempTable>,
    ) -> EngineResult<TempTable> {
        let rows = ctx.retrieve_input_dependency()?.unwrap_or_default();
        TempTable::from_rows(rows, ctx.temp_limit)
    }

    fn name(&self) -> &'static str {
        "receive"
    }
}

/// Cross-partition marshalling step.
///
/// Locally executed vectors have this stripped; when present it passes the
/// final row set through unchanged for the dispatcher to serialize.
pub struct SendExecutor;

impl Executor for SendExecutor {
    fn execute(
        &self,
        _ctx: &mut ExecContext<'_>,
        input: Option<TempTable>,
    ) -> EngineResult<TempTable> {
        Ok(input.unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "send"
    }
}
