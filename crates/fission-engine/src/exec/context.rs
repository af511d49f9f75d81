//! The execution context threaded through executors and view handlers.

use fission_codec::rowcodec;
use fission_codec::{Output, SerializeInput, SerializeOutput};
use fission_common::types::{DependencyId, Row, Value};
use fission_common::{EngineError, EngineResult};
use fission_plan::{Expr, FunctionResolver};
use fission_storage::TableRegistry;

use crate::topend::Topend;
use crate::undo::UndoLog;
use crate::view::ViewRegistry;

/// Everything one fragment execution may touch.
///
/// The context is built fresh for each engine entry point and passed
/// explicitly down the call chain (executors, mutation paths, view
/// handlers) instead of living in a thread-local.
pub struct ExecContext<'a> {
    /// Live table lookup.
    pub registry: &'a TableRegistry,
    /// Installed view handlers.
    pub views: &'a ViewRegistry,
    /// The undo log mutations register against.
    pub undo: &'a mut UndoLog,
    /// The fragment's bound parameter array.
    pub params: &'a mut Vec<Value>,
    /// Host callbacks.
    pub topend: &'a mut dyn Topend,
    /// Staging buffer for UDF invocations.
    pub udf_output: &'a mut SerializeOutput,
    /// Input dependency of the currently executing fragment.
    pub input_dep_id: DependencyId,
    /// Running count of tuples modified by DML in this fragment.
    pub tuples_modified: i64,
    /// Temp-table memory budget, in bytes.
    pub temp_limit: usize,
}

impl ExecContext<'_> {
    /// Evaluates an expression against a row, with host function support.
    pub fn eval_value(&mut self, expr: &Expr, row: &Row) -> EngineResult<Value> {
        let mut bridge = UdfBridge {
            topend: &mut *self.topend,
            udf_output: &mut *self.udf_output,
        };
        expr.evaluate_with(row, self.params, &mut bridge)
    }

    /// Evaluates a filter predicate against a row.
    pub fn eval_predicate(&mut self, expr: &Expr, row: &Row) -> EngineResult<bool> {
        let mut bridge = UdfBridge {
            topend: &mut *self.topend,
            udf_output: &mut *self.udf_output,
        };
        expr.evaluate_predicate_with(row, self.params, &mut bridge)
    }

    /// Fetches and decodes the fragment's input dependency.
    ///
    /// Returns `None` when no dependency id was supplied or the host does
    /// not have the dependency.
    pub fn retrieve_input_dependency(&mut self) -> EngineResult<Option<Vec<Row>>> {
        if self.input_dep_id.is_none() {
            return Ok(None);
        }
        let Some(payload) = self.topend.retrieve_dependency(self.input_dep_id)? else {
            return Ok(None);
        };
        let mut input = SerializeInput::new(&payload);
        let count = input.read_i32().map_err(EngineError::from)?;
        if count < 0 {
            return Err(EngineError::serialization(format!(
                "dependency {} carried negative row count {count}",
                self.input_dep_id
            )));
        }
        let mut rows = Vec::with_capacity(count as usize);
        for _ in 0..count {
            rows.push(rowcodec::read_row(&mut input).map_err(EngineError::from)?);
        }
        Ok(Some(rows))
    }
}

/// Bridges expression-level UDF calls onto the host interface.
///
/// Arguments are staged in the shared UDF buffer (the host-facing wire
/// form) before the call goes out.
struct UdfBridge<'a> {
    topend: &'a mut dyn Topend,
    udf_output: &'a mut SerializeOutput,
}

impl FunctionResolver for UdfBridge<'_> {
    fn call_function(&mut self, function_id: i32, args: &[Value]) -> EngineResult<Value> {
        self.udf_output.reset();
        self.udf_output
            .write_i32(function_id)
            .and_then(|()| self.udf_output.write_i16(args.len() as i16))
            .map_err(EngineError::from)?;
        for arg in args {
            rowcodec::write_value(&mut *self.udf_output, arg).map_err(EngineError::from)?;
        }
        let result = self.topend.call_user_defined_function(function_id, args);
        // Arguments are drained whether or not the call succeeded.
        self.udf_output.reset();
        result
    }
}
