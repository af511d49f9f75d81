//! Scalar expressions evaluated over rows during fragment execution.

use serde::{Deserialize, Serialize};

use fission_common::types::{Row, Value};
use fission_common::{EngineError, EngineResult};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

/// A compiled scalar expression.
///
/// Expressions are evaluated against one input row plus the fragment's
/// bound parameter array. Comparison follows SQL three-valued logic
/// collapsed to two values: a comparison with a NULL operand is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Input column reference.
    Column(usize),
    /// Constant value.
    Literal(Value),
    /// Bound parameter reference.
    Parameter(usize),
    /// Binary comparison.
    Compare {
        /// The operator.
        op: CompareOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Logical conjunction.
    And(Box<Expr>, Box<Expr>),
    /// Logical disjunction.
    Or(Box<Expr>, Box<Expr>),
    /// Call of a user-defined function registered with the host.
    UserFunction {
        /// The host-side function id.
        function_id: i32,
        /// Argument expressions.
        args: Vec<Expr>,
    },
}

/// Resolver for user-defined function calls inside expressions.
///
/// Plain expression evaluation has no host access; execution contexts that
/// do implement this trait and route the call out through the host
/// interface.
pub trait FunctionResolver {
    /// Invokes the function with evaluated arguments.
    fn call_function(&mut self, function_id: i32, args: &[Value]) -> EngineResult<Value>;
}

/// Resolver used where no host is reachable; every call fails.
#[derive(Debug, Default)]
pub struct NoFunctions;

impl FunctionResolver for NoFunctions {
    fn call_function(&mut self, function_id: i32, _args: &[Value]) -> EngineResult<Value> {
        Err(EngineError::UserFunctionError {
            function_id,
            code: -1,
        })
    }
}

impl Expr {
    /// Convenience constructor: `column == parameter`.
    #[must_use]
    pub fn column_eq_param(column: usize, parameter: usize) -> Self {
        Self::Compare {
            op: CompareOp::Eq,
            left: Box::new(Self::Column(column)),
            right: Box::new(Self::Parameter(parameter)),
        }
    }

    /// Evaluates this expression to a value.
    ///
    /// User-defined function calls fail; use
    /// [`evaluate_with`](Self::evaluate_with) where a host is reachable.
    pub fn evaluate(&self, row: &Row, params: &[Value]) -> EngineResult<Value> {
        self.evaluate_with(row, params, &mut NoFunctions)
    }

    /// Evaluates this expression as a filter predicate.
    ///
    /// NULL evaluates to false.
    pub fn evaluate_predicate(&self, row: &Row, params: &[Value]) -> EngineResult<bool> {
        self.evaluate_predicate_with(row, params, &mut NoFunctions)
    }

    /// Evaluates this expression to a value, resolving user-defined
    /// function calls through `resolver`.
    ///
    /// Comparisons and boolean connectives produce `TinyInt(1)` / `TinyInt(0)`.
    pub fn evaluate_with(
        &self,
        row: &Row,
        params: &[Value],
        resolver: &mut dyn FunctionResolver,
    ) -> EngineResult<Value> {
        match self {
            Self::Column(index) => {
                row.get(*index)
                    .cloned()
                    .ok_or_else(|| EngineError::Serialization {
                        message: format!(
                            "column reference {index} out of range for {}-column row",
                            row.num_columns()
                        ),
                    })
            }
            Self::Literal(value) => Ok(value.clone()),
            Self::Parameter(index) => {
                params
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| EngineError::Serialization {
                        message: format!(
                            "parameter reference {index} out of range for {} parameters",
                            params.len()
                        ),
                    })
            }
            Self::Compare { op, left, right } => {
                let lhs = left.evaluate_with(row, params, resolver)?;
                let rhs = right.evaluate_with(row, params, resolver)?;
                let result = if lhs.is_null() || rhs.is_null() {
                    false
                } else {
                    let ord = lhs.cmp(&rhs);
                    match op {
                        CompareOp::Eq => ord.is_eq(),
                        CompareOp::Ne => ord.is_ne(),
                        CompareOp::Lt => ord.is_lt(),
                        CompareOp::Le => ord.is_le(),
                        CompareOp::Gt => ord.is_gt(),
                        CompareOp::Ge => ord.is_ge(),
                    }
                };
                Ok(Value::TinyInt(i8::from(result)))
            }
            Self::And(left, right) => {
                let lhs = left.evaluate_predicate_with(row, params, resolver)?;
                if !lhs {
                    return Ok(Value::TinyInt(0));
                }
                let rhs = right.evaluate_predicate_with(row, params, resolver)?;
                Ok(Value::TinyInt(i8::from(rhs)))
            }
            Self::Or(left, right) => {
                let lhs = left.evaluate_predicate_with(row, params, resolver)?;
                if lhs {
                    return Ok(Value::TinyInt(1));
                }
                let rhs = right.evaluate_predicate_with(row, params, resolver)?;
                Ok(Value::TinyInt(i8::from(rhs)))
            }
            Self::UserFunction { function_id, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(arg.evaluate_with(row, params, resolver)?);
                }
                resolver.call_function(*function_id, &evaluated)
            }
        }
    }

    /// Evaluates this expression as a filter predicate, resolving
    /// user-defined function calls through `resolver`.
    ///
    /// NULL evaluates to false.
    pub fn evaluate_predicate_with(
        &self,
        row: &Row,
        params: &[Value],
        resolver: &mut dyn FunctionResolver,
    ) -> EngineResult<bool> {
        let value = self.evaluate_with(row, params, resolver)?;
        Ok(match value {
            Value::Null => false,
            other => other.to_i64().map(|v| v != 0).unwrap_or(false),
        })
    }
}
