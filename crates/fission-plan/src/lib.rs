//! # fission-plan
//!
//! Pre-compiled plan fragment IR for the FissionDB partition engine.
//!
//! Plans are compiled by the coordinator; the engine receives them as JSON
//! payloads (via plan fetch or inline in an ad-hoc fragment) and turns them
//! into executor chains. This crate defines the IR only: a [`PlanFragment`]
//! is an ordered pipeline of [`PlanNode`]s, each consuming its predecessor's
//! output, plus the scalar [`Expr`] language and the aggregate operator set.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod aggregate;
mod expr;
mod node;

pub use aggregate::AggregateOp;
pub use expr::{CompareOp, Expr, FunctionResolver, NoFunctions};
pub use node::{AggregateSpec, PlanFragment, PlanNode};
