//! # fission-common
//!
//! Common types, errors, and constants for the FissionDB partition engine.
//!
//! This crate provides the foundational pieces shared by every other engine
//! crate:
//!
//! - **Types**: typed identifiers (`TableId`, `FragmentId`, `UndoToken`, …)
//!   and the runtime `Value`/`Row` model
//! - **Errors**: the unified [`EngineError`] with stable [`ErrorCode`]s
//! - **Constants**: system-wide limits (batch sizes, buffer capacities)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod error;
pub mod types;

pub use error::{EngineError, EngineResult, ErrorCode};
pub use types::{Row, Value};
