//! # fission-engine
//!
//! The per-partition execution engine of FissionDB.
//!
//! One partition runs one [`PartitionEngine`] on one thread. The engine
//! owns the catalog snapshot, the table registry, the undo log, the plan
//! cache, and the result/exception/stats/UDF buffers; it executes batches
//! of pre-compiled plan fragments and keeps materialized views consistent
//! on every source-table mutation.
//!
//! Layering inside the crate:
//!
//! - [`undo`]: undo quanta and reversible actions
//! - [`exec`]: executor chains, the execution context, and the mutation
//!   paths that drive view maintenance
//! - [`view`]: the incremental materialized-view maintainer
//! - [`PlanCache`]: LRU cache of executor vectors keyed by fragment id
//! - [`engine`]: the single-threaded orchestrator tying it all together
//!
//! The engine reaches its host exclusively through the [`Topend`] trait:
//! plan fetch, dependency retrieval, export buffer handoff, and
//! user-defined function invocation.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
pub mod engine;
pub mod exec;
mod plan_cache;
mod stats;
mod topend;
pub mod undo;
pub mod view;

pub use config::EngineConfig;
pub use engine::{FragmentBatch, PartitionEngine};
pub use plan_cache::PlanCache;
pub use stats::PerFragmentStats;
pub use topend::{HostState, InProcessTopend, Topend};
