//! # fission-catalog
//!
//! Catalog model and snapshot diffing for the FissionDB partition engine.
//!
//! The coordinator compiles the cluster catalog and ships each partition a
//! serialized [`CatalogSpec`]. The engine holds one immutable [`Catalog`]
//! snapshot at a time, identified by a strictly-increasing version; an
//! update produces a [`CatalogDelta`] (additions, deletions, then
//! modifications, applied in that order) against the installed snapshot.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod catalog;
mod spec;

pub use catalog::{Catalog, CatalogDelta};
pub use spec::{CatalogSpec, ColumnSpec, IndexSpec, TableSpec, ViewSpec};
