//! # fission-storage
//!
//! Table storage for the FissionDB partition engine.
//!
//! This crate provides the storage entities the execution layer operates on:
//!
//! - [`PersistentTable`]: rows, a unique primary-key index, secondary
//!   indexes, constraint enforcement, delta mode, and view-handler back
//!   references
//! - [`StreamedTable`]: append-only export streams with USO tracking
//! - [`TableRegistry`]: the three parallel lookup indexes (id, name,
//!   signature hash) rebuilt on every catalog mutation
//!
//! Tables are shared as [`SharedTable`] (`Arc<RwLock<PersistentTable>>`);
//! the lock is held only across individual storage operations, never across
//! a view-handler notification.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod index;
mod registry;
mod streamed;
mod table;

pub use index::TableIndex;
pub use registry::TableRegistry;
pub use streamed::{SharedStream, StreamedTable};
pub use table::{PersistentTable, SharedTable, ViewHandlerId};
