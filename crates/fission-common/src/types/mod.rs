//! Core types for the partition engine.

mod ids;
mod row;
mod value;

pub use ids::{
    CatalogVersion, DependencyId, FragmentId, PartitionId, RowId, SiteId, TableId, UndoToken,
};
pub use row::Row;
pub use value::{DataType, Value};
