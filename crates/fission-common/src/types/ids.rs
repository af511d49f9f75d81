//! Typed identifiers for the partition engine.
//!
//! These wrappers prevent accidental mixing of the many numeric ids that
//! flow through the engine: catalog-local table ids, 64-bit plan fragment
//! ids, undo tokens, and so on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalog-local table identifier.
///
/// Assigned by the coordinator's catalog compiler; stable for the lifetime
/// of one catalog version.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TableId(i32);

impl TableId {
    /// Invalid table id, used as a sentinel value.
    pub const INVALID: Self = Self(-1);

    /// Creates a new `TableId` from a raw i32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw i32 value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Checks if this is a valid table id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "TableId(INVALID)")
        } else {
            write!(f, "TableId({})", self.0)
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for TableId {
    #[inline]
    fn from(id: i32) -> Self {
        Self::new(id)
    }
}

/// Identifier of a pre-compiled plan fragment.
///
/// Fragment ids are assigned by the coordinator and are unique per catalog
/// version; the plan cache is keyed by them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FragmentId(i64);

impl FragmentId {
    /// Invalid fragment id, used as a sentinel value.
    pub const INVALID: Self = Self(-1);

    /// Creates a new `FragmentId` from a raw i64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw i64 value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Checks if this is a valid fragment id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Debug for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FragmentId({})", self.0)
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for FragmentId {
    #[inline]
    fn from(id: i64) -> Self {
        Self::new(id)
    }
}

/// Token tagging one undo quantum.
///
/// Tokens are assigned by the coordinating host and strictly increase within
/// a session. [`UndoToken::NONE`] is the "no transactional work" sentinel:
/// `set_token(NONE)` is a no-op.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct UndoToken(i64);

impl UndoToken {
    /// Sentinel meaning "no undo token supplied".
    pub const NONE: Self = Self(i64::MAX);

    /// Creates a new `UndoToken` from a raw i64 value.
    #[inline]
    #[must_use]
    pub const fn new(token: i64) -> Self {
        Self(token)
    }

    /// Returns the raw i64 value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Checks whether this token is the "none" sentinel.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == i64::MAX
    }
}

impl fmt::Debug for UndoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "UndoToken(NONE)")
        } else {
            write!(f, "UndoToken({})", self.0)
        }
    }
}

impl fmt::Display for UndoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UndoToken {
    #[inline]
    fn from(token: i64) -> Self {
        Self::new(token)
    }
}

/// Monotonic version of a catalog snapshot.
///
/// Loads and updates must carry a strictly greater version than the one
/// currently installed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CatalogVersion(i64);

impl CatalogVersion {
    /// Version sentinel meaning "no catalog installed yet".
    pub const INVALID: Self = Self(-1);

    /// Creates a new `CatalogVersion` from a raw i64 value.
    #[inline]
    #[must_use]
    pub const fn new(version: i64) -> Self {
        Self(version)
    }

    /// Returns the raw i64 value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Checks if this is a valid version.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Debug for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "CatalogVersion(INVALID)")
        } else {
            write!(f, "CatalogVersion({})", self.0)
        }
    }
}

impl fmt::Display for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for CatalogVersion {
    #[inline]
    fn from(version: i64) -> Self {
        Self::new(version)
    }
}

/// Identifier of the partition an engine instance owns.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PartitionId(i32);

impl PartitionId {
    /// Invalid partition id, used as a sentinel value.
    pub const INVALID: Self = Self(-1);

    /// Creates a new `PartitionId`.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw i32 value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Debug for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionId({})", self.0)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the execution site hosting an engine.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SiteId(i64);

impl SiteId {
    /// Invalid site id, used as a sentinel value.
    pub const INVALID: Self = Self(-1);

    /// Creates a new `SiteId`.
    #[inline]
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw i64 value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiteId({})", self.0)
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a result dependency produced or consumed by a fragment.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DependencyId(i32);

impl DependencyId {
    /// Sentinel meaning "no input dependency".
    pub const NONE: Self = Self(-1);

    /// Creates a new `DependencyId`.
    #[inline]
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw i32 value.
    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Checks whether this is the "none" sentinel.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Debug for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DependencyId({})", self.0)
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage-local row identifier within one table.
///
/// Row ids are allocation order, never reused within a table's lifetime,
/// and are what undo actions and index entries point at.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RowId(u64);

impl RowId {
    /// First row id handed out by a fresh table.
    pub const FIRST: Self = Self(0);

    /// Creates a new `RowId`.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next row id.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({})", self.0)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_id() {
        let id = TableId::new(3);
        assert_eq!(id.as_i32(), 3);
        assert!(id.is_valid());
        assert!(!TableId::INVALID.is_valid());
    }

    #[test]
    fn test_undo_token_sentinel() {
        assert!(UndoToken::NONE.is_none());
        assert!(!UndoToken::new(100).is_none());
        assert!(UndoToken::new(100) < UndoToken::new(101));
    }

    #[test]
    fn test_catalog_version_ordering() {
        assert!(CatalogVersion::INVALID < CatalogVersion::new(0));
        assert!(CatalogVersion::new(1) < CatalogVersion::new(2));
    }

    #[test]
    fn test_row_id_next() {
        let id = RowId::FIRST;
        assert_eq!(id.next().as_u64(), 1);
    }

    #[test]
    fn test_dependency_sentinel() {
        assert!(DependencyId::NONE.is_none());
        assert!(!DependencyId::new(4).is_none());
    }
}
