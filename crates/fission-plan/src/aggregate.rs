//! Aggregate operators supported by incremental view maintenance.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggregate operators the engine can compute.
///
/// Query fragments may use any of these; incremental view maintenance only
/// supports the subset for which [`is_view_maintainable`] returns true, and
/// anything else is rejected when the view is installed.
///
/// [`is_view_maintainable`]: AggregateOp::is_view_maintainable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    /// `SUM(col)`.
    Sum,
    /// `COUNT(col)`: counts non-NULL inputs.
    Count,
    /// `COUNT(*)`.
    CountStar,
    /// `MIN(col)`.
    Min,
    /// `MAX(col)`.
    Max,
    /// `AVG(col)`: query-only, not incrementally maintainable.
    Avg,
}

impl AggregateOp {
    /// Returns true for the additive aggregates, which merge by plain
    /// addition/subtraction.
    #[must_use]
    pub const fn is_additive(self) -> bool {
        matches!(self, Self::Sum | Self::Count | Self::CountStar)
    }

    /// Returns true for MIN/MAX, which need the fallback recomputation
    /// path on delete.
    #[must_use]
    pub const fn is_min_max(self) -> bool {
        matches!(self, Self::Min | Self::Max)
    }

    /// Returns true for the aggregates a materialized view column may carry.
    #[must_use]
    pub const fn is_view_maintainable(self) -> bool {
        matches!(
            self,
            Self::Sum | Self::Count | Self::CountStar | Self::Min | Self::Max
        )
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::CountStar => "COUNT(*)",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Avg => "AVG",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AggregateOp::Sum.is_additive());
        assert!(AggregateOp::CountStar.is_additive());
        assert!(!AggregateOp::Min.is_additive());
        assert!(AggregateOp::Max.is_min_max());
        assert!(!AggregateOp::Count.is_min_max());
        assert!(!AggregateOp::Avg.is_view_maintainable());
        assert!(AggregateOp::Min.is_view_maintainable());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&AggregateOp::CountStar).unwrap();
        assert_eq!(json, "\"count_star\"");
    }
}
