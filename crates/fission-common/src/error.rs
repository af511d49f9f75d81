//! Error handling for the partition engine.
//!
//! Every engine crate reports failures through [`EngineError`]. Each variant
//! carries enough context for the exception frame the command surface sends
//! back to the coordinator, and maps onto a stable [`ErrorCode`].

use std::fmt;

use thiserror::Error;

use crate::types::{CatalogVersion, FragmentId, TableId};

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Stable numeric codes for categorizing errors.
///
/// These codes are wire-visible (they double as the `sql_state` field of a
/// serialized exception frame) and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug or corruption).
    Internal = 0x0001,
    /// I/O failure at the command-surface boundary.
    Io = 0x0002,

    // Serialization errors (0x0100 - 0x01FF)
    /// Buffer under/overflow or malformed payload.
    Serialization = 0x0100,
    /// Arithmetic overflow while combining values.
    NumericOverflow = 0x0101,
    /// Value had an unexpected runtime type.
    TypeMismatch = 0x0102,

    // Storage errors (0x0200 - 0x02FF)
    /// Uniqueness or NOT-NULL constraint failed.
    ConstraintViolation = 0x0200,
    /// Table id or name did not resolve.
    TableNotFound = 0x0201,

    // Transaction errors (0x0300 - 0x03FF)
    /// A mutation arrived with no undo quantum open.
    NoOpenQuantum = 0x0300,

    // Catalog errors (0x0400 - 0x04FF)
    /// Non-monotonic catalog version on update.
    CatalogVersionMismatch = 0x0400,
    /// A view declared an aggregate the maintainer cannot handle.
    UnsupportedAggregate = 0x0401,

    // View errors (0x0500 - 0x05FF)
    /// View maintenance failed to find a row it knows must exist.
    ViewDesync = 0x0500,

    // Execution errors (0x0600 - 0x06FF)
    /// The coordinator refused to supply a plan for a fragment id.
    PlanNotFound = 0x0600,
    /// A user-defined function returned a failure code.
    UserFunctionError = 0x0601,
    /// A fragment referenced a dependency the host could not supply.
    DependencyNotFound = 0x0602,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Serialization",
            0x02 => "Storage",
            0x03 => "Transaction",
            0x04 => "Catalog",
            0x05 => "View",
            0x06 => "Execution",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The unified error type for the partition engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Internal error. Indicates a bug or state corruption.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// I/O error from the command-surface stream.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Buffer under/overflow or malformed catalog/plan payload.
    ///
    /// Always fatal to the current batch.
    #[error("serialization failure: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Arithmetic overflow while combining values.
    #[error("numeric overflow in {operation}")]
    NumericOverflow {
        /// The operation that overflowed.
        operation: &'static str,
    },

    /// A value had an unexpected runtime type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type description.
        expected: &'static str,
        /// Actual type description.
        actual: &'static str,
    },

    /// Insert or update failed a uniqueness or NOT-NULL check.
    ///
    /// Fallible callers receive this as a recoverable exception;
    /// non-fallible callers escalate it to `Internal`.
    #[error("constraint violation on table '{table}': {message}")]
    ConstraintViolation {
        /// Name of the violated table.
        table: String,
        /// Description of the violated constraint.
        message: String,
    },

    /// A table id or name did not resolve in the registry.
    #[error("table {table_id} not found")]
    TableNotFound {
        /// The missing table id.
        table_id: TableId,
    },

    /// A mutation tried to register an undo action with no quantum open.
    #[error("no undo quantum open")]
    NoOpenQuantum,

    /// Non-monotonic catalog version on load or update.
    ///
    /// The batch fails and the catalog is left unchanged.
    #[error("catalog version {proposed} is not newer than {current}")]
    CatalogVersionMismatch {
        /// The version currently installed.
        current: CatalogVersion,
        /// The rejected version.
        proposed: CatalogVersion,
    },

    /// A view definition declared an aggregate outside the supported set.
    #[error("unsupported aggregate '{aggregate}' in view column {column}")]
    UnsupportedAggregate {
        /// Name of the rejected aggregate.
        aggregate: String,
        /// Destination column index.
        column: usize,
    },

    /// View maintenance expected to find a row in the view and didn't.
    ///
    /// Fatal to the engine: the view and its sources have diverged.
    #[error("view '{view}' went looking for a row it expected to find and didn't")]
    ViewDesync {
        /// Name of the desynchronized view.
        view: String,
    },

    /// The coordinator refused to supply a plan for the fragment id.
    #[error("no plan available for fragment {fragment_id}")]
    PlanNotFound {
        /// The unresolvable fragment id.
        fragment_id: FragmentId,
    },

    /// A user-defined function returned a non-zero code.
    #[error("user-defined function {function_id} failed with code {code}")]
    UserFunctionError {
        /// The failed function id.
        function_id: i32,
        /// The function's return code.
        code: i32,
    },

    /// The host answered a dependency request with an unexpected status.
    #[error("dependency {dependency_id} retrieval failed: {message}")]
    DependencyNotFound {
        /// The requested dependency id.
        dependency_id: i32,
        /// Description of the protocol failure.
        message: String,
    },
}

impl EngineError {
    /// Returns the stable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::Io { .. } => ErrorCode::Io,
            Self::Serialization { .. } => ErrorCode::Serialization,
            Self::NumericOverflow { .. } => ErrorCode::NumericOverflow,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::ConstraintViolation { .. } => ErrorCode::ConstraintViolation,
            Self::TableNotFound { .. } => ErrorCode::TableNotFound,
            Self::NoOpenQuantum => ErrorCode::NoOpenQuantum,
            Self::CatalogVersionMismatch { .. } => ErrorCode::CatalogVersionMismatch,
            Self::UnsupportedAggregate { .. } => ErrorCode::UnsupportedAggregate,
            Self::ViewDesync { .. } => ErrorCode::ViewDesync,
            Self::PlanNotFound { .. } => ErrorCode::PlanNotFound,
            Self::UserFunctionError { .. } => ErrorCode::UserFunctionError,
            Self::DependencyNotFound { .. } => ErrorCode::DependencyNotFound,
        }
    }

    /// Returns the exception-frame type byte for this error.
    ///
    /// `1` = generic engine exception, `2` = SQL-level failure,
    /// `3` = constraint failure. Wire-visible; do not renumber.
    #[must_use]
    pub const fn exception_type(&self) -> i8 {
        match self {
            Self::ConstraintViolation { .. } => 3,
            Self::Serialization { .. }
            | Self::NumericOverflow { .. }
            | Self::TypeMismatch { .. }
            | Self::PlanNotFound { .. }
            | Self::UserFunctionError { .. } => 2,
            _ => 1,
        }
    }

    /// Returns true if a fallible caller may treat this error as recoverable.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::ConstraintViolation { .. })
    }

    /// Returns true if this error is fatal to the engine itself, not just
    /// the current batch.
    #[must_use]
    pub const fn is_engine_fatal(&self) -> bool {
        matches!(self, Self::ViewDesync { .. } | Self::Internal { .. })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a constraint violation for the named table.
    #[must_use]
    pub fn constraint(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            table: table.into(),
            message: message.into(),
        }
    }
}
