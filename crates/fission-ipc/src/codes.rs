//! Stable wire codes for the command protocol.

use std::fmt;

/// Commands the host may send to an engine.
///
/// Codes are stable wire values; gaps are codes retired by older protocol
/// revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CommandCode {
    /// Create and identify the engine. Must be the first command.
    Initialize = 0,
    /// Install a whole catalog snapshot.
    LoadCatalog = 2,
    /// Toggle per-fragment timing collection.
    ToggleProfiler = 3,
    /// Once-per-second housekeeping.
    Tick = 4,
    /// Serialize a statistics result set.
    GetStats = 5,
    /// Execute a batch of plan fragments.
    ExecuteQueryPlanFragments = 6,
    /// Execute a single plan fragment.
    ExecutePlanFragment = 7,
    /// Bulk-load serialized rows into a table.
    LoadTable = 9,
    /// Commit undo quanta up to a token.
    ReleaseUndoToken = 10,
    /// Roll back undo quanta from a token.
    UndoUndoToken = 11,
    /// Execute an ad-hoc fragment with an inline plan.
    ExecuteCustomPlanFragment = 12,
    /// Replace the runtime log-level mask.
    SetLogLevels = 13,
    /// Flush all pending export work.
    Quiesce = 16,
    /// Begin snapshot-streaming one table.
    ActivateCopyOnWrite = 17,
    /// Pull the next snapshot chunk.
    CowSerializeMore = 18,
    /// Apply a catalog update.
    UpdateCatalog = 19,
    /// End the command loop.
    Terminate = 20,
}

impl CommandCode {
    /// Resolves a wire value to a command.
    #[must_use]
    pub fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Initialize,
            2 => Self::LoadCatalog,
            3 => Self::ToggleProfiler,
            4 => Self::Tick,
            5 => Self::GetStats,
            6 => Self::ExecuteQueryPlanFragments,
            7 => Self::ExecutePlanFragment,
            9 => Self::LoadTable,
            10 => Self::ReleaseUndoToken,
            11 => Self::UndoUndoToken,
            12 => Self::ExecuteCustomPlanFragment,
            13 => Self::SetLogLevels,
            16 => Self::Quiesce,
            17 => Self::ActivateCopyOnWrite,
            18 => Self::CowSerializeMore,
            19 => Self::UpdateCatalog,
            20 => Self::Terminate,
            _ => return None,
        })
    }

    /// Returns the wire value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Status bytes used in replies and engine-to-host messages.
pub mod status {
    /// No status (internal sentinel).
    pub const NONE: i8 = 0;
    /// The command failed; an exception frame follows.
    pub const ERROR: i8 = 1;
    /// The command succeeded.
    pub const SUCCESS: i8 = 2;
    /// Dependency response: the host has no such dependency.
    pub const DEPENDENCY_NOT_FOUND: i8 = 3;
    /// Dependency response: payload follows.
    pub const DEPENDENCY_FOUND: i8 = 4;
    /// Engine-to-host: send the named dependency.
    pub const RETRIEVE_DEPENDENCY: i8 = 5;
    /// Engine-to-host: an export buffer follows.
    pub const HANDOFF_EXPORT_BUFFER: i8 = 6;
    /// Engine-to-host: send the named plan.
    pub const FETCH_PLAN: i8 = 7;
    /// Engine-to-host: invoke the named user-defined function.
    pub const CALL_UDF: i8 = 8;
}
