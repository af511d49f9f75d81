//! System-wide constants for the partition engine.
//!
//! Wire-visible limits here must stay in sync with the coordinator.

// =============================================================================
// Batch Limits
// =============================================================================

/// Maximum number of plan fragments accepted in a single batch.
pub const MAX_BATCH_FRAGMENTS: usize = 1000;

/// Maximum number of parameters bound to a single fragment.
pub const MAX_PARAMS_PER_FRAGMENT: usize = 1025;

// =============================================================================
// Buffer Capacities
// =============================================================================

/// Default capacity of the reusable result buffer (10 MiB).
///
/// Results larger than this spill into the heap fallback buffer, which is
/// released again on the next reset.
pub const DEFAULT_RESULT_BUFFER_CAPACITY: usize = 10 * 1024 * 1024;

/// Default capacity of the exception buffer (1 MiB).
pub const DEFAULT_EXCEPTION_BUFFER_CAPACITY: usize = 1024 * 1024;

/// Maximum size of the shared UDF argument/result buffer (50 MiB).
pub const MAX_UDF_BUFFER_SIZE: usize = 50 * 1024 * 1024;

/// Capacity of the per-fragment statistics buffer.
///
/// Layout: `[i8 timing_enabled][i32 succeeded_count][i64 ns; MAX_BATCH_FRAGMENTS]`.
pub const PER_FRAGMENT_STATS_CAPACITY: usize = 1 + 4 + 8 * MAX_BATCH_FRAGMENTS;

/// Default temp-table memory budget per fragment (100 MiB).
pub const DEFAULT_TEMP_TABLE_MEMORY_LIMIT: usize = 100 * 1024 * 1024;

// =============================================================================
// Plan Cache
// =============================================================================

/// Number of executor vectors retained by the fragment plan cache.
pub const PLAN_CACHE_CAPACITY: usize = 1000;

// =============================================================================
// IPC Framing
// =============================================================================

/// Size of the `[u32 msg_size][u32 command_code]` request header.
pub const IPC_HEADER_SIZE: usize = 8;

/// Largest request the command loop will accept (10 MiB).
pub const MAX_IPC_MESSAGE_SIZE: usize = 10 * 1024 * 1024;
