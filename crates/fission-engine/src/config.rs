//! Engine configuration.

use fission_common::constants::{
    DEFAULT_EXCEPTION_BUFFER_CAPACITY, DEFAULT_RESULT_BUFFER_CAPACITY,
    DEFAULT_TEMP_TABLE_MEMORY_LIMIT, MAX_UDF_BUFFER_SIZE, PLAN_CACHE_CAPACITY,
};

/// Tunables for one partition engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the reusable result buffer before the heap fallback
    /// takes over.
    pub result_buffer_capacity: usize,
    /// Capacity of the exception buffer.
    pub exception_buffer_capacity: usize,
    /// Capacity of the shared UDF buffer.
    pub udf_buffer_capacity: usize,
    /// Temp-table memory budget per fragment, in bytes.
    pub temp_table_memory_limit: usize,
    /// Number of executor vectors the plan cache retains.
    pub plan_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            result_buffer_capacity: DEFAULT_RESULT_BUFFER_CAPACITY,
            exception_buffer_capacity: DEFAULT_EXCEPTION_BUFFER_CAPACITY,
            udf_buffer_capacity: MAX_UDF_BUFFER_SIZE,
            temp_table_memory_limit: DEFAULT_TEMP_TABLE_MEMORY_LIMIT,
            plan_cache_capacity: PLAN_CACHE_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Overrides the result buffer capacity.
    #[must_use]
    pub fn with_result_buffer_capacity(mut self, capacity: usize) -> Self {
        self.result_buffer_capacity = capacity;
        self
    }

    /// Overrides the temp-table memory budget.
    #[must_use]
    pub fn with_temp_table_memory_limit(mut self, limit: usize) -> Self {
        self.temp_table_memory_limit = limit;
        self
    }

    /// Overrides the plan cache capacity.
    #[must_use]
    pub fn with_plan_cache_capacity(mut self, capacity: usize) -> Self {
        self.plan_cache_capacity = capacity.max(1);
        self
    }
}
