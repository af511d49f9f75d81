//! The host-side callback interface.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use fission_common::types::{DependencyId, FragmentId, TableId, Value};
use fission_common::{EngineError, EngineResult};

/// Synchronous callbacks from the engine to its coordinating host.
///
/// Every call may block; the engine only invokes them at its defined
/// suspension points (never inside a storage operation holding a table
/// lock).
pub trait Topend {
    /// Fetches the serialized plan IR for a fragment the plan cache has
    /// never seen.
    ///
    /// A host that cannot supply the plan fails with `PlanNotFound`.
    fn fetch_plan(&mut self, fragment_id: FragmentId) -> EngineResult<Vec<u8>>;

    /// Retrieves an input dependency produced by an earlier fragment.
    ///
    /// Returns `None` when the host has no dependency under that id; the
    /// requesting executor then sees an empty row set.
    fn retrieve_dependency(&mut self, dependency_id: DependencyId)
        -> EngineResult<Option<Vec<u8>>>;

    /// Hands a full export-stream buffer to the host.
    fn handoff_export_buffer(
        &mut self,
        table_id: TableId,
        start_uso: i64,
        buffer: &[u8],
    ) -> EngineResult<()>;

    /// Invokes a user-defined function registered with the host.
    ///
    /// The serialized arguments have already been staged in the engine's
    /// UDF buffer; `args` carries them decoded for in-process hosts.
    fn call_user_defined_function(
        &mut self,
        function_id: i32,
        args: &[Value],
    ) -> EngineResult<Value>;
}

/// Shared state behind an [`InProcessTopend`].
#[derive(Debug, Default)]
pub struct HostState {
    /// Serialized plan IR by fragment id.
    pub plans: HashMap<FragmentId, Vec<u8>>,
    /// Dependency payloads (`[i32 row_count][rows…]`) by dependency id.
    pub dependencies: HashMap<DependencyId, Vec<u8>>,
    /// Number of plan fetches the engine has issued.
    pub plan_fetches: usize,
    /// Export buffers handed off, in arrival order.
    pub exports: Vec<(TableId, i64, Vec<u8>)>,
    /// Constant results for user-defined functions.
    pub udf_results: HashMap<i32, Value>,
}

/// An in-process host: plans, dependencies, and UDF results come from a
/// shared table the caller populates directly.
///
/// This is the embedded counterpart of the socket-backed host used in
/// production, and what unit and integration tests drive the engine with.
#[derive(Debug, Clone)]
pub struct InProcessTopend {
    state: Arc<Mutex<HostState>>,
}

impl InProcessTopend {
    /// Creates an empty in-process host.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState::default())),
        }
    }

    /// Returns the shared state handle.
    #[must_use]
    pub fn state(&self) -> Arc<Mutex<HostState>> {
        Arc::clone(&self.state)
    }

    /// Registers a plan for a fragment id.
    pub fn add_plan(&self, fragment_id: FragmentId, payload: Vec<u8>) {
        self.state.lock().plans.insert(fragment_id, payload);
    }

    /// Registers a dependency payload.
    pub fn add_dependency(&self, dependency_id: DependencyId, payload: Vec<u8>) {
        self.state
            .lock()
            .dependencies
            .insert(dependency_id, payload);
    }
}

impl Default for InProcessTopend {
    fn default() -> Self {
        Self::new()
    }
}

impl Topend for InProcessTopend {
    fn fetch_plan(&mut self, fragment_id: FragmentId) -> EngineResult<Vec<u8>> {
        let mut state = self.state.lock();
        state.plan_fetches += 1;
        state
            .plans
            .get(&fragment_id)
            .cloned()
            .ok_or(EngineError::PlanNotFound { fragment_id })
    }

    fn retrieve_dependency(
        &mut self,
        dependency_id: DependencyId,
    ) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.state.lock().dependencies.get(&dependency_id).cloned())
    }

    fn handoff_export_buffer(
        &mut self,
        table_id: TableId,
        start_uso: i64,
        buffer: &[u8],
    ) -> EngineResult<()> {
        self.state
            .lock()
            .exports
            .push((table_id, start_uso, buffer.to_vec()));
        Ok(())
    }

    fn call_user_defined_function(
        &mut self,
        function_id: i32,
        _args: &[Value],
    ) -> EngineResult<Value> {
        self.state
            .lock()
            .udf_results
            .get(&function_id)
            .cloned()
            .ok_or(EngineError::UserFunctionError {
                function_id,
                code: 1,
            })
    }
}
