//! The single-threaded partition engine orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use fission_catalog::{Catalog, CatalogDelta, TableSpec};
use fission_codec::{rowcodec, FallbackOutput, Output, SerializeOutput};
use fission_common::constants::{MAX_BATCH_FRAGMENTS, MAX_PARAMS_PER_FRAGMENT};
use fission_common::types::{
    CatalogVersion, DependencyId, FragmentId, PartitionId, SiteId, TableId, UndoToken, Value,
};
use fission_common::{EngineError, EngineResult};
use fission_plan::PlanFragment;
use fission_storage::{PersistentTable, StreamedTable, TableRegistry};

use crate::config::EngineConfig;
use crate::exec::{self, mutate, ExecContext, ExecutorVector, SharedVector};
use crate::plan_cache::PlanCache;
use crate::stats::PerFragmentStats;
use crate::topend::Topend;
use crate::undo::UndoLog;
use crate::view::{
    check_view_dest_shape, published_replicated_tables, replicated_resource_lock,
    MaterializedViewHandler, ViewRegistry,
};

/// One batch of plan fragments submitted for execution.
#[derive(Debug, Clone)]
pub struct FragmentBatch {
    /// Fragment ids, in execution order.
    pub fragment_ids: Vec<FragmentId>,
    /// Input dependency id per fragment (`DependencyId::NONE` when absent).
    pub input_dep_ids: Vec<DependencyId>,
    /// Bound parameters per fragment.
    pub params_per_fragment: Vec<Vec<Value>>,
    /// Transaction id assigned by the coordinator.
    pub txn_id: i64,
    /// Single-partition handle of the transaction.
    pub sp_handle: i64,
    /// Highest committed single-partition handle.
    pub last_committed_sp_handle: i64,
    /// Globally unique id of the invocation.
    pub unique_id: i64,
    /// Undo token covering the batch.
    pub undo_token: UndoToken,
    /// Whether per-call tracing was requested.
    pub trace_on: bool,
}

/// In-flight snapshot stream state for one table.
#[derive(Debug)]
struct CowStream {
    payload: Vec<u8>,
    offset: usize,
}

/// The per-partition execution engine.
///
/// Holds every piece of partition state and executes all work on the
/// caller's thread. The `&mut self` entry points are the single-call
/// discipline: there is never more than one batch in flight per engine.
pub struct PartitionEngine {
    config: EngineConfig,
    topend: Box<dyn Topend>,

    // Identity, fixed at initialize().
    cluster_id: i32,
    site_id: SiteId,
    partition_id: PartitionId,
    host_id: i32,
    hostname: String,
    is_lowest_site: bool,
    log_levels: i64,
    initialized: bool,

    // Partition state.
    catalog: Option<Catalog>,
    registry: TableRegistry,
    views: ViewRegistry,
    undo: UndoLog,
    plan_cache: PlanCache,

    // Host-facing buffers.
    params: Vec<Value>,
    result_output: FallbackOutput,
    exception_output: SerializeOutput,
    udf_output: SerializeOutput,
    stats: PerFragmentStats,

    timing_enabled: bool,
    current_vector: Option<SharedVector>,
    current_index_in_batch: i32,
    cow_streams: HashMap<TableId, CowStream>,
}

impl PartitionEngine {
    /// Creates an engine wired to its host.
    #[must_use]
    pub fn new(topend: Box<dyn Topend>, config: EngineConfig) -> Self {
        let result_output = FallbackOutput::new(config.result_buffer_capacity);
        let exception_output = SerializeOutput::new(config.exception_buffer_capacity);
        let udf_output = SerializeOutput::new(config.udf_buffer_capacity);
        let plan_cache = PlanCache::new(config.plan_cache_capacity);
        Self {
            config,
            topend,
            cluster_id: -1,
            site_id: SiteId::INVALID,
            partition_id: PartitionId::INVALID,
            host_id: -1,
            hostname: String::new(),
            is_lowest_site: false,
            log_levels: 0,
            initialized: false,
            catalog: None,
            registry: TableRegistry::new(),
            views: ViewRegistry::new(),
            undo: UndoLog::new(),
            plan_cache,
            params: Vec::new(),
            result_output,
            exception_output,
            udf_output,
            stats: PerFragmentStats::new(),
            timing_enabled: false,
            current_vector: None,
            current_index_in_batch: -1,
            cow_streams: HashMap::new(),
        }
    }

    // =========================================================================
    // Identity & lifecycle
    // =========================================================================

    /// Fixes the engine's cluster identity. Called exactly once, first.
    pub fn initialize(
        &mut self,
        cluster_id: i32,
        site_id: SiteId,
        partition_id: PartitionId,
        host_id: i32,
        is_lowest_site: bool,
        log_levels: i64,
        hostname: impl Into<String>,
    ) -> EngineResult<()> {
        if self.initialized {
            return Err(EngineError::internal("engine initialized twice"));
        }
        self.cluster_id = cluster_id;
        self.site_id = site_id;
        self.partition_id = partition_id;
        self.host_id = host_id;
        self.is_lowest_site = is_lowest_site;
        self.log_levels = log_levels;
        self.hostname = hostname.into();
        self.initialized = true;
        info!(
            cluster = cluster_id,
            site = %site_id,
            partition = %partition_id,
            lowest_site = is_lowest_site,
            "engine initialized"
        );
        Ok(())
    }

    /// Returns the partition this engine owns.
    #[must_use]
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Returns the hosting site's id.
    #[must_use]
    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    /// Returns the current log-level mask.
    #[must_use]
    pub fn log_levels(&self) -> i64 {
        self.log_levels
    }

    /// Returns true once `initialize` has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns true if this engine is the process's designated lowest site.
    #[must_use]
    pub fn is_lowest_site(&self) -> bool {
        self.is_lowest_site
    }

    /// Replaces the runtime log-level mask.
    pub fn set_log_levels(&mut self, levels: i64) {
        debug!(levels, "log levels updated");
        self.log_levels = levels;
    }

    /// Enables or disables per-fragment timing collection.
    pub fn toggle_profiler(&mut self, enabled: bool) {
        self.timing_enabled = enabled;
    }

    /// Returns the fragment index the dispatcher is currently executing,
    /// `-1` outside a batch.
    #[must_use]
    pub fn current_index_in_batch(&self) -> i32 {
        self.current_index_in_batch
    }

    /// Read access to the table registry (tests, stats, host tooling).
    #[must_use]
    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Returns the installed catalog snapshot.
    #[must_use]
    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    /// Read access to the undo log.
    #[must_use]
    pub fn undo_log(&self) -> &UndoLog {
        &self.undo
    }

    /// Read access to the plan cache.
    #[must_use]
    pub fn plan_cache(&self) -> &PlanCache {
        &self.plan_cache
    }

    // =========================================================================
    // Host-facing buffers
    // =========================================================================

    /// Returns the active result buffer contents.
    #[must_use]
    pub fn results(&self) -> &[u8] {
        self.result_output.as_slice()
    }

    /// Returns true if the last batch spilled results to the heap
    /// fallback buffer.
    #[must_use]
    pub fn results_in_fallback_buffer(&self) -> bool {
        self.result_output.is_fallback()
    }

    /// Releases the fallback result allocation, if any.
    pub fn reset_reused_result_buffer(&mut self) {
        self.result_output.reset();
    }

    /// Returns the serialized exception frame from the last failure.
    #[must_use]
    pub fn exception_frame(&self) -> &[u8] {
        self.exception_output.as_slice()
    }

    /// Returns the per-fragment statistics buffer.
    #[must_use]
    pub fn per_fragment_stats(&self) -> &[u8] {
        self.stats.as_slice()
    }

    /// Serializes an error into the exception buffer.
    ///
    /// Frame: `[i16 length][i8 type][i32 sql_state][i32 msg_len][msg]`,
    /// length exclusive of its own two bytes.
    pub fn serialize_exception(&mut self, err: &EngineError) {
        let message = err.to_string();
        self.write_exception_frame(err, &message);
    }

    fn write_exception_frame(&mut self, err: &EngineError, message: &str) {
        self.exception_output.reset();
        let length = (1 + 4 + 4 + message.len()) as i16;
        let write = self
            .exception_output
            .write_i16(length)
            .and_then(|()| self.exception_output.write_i8(err.exception_type()))
            .and_then(|()| {
                self.exception_output
                    .write_i32(i32::from(err.code().as_u16()))
            })
            .and_then(|()| self.exception_output.write_string(message));
        if write.is_err() {
            warn!("exception did not fit in the exception buffer");
        }
    }

    // =========================================================================
    // Undo surface
    // =========================================================================

    /// Opens (or re-enters) the undo quantum for `token`.
    pub fn set_undo_token(&mut self, token: UndoToken) -> EngineResult<()> {
        self.undo.set_token(token)
    }

    /// Commits every quantum with token `<= token`.
    pub fn release_undo_token(&mut self, token: UndoToken, is_empty_txn: bool) {
        self.undo.release(token, is_empty_txn);
    }

    /// Rolls back every quantum with token `>= token`.
    pub fn undo_undo_token(&mut self, token: UndoToken) -> EngineResult<()> {
        self.undo.rewind(token)
    }

    // =========================================================================
    // Catalog surface
    // =========================================================================

    /// Installs a whole catalog snapshot.
    pub fn load_catalog(&mut self, version: CatalogVersion, payload: &[u8]) -> EngineResult<()> {
        self.check_catalog_version(version)?;
        let catalog = Catalog::parse(version, payload)?;
        info!(version = %version, tables = catalog.tables().len(), "loading catalog");
        self.apply_catalog(catalog)
    }

    /// Applies a catalog update against the installed snapshot.
    pub fn update_catalog(
        &mut self,
        version: CatalogVersion,
        is_stream_update: bool,
        payload: &[u8],
    ) -> EngineResult<()> {
        self.check_catalog_version(version)?;
        let catalog = Catalog::parse(version, payload)?;
        info!(
            version = %version,
            is_stream_update,
            "applying catalog update"
        );
        self.apply_catalog(catalog)
    }

    fn check_catalog_version(&self, version: CatalogVersion) -> EngineResult<()> {
        if let Some(current) = &self.catalog {
            if version <= current.version() {
                return Err(EngineError::CatalogVersionMismatch {
                    current: current.version(),
                    proposed: version,
                });
            }
        }
        Ok(())
    }

    /// Swaps in a new catalog snapshot: additions, deletions, then
    /// modifications, followed by a registry rebuild and view
    /// (re)installation.
    fn apply_catalog(&mut self, catalog: Catalog) -> EngineResult<()> {
        let delta = match &self.catalog {
            Some(current) => current.diff(&catalog),
            None => CatalogDelta {
                additions: catalog.tables().to_vec(),
                deletions: Vec::new(),
                modifications: Vec::new(),
            },
        };

        // View handlers hang off the old table objects; detach them all
        // and reinstall against the new state below.
        self.uninstall_all_views();

        for spec in &delta.additions {
            self.create_table_or_stream(spec)?;
        }
        for spec in &delta.deletions {
            self.drop_table_or_stream(spec);
        }
        for spec in &delta.modifications {
            self.modify_table(spec)?;
        }

        // One full rebuild keeps the three registry indexes consistent no
        // matter what the incremental steps did.
        let tables = self.registry.all_tables();
        self.registry.rebuild(tables);

        // Executor vectors never survive a catalog version change.
        self.plan_cache.clear();
        self.catalog = Some(catalog);

        let view_specs: Vec<Arc<TableSpec>> = self
            .catalog
            .as_ref()
            .expect("catalog just installed")
            .tables()
            .iter()
            .filter(|spec| spec.view.is_some())
            .cloned()
            .collect();
        for spec in view_specs {
            self.install_view(&spec)?;
        }
        Ok(())
    }

    fn create_table_or_stream(&mut self, spec: &Arc<TableSpec>) -> EngineResult<()> {
        if spec.is_streamed {
            let stream = Arc::new(Mutex::new(StreamedTable::new(Arc::clone(spec))));
            self.registry.insert_stream(stream);
            return Ok(());
        }
        check_view_dest_shape(spec)?;

        let table = if spec.is_replicated {
            // Replicated storage is built once per process and shared by
            // every engine; all access to the published set serializes on
            // the replicated-resource lock.
            let _guard = replicated_resource_lock().lock();
            let mut published = published_replicated_tables().lock();
            Arc::clone(
                published
                    .entry(spec.name.clone())
                    .or_insert_with(|| TableRegistry::share(PersistentTable::new(Arc::clone(spec)))),
            )
        } else {
            TableRegistry::share(PersistentTable::new(Arc::clone(spec)))
        };
        self.registry.insert(table);
        debug!(table = %spec.name, id = %spec.table_id, "created table");
        Ok(())
    }

    fn drop_table_or_stream(&mut self, spec: &Arc<TableSpec>) {
        if spec.is_streamed {
            self.registry.remove_stream(&spec.name);
            return;
        }
        if let Some(table) = self.registry.remove(&spec.name) {
            table.write().mark_pending_delete();
        }
        if spec.is_replicated {
            let _guard = replicated_resource_lock().lock();
            published_replicated_tables().lock().remove(&spec.name);
        }
        debug!(table = %spec.name, "dropped table");
    }

    /// Rebuilds a table under a changed spec, migrating rows by column
    /// name. Columns the new spec does not know are dropped; new columns
    /// fill with NULL.
    fn modify_table(&mut self, spec: &Arc<TableSpec>) -> EngineResult<()> {
        let Some(old_table) = self.registry.remove(&spec.name) else {
            return self.create_table_or_stream(spec);
        };
        let (old_columns, old_rows) = {
            let guard = old_table.read();
            (guard.spec().columns.clone(), guard.all_rows())
        };
        old_table.write().mark_pending_delete();

        check_view_dest_shape(spec)?;
        let mut new_table = PersistentTable::new(Arc::clone(spec));
        let mapping: Vec<Option<usize>> = spec
            .columns
            .iter()
            .map(|column| old_columns.iter().position(|old| old.name == column.name))
            .collect();
        for old_row in old_rows {
            let values: Vec<Value> = mapping
                .iter()
                .map(|source| match source {
                    Some(i) => old_row.get(*i).cloned().unwrap_or(Value::Null),
                    None => Value::Null,
                })
                .collect();
            new_table.insert(fission_common::Row::new(values))?;
        }
        self.registry.insert(TableRegistry::share(new_table));
        debug!(table = %spec.name, "migrated table to new shape");
        Ok(())
    }

    // =========================================================================
    // View installation
    // =========================================================================

    fn install_view(&mut self, spec: &Arc<TableSpec>) -> EngineResult<()> {
        let view_spec = spec.view.as_ref().expect("caller filtered on view");
        let dest = self.registry.require_by_name(&spec.name)?;
        let needs_catch_up = dest.read().row_count() == 0;

        let handler = MaterializedViewHandler::build(Arc::clone(&dest), view_spec)?;
        let shared = Arc::new(Mutex::new(handler));
        let direct_id = self.views.register(&spec.name, Arc::clone(&shared));
        let handler_partitioned = !spec.is_replicated;

        for source_name in &view_spec.source_tables {
            let source = self.registry.require_by_name(source_name)?;
            let source_replicated = source.read().spec().is_replicated;
            if handler_partitioned && source_replicated {
                // Partitioned view over a replicated source: the shared
                // source notifies through a process-wide shim carrying
                // this partition's identity, and attach/detach serialize
                // on the replicated-resource lock.
                let shim_id =
                    crate::view::register_replicated_shim(Arc::clone(&shared), self.partition_id);
                let _guard = replicated_resource_lock().lock();
                source.write().attach_handler(shim_id);
                shared.lock().add_source(Arc::clone(&source), shim_id, true);
            } else {
                source.write().attach_handler(direct_id);
                shared
                    .lock()
                    .add_source(Arc::clone(&source), direct_id, false);
            }
        }

        if needs_catch_up {
            let mut ctx = ExecContext {
                registry: &self.registry,
                views: &self.views,
                undo: &mut self.undo,
                params: &mut self.params,
                topend: self.topend.as_mut(),
                udf_output: &mut self.udf_output,
                input_dep_id: DependencyId::NONE,
                tuples_modified: 0,
                temp_limit: self.config.temp_table_memory_limit,
            };
            shared.lock().catch_up(&mut ctx, true)?;
        }
        debug!(view = %spec.name, "installed view handler");
        Ok(())
    }

    fn uninstall_all_views(&mut self) {
        for name in self.views.installed_views() {
            if let Some(handler) = self.views.remove_view(&name) {
                handler.lock().detach_all_sources();
            }
        }
    }

    // =========================================================================
    // Fragment execution
    // =========================================================================

    /// Executes a batch of plan fragments.
    ///
    /// On success the result buffer holds one serialized dependency set
    /// per fragment. On failure the exception buffer holds the serialized
    /// error, the result buffer is empty, the per-fragment stats carry the
    /// failing fragment's partial time, and the batch's undo quantum has
    /// been rewound.
    pub fn execute_plan_fragments(&mut self, batch: &FragmentBatch) -> EngineResult<()> {
        if let Err(err) = self.validate_batch(batch) {
            self.serialize_exception(&err);
            return Err(err);
        }
        if let Err(err) = self.undo.set_token(batch.undo_token) {
            self.serialize_exception(&err);
            return Err(err);
        }

        self.result_output.reset();
        self.exception_output.reset();
        self.stats.reset(self.timing_enabled)?;

        if batch.trace_on {
            trace!(
                txn_id = batch.txn_id,
                sp_handle = batch.sp_handle,
                unique_id = batch.unique_id,
                fragments = batch.fragment_ids.len(),
                "executing fragment batch"
            );
        }

        let mut succeeded = 0i32;
        for index in 0..batch.fragment_ids.len() {
            self.current_index_in_batch = index as i32;
            match self.execute_one_fragment(batch, index) {
                Ok(()) => succeeded += 1,
                Err(err) => {
                    let _ = self.stats.finalize(succeeded);
                    self.fail_batch(&err, batch.undo_token, Some(index));
                    self.current_index_in_batch = -1;
                    self.current_vector = None;
                    return Err(err);
                }
            }
        }

        self.stats.finalize(succeeded)?;
        self.current_index_in_batch = -1;
        self.current_vector = None;
        Ok(())
    }

    /// Executes one ad-hoc fragment whose plan arrives inline.
    ///
    /// Ad-hoc plans bypass the cache: they have no fragment id to key on.
    pub fn execute_custom_fragment(
        &mut self,
        plan_payload: &[u8],
        input_dep_id: DependencyId,
        params: Vec<Value>,
        undo_token: UndoToken,
    ) -> EngineResult<()> {
        if let Err(err) = self.undo.set_token(undo_token) {
            self.serialize_exception(&err);
            return Err(err);
        }
        self.result_output.reset();
        self.exception_output.reset();

        let result = (|| {
            let fragment = PlanFragment::from_json(plan_payload)?;
            let mut vector = ExecutorVector::from_fragment(FragmentId::INVALID, &fragment)?;
            vector.strip_send_executor();

            self.params.clear();
            self.params.extend(params);
            let mut ctx = ExecContext {
                registry: &self.registry,
                views: &self.views,
                undo: &mut self.undo,
                params: &mut self.params,
                topend: self.topend.as_mut(),
                udf_output: &mut self.udf_output,
                input_dep_id,
                tuples_modified: 0,
                temp_limit: self.config.temp_table_memory_limit,
            };
            let output = exec::run_fragment(&mut ctx, &vector)?;
            rowcodec::write_result_set(&mut self.result_output, 0, output.rows())
                .map_err(EngineError::from)
        })();

        if let Err(err) = result {
            self.fail_batch(&err, undo_token, None);
            return Err(err);
        }
        Ok(())
    }

    fn validate_batch(&self, batch: &FragmentBatch) -> EngineResult<()> {
        let n = batch.fragment_ids.len();
        if n > MAX_BATCH_FRAGMENTS {
            return Err(EngineError::serialization(format!(
                "batch of {n} fragments exceeds the limit of {MAX_BATCH_FRAGMENTS}"
            )));
        }
        if batch.input_dep_ids.len() != n || batch.params_per_fragment.len() != n {
            return Err(EngineError::serialization(format!(
                "batch arrays disagree: {n} fragments, {} dep ids, {} parameter sets",
                batch.input_dep_ids.len(),
                batch.params_per_fragment.len()
            )));
        }
        for params in &batch.params_per_fragment {
            if params.len() > MAX_PARAMS_PER_FRAGMENT {
                return Err(EngineError::serialization(format!(
                    "{} parameters exceed the per-fragment limit of {MAX_PARAMS_PER_FRAGMENT}",
                    params.len()
                )));
            }
        }
        Ok(())
    }

    fn execute_one_fragment(&mut self, batch: &FragmentBatch, index: usize) -> EngineResult<()> {
        let fragment_id = batch.fragment_ids[index];
        let vector = self.vector_for_fragment(fragment_id)?;
        self.current_vector = Some(Arc::clone(&vector));

        self.params.clear();
        self.params.extend(batch.params_per_fragment[index].iter().cloned());

        let started = Instant::now();
        let mut ctx = ExecContext {
            registry: &self.registry,
            views: &self.views,
            undo: &mut self.undo,
            params: &mut self.params,
            topend: self.topend.as_mut(),
            udf_output: &mut self.udf_output,
            input_dep_id: batch.input_dep_ids[index],
            tuples_modified: 0,
            temp_limit: self.config.temp_table_memory_limit,
        };
        let outcome = exec::run_fragment(&mut ctx, &vector);
        let elapsed = started.elapsed().as_nanos() as i64;
        // Failed fragments contribute their partial time as one extra
        // sample.
        self.stats.record(elapsed)?;

        let output = outcome?;
        rowcodec::write_result_set(&mut self.result_output, index as i32, output.rows())
            .map_err(EngineError::from)?;
        Ok(())
    }

    /// Resolves a fragment id to its executor vector, fetching and
    /// compiling the plan on a cache miss.
    fn vector_for_fragment(&mut self, fragment_id: FragmentId) -> EngineResult<SharedVector> {
        if let Some(vector) = self.plan_cache.get(fragment_id) {
            return Ok(vector);
        }
        debug!(fragment_id = %fragment_id, "plan cache miss, fetching plan");
        let payload = self.topend.fetch_plan(fragment_id)?;
        let fragment = PlanFragment::from_json(&payload)?;
        let mut vector = ExecutorVector::from_fragment(fragment_id, &fragment)?;
        vector.strip_send_executor();
        let pinned = self.current_vector.as_ref().map(|v| v.fragment_id());
        Ok(self.plan_cache.insert(fragment_id, vector, pinned))
    }

    fn fail_batch(&mut self, err: &EngineError, undo_token: UndoToken, fragment_index: Option<usize>) {
        warn!(error = %err, ?fragment_index, "batch failed");
        let message = match fragment_index {
            Some(index) => format!("fragment index {index}: {err}"),
            None => err.to_string(),
        };
        self.write_exception_frame(err, &message);
        self.result_output.reset();
        if !undo_token.is_none() && self.undo.has_open_quantum() {
            if let Err(rewind_err) = self.undo.rewind(undo_token) {
                warn!(error = %rewind_err, "failed to rewind after batch error");
            }
        }
    }

    // =========================================================================
    // Bulk load & table serialization
    // =========================================================================

    /// Loads serialized rows into a table under the given undo token.
    pub fn load_table(
        &mut self,
        table_id: TableId,
        payload: &[u8],
        undo_token: UndoToken,
    ) -> EngineResult<()> {
        self.undo.set_token(undo_token)?;
        let table = self.registry.require_by_id(table_id)?;
        let (column_types, rows) = rowcodec::decode_table_payload(payload)?;
        {
            let guard = table.read();
            let expected = guard.spec().column_types();
            if column_types != expected {
                return Err(EngineError::serialization(format!(
                    "table '{}' payload column types do not match the schema",
                    guard.name()
                )));
            }
        }

        let mut ctx = ExecContext {
            registry: &self.registry,
            views: &self.views,
            undo: &mut self.undo,
            params: &mut self.params,
            topend: self.topend.as_mut(),
            udf_output: &mut self.udf_output,
            input_dep_id: DependencyId::NONE,
            tuples_modified: 0,
            temp_limit: self.config.temp_table_memory_limit,
        };
        for row in rows {
            mutate::insert_row(&mut ctx, &table, row, true)?;
        }
        Ok(())
    }

    /// Serializes a table's current contents to the load-table payload
    /// form.
    pub fn serialize_table(&self, table_id: TableId) -> EngineResult<Vec<u8>> {
        let table = self.registry.require_by_id(table_id)?;
        let guard = table.read();
        Ok(rowcodec::encode_table_payload(
            &guard.spec().column_types(),
            &guard.all_rows(),
        ))
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Serializes a statistics result set into the result buffer.
    ///
    /// `locators` filters by table id when non-empty; `interval` and
    /// `now` flow through to the emitted rows.
    pub fn get_stats(
        &mut self,
        selector: i32,
        locators: &[TableId],
        _interval: bool,
        now: i64,
    ) -> EngineResult<()> {
        self.result_output.reset();
        let mut rows = Vec::new();
        for table in self.registry.all_tables() {
            let guard = table.read();
            if !locators.is_empty() && !locators.contains(&guard.table_id()) {
                continue;
            }
            rows.push(fission_common::Row::new(vec![
                Value::BigInt(now),
                Value::Int(self.partition_id.as_i32()),
                Value::Int(guard.table_id().as_i32()),
                Value::Varchar(guard.name().to_string()),
                Value::BigInt(guard.row_count() as i64),
            ]));
        }
        rowcodec::write_result_set(&mut self.result_output, selector, &rows)
            .map_err(EngineError::from)
    }

    // =========================================================================
    // Non-transactional work
    // =========================================================================

    /// Once-per-second housekeeping: flushes export streams.
    pub fn tick(&mut self, time_millis: i64, last_committed_sp_handle: i64) {
        trace!(time_millis, last_committed_sp_handle, "tick");
        self.flush_streams();
    }

    /// Flushes all pending work before a snapshot or shutdown.
    pub fn quiesce(&mut self, last_committed_sp_handle: i64) {
        debug!(last_committed_sp_handle, "quiesce");
        self.flush_streams();
    }

    fn flush_streams(&mut self) {
        for stream in self.registry.all_streams() {
            let (table_id, start_uso, buffer) = {
                let mut guard = stream.lock();
                if guard.pending_bytes() == 0 {
                    continue;
                }
                let (start_uso, buffer) = guard.take_pending();
                (guard.table_id(), start_uso, buffer)
            };
            if let Err(err) = self
                .topend
                .handoff_export_buffer(table_id, start_uso, &buffer)
            {
                warn!(table_id = %table_id, error = %err, "export handoff failed");
            }
        }
    }

    // =========================================================================
    // Snapshot (copy-on-write) streaming
    // =========================================================================

    /// Begins streaming a consistent snapshot of one table.
    pub fn activate_copy_on_write(&mut self, table_id: TableId) -> EngineResult<()> {
        if self.cow_streams.contains_key(&table_id) {
            return Err(EngineError::internal(format!(
                "copy-on-write already active for table {table_id}"
            )));
        }
        let payload = self.serialize_table(table_id)?;
        self.cow_streams.insert(
            table_id,
            CowStream {
                payload,
                offset: 0,
            },
        );
        debug!(table_id = %table_id, "activated copy-on-write stream");
        Ok(())
    }

    /// Pulls the next snapshot chunk, at most `max_bytes` long.
    ///
    /// Returns `None` when the stream is exhausted (and forgets it).
    pub fn cow_serialize_more(
        &mut self,
        table_id: TableId,
        max_bytes: usize,
    ) -> EngineResult<Option<Vec<u8>>> {
        let Some(stream) = self.cow_streams.get_mut(&table_id) else {
            return Err(EngineError::internal(format!(
                "no copy-on-write stream active for table {table_id}"
            )));
        };
        if stream.offset >= stream.payload.len() {
            self.cow_streams.remove(&table_id);
            return Ok(None);
        }
        let end = (stream.offset + max_bytes).min(stream.payload.len());
        let chunk = stream.payload[stream.offset..end].to_vec();
        stream.offset = end;
        Ok(Some(chunk))
    }
}

impl std::fmt::Debug for PartitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionEngine")
            .field("cluster_id", &self.cluster_id)
            .field("partition_id", &self.partition_id)
            .field("site_id", &self.site_id)
            .field("host_id", &self.host_id)
            .field("hostname", &self.hostname)
            .field("initialized", &self.initialized)
            .field("tables", &self.registry.table_count())
            .field("views", &self.views.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topend::InProcessTopend;
    use fission_catalog::{CatalogSpec, ColumnSpec};
    use fission_common::types::DataType;
    use fission_plan::PlanNode;

    fn pairs_table(name: &str, id: i32) -> TableSpec {
        TableSpec {
            name: name.to_string(),
            table_id: TableId::new(id),
            signature: format!("{name}|int:a,int:b"),
            is_replicated: false,
            is_streamed: false,
            columns: vec![
                ColumnSpec::not_null("a", DataType::Int),
                ColumnSpec::nullable("b", DataType::Int),
            ],
            primary_key: vec![0],
            indexes: vec![],
            view: None,
        }
    }

    fn engine_with_catalog() -> (PartitionEngine, InProcessTopend) {
        let topend = InProcessTopend::new();
        let mut engine = PartitionEngine::new(Box::new(topend.clone()), EngineConfig::default());
        engine
            .initialize(
                0,
                SiteId::new(0),
                PartitionId::new(0),
                0,
                true,
                0,
                "localhost",
            )
            .unwrap();
        let spec = CatalogSpec {
            tables: vec![pairs_table("t", 0)],
        };
        let payload = serde_json::to_vec(&spec).unwrap();
        engine
            .load_catalog(CatalogVersion::new(1), &payload)
            .unwrap();
        (engine, topend)
    }

    fn scan_plan(table: &str) -> PlanFragment {
        PlanFragment::new(vec![
            PlanNode::SeqScan {
                table: table.to_string(),
                predicate: None,
            },
            PlanNode::Send,
        ])
    }

    fn table_payload(rows: &[(i32, i32)]) -> Vec<u8> {
        let rows: Vec<fission_common::Row> = rows
            .iter()
            .map(|&(a, b)| fission_common::Row::new(vec![Value::Int(a), Value::Int(b)]))
            .collect();
        rowcodec::encode_table_payload(&[DataType::Int, DataType::Int], &rows)
    }

    #[test]
    fn test_catalog_version_must_increase() {
        let (mut engine, _topend) = engine_with_catalog();
        let payload = engine
            .catalog()
            .unwrap()
            .to_payload()
            .unwrap();
        let err = engine
            .load_catalog(CatalogVersion::new(1), &payload)
            .unwrap_err();
        assert!(matches!(err, EngineError::CatalogVersionMismatch { .. }));
        // The catalog is unchanged.
        assert_eq!(engine.catalog().unwrap().version(), CatalogVersion::new(1));
    }

    #[test]
    fn test_catalog_reload_is_registry_noop() {
        let (mut engine, _topend) = engine_with_catalog();
        engine
            .load_table(TableId::new(0), &table_payload(&[(1, 10)]), UndoToken::NONE)
            .unwrap();
        let payload = engine.catalog().unwrap().to_payload().unwrap();
        engine
            .load_catalog(CatalogVersion::new(2), &payload)
            .unwrap();

        let table = engine.registry().get_by_id(TableId::new(0)).unwrap();
        assert_eq!(table.read().row_count(), 1);
        assert!(engine.registry().get_by_name("t").is_some());
    }

    #[test]
    fn test_load_table_roundtrip_is_identity() {
        let (mut engine, _topend) = engine_with_catalog();
        engine
            .load_table(
                TableId::new(0),
                &table_payload(&[(1, 10), (2, 20)]),
                UndoToken::NONE,
            )
            .unwrap();
        let serialized = engine.serialize_table(TableId::new(0)).unwrap();

        // Loading the serialization into an identical empty table
        // reproduces the contents.
        let (mut other, _t2) = engine_with_catalog();
        other
            .load_table(TableId::new(0), &serialized, UndoToken::NONE)
            .unwrap();
        assert_eq!(
            other.serialize_table(TableId::new(0)).unwrap(),
            serialized
        );
    }

    #[test]
    fn test_load_table_rejects_mismatched_schema() {
        let (mut engine, _topend) = engine_with_catalog();
        let rows = [fission_common::Row::new(vec![Value::Int(1)])];
        let payload = rowcodec::encode_table_payload(&[DataType::Int], &rows);
        let err = engine
            .load_table(TableId::new(0), &payload, UndoToken::NONE)
            .unwrap_err();
        assert!(matches!(err, EngineError::Serialization { .. }));
    }

    #[test]
    fn test_load_table_rewinds_with_token() {
        let (mut engine, _topend) = engine_with_catalog();
        engine
            .load_table(
                TableId::new(0),
                &table_payload(&[(1, 10), (2, 20)]),
                UndoToken::new(100),
            )
            .unwrap();
        let table = engine.registry().get_by_id(TableId::new(0)).unwrap();
        assert_eq!(table.read().row_count(), 2);

        engine.undo_undo_token(UndoToken::new(100)).unwrap();
        assert_eq!(table.read().row_count(), 0);
    }

    #[test]
    fn test_plan_cache_miss_then_hit() {
        let (mut engine, topend) = engine_with_catalog();
        let fragment_id = FragmentId::new(0xDEAD);
        topend.add_plan(fragment_id, scan_plan("t").to_json().unwrap());

        let batch = FragmentBatch {
            fragment_ids: vec![fragment_id],
            input_dep_ids: vec![DependencyId::NONE],
            params_per_fragment: vec![vec![]],
            txn_id: 1,
            sp_handle: 1,
            last_committed_sp_handle: 0,
            unique_id: 1,
            undo_token: UndoToken::new(10),
            trace_on: false,
        };
        engine.execute_plan_fragments(&batch).unwrap();
        assert_eq!(topend.state().lock().plan_fetches, 1);

        let batch = FragmentBatch {
            undo_token: UndoToken::new(11),
            ..batch
        };
        engine.execute_plan_fragments(&batch).unwrap();
        // Second run resolves from the cache.
        assert_eq!(topend.state().lock().plan_fetches, 1);
        assert!(engine.plan_cache().contains(fragment_id));
    }

    #[test]
    fn test_unknown_fragment_fails_batch() {
        let (mut engine, _topend) = engine_with_catalog();
        let batch = FragmentBatch {
            fragment_ids: vec![FragmentId::new(42)],
            input_dep_ids: vec![DependencyId::NONE],
            params_per_fragment: vec![vec![]],
            txn_id: 1,
            sp_handle: 1,
            last_committed_sp_handle: 0,
            unique_id: 1,
            undo_token: UndoToken::new(10),
            trace_on: false,
        };
        let err = engine.execute_plan_fragments(&batch).unwrap_err();
        assert!(matches!(err, EngineError::PlanNotFound { .. }));
        assert!(!engine.exception_frame().is_empty());
        assert!(engine.results().is_empty());
    }

    #[test]
    fn test_batch_size_limit() {
        let (mut engine, _topend) = engine_with_catalog();
        let n = MAX_BATCH_FRAGMENTS + 1;
        let batch = FragmentBatch {
            fragment_ids: vec![FragmentId::new(1); n],
            input_dep_ids: vec![DependencyId::NONE; n],
            params_per_fragment: vec![vec![]; n],
            txn_id: 1,
            sp_handle: 1,
            last_committed_sp_handle: 0,
            unique_id: 1,
            undo_token: UndoToken::NONE,
            trace_on: false,
        };
        assert!(engine.execute_plan_fragments(&batch).is_err());
    }

    #[test]
    fn test_custom_fragment_scan() {
        let (mut engine, _topend) = engine_with_catalog();
        engine
            .load_table(
                TableId::new(0),
                &table_payload(&[(1, 10), (2, 20)]),
                UndoToken::NONE,
            )
            .unwrap();

        let plan = scan_plan("t").to_json().unwrap();
        engine
            .execute_custom_fragment(&plan, DependencyId::NONE, vec![], UndoToken::NONE)
            .unwrap();

        let mut input = fission_codec::SerializeInput::new(engine.results());
        let (dep_id, rows) = rowcodec::read_result_set(&mut input).unwrap();
        assert_eq!(dep_id, 0);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_get_stats_lists_tables() {
        let (mut engine, _topend) = engine_with_catalog();
        engine
            .load_table(TableId::new(0), &table_payload(&[(1, 10)]), UndoToken::NONE)
            .unwrap();
        engine.get_stats(0, &[], false, 12345).unwrap();

        let mut input = fission_codec::SerializeInput::new(engine.results());
        let (_selector, rows) = rowcodec::read_result_set(&mut input).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(3), Some(&Value::Varchar("t".to_string())));
        assert_eq!(rows[0].get(4), Some(&Value::BigInt(1)));
    }

    #[test]
    fn test_cow_streams_table_in_chunks() {
        let (mut engine, _topend) = engine_with_catalog();
        engine
            .load_table(
                TableId::new(0),
                &table_payload(&[(1, 10), (2, 20)]),
                UndoToken::NONE,
            )
            .unwrap();
        let expected = engine.serialize_table(TableId::new(0)).unwrap();

        engine.activate_copy_on_write(TableId::new(0)).unwrap();
        let mut streamed = Vec::new();
        while let Some(chunk) = engine.cow_serialize_more(TableId::new(0), 7).unwrap() {
            streamed.extend_from_slice(&chunk);
        }
        assert_eq!(streamed, expected);
        // Stream is forgotten once drained.
        assert!(engine.cow_serialize_more(TableId::new(0), 7).is_err());
    }

    #[test]
    fn test_profiler_toggle_controls_stats() {
        let (mut engine, topend) = engine_with_catalog();
        let fragment_id = FragmentId::new(7);
        topend.add_plan(fragment_id, scan_plan("t").to_json().unwrap());

        engine.toggle_profiler(true);
        let batch = FragmentBatch {
            fragment_ids: vec![fragment_id],
            input_dep_ids: vec![DependencyId::NONE],
            params_per_fragment: vec![vec![]],
            txn_id: 1,
            sp_handle: 1,
            last_committed_sp_handle: 0,
            unique_id: 1,
            undo_token: UndoToken::NONE,
            trace_on: false,
        };
        engine.execute_plan_fragments(&batch).unwrap();
        // [i8 enabled][i32 succeeded][one i64 sample]
        assert_eq!(engine.per_fragment_stats().len(), 5 + 8);
    }
}
