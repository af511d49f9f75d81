//! Incremental materialized-view maintenance.
//!
//! A [`MaterializedViewHandler`] keeps one derived table (the view) in
//! sync with its source tables. On every source insert or delete the
//! handler runs the view's create-query with the source in delta mode, so
//! the query sees only the changed row, and merges the resulting per-group
//! delta into the view. Additive aggregates merge arithmetically; MIN/MAX
//! deletes that remove the current extremum fall back to a pre-compiled
//! recomputation query.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, trace};

use fission_catalog::{TableSpec, ViewSpec};
use fission_common::types::{PartitionId, Row, Value};
use fission_common::{EngineError, EngineResult};
use fission_plan::AggregateOp;
use fission_storage::{SharedTable, ViewHandlerId};

use crate::exec::{self, mutate, ExecContext, ExecutorVector, SharedVector, TempTable};

/// A handler shared between the registry and the notification path.
pub type SharedHandler = Arc<Mutex<MaterializedViewHandler>>;

/// The process-wide replicated-resource lock.
///
/// Attaching or detaching a partitioned handler to a replicated source
/// table, and every notification delivered through such an attachment,
/// serializes through this lock: exactly one engine at a time touches
/// replicated state.
pub fn replicated_resource_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Process-wide store of published replicated tables.
///
/// The lowest site builds a replicated table and publishes it here; every
/// other engine in the process registers the same shared storage. Guarded
/// by [`replicated_resource_lock`] on every access.
pub fn published_replicated_tables() -> &'static Mutex<HashMap<String, SharedTable>> {
    static TABLES: OnceLock<Mutex<HashMap<String, SharedTable>>> = OnceLock::new();
    TABLES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// High bit marking a handler id as a process-wide replicated shim.
const SHIM_ID_BIT: u64 = 1 << 63;

fn replicated_shims() -> &'static Mutex<HashMap<u64, (SharedHandler, PartitionId)>> {
    static SHIMS: OnceLock<Mutex<HashMap<u64, (SharedHandler, PartitionId)>>> = OnceLock::new();
    SHIMS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers a partitioned handler as a shim on a replicated source.
///
/// A replicated table is shared by every engine in the process, so the ids
/// it carries must resolve from any of them; shim ids live in a
/// process-wide table, distinguished by their high bit.
pub fn register_replicated_shim(handler: SharedHandler, partition: PartitionId) -> ViewHandlerId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let id = SHIM_ID_BIT | NEXT.fetch_add(1, Ordering::Relaxed);
    replicated_shims().lock().insert(id, (handler, partition));
    ViewHandlerId::new(id)
}

/// Resolves a shim id registered by any engine in the process.
#[must_use]
pub fn resolve_replicated_shim(id: ViewHandlerId) -> Option<HandlerEntry> {
    if id.as_u64() & SHIM_ID_BIT == 0 {
        return None;
    }
    replicated_shims()
        .lock()
        .get(&id.as_u64())
        .map(|(handler, partition)| HandlerEntry {
            handler: Arc::clone(handler),
            shim_partition: Some(*partition),
        })
}

/// Drops a shim registration.
pub fn unregister_replicated_shim(id: ViewHandlerId) {
    replicated_shims().lock().remove(&id.as_u64());
}

/// One source-table attachment of a handler.
struct SourceAttachment {
    table: SharedTable,
    attached_id: ViewHandlerId,
    replicated: bool,
}

/// Maintains one view table from its source tables.
pub struct MaterializedViewHandler {
    dest: SharedTable,
    view_name: String,
    group_by_count: usize,
    agg_ops: Vec<AggregateOp>,
    /// Destination column index of the required `COUNT(*)` aggregate.
    count_star_index: usize,
    create_query: SharedVector,
    min_max_queries: Vec<SharedVector>,
    sources: Vec<SourceAttachment>,
    /// Scratch for the row located in the view.
    existing_tuple: Row,
    /// Scratch for the merged replacement row.
    updated_tuple: Row,
}

impl MaterializedViewHandler {
    /// Builds a handler from a view definition.
    ///
    /// Rejects aggregates outside the maintainable set and view shapes
    /// without exactly one `COUNT(*)` column.
    pub fn build(dest: SharedTable, spec: &ViewSpec) -> EngineResult<Self> {
        let view_name = dest.read().name().to_string();
        let column_count = dest.read().spec().column_count();

        let mut agg_ops = Vec::with_capacity(spec.aggregates.len());
        let mut count_star_index = None;
        for (agg_index, aggregate) in spec.aggregates.iter().enumerate() {
            let column = spec.group_by_count + agg_index;
            if !aggregate.op.is_view_maintainable() {
                return Err(EngineError::UnsupportedAggregate {
                    aggregate: aggregate.op.to_string(),
                    column,
                });
            }
            if aggregate.op == AggregateOp::CountStar {
                if count_star_index.is_some() {
                    return Err(EngineError::UnsupportedAggregate {
                        aggregate: "duplicate COUNT(*)".to_string(),
                        column,
                    });
                }
                count_star_index = Some(column);
            }
            agg_ops.push(aggregate.op);
        }
        let count_star_index = count_star_index.ok_or_else(|| EngineError::serialization(
            format!("view '{view_name}' has no COUNT(*) column"),
        ))?;
        if spec.group_by_count + agg_ops.len() != column_count {
            return Err(EngineError::serialization(format!(
                "view '{view_name}' declares {} aggregate columns for a {}-column table",
                agg_ops.len(),
                column_count
            )));
        }

        let mut create_query = ExecutorVector::from_fragment(
            fission_common::types::FragmentId::INVALID,
            &spec.create_query,
        )?;
        create_query.strip_send_executor();

        let min_max_count = agg_ops.iter().filter(|op| op.is_min_max()).count();
        if spec.fallback_queries.len() != min_max_count {
            return Err(EngineError::serialization(format!(
                "view '{view_name}' has {} MIN/MAX columns but {} fallback queries",
                min_max_count,
                spec.fallback_queries.len()
            )));
        }
        let mut min_max_queries = Vec::with_capacity(spec.fallback_queries.len());
        for fragment in &spec.fallback_queries {
            let mut vector = ExecutorVector::from_fragment(
                fission_common::types::FragmentId::INVALID,
                fragment,
            )?;
            vector.strip_send_executor();
            min_max_queries.push(Arc::new(vector));
        }

        Ok(Self {
            dest,
            view_name,
            group_by_count: spec.group_by_count,
            agg_ops,
            count_star_index,
            create_query: Arc::new(create_query),
            min_max_queries,
            sources: Vec::new(),
            existing_tuple: Row::nulls(column_count),
            updated_tuple: Row::nulls(column_count),
        })
    }

    /// Returns the view (destination) table.
    #[must_use]
    pub fn dest(&self) -> &SharedTable {
        &self.dest
    }

    /// Returns the view name.
    #[must_use]
    pub fn view_name(&self) -> &str {
        &self.view_name
    }

    /// Records a source-table attachment.
    pub fn add_source(
        &mut self,
        table: SharedTable,
        attached_id: ViewHandlerId,
        replicated: bool,
    ) {
        self.sources.push(SourceAttachment {
            table,
            attached_id,
            replicated,
        });
    }

    /// Detaches this handler from every source table.
    ///
    /// Replicated attachments detach under the replicated-resource lock
    /// and drop their process-wide shim registration.
    pub fn detach_all_sources(&mut self) {
        for attachment in self.sources.drain(..) {
            if attachment.replicated {
                let _guard = replicated_resource_lock().lock();
                attachment
                    .table
                    .write()
                    .detach_handler(attachment.attached_id);
                unregister_replicated_shim(attachment.attached_id);
            } else {
                attachment
                    .table
                    .write()
                    .detach_handler(attachment.attached_id);
            }
        }
    }

    /// Seeds the view from whatever the sources already contain.
    ///
    /// The create-query runs unconditionally; over empty sources a
    /// group-by-less view gets its single initial row from the aggregate
    /// executor's empty-input behavior.
    pub fn catch_up(&mut self, ctx: &mut ExecContext<'_>, fallible: bool) -> EngineResult<()> {
        let content = exec::run_fragment(ctx, &self.create_query)?;
        debug!(
            view = %self.view_name,
            rows = content.len(),
            "seeding view from existing source data"
        );
        for row in content.into_rows() {
            mutate::insert_row(ctx, &self.dest, row, fallible)?;
        }
        Ok(())
    }

    /// Applies one source-table insert to the view.
    pub fn handle_tuple_insert(
        &mut self,
        ctx: &mut ExecContext<'_>,
        source: &SharedTable,
        delta_row: Row,
        fallible: bool,
    ) -> EngineResult<()> {
        source.write().enter_delta_mode(vec![delta_row]);
        let result = self.apply_insert_delta(ctx, fallible);
        source.write().exit_delta_mode();
        result
    }

    fn apply_insert_delta(&mut self, ctx: &mut ExecContext<'_>, fallible: bool) -> EngineResult<()> {
        let delta = exec::run_fragment(ctx, &self.create_query)?;
        for delta_row in delta.rows() {
            match self.find_existing_tuple(delta_row)? {
                Some(row_id) => {
                    self.merge_tuple_for_insert(delta_row)?;
                    // Group-key-only indexes never change here; skip the
                    // primary index refresh.
                    mutate::update_row(
                        ctx,
                        &self.dest,
                        row_id,
                        self.updated_tuple.clone(),
                        false,
                        fallible,
                    )?;
                }
                None => {
                    mutate::insert_row(ctx, &self.dest, delta_row.clone(), fallible)?;
                }
            }
        }
        Ok(())
    }

    /// Applies one source-table delete to the view.
    ///
    /// Delta mode ends before the per-row merge because the MIN/MAX
    /// fallback issues its own queries, which must see the post-delete
    /// table state.
    pub fn handle_tuple_delete(
        &mut self,
        ctx: &mut ExecContext<'_>,
        source: &SharedTable,
        delta_row: Row,
        fallible: bool,
    ) -> EngineResult<()> {
        source.write().enter_delta_mode(vec![delta_row]);
        let delta = exec::run_fragment(ctx, &self.create_query);
        source.write().exit_delta_mode();
        let delta = delta?;

        self.apply_delete_delta(ctx, &delta, fallible)
    }

    fn apply_delete_delta(
        &mut self,
        ctx: &mut ExecContext<'_>,
        delta: &TempTable,
        fallible: bool,
    ) -> EngineResult<()> {
        for delta_row in delta.rows() {
            let row_id = self.find_existing_tuple(delta_row)?.ok_or_else(|| {
                EngineError::ViewDesync {
                    view: self.view_name.clone(),
                }
            })?;

            let existing_count = self
                .existing_tuple
                .get(self.count_star_index)
                .cloned()
                .unwrap_or(Value::Null);
            let delta_count = delta_row
                .get(self.count_star_index)
                .cloned()
                .unwrap_or(Value::Null);

            if existing_count == delta_count && self.group_by_count > 0 {
                mutate::delete_row_by_id(ctx, &self.dest, row_id, fallible)?;
            } else {
                self.merge_tuple_for_delete(ctx, delta_row)?;
                mutate::update_row(
                    ctx,
                    &self.dest,
                    row_id,
                    self.updated_tuple.clone(),
                    false,
                    fallible,
                )?;
            }
        }
        Ok(())
    }

    /// Locates the view row matching a delta row's group key.
    ///
    /// Loads the row into the existing-tuple scratch on success. Without
    /// group-by columns the view holds exactly one row, fetched
    /// unconditionally.
    fn find_existing_tuple(
        &mut self,
        delta_row: &Row,
    ) -> EngineResult<Option<fission_common::types::RowId>> {
        if self.group_by_count == 0 {
            let first = self.dest.read().first_row();
            return match first {
                Some((row_id, row)) => {
                    self.existing_tuple = row;
                    Ok(Some(row_id))
                }
                // The single row is seeded when the view is installed.
                None => Err(EngineError::ViewDesync {
                    view: self.view_name.clone(),
                }),
            };
        }

        let key: Vec<Value> = (0..self.group_by_count)
            .map(|i| delta_row.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        match self.dest.read().lookup_primary(&key) {
            Some((row_id, row)) => {
                self.existing_tuple = row;
                Ok(Some(row_id))
            }
            None => Ok(None),
        }
    }

    /// Merges a delta row into the existing tuple for an insert.
    fn merge_tuple_for_insert(&mut self, delta_row: &Row) -> EngineResult<()> {
        // Group-by columns come from the existing tuple: values already
        // owned by the view table, which sidesteps re-owning out-of-line
        // strings from the delta.
        for i in 0..self.group_by_count {
            self.updated_tuple
                .set(i, self.existing_tuple.get(i).cloned().unwrap_or(Value::Null));
        }

        let ops = self.agg_ops.clone();
        for (agg_index, op) in ops.iter().enumerate() {
            let column = self.group_by_count + agg_index;
            let existing = self.existing_tuple.get(column).cloned().unwrap_or(Value::Null);
            let delta = delta_row.get(column).cloned().unwrap_or(Value::Null);

            let merged = if delta.is_null() {
                existing
            } else if existing.is_null() {
                delta
            } else {
                match op {
                    AggregateOp::Sum | AggregateOp::Count | AggregateOp::CountStar => {
                        existing.add(&delta)?
                    }
                    AggregateOp::Min => {
                        if existing <= delta {
                            existing
                        } else {
                            delta
                        }
                    }
                    AggregateOp::Max => {
                        if existing >= delta {
                            existing
                        } else {
                            delta
                        }
                    }
                    AggregateOp::Avg => {
                        return Err(EngineError::internal(
                            "non-maintainable aggregate survived view install",
                        ))
                    }
                }
            };
            self.updated_tuple.set(column, merged);
        }
        Ok(())
    }

    /// Merges a delta row into the existing tuple for a delete.
    fn merge_tuple_for_delete(
        &mut self,
        ctx: &mut ExecContext<'_>,
        delta_row: &Row,
    ) -> EngineResult<()> {
        for i in 0..self.group_by_count {
            self.updated_tuple
                .set(i, self.existing_tuple.get(i).cloned().unwrap_or(Value::Null));
        }

        let existing_count = self
            .existing_tuple
            .get(self.count_star_index)
            .cloned()
            .unwrap_or(Value::Null);
        let delta_count = delta_row
            .get(self.count_star_index)
            .cloned()
            .unwrap_or(Value::Null);
        let new_count = existing_count.sub(&delta_count)?;

        let ops = self.agg_ops.clone();
        if new_count.to_i64() == Some(0) {
            // The group is empty. Only reachable without group-by columns
            // (grouped views delete the row instead): counts go to zero,
            // every other aggregate goes to NULL.
            for (agg_index, op) in ops.iter().enumerate() {
                let column = self.group_by_count + agg_index;
                let value = match op {
                    AggregateOp::Count | AggregateOp::CountStar => Value::BigInt(0),
                    _ => Value::Null,
                };
                self.updated_tuple.set(column, value);
            }
            return Ok(());
        }

        let mut min_max_index = 0;
        for (agg_index, op) in ops.iter().enumerate() {
            let column = self.group_by_count + agg_index;
            let existing = self.existing_tuple.get(column).cloned().unwrap_or(Value::Null);
            let delta = delta_row.get(column).cloned().unwrap_or(Value::Null);
            let mut merged = existing.clone();

            if !delta.is_null() {
                match op {
                    AggregateOp::Sum | AggregateOp::Count | AggregateOp::CountStar => {
                        if !existing.is_null() {
                            merged = existing.sub(&delta)?;
                        }
                    }
                    AggregateOp::Min | AggregateOp::Max => {
                        if existing == delta {
                            // The removed row may have carried the
                            // extremum; recompute from the sources.
                            merged = self.fallback_min_max(ctx, column, min_max_index)?;
                        }
                    }
                    AggregateOp::Avg => {
                        return Err(EngineError::internal(
                            "non-maintainable aggregate survived view install",
                        ))
                    }
                }
            }

            if op.is_min_max() {
                min_max_index += 1;
            }
            self.updated_tuple.set(column, merged);
        }
        Ok(())
    }

    /// Recomputes a MIN/MAX column by running its fallback query.
    ///
    /// Parameters 0..group_by_count carry the group key; the parameter
    /// after them carries the outgoing extremum for plans that can narrow
    /// the search with it. The caller's parameter array is saved and
    /// restored around the query.
    fn fallback_min_max(
        &self,
        ctx: &mut ExecContext<'_>,
        column: usize,
        min_max_index: usize,
    ) -> EngineResult<Value> {
        let vector = self.min_max_queries.get(min_max_index).ok_or_else(|| {
            EngineError::internal(format!(
                "view '{}' missing fallback query {min_max_index}",
                self.view_name
            ))
        })?;
        let vector = Arc::clone(vector);

        let param_count = self.group_by_count + 1;
        if ctx.params.len() < param_count {
            ctx.params.resize(param_count, Value::Null);
        }
        let saved: Vec<Value> = ctx.params[..param_count].to_vec();
        for i in 0..self.group_by_count {
            ctx.params[i] = self.existing_tuple.get(i).cloned().unwrap_or(Value::Null);
        }
        ctx.params[self.group_by_count] = self
            .existing_tuple
            .get(column)
            .cloned()
            .unwrap_or(Value::Null);

        trace!(
            view = %self.view_name,
            column,
            "running MIN/MAX fallback query"
        );
        let result = exec::run_fragment(ctx, &vector);
        ctx.params[..param_count].clone_from_slice(&saved);

        let result = result?;
        Ok(result
            .rows()
            .first()
            .and_then(|row| row.get(0).cloned())
            .unwrap_or(Value::Null))
    }
}

/// Registry entry handed out on notification.
pub struct HandlerEntry {
    /// The handler to notify.
    pub handler: SharedHandler,
    /// Set when this entry is a replicated-source shim: the partition that
    /// owns the underlying handler. Notifications through a shim serialize
    /// on the replicated-resource lock.
    pub shim_partition: Option<PartitionId>,
}

/// The engine's table of installed view handlers.
///
/// Tables hold [`ViewHandlerId`]s; this registry resolves the
/// engine-local ones. Shims on replicated sources resolve through the
/// process-wide table instead ([`resolve_replicated_shim`]).
#[derive(Default)]
pub struct ViewRegistry {
    entries: HashMap<u64, SharedHandler>,
    by_dest: HashMap<String, u64>,
    next_id: u64,
}

impl ViewRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler maintaining a view destination.
    pub fn register(&mut self, dest_name: &str, handler: SharedHandler) -> ViewHandlerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, handler);
        self.by_dest.insert(dest_name.to_string(), id);
        ViewHandlerId::new(id)
    }

    /// Resolves a handler id, local or process-wide shim.
    #[must_use]
    pub fn get(&self, id: ViewHandlerId) -> Option<HandlerEntry> {
        if let Some(handler) = self.entries.get(&id.as_u64()) {
            return Some(HandlerEntry {
                handler: Arc::clone(handler),
                shim_partition: None,
            });
        }
        resolve_replicated_shim(id)
    }

    /// Returns the handler maintaining a view, if installed.
    #[must_use]
    pub fn handler_for_dest(&self, dest_name: &str) -> Option<SharedHandler> {
        let id = self.by_dest.get(dest_name)?;
        self.entries.get(id).map(Arc::clone)
    }

    /// Removes a view destination's handler.
    ///
    /// The caller detaches the handler from its source tables via
    /// [`MaterializedViewHandler::detach_all_sources`].
    pub fn remove_view(&mut self, dest_name: &str) -> Option<SharedHandler> {
        let id = self.by_dest.remove(dest_name)?;
        self.entries.remove(&id)
    }

    /// Returns the names of every installed view.
    #[must_use]
    pub fn installed_views(&self) -> Vec<String> {
        self.by_dest.keys().cloned().collect()
    }

    /// Returns the number of installed handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no handlers are installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_dest.clear();
    }
}

/// Validates the shape of a view destination table.
///
/// Grouped views key their primary index on the leading group-by columns;
/// the maintainer's existing-row probe depends on it.
pub fn check_view_dest_shape(spec: &TableSpec) -> EngineResult<()> {
    let Some(view) = &spec.view else {
        return Ok(());
    };
    if view.group_by_count > 0 {
        let expected: Vec<usize> = (0..view.group_by_count).collect();
        if spec.primary_key != expected {
            return Err(EngineError::serialization(format!(
                "view '{}' must have its primary key on the {} leading group-by columns",
                spec.name, view.group_by_count
            )));
        }
    }
    Ok(())
}
