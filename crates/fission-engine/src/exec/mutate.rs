//! Transactional mutation paths and the DML executors.
//!
//! Every row mutation funnels through this module so that the three
//! side effects stay together: the physical storage change, the undo
//! action registered against the open quantum, and the synchronous
//! notification of any view handlers attached to the table.
//!
//! Locking discipline: the table's write lock is held only for the
//! physical change. Handler notification runs with the lock released;
//! the handler's create-query re-acquires read locks on the source table,
//! which is in delta mode for the duration of the notification.

use std::sync::Arc;

use fission_common::types::{Row, RowId};
use fission_common::{EngineError, EngineResult};
use fission_storage::{SharedTable, ViewHandlerId};

use crate::undo::UndoAction;

use super::context::ExecContext;
use super::temp::TempTable;
use super::Executor;

/// Inserts a row, registering undo and driving view maintenance.
pub fn insert_row(
    ctx: &mut ExecContext<'_>,
    table: &SharedTable,
    row: Row,
    fallible: bool,
) -> EngineResult<()> {
    let row_id = table
        .write()
        .insert(row.clone())
        .map_err(|e| escalate(e, fallible))?;
    if ctx.undo.has_open_quantum() {
        ctx.undo.register(UndoAction::InsertRow {
            table: Arc::clone(table),
            row_id,
        })?;
    }
    ctx.tuples_modified += 1;

    let handlers = table.read().handlers().to_vec();
    notify_handlers(ctx, table, row, &handlers, fallible, Mutation::Insert)
}

/// Deletes the row equal to `target`, registering undo and driving view
/// maintenance.
pub fn delete_row(
    ctx: &mut ExecContext<'_>,
    table: &SharedTable,
    target: &Row,
    fallible: bool,
) -> EngineResult<()> {
    let row_id = {
        let guard = table.read();
        guard.find_row_id(target).ok_or_else(|| {
            EngineError::internal(format!(
                "delete target not found in table '{}'",
                guard.name()
            ))
        })?
    };
    delete_row_by_id(ctx, table, row_id, fallible)
}

/// Deletes a row by storage id, registering undo and driving view
/// maintenance.
pub fn delete_row_by_id(
    ctx: &mut ExecContext<'_>,
    table: &SharedTable,
    row_id: RowId,
    fallible: bool,
) -> EngineResult<()> {
    let removed = table.write().remove(row_id)?;
    if ctx.undo.has_open_quantum() {
        ctx.undo.register(UndoAction::DeleteRow {
            table: Arc::clone(table),
            row_id,
            row: removed.clone(),
        })?;
    }
    ctx.tuples_modified += 1;

    let handlers = table.read().handlers().to_vec();
    notify_handlers(ctx, table, removed, &handlers, fallible, Mutation::Delete)
}

/// Replaces a row in place, registering undo.
///
/// View merges pass `refresh_primary = false`: the group-by key never
/// changes, so the primary index needs no touch. Updates do not re-notify
/// handlers.
pub fn update_row(
    ctx: &mut ExecContext<'_>,
    table: &SharedTable,
    row_id: RowId,
    new_row: Row,
    refresh_primary: bool,
    fallible: bool,
) -> EngineResult<()> {
    let before = table
        .write()
        .update(row_id, new_row, refresh_primary)
        .map_err(|e| escalate(e, fallible))?;
    if ctx.undo.has_open_quantum() {
        ctx.undo.register(UndoAction::UpdateRow {
            table: Arc::clone(table),
            row_id,
            before,
        })?;
    }
    ctx.tuples_modified += 1;
    Ok(())
}

#[derive(Clone, Copy)]
enum Mutation {
    Insert,
    Delete,
}

fn notify_handlers(
    ctx: &mut ExecContext<'_>,
    source: &SharedTable,
    delta_row: Row,
    handlers: &[ViewHandlerId],
    fallible: bool,
    mutation: Mutation,
) -> EngineResult<()> {
    for &id in handlers {
        let entry = ctx.views.get(id).ok_or_else(|| {
            EngineError::internal(format!("dangling view handler id {}", id.as_u64()))
        })?;
        // A shim entry means the source is replicated and this handler
        // belongs to one specific partition: maintenance serializes on the
        // process-wide replicated-resource lock.
        let _replicated_guard = entry
            .shim_partition
            .map(|_| crate::view::replicated_resource_lock().lock());
        let mut handler = entry.handler.lock();
        match mutation {
            Mutation::Insert => {
                handler.handle_tuple_insert(ctx, source, delta_row.clone(), fallible)?;
            }
            Mutation::Delete => {
                handler.handle_tuple_delete(ctx, source, delta_row.clone(), fallible)?;
            }
        }
    }
    Ok(())
}

/// Reclassifies recoverable constraint failures on non-fallible paths.
fn escalate(err: EngineError, fallible: bool) -> EngineError {
    if !fallible && err.is_recoverable() {
        EngineError::internal(format!("constraint violation on infallible path: {err}"))
    } else {
        err
    }
}

/// Inserts every input row into its target table.
///
/// Produces the canonical single-row modified-count result.
pub struct InsertExecutor {
    table: String,
}

impl InsertExecutor {
    pub fn new(table: String) -> Self {
        Self { table }
    }
}

impl Executor for InsertExecutor {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        input: Option<TempTable>,
    ) -> EngineResult<TempTable> {
        let input = input.unwrap_or_default();
        let table = ctx.registry.require_by_name(&self.table)?;
        let modified = input.len() as i64;
        for row in input.into_rows() {
            insert_row(ctx, &table, row, true)?;
        }
        modified_count_result(ctx, modified)
    }

    fn name(&self) -> &'static str {
        "insert"
    }
}

/// Deletes every input row from its target table.
pub struct DeleteExecutor {
    table: String,
}

impl DeleteExecutor {
    pub fn new(table: String) -> Self {
        Self { table }
    }
}

impl Executor for DeleteExecutor {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        input: Option<TempTable>,
    ) -> EngineResult<TempTable> {
        let input = input.unwrap_or_default();
        let table = ctx.registry.require_by_name(&self.table)?;
        let modified = input.len() as i64;
        for row in input.rows() {
            delete_row(ctx, &table, row, true)?;
        }
        modified_count_result(ctx, modified)
    }

    fn name(&self) -> &'static str {
        "delete"
    }
}

fn modified_count_result(ctx: &ExecContext<'_>, modified: i64) -> EngineResult<TempTable> {
    let mut output = TempTable::new();
    output.push(
        Row::new(vec![fission_common::Value::BigInt(modified)]),
        ctx.temp_limit,
    )?;
    Ok(output)
}
