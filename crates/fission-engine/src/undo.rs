//! Undo quanta and reversible actions.
//!
//! Every transactional mutation registers the inverse action needed to
//! take it back. Actions are grouped into quanta tagged by the monotonic
//! undo token the host assigned to the transaction; the host later either
//! releases a token range (commit) or rewinds it (rollback).

use std::collections::VecDeque;

use fission_common::types::{Row, RowId, UndoToken};
use fission_common::{EngineError, EngineResult};

use fission_storage::SharedTable;

/// The inverse of one storage mutation.
///
/// Each variant carries the minimum state needed to undo itself, including
/// a strong reference to the mutated table; that reference is what keeps a
/// catalog-dropped table alive until the last quantum referencing it is
/// gone.
pub enum UndoAction {
    /// Inverts a row insert.
    InsertRow {
        /// The mutated table.
        table: SharedTable,
        /// Id the row was inserted under.
        row_id: RowId,
    },
    /// Inverts a row delete.
    DeleteRow {
        /// The mutated table.
        table: SharedTable,
        /// Id the row was stored under.
        row_id: RowId,
        /// The removed row.
        row: Row,
    },
    /// Inverts an in-place row update.
    UpdateRow {
        /// The mutated table.
        table: SharedTable,
        /// Id of the updated row.
        row_id: RowId,
        /// The row as it was before the update.
        before: Row,
    },
}

impl UndoAction {
    /// Applies the inverse mutation.
    pub fn undo(self) -> EngineResult<()> {
        match self {
            Self::InsertRow { table, row_id } => {
                table.write().remove(row_id)?;
                Ok(())
            }
            Self::DeleteRow { table, row_id, row } => table.write().insert_with_id(row_id, row),
            Self::UpdateRow {
                table,
                row_id,
                before,
            } => {
                table.write().update(row_id, before, true)?;
                Ok(())
            }
        }
    }

    /// Finalizes the action on release.
    ///
    /// Dropping the action is the release: retained row copies and table
    /// references go with it.
    pub fn on_release(self) {}
}

impl std::fmt::Debug for UndoAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsertRow { row_id, .. } => {
                f.debug_struct("InsertRow").field("row_id", row_id).finish()
            }
            Self::DeleteRow { row_id, .. } => {
                f.debug_struct("DeleteRow").field("row_id", row_id).finish()
            }
            Self::UpdateRow { row_id, .. } => {
                f.debug_struct("UpdateRow").field("row_id", row_id).finish()
            }
        }
    }
}

/// One group of reversible actions under a single token.
#[derive(Debug)]
pub struct UndoQuantum {
    token: UndoToken,
    actions: Vec<UndoAction>,
}

impl UndoQuantum {
    fn new(token: UndoToken) -> Self {
        Self {
            token,
            actions: Vec::new(),
        }
    }

    /// Returns this quantum's token.
    #[must_use]
    pub fn token(&self) -> UndoToken {
        self.token
    }

    /// Returns the number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if no actions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// The engine's stack of undo quanta, ordered by ascending token.
#[derive(Debug, Default)]
pub struct UndoLog {
    quanta: VecDeque<UndoQuantum>,
    last_released: Option<UndoToken>,
}

impl UndoLog {
    /// Creates an empty undo log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the active undo token, opening a new quantum when it changes.
    ///
    /// `UndoToken::NONE` and re-sending the current token are no-ops.
    /// Tokens must strictly increase; anything else is an invariant
    /// violation.
    pub fn set_token(&mut self, token: UndoToken) -> EngineResult<()> {
        if token.is_none() {
            return Ok(());
        }
        if let Some(current) = self.quanta.back() {
            if current.token() == token {
                return Ok(());
            }
            if token < current.token() {
                return Err(EngineError::internal(format!(
                    "undo token {token} is not greater than current {}",
                    current.token()
                )));
            }
        }
        if let Some(released) = self.last_released {
            if token <= released {
                return Err(EngineError::internal(format!(
                    "undo token {token} was already released (high water {released})"
                )));
            }
        }
        self.quanta.push_back(UndoQuantum::new(token));
        Ok(())
    }

    /// Returns the token of the currently open quantum.
    #[must_use]
    pub fn current_token(&self) -> Option<UndoToken> {
        self.quanta.back().map(UndoQuantum::token)
    }

    /// Returns true while a quantum is open for registration.
    #[must_use]
    pub fn has_open_quantum(&self) -> bool {
        !self.quanta.is_empty()
    }

    /// Appends an inverse action to the current quantum.
    pub fn register(&mut self, action: UndoAction) -> EngineResult<()> {
        let quantum = self.quanta.back_mut().ok_or(EngineError::NoOpenQuantum)?;
        quantum.actions.push(action);
        Ok(())
    }

    /// Releases every quantum with token `<= token`, oldest first.
    ///
    /// Actions are finalized in insertion order. `_is_empty_txn` is part of
    /// the wire contract for the replication path and has no local effect.
    pub fn release(&mut self, token: UndoToken, _is_empty_txn: bool) {
        while let Some(front) = self.quanta.front() {
            if front.token() > token {
                break;
            }
            let quantum = self.quanta.pop_front().expect("non-empty deque");
            self.last_released = Some(match self.last_released {
                Some(previous) => previous.max(quantum.token()),
                None => quantum.token(),
            });
            for action in quantum.actions {
                action.on_release();
            }
        }
    }

    /// Rewinds every quantum with token `>= token`, newest first.
    ///
    /// Within each quantum, inverse actions run in reverse insertion
    /// order. Rewinding a token that was already released is an invariant
    /// violation.
    pub fn rewind(&mut self, token: UndoToken) -> EngineResult<()> {
        if let Some(released) = self.last_released {
            if token <= released {
                return Err(EngineError::internal(format!(
                    "cannot rewind token {token}: released up to {released}"
                )));
            }
        }
        while let Some(back) = self.quanta.back() {
            if back.token() < token {
                break;
            }
            let quantum = self.quanta.pop_back().expect("non-empty deque");
            for action in quantum.actions.into_iter().rev() {
                action.undo()?;
            }
        }
        Ok(())
    }

    /// Returns the number of open quanta.
    #[must_use]
    pub fn quantum_count(&self) -> usize {
        self.quanta.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use fission_catalog::{ColumnSpec, TableSpec};
    use fission_common::types::{DataType, TableId, Value};
    use fission_storage::{PersistentTable, TableRegistry};

    fn shared_table() -> SharedTable {
        TableRegistry::share(PersistentTable::new(Arc::new(TableSpec {
            name: "t".to_string(),
            table_id: TableId::new(0),
            signature: "t|int:a,int:b".to_string(),
            is_replicated: false,
            is_streamed: false,
            columns: vec![
                ColumnSpec::not_null("a", DataType::Int),
                ColumnSpec::nullable("b", DataType::Int),
            ],
            primary_key: vec![0],
            indexes: vec![],
            view: None,
        })))
    }

    fn row(a: i32, b: i32) -> Row {
        Row::new(vec![Value::Int(a), Value::Int(b)])
    }

    fn token(t: i64) -> UndoToken {
        UndoToken::new(t)
    }

    #[test]
    fn test_set_token_monotonic() {
        let mut log = UndoLog::new();
        log.set_token(token(10)).unwrap();
        log.set_token(token(10)).unwrap(); // same token: no-op
        assert_eq!(log.quantum_count(), 1);
        log.set_token(token(20)).unwrap();
        assert_eq!(log.quantum_count(), 2);
        assert!(log.set_token(token(15)).is_err());
    }

    #[test]
    fn test_none_token_is_noop() {
        let mut log = UndoLog::new();
        log.set_token(UndoToken::NONE).unwrap();
        assert!(!log.has_open_quantum());
    }

    #[test]
    fn test_register_without_quantum_fails() {
        let mut log = UndoLog::new();
        let err = log
            .register(UndoAction::InsertRow {
                table: shared_table(),
                row_id: RowId::FIRST,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::NoOpenQuantum));
    }

    #[test]
    fn test_rewind_restores_rows() {
        let table = shared_table();
        let mut log = UndoLog::new();
        log.set_token(token(100)).unwrap();

        let row_id = table.write().insert(row(1, 10)).unwrap();
        log.register(UndoAction::InsertRow {
            table: Arc::clone(&table),
            row_id,
        })
        .unwrap();

        assert_eq!(table.read().row_count(), 1);
        log.rewind(token(100)).unwrap();
        assert_eq!(table.read().row_count(), 0);
        assert_eq!(log.quantum_count(), 0);
    }

    #[test]
    fn test_rewind_runs_actions_in_reverse() {
        let table = shared_table();
        let mut log = UndoLog::new();
        log.set_token(token(100)).unwrap();

        // Insert then delete the same row; replaying the inverses in
        // reverse order must net out to the original (empty) state.
        let row_id = table.write().insert(row(1, 10)).unwrap();
        log.register(UndoAction::InsertRow {
            table: Arc::clone(&table),
            row_id,
        })
        .unwrap();
        let removed = table.write().remove(row_id).unwrap();
        log.register(UndoAction::DeleteRow {
            table: Arc::clone(&table),
            row_id,
            row: removed,
        })
        .unwrap();

        log.rewind(token(100)).unwrap();
        assert_eq!(table.read().row_count(), 0);
    }

    #[test]
    fn test_release_discards_quanta() {
        let table = shared_table();
        let mut log = UndoLog::new();
        for t in [10, 20, 30] {
            log.set_token(token(t)).unwrap();
            let row_id = table.write().insert(row(t as i32, 0)).unwrap();
            log.register(UndoAction::InsertRow {
                table: Arc::clone(&table),
                row_id,
            })
            .unwrap();
        }

        log.release(token(20), false);
        assert_eq!(log.quantum_count(), 1);
        // Released rows stay in place.
        assert_eq!(table.read().row_count(), 3);
        // Rewinding the still-open quantum works.
        log.rewind(token(30)).unwrap();
        assert_eq!(table.read().row_count(), 2);
    }

    #[test]
    fn test_rewind_after_release_is_rejected() {
        let mut log = UndoLog::new();
        log.set_token(token(10)).unwrap();
        log.release(token(10), false);
        assert!(log.rewind(token(10)).is_err());
    }

    #[test]
    fn test_token_reuse_after_release_rejected() {
        let mut log = UndoLog::new();
        log.set_token(token(10)).unwrap();
        log.release(token(10), false);
        assert!(log.set_token(token(10)).is_err());
        log.set_token(token(11)).unwrap();
    }

    #[test]
    fn test_update_undo_restores_previous_row() {
        let table = shared_table();
        let mut log = UndoLog::new();
        log.set_token(token(5)).unwrap();

        let row_id = table.write().insert(row(1, 10)).unwrap();
        log.register(UndoAction::InsertRow {
            table: Arc::clone(&table),
            row_id,
        })
        .unwrap();

        let before = table.write().update(row_id, row(1, 99), false).unwrap();
        log.register(UndoAction::UpdateRow {
            table: Arc::clone(&table),
            row_id,
            before,
        })
        .unwrap();

        log.rewind(token(5)).unwrap();
        assert_eq!(table.read().row_count(), 0);
    }
}
