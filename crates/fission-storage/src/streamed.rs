//! Append-only streamed (export) tables.

use std::sync::Arc;

use parking_lot::Mutex;

use fission_catalog::TableSpec;
use fission_codec::rowcodec;
use fission_codec::{Output, VecOutput};
use fission_common::types::{Row, TableId};
use fission_common::EngineResult;

/// A streamed table shared between the registry and the engine's flush
/// bookkeeping.
pub type SharedStream = Arc<Mutex<StreamedTable>>;

/// An append-only export stream.
///
/// Rows are encoded into a pending byte buffer as they arrive; the engine
/// hands full buffers to the host on `Tick`/`Quiesce`. The universal stream
/// offset (USO) is the byte offset of the first pending byte; replay after
/// a crash is driven by the external log, so there is no undo.
#[derive(Debug)]
pub struct StreamedTable {
    spec: Arc<TableSpec>,
    uso: i64,
    sequence_no: i64,
    pending: Vec<u8>,
}

impl StreamedTable {
    /// Creates an empty stream from its catalog spec.
    #[must_use]
    pub fn new(spec: Arc<TableSpec>) -> Self {
        Self {
            spec,
            uso: 0,
            sequence_no: 0,
            pending: Vec::new(),
        }
    }

    /// Returns the stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Returns the catalog-local table id.
    #[must_use]
    pub fn table_id(&self) -> TableId {
        self.spec.table_id
    }

    /// Returns the USO of the first byte not yet handed off.
    #[must_use]
    pub fn uso(&self) -> i64 {
        self.uso
    }

    /// Returns the sequence number of the next appended row.
    #[must_use]
    pub fn sequence_no(&self) -> i64 {
        self.sequence_no
    }

    /// Returns the number of pending (unflushed) bytes.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Appends one row to the stream.
    ///
    /// The wire form is `[i64 sequence_no][row]`.
    pub fn append(&mut self, row: &Row) -> EngineResult<()> {
        let mut out = VecOutput::new();
        out.write_i64(self.sequence_no)
            .and_then(|()| rowcodec::write_row(&mut out, row))
            .map_err(fission_common::EngineError::from)?;
        self.pending.extend_from_slice(out.as_slice());
        self.sequence_no += 1;
        Ok(())
    }

    /// Takes the pending bytes for handoff.
    ///
    /// Returns `(start_uso, bytes)` and advances the USO past them.
    #[must_use]
    pub fn take_pending(&mut self) -> (i64, Vec<u8>) {
        let start = self.uso;
        let bytes = std::mem::take(&mut self.pending);
        self.uso = start + bytes.len() as i64;
        (start, bytes)
    }

    /// Restores stream positions after recovery.
    pub fn set_positions(&mut self, uso: i64, sequence_no: i64) {
        self.uso = uso;
        self.sequence_no = sequence_no;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fission_catalog::ColumnSpec;
    use fission_common::types::{DataType, Value};

    fn stream() -> StreamedTable {
        StreamedTable::new(Arc::new(TableSpec {
            name: "events".to_string(),
            table_id: TableId::new(9),
            signature: "events|bigint:v".to_string(),
            is_replicated: false,
            is_streamed: true,
            columns: vec![ColumnSpec::nullable("v", DataType::BigInt)],
            primary_key: vec![],
            indexes: vec![],
            view: None,
        }))
    }

    #[test]
    fn test_append_tracks_sequence() {
        let mut stream = stream();
        stream.append(&Row::new(vec![Value::BigInt(1)])).unwrap();
        stream.append(&Row::new(vec![Value::BigInt(2)])).unwrap();
        assert_eq!(stream.sequence_no(), 2);
        assert!(stream.pending_bytes() > 0);
    }

    #[test]
    fn test_take_pending_advances_uso() {
        let mut stream = stream();
        stream.append(&Row::new(vec![Value::BigInt(1)])).unwrap();
        let pending = stream.pending_bytes() as i64;

        let (start, bytes) = stream.take_pending();
        assert_eq!(start, 0);
        assert_eq!(bytes.len() as i64, pending);
        assert_eq!(stream.uso(), pending);
        assert_eq!(stream.pending_bytes(), 0);

        stream.append(&Row::new(vec![Value::BigInt(2)])).unwrap();
        let (start, _) = stream.take_pending();
        assert_eq!(start, pending);
    }

    #[test]
    fn test_set_positions() {
        let mut stream = stream();
        stream.set_positions(1024, 17);
        assert_eq!(stream.uso(), 1024);
        assert_eq!(stream.sequence_no(), 17);
    }
}
