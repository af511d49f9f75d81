//! Temp tables flowing between executors.

use fission_common::types::{Row, Value};
use fission_common::{EngineError, EngineResult};

/// An unindexed, memory-bounded row buffer produced by one executor and
/// consumed by the next.
#[derive(Debug, Default)]
pub struct TempTable {
    rows: Vec<Row>,
    bytes: usize,
}

impl TempTable {
    /// Creates an empty temp table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a row, charging it against the fragment's memory budget.
    pub fn push(&mut self, row: Row, limit: usize) -> EngineResult<()> {
        self.bytes += approx_row_size(&row);
        if self.bytes > limit {
            return Err(EngineError::Serialization {
                message: format!("temp table memory limit of {limit} bytes exceeded"),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Returns the buffered rows.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consumes the table and returns its rows.
    #[must_use]
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Returns the number of buffered rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no rows are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the approximate memory footprint in bytes.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        self.bytes
    }

    /// Builds a temp table from rows already in memory.
    pub fn from_rows(rows: Vec<Row>, limit: usize) -> EngineResult<Self> {
        let mut table = Self::new();
        for row in rows {
            table.push(row, limit)?;
        }
        Ok(table)
    }
}

fn approx_row_size(row: &Row) -> usize {
    let mut size = 16 + row.num_columns() * 16;
    for value in row.iter() {
        size += match value {
            Value::Varchar(s) => s.len(),
            Value::Varbinary(b) => b.len(),
            _ => 0,
        };
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_limit() {
        let mut table = TempTable::new();
        table
            .push(Row::new(vec![Value::Int(1)]), 1024)
            .unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.approx_bytes() > 0);
    }

    #[test]
    fn test_limit_enforced() {
        let mut table = TempTable::new();
        let err = table.push(Row::new(vec![Value::Int(1)]), 8).unwrap_err();
        assert!(matches!(err, EngineError::Serialization { .. }));
    }

    #[test]
    fn test_string_payload_counted() {
        let mut small = TempTable::new();
        small.push(Row::new(vec![Value::Int(1)]), 1024).unwrap();
        let mut big = TempTable::new();
        big.push(
            Row::new(vec![Value::Varchar("x".repeat(100))]),
            1024,
        )
        .unwrap();
        assert!(big.approx_bytes() > small.approx_bytes());
    }
}
