//! Wire formats for values, rows, result sets, and table payloads.
//!
//! Every value is written as `[i8 type_tag][payload]` with tag `0` for NULL.
//! Rows carry an `i16` column count. Result dependencies are
//! `[i32 dep_id][i32 row_count][rows…]`. Table payloads (used by the
//! `LoadTable` command and snapshot streaming) prepend a CRC32 of the body:
//! `[u32 crc][i16 column_count][i8 tag…][i32 row_count][rows…]`.

use fission_common::types::{DataType, Row, Value};

use crate::error::{CodecError, CodecResult};
use crate::input::SerializeInput;
use crate::output::{Output, VecOutput};

/// Wire tag for a NULL value.
const NULL_TAG: i8 = 0;

/// Writes one value.
pub fn write_value<O: Output + ?Sized>(out: &mut O, value: &Value) -> CodecResult<()> {
    match value {
        Value::Null => out.write_i8(NULL_TAG),
        Value::TinyInt(v) => {
            out.write_i8(DataType::TinyInt.as_i8())?;
            out.write_i8(*v)
        }
        Value::SmallInt(v) => {
            out.write_i8(DataType::SmallInt.as_i8())?;
            out.write_i16(*v)
        }
        Value::Int(v) => {
            out.write_i8(DataType::Int.as_i8())?;
            out.write_i32(*v)
        }
        Value::BigInt(v) => {
            out.write_i8(DataType::BigInt.as_i8())?;
            out.write_i64(*v)
        }
        Value::Double(v) => {
            out.write_i8(DataType::Double.as_i8())?;
            out.write_f64(*v)
        }
        Value::Varchar(s) => {
            out.write_i8(DataType::Varchar.as_i8())?;
            out.write_string(s)
        }
        Value::Varbinary(b) => {
            out.write_i8(DataType::Varbinary.as_i8())?;
            out.write_i32(b.len() as i32)?;
            out.write_bytes(b)
        }
        Value::Timestamp(v) => {
            out.write_i8(DataType::Timestamp.as_i8())?;
            out.write_i64(*v)
        }
    }
}

/// Reads one value.
pub fn read_value(input: &mut SerializeInput<'_>) -> CodecResult<Value> {
    let tag = input.read_i8()?;
    if tag == NULL_TAG {
        return Ok(Value::Null);
    }
    let dtype = DataType::from_i8(tag)
        .map_err(|_| CodecError::Malformed(format!("unknown value type tag {tag}")))?;
    Ok(match dtype {
        DataType::TinyInt => Value::TinyInt(input.read_i8()?),
        DataType::SmallInt => Value::SmallInt(input.read_i16()?),
        DataType::Int => Value::Int(input.read_i32()?),
        DataType::BigInt => Value::BigInt(input.read_i64()?),
        DataType::Double => Value::Double(input.read_f64()?),
        DataType::Varchar => Value::Varchar(input.read_string()?),
        DataType::Varbinary => {
            let len = input.read_i32()?;
            if len < 0 {
                return Err(CodecError::Malformed(format!(
                    "negative varbinary length {len}"
                )));
            }
            Value::Varbinary(input.read_bytes(len as usize)?.to_vec())
        }
        DataType::Timestamp => Value::Timestamp(input.read_i64()?),
    })
}

/// Writes one row as `[i16 column_count][values…]`.
pub fn write_row<O: Output + ?Sized>(out: &mut O, row: &Row) -> CodecResult<()> {
    out.write_i16(row.num_columns() as i16)?;
    for value in row.iter() {
        write_value(out, value)?;
    }
    Ok(())
}

/// Reads one row.
pub fn read_row(input: &mut SerializeInput<'_>) -> CodecResult<Row> {
    let count = input.read_i16()?;
    if count < 0 {
        return Err(CodecError::Malformed(format!(
            "negative column count {count}"
        )));
    }
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(read_value(input)?);
    }
    Ok(Row::new(values))
}

/// Writes one result dependency: `[i32 dep_id][i32 row_count][rows…]`.
pub fn write_result_set<O: Output + ?Sized>(
    out: &mut O,
    dep_id: i32,
    rows: &[Row],
) -> CodecResult<()> {
    out.write_i32(dep_id)?;
    out.write_i32(rows.len() as i32)?;
    for row in rows {
        write_row(out, row)?;
    }
    Ok(())
}

/// Reads one result dependency; returns `(dep_id, rows)`.
pub fn read_result_set(input: &mut SerializeInput<'_>) -> CodecResult<(i32, Vec<Row>)> {
    let dep_id = input.read_i32()?;
    let count = input.read_i32()?;
    if count < 0 {
        return Err(CodecError::Malformed(format!("negative row count {count}")));
    }
    let mut rows = Vec::with_capacity(count as usize);
    for _ in 0..count {
        rows.push(read_row(input)?);
    }
    Ok((dep_id, rows))
}

/// Encodes a checksummed table payload.
pub fn encode_table_payload(column_types: &[DataType], rows: &[Row]) -> Vec<u8> {
    let mut out = VecOutput::new();
    out.write_i16(column_types.len() as i16).expect("vec write");
    for dtype in column_types {
        out.write_i8(dtype.as_i8()).expect("vec write");
    }
    out.write_i32(rows.len() as i32).expect("vec write");
    for row in rows {
        write_row(&mut out, row).expect("vec write");
    }
    let body = out.into_bytes();

    let crc = crc32fast::hash(&body);
    let mut payload = Vec::with_capacity(4 + body.len());
    payload.extend_from_slice(&crc.to_be_bytes());
    payload.extend_from_slice(&body);
    payload
}

/// Decodes a checksummed table payload; returns `(column_types, rows)`.
pub fn decode_table_payload(payload: &[u8]) -> CodecResult<(Vec<DataType>, Vec<Row>)> {
    let mut input = SerializeInput::new(payload);
    let expected = input.read_u32()?;
    let body = &payload[input.position()..];
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }

    let column_count = input.read_i16()?;
    if column_count < 0 {
        return Err(CodecError::Malformed(format!(
            "negative column count {column_count}"
        )));
    }
    let mut column_types = Vec::with_capacity(column_count as usize);
    for _ in 0..column_count {
        let tag = input.read_i8()?;
        column_types.push(
            DataType::from_i8(tag)
                .map_err(|_| CodecError::Malformed(format!("unknown column type tag {tag}")))?,
        );
    }

    let row_count = input.read_i32()?;
    if row_count < 0 {
        return Err(CodecError::Malformed(format!(
            "negative row count {row_count}"
        )));
    }
    let mut rows = Vec::with_capacity(row_count as usize);
    for _ in 0..row_count {
        let row = read_row(&mut input)?;
        if row.num_columns() != column_count as usize {
            return Err(CodecError::Malformed(format!(
                "row has {} columns, table has {}",
                row.num_columns(),
                column_count
            )));
        }
        rows.push(row);
    }
    Ok((column_types, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::SerializeOutput;

    fn sample_row() -> Row {
        Row::new(vec![
            Value::Int(7),
            Value::Null,
            Value::Varchar("abc".into()),
            Value::Double(1.5),
        ])
    }

    #[test]
    fn test_value_roundtrip() {
        let values = [
            Value::Null,
            Value::TinyInt(-3),
            Value::SmallInt(300),
            Value::Int(-70000),
            Value::BigInt(1 << 40),
            Value::Double(0.25),
            Value::Varchar("partition".into()),
            Value::Varbinary(vec![0, 1, 2]),
            Value::Timestamp(1_700_000_000_000_000),
        ];
        let mut out = SerializeOutput::new(256);
        for value in &values {
            write_value(&mut out, value).unwrap();
        }
        let mut input = SerializeInput::new(out.as_slice());
        for value in &values {
            assert_eq!(&read_value(&mut input).unwrap(), value);
        }
    }

    #[test]
    fn test_result_set_roundtrip() {
        let rows = vec![sample_row(), sample_row()];
        let mut out = SerializeOutput::new(1024);
        write_result_set(&mut out, 42, &rows).unwrap();

        let mut input = SerializeInput::new(out.as_slice());
        let (dep_id, decoded) = read_result_set(&mut input).unwrap();
        assert_eq!(dep_id, 42);
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_table_payload_roundtrip() {
        let types = vec![DataType::Int, DataType::Varchar];
        let rows = vec![
            Row::new(vec![Value::Int(1), Value::Varchar("a".into())]),
            Row::new(vec![Value::Int(2), Value::Null]),
        ];
        let payload = encode_table_payload(&types, &rows);
        let (decoded_types, decoded_rows) = decode_table_payload(&payload).unwrap();
        assert_eq!(decoded_types, types);
        assert_eq!(decoded_rows, rows);
    }

    #[test]
    fn test_table_payload_checksum_detects_corruption() {
        let payload = encode_table_payload(&[DataType::Int], &[Row::new(vec![Value::Int(1)])]);
        let mut corrupted = payload.clone();
        *corrupted.last_mut().unwrap() ^= 0xff;
        assert!(matches!(
            decode_table_payload(&corrupted).unwrap_err(),
            CodecError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn test_table_payload_column_count_enforced() {
        // Hand-build a payload whose row disagrees with the header.
        let mut body = Vec::new();
        body.extend_from_slice(&2i16.to_be_bytes());
        body.push(DataType::Int.as_i8() as u8);
        body.push(DataType::Int.as_i8() as u8);
        body.extend_from_slice(&1i32.to_be_bytes());
        let mut out = SerializeOutput::new(64);
        write_row(&mut out, &Row::new(vec![Value::Int(1)])).unwrap();
        body.extend_from_slice(out.as_slice());

        let mut payload = crc32fast::hash(&body).to_be_bytes().to_vec();
        payload.extend_from_slice(&body);
        assert!(matches!(
            decode_table_payload(&payload).unwrap_err(),
            CodecError::Malformed(_)
        ));
    }
}
