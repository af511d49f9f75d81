//! Runtime values for plan execution and view maintenance.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Column data types understood by the engine.
///
/// The discriminants double as the wire type tags used by the row codec,
/// so they are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i8)]
pub enum DataType {
    /// 8-bit signed integer.
    TinyInt = 1,
    /// 16-bit signed integer.
    SmallInt = 2,
    /// 32-bit signed integer.
    Int = 3,
    /// 64-bit signed integer.
    BigInt = 4,
    /// 64-bit IEEE float.
    Double = 5,
    /// Variable-length string.
    Varchar = 6,
    /// Variable-length binary.
    Varbinary = 7,
    /// Microseconds since the epoch.
    Timestamp = 8,
}

impl DataType {
    /// Returns the wire type tag.
    #[inline]
    #[must_use]
    pub const fn as_i8(self) -> i8 {
        self as i8
    }

    /// Resolves a wire type tag back to a data type.
    pub fn from_i8(tag: i8) -> EngineResult<Self> {
        match tag {
            1 => Ok(Self::TinyInt),
            2 => Ok(Self::SmallInt),
            3 => Ok(Self::Int),
            4 => Ok(Self::BigInt),
            5 => Ok(Self::Double),
            6 => Ok(Self::Varchar),
            7 => Ok(Self::Varbinary),
            8 => Ok(Self::Timestamp),
            _ => Err(EngineError::serialization(format!(
                "unknown value type tag {tag}"
            ))),
        }
    }

    /// Returns true for the numeric types.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::TinyInt | Self::SmallInt | Self::Int | Self::BigInt | Self::Double
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A runtime value flowing through executors, indexes, and view handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// NULL of any type.
    Null,
    /// 8-bit signed integer.
    TinyInt(i8),
    /// 16-bit signed integer.
    SmallInt(i16),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    BigInt(i64),
    /// 64-bit IEEE float.
    Double(f64),
    /// Variable-length string.
    Varchar(String),
    /// Variable-length binary.
    Varbinary(Vec<u8>),
    /// Microseconds since the epoch.
    Timestamp(i64),
}

impl Value {
    /// Returns true if this value is NULL.
    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the data type of this value, or `None` for NULL.
    #[must_use]
    pub const fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::TinyInt(_) => Some(DataType::TinyInt),
            Self::SmallInt(_) => Some(DataType::SmallInt),
            Self::Int(_) => Some(DataType::Int),
            Self::BigInt(_) => Some(DataType::BigInt),
            Self::Double(_) => Some(DataType::Double),
            Self::Varchar(_) => Some(DataType::Varchar),
            Self::Varbinary(_) => Some(DataType::Varbinary),
            Self::Timestamp(_) => Some(DataType::Timestamp),
        }
    }

    /// Converts this value to an i64, if it is integral.
    #[must_use]
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            Self::TinyInt(v) => Some(i64::from(*v)),
            Self::SmallInt(v) => Some(i64::from(*v)),
            Self::Int(v) => Some(i64::from(*v)),
            Self::BigInt(v) | Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Converts this value to an f64, if it is numeric.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            other => other.to_i64().map(|v| v as f64),
        }
    }

    /// Adds another value to this one, promoting to the wider numeric type.
    ///
    /// Used by the view maintainer to merge SUM/COUNT deltas. Neither side
    /// may be NULL; NULL handling happens at the merge sites.
    pub fn add(&self, other: &Value) -> EngineResult<Value> {
        self.arith(other, "add", i64::checked_add, |a, b| a + b)
    }

    /// Subtracts another value from this one.
    pub fn sub(&self, other: &Value) -> EngineResult<Value> {
        self.arith(other, "subtract", i64::checked_sub, |a, b| a - b)
    }

    fn arith(
        &self,
        other: &Value,
        operation: &'static str,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> EngineResult<Value> {
        if matches!(self, Self::Double(_)) || matches!(other, Self::Double(_)) {
            let (a, b) = (self.require_f64()?, other.require_f64()?);
            return Ok(Value::Double(float_op(a, b)));
        }
        let (a, b) = (self.require_i64()?, other.require_i64()?);
        let result = int_op(a, b).ok_or(EngineError::NumericOverflow { operation })?;
        // Keep the wider of the two operand types for the result.
        let width = self.int_width().max(other.int_width());
        Ok(match width {
            1 if i8::try_from(result).is_ok() => Value::TinyInt(result as i8),
            2 if i16::try_from(result).is_ok() => Value::SmallInt(result as i16),
            3 if i32::try_from(result).is_ok() => Value::Int(result as i32),
            _ => Value::BigInt(result),
        })
    }

    fn int_width(&self) -> u8 {
        match self {
            Self::TinyInt(_) => 1,
            Self::SmallInt(_) => 2,
            Self::Int(_) => 3,
            _ => 4,
        }
    }

    fn require_i64(&self) -> EngineResult<i64> {
        self.to_i64().ok_or(EngineError::TypeMismatch {
            expected: "integer",
            actual: self.type_name(),
        })
    }

    fn require_f64(&self) -> EngineResult<f64> {
        self.to_f64().ok_or(EngineError::TypeMismatch {
            expected: "numeric",
            actual: self.type_name(),
        })
    }

    /// Returns a short name for this value's runtime type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::TinyInt(_) => "tinyint",
            Self::SmallInt(_) => "smallint",
            Self::Int(_) => "int",
            Self::BigInt(_) => "bigint",
            Self::Double(_) => "double",
            Self::Varchar(_) => "varchar",
            Self::Varbinary(_) => "varbinary",
            Self::Timestamp(_) => "timestamp",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // NULL sorts before every non-NULL value.
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,

            (Self::Varchar(a), Self::Varchar(b)) => a.cmp(b),
            (Self::Varbinary(a), Self::Varbinary(b)) => a.cmp(b),
            (Self::Timestamp(a), Self::Timestamp(b)) => a.cmp(b),

            // Numeric comparisons promote through i64 where possible to
            // keep exact semantics, and through f64 only when a Double is
            // involved.
            (a, b) => match (a.to_i64(), b.to_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => match (a.to_f64(), b.to_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                    // Incomparable types fall back to the type tag order.
                    _ => a.type_name().cmp(b.type_name()),
                },
            },
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::Varchar(s) => s.hash(state),
            Self::Varbinary(b) => b.hash(state),
            // All integral types hash through i64 so that values that
            // compare equal hash equal.
            other => other.to_i64().hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::TinyInt(v) => write!(f, "{}", v),
            Self::SmallInt(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::BigInt(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Varchar(s) => write!(f, "{}", s),
            Self::Varbinary(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Self::Timestamp(v) => write!(f, "ts:{}", v),
        }
    }
}
