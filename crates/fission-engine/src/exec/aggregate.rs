//! Hash aggregation executor.

use std::collections::HashMap;

use fission_common::types::{Row, Value};
use fission_common::{EngineError, EngineResult};
use fission_plan::{AggregateOp, AggregateSpec};

use super::context::ExecContext;
use super::temp::TempTable;
use super::Executor;

/// Groups input rows and computes one aggregate column per declared
/// aggregate.
///
/// Output rows are the group-by values (in declaration order) followed by
/// the aggregates. With no group-by columns exactly one row is emitted,
/// even over empty input; that one row is what seeds a group-by-less
/// materialized view.
pub struct AggregateExecutor {
    group_by: Vec<usize>,
    aggregates: Vec<AggregateSpec>,
}

impl AggregateExecutor {
    pub fn new(group_by: Vec<usize>, aggregates: Vec<AggregateSpec>) -> Self {
        Self {
            group_by,
            aggregates,
        }
    }

    fn fresh_accumulators(&self) -> Vec<Accumulator> {
        self.aggregates
            .iter()
            .map(|spec| Accumulator::new(spec.op))
            .collect()
    }
}

impl Executor for AggregateExecutor {
    fn execute(
        &self,
        ctx: &mut ExecContext<'_>,
        input: Option<TempTable>,
    ) -> EngineResult<TempTable> {
        let input = input.unwrap_or_default();

        // Group state, in first-seen order.
        let mut group_index: HashMap<Vec<Value>, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Value>, Vec<Accumulator>)> = Vec::new();

        if self.group_by.is_empty() {
            group_index.insert(Vec::new(), 0);
            groups.push((Vec::new(), self.fresh_accumulators()));
        }

        for row in input.rows() {
            let key: Vec<Value> = self
                .group_by
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                .collect();
            let slot = match group_index.get(&key) {
                Some(&slot) => slot,
                None => {
                    let slot = groups.len();
                    group_index.insert(key.clone(), slot);
                    groups.push((key, self.fresh_accumulators()));
                    slot
                }
            };
            for (accumulator, spec) in groups[slot].1.iter_mut().zip(&self.aggregates) {
                let value = spec
                    .column
                    .and_then(|c| row.get(c))
                    .cloned()
                    .unwrap_or(Value::Null);
                accumulator.accumulate(&value)?;
            }
        }

        let mut output = TempTable::new();
        for (key, accumulators) in groups {
            let mut values = key;
            for accumulator in accumulators {
                values.push(accumulator.finish());
            }
            output.push(Row::new(values), ctx.temp_limit)?;
        }
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "aggregate"
    }
}

/// Running state of one aggregate within one group.
enum Accumulator {
    Sum(Option<Value>),
    Count(i64),
    CountStar(i64),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, count: i64 },
}

impl Accumulator {
    fn new(op: AggregateOp) -> Self {
        match op {
            AggregateOp::Sum => Self::Sum(None),
            AggregateOp::Count => Self::Count(0),
            AggregateOp::CountStar => Self::CountStar(0),
            AggregateOp::Min => Self::Min(None),
            AggregateOp::Max => Self::Max(None),
            AggregateOp::Avg => Self::Avg { sum: 0.0, count: 0 },
        }
    }

    fn accumulate(&mut self, value: &Value) -> EngineResult<()> {
        match self {
            Self::CountStar(count) => *count += 1,
            _ if value.is_null() => {}
            Self::Sum(state) => {
                *state = Some(match state.take() {
                    Some(current) => current.add(value)?,
                    None => value.clone(),
                });
            }
            Self::Count(count) => *count += 1,
            Self::Min(state) => {
                let keep_current = state.as_ref().is_some_and(|current| current <= value);
                if !keep_current {
                    *state = Some(value.clone());
                }
            }
            Self::Max(state) => {
                let keep_current = state.as_ref().is_some_and(|current| current >= value);
                if !keep_current {
                    *state = Some(value.clone());
                }
            }
            Self::Avg { sum, count } => {
                let v = value.to_f64().ok_or(EngineError::TypeMismatch {
                    expected: "numeric",
                    actual: value.type_name(),
                })?;
                *sum += v;
                *count += 1;
            }
            Self::CountStar(_) => unreachable!(),
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            Self::Sum(state) | Self::Min(state) | Self::Max(state) => {
                state.unwrap_or(Value::Null)
            }
            Self::Count(count) | Self::CountStar(count) => Value::BigInt(count),
            Self::Avg { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Double(sum / count as f64)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_star_counts_nulls() {
        let mut acc = Accumulator::new(AggregateOp::CountStar);
        acc.accumulate(&Value::Null).unwrap();
        acc.accumulate(&Value::Int(1)).unwrap();
        assert_eq!(acc.finish(), Value::BigInt(2));
    }

    #[test]
    fn test_count_skips_nulls() {
        let mut acc = Accumulator::new(AggregateOp::Count);
        acc.accumulate(&Value::Null).unwrap();
        acc.accumulate(&Value::Int(1)).unwrap();
        assert_eq!(acc.finish(), Value::BigInt(1));
    }

    #[test]
    fn test_sum_and_min_max() {
        let mut sum = Accumulator::new(AggregateOp::Sum);
        let mut min = Accumulator::new(AggregateOp::Min);
        let mut max = Accumulator::new(AggregateOp::Max);
        for v in [5, 7, 3] {
            sum.accumulate(&Value::Int(v)).unwrap();
            min.accumulate(&Value::Int(v)).unwrap();
            max.accumulate(&Value::Int(v)).unwrap();
        }
        assert_eq!(sum.finish(), Value::Int(15));
        assert_eq!(min.finish(), Value::Int(3));
        assert_eq!(max.finish(), Value::Int(7));
    }

    #[test]
    fn test_empty_aggregates_finish_null_or_zero() {
        assert_eq!(Accumulator::new(AggregateOp::Sum).finish(), Value::Null);
        assert_eq!(Accumulator::new(AggregateOp::Min).finish(), Value::Null);
        assert_eq!(
            Accumulator::new(AggregateOp::CountStar).finish(),
            Value::BigInt(0)
        );
        assert_eq!(Accumulator::new(AggregateOp::Avg).finish(), Value::Null);
    }

    #[test]
    fn test_avg() {
        let mut acc = Accumulator::new(AggregateOp::Avg);
        acc.accumulate(&Value::Int(1)).unwrap();
        acc.accumulate(&Value::Int(2)).unwrap();
        assert_eq!(acc.finish(), Value::Double(1.5));
    }
}
