//! Function-metric evaluation: combine already-aggregated operand rollups
//! period by period. This is the "aggregate first, then combine" rule —
//! rates like CTR are `sum(Clicks)/sum(Impressions)` per window, never a
//! daily average of ratios, because each operand's `Rollup` was itself
//! built by aggregating a whole period before this step ever runs.

use crate::config::RawFunction;
use crate::metrics::rollup::{Rollup, RollupValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Sum,
    Difference,
    Divide,
    Product,
}

/// A function metric's operand, resolved to either a constant or another
/// metric's already-computed rollup.
pub enum ResolvedOperand<'a> {
    Constant(f64),
    Metric(&'a Rollup),
}

pub fn op_of(function: &RawFunction) -> Option<Op> {
    if function.sum.is_some() {
        Some(Op::Sum)
    } else if function.difference.is_some() {
        Some(Op::Difference)
    } else if function.divide.is_some() {
        Some(Op::Divide)
    } else if function.product.is_some() {
        Some(Op::Product)
    } else {
        None
    }
}

fn combine(op: Op, values: &[Option<f64>]) -> RollupValue {
    // Any missing operand propagates as undefined, except division, whose
    // undefined-divisor case is handled by `divide` directly so a missing
    // second operand and a zero second operand are treated identically.
    if op != Op::Divide && values.iter().any(|v| v.is_none()) {
        return RollupValue::NotApplicable;
    }

    match op {
        Op::Sum => RollupValue::Value(values.iter().filter_map(|v| *v).sum()),
        Op::Difference => {
            let mut iter = values.iter();
            let Some(Some(first)) = iter.next() else {
                return RollupValue::NotApplicable;
            };
            let rest: f64 = iter.filter_map(|v| *v).sum();
            RollupValue::Value(first - rest)
        }
        Op::Product => RollupValue::Value(values.iter().filter_map(|v| *v).product()),
        Op::Divide => {
            let numerator = values.first().copied().flatten();
            let denominator = values.get(1).copied().flatten();
            match (numerator, denominator) {
                (Some(n), Some(d)) if d != 0.0 => RollupValue::Value(n / d),
                _ => RollupValue::NotApplicable,
            }
        }
    }
}

/// Evaluates `op` over `operands` for every period slot a `Rollup` defines,
/// producing a combined `Rollup`.
pub fn evaluate(op: Op, operands: &[ResolvedOperand]) -> Rollup {
    let weekly_cy: [RollupValue; 6] =
        std::array::from_fn(|i| combine(op, &values_at(operands, |r| r.weekly_cy[i])));
    let weekly_py: [RollupValue; 6] =
        std::array::from_fn(|i| combine(op, &values_at(operands, |r| r.weekly_py[i])));
    let monthly_cy: [RollupValue; 12] =
        std::array::from_fn(|i| combine(op, &values_at(operands, |r| r.monthly_cy[i])));
    let monthly_py: [RollupValue; 12] =
        std::array::from_fn(|i| combine(op, &values_at(operands, |r| r.monthly_py[i])));

    Rollup {
        weekly_cy,
        weekly_py,
        monthly_cy,
        monthly_py,
        mtd_cy: combine(op, &values_at(operands, |r| r.mtd_cy)),
        mtd_py: combine(op, &values_at(operands, |r| r.mtd_py)),
        qtd_cy: combine(op, &values_at(operands, |r| r.qtd_cy)),
        qtd_py: combine(op, &values_at(operands, |r| r.qtd_py)),
        ytd_cy: combine(op, &values_at(operands, |r| r.ytd_cy)),
        ytd_py: combine(op, &values_at(operands, |r| r.ytd_py)),
    }
}

fn values_at(operands: &[ResolvedOperand], get: impl Fn(&Rollup) -> RollupValue) -> Vec<Option<f64>> {
    operands
        .iter()
        .map(|operand| match operand {
            ResolvedOperand::Constant(c) => Some(*c),
            ResolvedOperand::Metric(rollup) => get(rollup).as_option(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_rollup(value: f64) -> Rollup {
        Rollup {
            weekly_cy: [RollupValue::Value(value); 6],
            weekly_py: [RollupValue::Value(value); 6],
            monthly_cy: [RollupValue::Value(value); 12],
            monthly_py: [RollupValue::Value(value); 12],
            mtd_cy: RollupValue::Value(value),
            mtd_py: RollupValue::Value(value),
            qtd_cy: RollupValue::Value(value),
            qtd_py: RollupValue::Value(value),
            ytd_cy: RollupValue::Value(value),
            ytd_py: RollupValue::Value(value),
        }
    }

    #[test]
    fn divide_is_sum_of_operands_not_mean_of_ratios() {
        let clicks = constant_rollup(10.0);
        let impressions = constant_rollup(100.0);
        let result = evaluate(
            Op::Divide,
            &[
                ResolvedOperand::Metric(&clicks),
                ResolvedOperand::Metric(&impressions),
            ],
        );
        assert_eq!(result.weekly_cy[0], RollupValue::Value(0.1));
    }

    #[test]
    fn divide_by_zero_is_not_applicable() {
        let numerator = constant_rollup(10.0);
        let zero = constant_rollup(0.0);
        let result = evaluate(
            Op::Divide,
            &[ResolvedOperand::Metric(&numerator), ResolvedOperand::Metric(&zero)],
        );
        assert_eq!(result.weekly_cy[0], RollupValue::NotApplicable);
    }

    #[test]
    fn difference_subtracts_remaining_operands_from_first() {
        let a = constant_rollup(100.0);
        let b = constant_rollup(30.0);
        let c = constant_rollup(10.0);
        let result = evaluate(
            Op::Difference,
            &[
                ResolvedOperand::Metric(&a),
                ResolvedOperand::Metric(&b),
                ResolvedOperand::Metric(&c),
            ],
        );
        assert_eq!(result.ytd_cy, RollupValue::Value(60.0));
    }
}
