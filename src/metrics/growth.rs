//! Growth derivatives: for every declared metric `M`, the engine
//! auto-synthesizes `M.WOW`, `M.MOM`, `M.YOY` as function metrics, materialized
//! lazily on first reference rather than declared in the config.
//!
//! `YOY` is defined for every rollup period (weekly, monthly, MTD/QTD/YTD).
//! `WOW`/`MOM` are native to their own granularity (week-over-week,
//! month-over-month respectively); outside it — e.g. `WOW`'s MTD slot —
//! there is no formula in the distilled spec to generalize from, so those
//! slots are `NotApplicable` rather than guessed at.

use crate::metrics::rollup::{Rollup, RollupValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthKind {
    Wow,
    Mom,
    Yoy,
}

impl GrowthKind {
    pub fn suffix(self) -> &'static str {
        match self {
            GrowthKind::Wow => "WOW",
            GrowthKind::Mom => "MOM",
            GrowthKind::Yoy => "YOY",
        }
    }
}

fn ratio(numerator: RollupValue, denominator: RollupValue) -> RollupValue {
    match (numerator.as_option(), denominator.as_option()) {
        (Some(n), Some(d)) if d != 0.0 => RollupValue::Value((n - d) / d),
        _ => RollupValue::NotApplicable,
    }
}

fn period_over_period(values: &[RollupValue]) -> Vec<RollupValue> {
    values
        .iter()
        .enumerate()
        .map(|(i, current)| {
            if i == 0 {
                RollupValue::NotApplicable
            } else {
                ratio(*current, values[i - 1])
            }
        })
        .collect()
}

/// Builds the `M.WOW` rollup from `M`'s own rollup.
pub fn week_over_week(base: &Rollup) -> Rollup {
    let weekly_cy: [RollupValue; 6] = period_over_period(&base.weekly_cy).try_into().unwrap();
    Rollup {
        weekly_cy,
        weekly_py: [RollupValue::NotApplicable; 6],
        monthly_cy: [RollupValue::NotApplicable; 12],
        monthly_py: [RollupValue::NotApplicable; 12],
        mtd_cy: RollupValue::NotApplicable,
        mtd_py: RollupValue::NotApplicable,
        qtd_cy: RollupValue::NotApplicable,
        qtd_py: RollupValue::NotApplicable,
        ytd_cy: RollupValue::NotApplicable,
        ytd_py: RollupValue::NotApplicable,
    }
}

/// Builds the `M.MOM` rollup from `M`'s own rollup.
pub fn month_over_month(base: &Rollup) -> Rollup {
    let monthly_cy: [RollupValue; 12] = period_over_period(&base.monthly_cy).try_into().unwrap();
    Rollup {
        weekly_cy: [RollupValue::NotApplicable; 6],
        weekly_py: [RollupValue::NotApplicable; 6],
        monthly_cy,
        monthly_py: [RollupValue::NotApplicable; 12],
        mtd_cy: RollupValue::NotApplicable,
        mtd_py: RollupValue::NotApplicable,
        qtd_cy: RollupValue::NotApplicable,
        qtd_py: RollupValue::NotApplicable,
        ytd_cy: RollupValue::NotApplicable,
        ytd_py: RollupValue::NotApplicable,
    }
}

/// Builds the `M.YOY` rollup: `(CY - PY) / PY`, evaluated independently for
/// every period slot `M`'s own rollup defines.
pub fn year_over_year(base: &Rollup) -> Rollup {
    let weekly_cy: [RollupValue; 6] = (0..6)
        .map(|i| ratio(base.weekly_cy[i], base.weekly_py[i]))
        .collect::<Vec<_>>()
        .try_into()
        .unwrap();
    let monthly_cy: [RollupValue; 12] = (0..12)
        .map(|i| ratio(base.monthly_cy[i], base.monthly_py[i]))
        .collect::<Vec<_>>()
        .try_into()
        .unwrap();

    Rollup {
        weekly_cy,
        weekly_py: [RollupValue::NotApplicable; 6],
        monthly_cy,
        monthly_py: [RollupValue::NotApplicable; 12],
        mtd_cy: ratio(base.mtd_cy, base.mtd_py),
        mtd_py: RollupValue::NotApplicable,
        qtd_cy: ratio(base.qtd_cy, base.qtd_py),
        qtd_py: RollupValue::NotApplicable,
        ytd_cy: ratio(base.ytd_cy, base.ytd_py),
        ytd_py: RollupValue::NotApplicable,
    }
}

pub fn synthesize(kind: GrowthKind, base: &Rollup) -> Rollup {
    match kind {
        GrowthKind::Wow => week_over_week(base),
        GrowthKind::Mom => month_over_month(base),
        GrowthKind::Yoy => year_over_year(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_rollup(value: f64) -> Rollup {
        Rollup {
            weekly_cy: [RollupValue::Value(value); 6],
            weekly_py: [RollupValue::Value(value / 2.0); 6],
            monthly_cy: [RollupValue::Value(value); 12],
            monthly_py: [RollupValue::Value(value / 2.0); 12],
            mtd_cy: RollupValue::Value(value),
            mtd_py: RollupValue::Value(value / 2.0),
            qtd_cy: RollupValue::Value(value),
            qtd_py: RollupValue::Value(value / 2.0),
            ytd_cy: RollupValue::Value(value),
            ytd_py: RollupValue::Value(value / 2.0),
        }
    }

    #[test]
    fn yoy_symmetry_matches_formula() {
        let base = flat_rollup(100.0);
        let yoy = year_over_year(&base);
        // (100 - 50) / 50 == 1.0
        assert_eq!(yoy.weekly_cy[3], RollupValue::Value(1.0));
        assert_eq!(yoy.ytd_cy, RollupValue::Value(1.0));
    }

    #[test]
    fn wow_undefined_at_first_week() {
        let base = flat_rollup(100.0);
        let wow = week_over_week(&base);
        assert_eq!(wow.weekly_cy[0], RollupValue::NotApplicable);
        // flat series => 0% growth thereafter
        assert_eq!(wow.weekly_cy[1], RollupValue::Value(0.0));
    }

    #[test]
    fn yoy_is_not_applicable_when_prior_year_is_zero() {
        let mut base = flat_rollup(100.0);
        base.weekly_py[0] = RollupValue::Value(0.0);
        let yoy = year_over_year(&base);
        assert_eq!(yoy.weekly_cy[0], RollupValue::NotApplicable);
    }
}
