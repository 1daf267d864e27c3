//! Period rollups: a metric's aggregated value over a named period
//! (week/month/MTD/QTD/YTD), for both the current year and prior year.

use serde::Serialize;

use crate::calendar::{Calendar, DayRange};
use crate::config::AggFn;
use crate::metrics::table::DailySeries;

/// A rollup value, or the absence of one. `NotApplicable` covers both an
/// empty period (nothing to aggregate) and a divide-by-zero/missing-operand
/// result further up the function chain — both render as `"N/A"` and never
/// reach the deck JSON as `NaN`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RollupValue {
    Value(f64),
    NotApplicable,
}

impl RollupValue {
    pub fn as_option(&self) -> Option<f64> {
        match self {
            RollupValue::Value(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    pub fn from_option(v: Option<f64>) -> Self {
        match v {
            Some(v) if v.is_finite() => RollupValue::Value(v),
            _ => RollupValue::NotApplicable,
        }
    }
}

/// Every rollup a block might need for one metric, for both CY and PY.
#[derive(Debug, Clone)]
pub struct Rollup {
    pub weekly_cy: [RollupValue; 6],
    pub weekly_py: [RollupValue; 6],
    pub monthly_cy: [RollupValue; 12],
    pub monthly_py: [RollupValue; 12],
    pub mtd_cy: RollupValue,
    pub mtd_py: RollupValue,
    pub qtd_cy: RollupValue,
    pub qtd_py: RollupValue,
    pub ytd_cy: RollupValue,
    pub ytd_py: RollupValue,
}

/// Aggregates `aggf` over every value of `series` whose date falls in
/// `range`. `last` returns the value at the latest date in range; every
/// aggregation is undefined (`NotApplicable`) over an empty period.
pub fn aggregate(series: &DailySeries, range: DayRange, aggf: AggFn) -> RollupValue {
    let mut values: Vec<(chrono::NaiveDate, f64)> = series.dates_in(range).collect();
    if values.is_empty() {
        return RollupValue::NotApplicable;
    }
    values.sort_by_key(|(d, _)| *d);

    let result = match aggf {
        AggFn::Sum => values.iter().map(|(_, v)| v).sum(),
        AggFn::Mean => values.iter().map(|(_, v)| v).sum::<f64>() / values.len() as f64,
        AggFn::Min => values
            .iter()
            .map(|(_, v)| *v)
            .fold(f64::INFINITY, f64::min),
        AggFn::Max => values
            .iter()
            .map(|(_, v)| *v)
            .fold(f64::NEG_INFINITY, f64::max),
        AggFn::Last => values.last().unwrap().1,
    };
    RollupValue::Value(result)
}

/// Computes every rollup window for one metric's daily series.
pub fn compute_rollup(series: &DailySeries, calendar: &Calendar, aggf: AggFn) -> Rollup {
    let weekly_cy = calendar.cy_weeks().map(|r| aggregate(series, r, aggf));
    let weekly_py = calendar.py_weeks().map(|r| aggregate(series, r, aggf));
    let monthly_cy = calendar.cy_months().map(|r| aggregate(series, r, aggf));
    let monthly_py = calendar.py_months().map(|r| aggregate(series, r, aggf));

    Rollup {
        weekly_cy,
        weekly_py,
        monthly_cy,
        monthly_py,
        mtd_cy: aggregate(series, calendar.mtd_cy(), aggf),
        mtd_py: aggregate(series, calendar.mtd_py(), aggf),
        qtd_cy: aggregate(series, calendar.qtd_cy(), aggf),
        qtd_py: aggregate(series, calendar.qtd_py(), aggf),
        ytd_cy: aggregate(series, calendar.ytd_cy(), aggf),
        ytd_py: aggregate(series, calendar.ytd_py(), aggf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn series_of_ones(start: NaiveDate, days: i64) -> DailySeries {
        let mut s = DailySeries::default();
        for i in 0..days {
            s.insert(start + chrono::Duration::days(i), 1.0);
        }
        s
    }

    #[test]
    fn sum_over_week_matches_day_count() {
        let cal = Calendar::new(NaiveDate::from_ymd_opt(2021, 9, 25).unwrap(), 12);
        let series = series_of_ones(NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(), 1000);
        let rollup = compute_rollup(&series, &cal, AggFn::Sum);
        assert_eq!(rollup.weekly_cy[5], RollupValue::Value(7.0));
    }

    #[test]
    fn empty_period_is_not_applicable() {
        let cal = Calendar::new(NaiveDate::from_ymd_opt(2021, 9, 25).unwrap(), 12);
        let series = DailySeries::default();
        let rollup = compute_rollup(&series, &cal, AggFn::Sum);
        assert_eq!(rollup.weekly_cy[0], RollupValue::NotApplicable);
    }

    #[test]
    fn last_takes_most_recent_value_in_period() {
        let cal = Calendar::new(NaiveDate::from_ymd_opt(2021, 9, 25).unwrap(), 12);
        let mut series = DailySeries::default();
        series.insert(NaiveDate::from_ymd_opt(2021, 9, 20).unwrap(), 10.0);
        series.insert(NaiveDate::from_ymd_opt(2021, 9, 25).unwrap(), 20.0);
        let rollup = compute_rollup(&series, &cal, AggFn::Last);
        assert_eq!(rollup.weekly_cy[5], RollupValue::Value(20.0));
    }
}
