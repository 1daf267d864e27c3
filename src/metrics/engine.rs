//! Materializes base, filter, and function metrics; generates WOW/MOM/YOY
//! derivatives; aggregates into the period rollups the deck builder needs.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::calendar::Calendar;
use crate::config::{AggFn, Config, RawMetric, RawOperand};
use crate::error::{EngineError, EngineResult};
use crate::metrics::function::{self, Op, ResolvedOperand};
use crate::metrics::growth::{self, GrowthKind};
use crate::metrics::rollup::{compute_rollup, Rollup};
use crate::metrics::table::{CellValue, DailySeries, DailyTable};
use crate::source::filter::evaluate_predicate;

/// Produces every metric's `Rollup`, caching results for the lifetime of a
/// single build (including lazily-synthesized growth metrics).
pub struct MetricEngine<'a> {
    config: &'a Config,
    calendar: Calendar,
    master: &'a DailyTable,
    rollups: HashMap<String, Rollup>,
}

impl<'a> MetricEngine<'a> {
    pub fn build(config: &'a Config, master: &'a DailyTable) -> EngineResult<Self> {
        let calendar = Calendar::new(config.week_ending, config.fiscal_year_end_month);
        let mut engine = MetricEngine {
            config,
            calendar,
            master,
            rollups: HashMap::new(),
        };
        engine.materialize_all()?;
        Ok(engine)
    }

    fn materialize_all(&mut self) -> EngineResult<()> {
        // 1 & 2: basic and filter metrics first — they depend only on the
        // master table, never on other metrics.
        for (name, metric) in &self.config.metrics {
            match metric {
                RawMetric::Basic { column, aggf, .. } => {
                    let series = daily_series_for_column(self.master, column, *aggf)?;
                    let rollup = compute_rollup(&series, &self.calendar, *aggf);
                    self.rollups.insert(name.clone(), rollup);
                }
                RawMetric::Filter {
                    filter, aggf, ..
                } => {
                    let series =
                        daily_series_for_filter(self.master, &filter.base_column, &filter.query, *aggf)?;
                    let rollup = compute_rollup(&series, &self.calendar, *aggf);
                    self.rollups.insert(name.clone(), rollup);
                }
                RawMetric::Function { .. } => {}
            }
        }

        // 3: function metrics, in topological order.
        for name in self.function_metric_topo_order()? {
            let metric = &self.config.metrics[&name];
            if let RawMetric::Function { function, .. } = metric {
                let op = function::op_of(function).ok_or_else(|| {
                    EngineError::config(format!("metrics.{name}.function"), "no operation specified")
                })?;
                let operands = raw_operands(function);
                let resolved: Vec<RollupRef> = operands
                    .iter()
                    .map(|o| self.resolve_operand(o))
                    .collect::<EngineResult<_>>()?;
                let rollup = function::evaluate(op, &as_resolved(&resolved));
                self.rollups.insert(name.clone(), rollup);
            }
        }

        Ok(())
    }

    fn function_metric_topo_order(&self) -> EngineResult<Vec<String>> {
        let mut graph = DiGraphMap::<&str, ()>::new();
        for name in self.config.metrics.keys() {
            graph.add_node(name.as_str());
        }
        for (name, metric) in &self.config.metrics {
            if let RawMetric::Function { function, .. } = metric {
                for operand in raw_operands(function) {
                    if let RawOperand::Metric { metric: m } = operand {
                        let base = crate::config::strip_reserved_suffix(&m.name).unwrap_or(&m.name);
                        if self.config.metrics.contains_key(base) {
                            graph.add_edge(base, name.as_str(), ());
                        }
                    }
                }
            }
        }
        let order = toposort(&graph, None).map_err(|cycle| {
            EngineError::Internal(format!(
                "cycle detected at materialization time involving {:?}; this should have been caught by the validator",
                cycle.node_id()
            ))
        })?;
        Ok(order
            .into_iter()
            .filter(|n| matches!(self.config.metrics.get(*n), Some(RawMetric::Function { .. })))
            .map(|s| s.to_string())
            .collect())
    }

    fn resolve_operand(&mut self, operand: &RawOperand) -> EngineResult<RollupRef> {
        match operand {
            RawOperand::Value { value } => Ok(RollupRef::Constant(value.n)),
            RawOperand::Metric { metric } => {
                let rollup = self.rollup_for(&metric.name)?;
                Ok(RollupRef::Owned(rollup))
            }
        }
    }

    /// Looks up a metric's rollup, synthesizing `<base>WOW/MOM/YOY` lazily
    /// on a miss against a declared metric name.
    pub fn rollup_for(&mut self, name: &str) -> EngineResult<Rollup> {
        if let Some(rollup) = self.rollups.get(name) {
            return Ok(rollup.clone());
        }

        if let Some(base) = crate::config::strip_reserved_suffix(name) {
            if self.config.metrics.contains_key(base) {
                let base_rollup = self.rollup_for(base)?;
                let kind = if name.ends_with("WOW") {
                    GrowthKind::Wow
                } else if name.ends_with("MOM") {
                    GrowthKind::Mom
                } else {
                    GrowthKind::Yoy
                };
                let synthesized = growth::synthesize(kind, &base_rollup);
                self.rollups.insert(name.to_string(), synthesized.clone());
                return Ok(synthesized);
            }
        }

        Err(EngineError::Internal(format!(
            "metric {name:?} is not defined and does not match <base>{{WOW,MOM,YOY}}"
        )))
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn comparison_method(&self, metric_name: &str) -> crate::formatter::ComparisonMethod {
        let base = crate::config::strip_reserved_suffix(metric_name).unwrap_or(metric_name);
        let cfg_method = self.config.metrics.get(base).and_then(|m| match m {
            RawMetric::Basic { comparison_method, .. } => *comparison_method,
            RawMetric::Filter { comparison_method, .. } => *comparison_method,
            RawMetric::Function { comparison_method, .. } => *comparison_method,
        });
        match cfg_method {
            Some(crate::config::ComparisonMethodCfg::Bps) => crate::formatter::ComparisonMethod::Bps,
            _ => crate::formatter::ComparisonMethod::Percent,
        }
    }
}

enum RollupRef {
    Constant(f64),
    Owned(Rollup),
}

fn as_resolved(refs: &[RollupRef]) -> Vec<ResolvedOperand<'_>> {
    refs.iter()
        .map(|r| match r {
            RollupRef::Constant(c) => ResolvedOperand::Constant(*c),
            RollupRef::Owned(rollup) => ResolvedOperand::Metric(rollup),
        })
        .collect()
}

fn raw_operands(function: &crate::config::RawFunction) -> &[RawOperand] {
    function
        .sum
        .as_deref()
        .or(function.difference.as_deref())
        .or(function.divide.as_deref())
        .or(function.product.as_deref())
        .unwrap_or(&[])
}

/// Materializes a basic metric's column into a daily series, aggregating
/// same-date duplicates with `aggf`.
fn daily_series_for_column(table: &DailyTable, column: &str, aggf: AggFn) -> EngineResult<DailySeries> {
    if !table.has_column(column) {
        return Err(EngineError::Data(format!(
            "column {column:?} is not present after merge"
        )));
    }
    let mut by_date: HashMap<chrono::NaiveDate, Vec<f64>> = HashMap::new();
    for (date, value) in table.column(column) {
        if let Some(n) = value.as_f64() {
            by_date.entry(date).or_default().push(n);
        }
    }
    Ok(collapse(by_date, aggf))
}

/// Materializes a filter metric: applies `query` row-wise to `table`, then
/// aggregates the kept rows of `base_column` by date using `aggf`.
fn daily_series_for_filter(
    table: &DailyTable,
    base_column: &str,
    query: &str,
    aggf: AggFn,
) -> EngineResult<DailySeries> {
    if !table.has_column(base_column) {
        return Err(EngineError::Data(format!(
            "filter baseColumn {base_column:?} is not present after merge"
        )));
    }
    let mut by_date: HashMap<chrono::NaiveDate, Vec<f64>> = HashMap::new();
    for row in &table.rows {
        if evaluate_predicate(query, &row.values)? {
            if let Some(CellValue::Number(n)) = row.values.get(base_column) {
                by_date.entry(row.date).or_default().push(*n);
            }
        }
    }
    Ok(collapse(by_date, aggf))
}

fn collapse(by_date: HashMap<chrono::NaiveDate, Vec<f64>>, aggf: AggFn) -> DailySeries {
    let mut series = DailySeries::default();
    for (date, mut values) in by_date {
        let value = match aggf {
            AggFn::Sum => values.iter().sum(),
            AggFn::Mean => values.iter().sum::<f64>() / values.len() as f64,
            AggFn::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            AggFn::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            AggFn::Last => {
                // Duplicate same-date rows have no further ordering signal
                // beyond merge order; take the last one seen.
                values.drain(..).last().unwrap()
            }
        };
        series.insert(date, value);
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load;
    use crate::metrics::table::CellValue;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn build_table(column: &str, start: NaiveDate, values: &[f64]) -> DailyTable {
        let mut table = DailyTable::new(vec![column.to_string()]);
        for (i, v) in values.iter().enumerate() {
            let mut row = BTreeMap::new();
            row.insert(column.to_string(), CellValue::Number(*v));
            table.push_row(start + chrono::Duration::days(i as i64), row);
        }
        table
    }

    #[test]
    fn basic_metric_sum_rollup_matches_scenario_one() {
        let yaml = r#"
setup:
  weekEnding: 25-SEP-2021
metrics:
  Impressions:
    column: Impressions
    aggf: sum
"#;
        let config = load(yaml).unwrap();
        let start = NaiveDate::from_ymd_opt(2019, 9, 27).unwrap();
        let values: Vec<f64> = (1..=730).map(|n| n as f64 * 1_000_000.0).collect();
        let table = build_table("Impressions", start, &values);

        let mut engine = MetricEngine::build(&config, &table).unwrap();
        let rollup = engine.rollup_for("Impressions").unwrap();
        assert_eq!(rollup.weekly_cy.len(), 6);
        assert!(rollup.weekly_cy[5].as_option().is_some());
    }

    #[test]
    fn growth_metric_resolves_without_explicit_declaration() {
        let yaml = r#"
setup:
  weekEnding: 25-SEP-2021
metrics:
  Impressions:
    column: Impressions
    aggf: sum
"#;
        let config = load(yaml).unwrap();
        let start = NaiveDate::from_ymd_opt(2019, 9, 27).unwrap();
        let values: Vec<f64> = (1..=730).map(|n| n as f64).collect();
        let table = build_table("Impressions", start, &values);
        let mut engine = MetricEngine::build(&config, &table).unwrap();
        assert!(engine.rollup_for("ImpressionsYOY").is_ok());
        assert!(engine.rollup_for("ImpressionsWOW").is_ok());
        assert!(engine.rollup_for("ImpressionsMOM").is_ok());
    }
}
