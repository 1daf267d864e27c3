//! The `DailyTable` runtime entity: an ordered sequence of rows keyed by
//! `Date`, with named numeric (or text, for filter predicates) columns.

use std::collections::BTreeMap;

use chrono::NaiveDate;

/// A single cell value. Filter predicates need to compare against text
/// columns (e.g. `Country == 'US'`); everything downstream of a filter or
/// basic metric is numeric.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Null,
}

impl CellValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A loaded or merged table: every row has a `Date` plus zero or more named
/// columns. Rows are not required to be unique per `Date` — duplicate dates
/// are collapsed later by a metric's `aggf`.
#[derive(Debug, Clone, Default)]
pub struct DailyTable {
    /// Column names in first-seen order, excluding `Date`.
    pub columns: Vec<String>,
    pub rows: Vec<DailyRow>,
}

#[derive(Debug, Clone)]
pub struct DailyRow {
    pub date: NaiveDate,
    pub values: BTreeMap<String, CellValue>,
}

impl DailyTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, date: NaiveDate, values: BTreeMap<String, CellValue>) {
        self.rows.push(DailyRow { date, values });
    }

    pub fn column(&self, name: &str) -> Vec<(NaiveDate, CellValue)> {
        self.rows
            .iter()
            .filter_map(|r| r.values.get(name).map(|v| (r.date, v.clone())))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

/// A single metric's materialized daily series: one value per date it was
/// observed on (already aggregated across any same-day duplicates).
#[derive(Debug, Clone, Default)]
pub struct DailySeries(pub BTreeMap<NaiveDate, f64>);

impl DailySeries {
    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.0.get(&date).copied()
    }

    pub fn insert(&mut self, date: NaiveDate, value: f64) {
        self.0.insert(date, value);
    }

    pub fn dates_in(&self, range: crate::calendar::DayRange) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.0
            .iter()
            .filter(move |(d, _)| range.contains(**d))
            .map(|(d, v)| (*d, *v))
    }
}

/// Two daily time series (current year, prior year) for one metric, plus
/// the unit its growth derivatives should be expressed in.
#[derive(Debug, Clone)]
pub struct MetricSeries {
    pub current_year: DailySeries,
    pub prior_year: DailySeries,
}
