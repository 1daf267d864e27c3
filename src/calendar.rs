//! Week/month/quarter/year boundaries around a given week-ending date.
//!
//! All rollup windows the Metric Engine needs — the trailing 6 weeks, the
//! trailing 12 months, and the MTD/QTD/YTD day ranges, for both the current
//! year and the matching prior-year window — are derived here once per
//! build and handed down as plain `NaiveDate` ranges.

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// An inclusive `[start, end]` span of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DayRange start must not be after end");
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Shifts the whole window back by exactly one year-of-weeks (364 days),
    /// preserving weekday — the prior-year counterpart of a CY week.
    pub fn shift_364_days_back(&self) -> Self {
        let delta = Duration::days(364);
        Self::new(self.start - delta, self.end - delta)
    }
}

/// Month of the calendar year (1-indexed January..December), used to name a
/// fiscal year end month in the deck config.
pub type MonthNumber = u32;

/// A fully-resolved calendar for one build, anchored on `weekEnding`.
#[derive(Debug, Clone)]
pub struct Calendar {
    week_ending: NaiveDate,
    fiscal_year_end_month: MonthNumber,
}

impl Calendar {
    pub fn new(week_ending: NaiveDate, fiscal_year_end_month: MonthNumber) -> Self {
        assert!((1..=12).contains(&fiscal_year_end_month));
        Self {
            week_ending,
            fiscal_year_end_month,
        }
    }

    pub fn week_ending(&self) -> NaiveDate {
        self.week_ending
    }

    /// The 6 trailing CY weeks, oldest first (index 0 = `E - 35`, index 5 = `E`).
    pub fn cy_weeks(&self) -> [DayRange; 6] {
        std::array::from_fn(|i| {
            // i=5 is the latest week (k=0 in spec terms); i=0 is the oldest.
            let k = 5 - i;
            let end = self.week_ending - Duration::days(7 * k as i64);
            let start = end - Duration::days(6);
            DayRange::new(start, end)
        })
    }

    /// Prior-year counterpart of each CY week, same ordering.
    pub fn py_weeks(&self) -> [DayRange; 6] {
        self.cy_weeks().map(|w| w.shift_364_days_back())
    }

    /// The 12 trailing calendar months whose last day is <= `weekEnding`,
    /// oldest first.
    pub fn cy_months(&self) -> [DayRange; 12] {
        let this_month_start =
            NaiveDate::from_ymd_opt(self.week_ending.year(), self.week_ending.month(), 1).unwrap();
        std::array::from_fn(|i| {
            let k = 11 - i;
            let start = this_month_start
                .checked_sub_months(Months::new(k as u32))
                .unwrap();
            let end = last_day_of_month(start);
            DayRange::new(start, end)
        })
    }

    /// Same 12 month numbers, one calendar year earlier.
    pub fn py_months(&self) -> [DayRange; 12] {
        self.cy_months().map(|m| {
            let start = m
                .start
                .checked_sub_months(Months::new(12))
                .expect("year shift within representable range");
            let end = last_day_of_month(start);
            DayRange::new(start, end)
        })
    }

    /// First day of the fiscal quarter containing `weekEnding`. Fiscal
    /// quarters are anchored so `fiscal_year_end_month` is the last month of
    /// fiscal Q4.
    fn fiscal_quarter_start_month(&self) -> MonthNumber {
        // Months numbered 0..11 starting the month after the fiscal year end,
        // so `fiscal_year_end_month` itself lands in the last fiscal quarter.
        let fiscal_start_month = self.fiscal_year_end_month % 12 + 1;
        let fiscal_month_index = (self.week_ending.month() + 12 - fiscal_start_month) % 12;
        let quarter = fiscal_month_index / 3; // 0..3
        let months_back = fiscal_month_index - quarter * 3;
        let start = NaiveDate::from_ymd_opt(self.week_ending.year(), self.week_ending.month(), 1)
            .unwrap();
        let start = start.checked_sub_months(Months::new(months_back)).unwrap();
        start.month()
    }

    pub fn mtd_cy(&self) -> DayRange {
        let start =
            NaiveDate::from_ymd_opt(self.week_ending.year(), self.week_ending.month(), 1).unwrap();
        DayRange::new(start, self.week_ending)
    }

    pub fn mtd_py(&self) -> DayRange {
        let r = self.mtd_cy();
        DayRange::new(
            r.start.checked_sub_months(Months::new(12)).unwrap(),
            r.end.checked_sub_months(Months::new(12)).unwrap(),
        )
    }

    pub fn qtd_cy(&self) -> DayRange {
        let qstart_month = self.fiscal_quarter_start_month();
        let mut year = self.week_ending.year();
        // If the fiscal quarter start month is numerically after the current
        // calendar month, the quarter began in the previous calendar year.
        if qstart_month > self.week_ending.month() {
            year -= 1;
        }
        let start = NaiveDate::from_ymd_opt(year, qstart_month, 1).unwrap();
        DayRange::new(start, self.week_ending)
    }

    pub fn qtd_py(&self) -> DayRange {
        let r = self.qtd_cy();
        DayRange::new(
            r.start.checked_sub_months(Months::new(12)).unwrap(),
            r.end.checked_sub_months(Months::new(12)).unwrap(),
        )
    }

    /// Start of the fiscal year containing `weekEnding`.
    pub fn fiscal_year_start(&self) -> NaiveDate {
        let fy_end_month = self.fiscal_year_end_month;
        let fy_start_month = fy_end_month % 12 + 1;
        let mut year = self.week_ending.year();
        if fy_start_month > self.week_ending.month() {
            year -= 1;
        }
        NaiveDate::from_ymd_opt(year, fy_start_month, 1).unwrap()
    }

    pub fn ytd_cy(&self) -> DayRange {
        DayRange::new(self.fiscal_year_start(), self.week_ending)
    }

    pub fn ytd_py(&self) -> DayRange {
        let r = self.ytd_cy();
        DayRange::new(
            r.start.checked_sub_months(Months::new(12)).unwrap(),
            r.end.checked_sub_months(Months::new(12)).unwrap(),
        )
    }

    /// The x-axis for a `trailing_twelve_months` 6/12 block: `[wk N-5 .. wk
    /// N, " ", <3-char month> x 12]` — 6 weekly labels, one gap label, 12
    /// monthly labels, 19 entries total. (The distilled spec's prose says
    /// "18 labels"; the worked example it gives — `["wk 33",…,"wk 38"," ",
    /// "Sep",…,"Aug"]` — lists 19, which this follows.)
    pub fn x_axis_labels(&self) -> [String; 19] {
        let iso_week = self.week_ending.iso_week().week();
        let mut labels = Vec::with_capacity(19);
        for k in (0..6).rev() {
            let wk = iso_week as i64 - k;
            let wk = if wk <= 0 { wk + 52 } else { wk };
            labels.push(format!("wk {wk}"));
        }
        labels.push(" ".to_string());
        for month_range in self.cy_months() {
            labels.push(month_abbrev(month_range.start.month()).to_string());
        }
        labels.try_into().expect("exactly 19 labels")
    }

    /// The 12 month labels for a `fiscal_year` x-axis, spanning the fiscal
    /// year that contains `weekEnding`.
    pub fn fiscal_year_month_labels(&self) -> [String; 12] {
        let start = self.fiscal_year_start();
        std::array::from_fn(|i| {
            let month_date = start.checked_add_months(Months::new(i as u32)).unwrap();
            month_abbrev(month_date.month()).to_string()
        })
    }
}

fn last_day_of_month(first_of_month: NaiveDate) -> NaiveDate {
    let next_month = first_of_month.checked_add_months(Months::new(1)).unwrap();
    next_month - Duration::days(1)
}

fn month_abbrev(month: MonthNumber) -> &'static str {
    const NAMES: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    NAMES[(month - 1) as usize]
}

/// Parses `fiscalYearEndMonth` values such as `DEC`, `MAY` into a 1..12
/// month number. Defaults to December per the spec.
pub fn parse_fiscal_year_end_month(s: &str) -> Option<MonthNumber> {
    const NAMES: [&str; 12] = [
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ];
    NAMES
        .iter()
        .position(|n| n.eq_ignore_ascii_case(s))
        .map(|i| (i + 1) as MonthNumber)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn cy_weeks_are_contiguous_and_end_on_week_ending() {
        let cal = Calendar::new(date(2021, 9, 25), 12);
        let weeks = cal.cy_weeks();
        assert_eq!(weeks[5].end, date(2021, 9, 25));
        assert_eq!(weeks[0].start, date(2021, 8, 22));
        for pair in weeks.windows(2) {
            assert_eq!(pair[1].start, pair[0].end + Duration::days(1));
        }
    }

    #[test]
    fn py_weeks_are_364_days_back() {
        let cal = Calendar::new(date(2021, 9, 25), 12);
        let cy = cal.cy_weeks();
        let py = cal.py_weeks();
        for (c, p) in cy.iter().zip(py.iter()) {
            assert_eq!(c.end - p.end, Duration::days(364));
            assert_eq!(c.end.weekday(), p.end.weekday());
        }
    }

    #[test]
    fn cy_months_end_with_week_ending_month() {
        let cal = Calendar::new(date(2021, 9, 25), 12);
        let months = cal.cy_months();
        assert_eq!(months[11].start.month(), 9);
        assert_eq!(months[11].start.year(), 2021);
        assert_eq!(months[0].start.month(), 10);
        assert_eq!(months[0].start.year(), 2020);
    }

    #[test]
    fn x_axis_labels_match_spec_example() {
        let cal = Calendar::new(date(2021, 9, 25), 12);
        let labels = cal.x_axis_labels();
        assert_eq!(labels.len(), 19);
        assert_eq!(labels[5], "wk 38");
        assert_eq!(labels[6], " ");
        assert_eq!(labels[7], "Oct");
        assert_eq!(labels[18], "Sep");
    }

    #[test]
    fn fiscal_year_end_may_shifts_quarters() {
        let cal = Calendar::new(date(2022, 5, 31), 5);
        // Fiscal year ends in May: YTD should cover Jun-2021 .. May-2022.
        let ytd = cal.ytd_cy();
        assert_eq!(ytd.start, date(2021, 6, 1));
        assert_eq!(ytd.end, date(2022, 5, 31));
        // This is also the final day of fiscal Q4.
        let qtd = cal.qtd_cy();
        assert_eq!(qtd.start, date(2022, 3, 1));
    }

    #[test]
    fn parses_month_abbreviations_case_insensitively() {
        assert_eq!(parse_fiscal_year_end_month("dec"), Some(12));
        assert_eq!(parse_fiscal_year_end_month("MAY"), Some(5));
        assert_eq!(parse_fiscal_year_end_month("xyz"), None);
    }
}
