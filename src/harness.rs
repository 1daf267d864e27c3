//! Test Harness: re-runs the pipeline per scenario and diffs results
//! against a scenario-declared golden expectation — dataframe lengths,
//! six-week series, twelve-month series, and MTD/QTD/YTD rollups.
//!
//! A scenario lives in a directory with three files: `original.csv` (the
//! input data), `config.yaml` (the deck config), and `testconfig.yml` (the
//! golden expectation, in the shape of [`ScenarioExpectation`]). This is
//! what backs `GET /wbr-unit-test` as well as the `tests/scenarios.rs`
//! integration test — both call [`discover_scenarios`]/[`run_scenario`], so
//! a scenario regression is caught the same way whether it's found by a
//! developer running `cargo test` or by hitting the live endpoint.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::EngineResult;
use crate::metrics::engine::MetricEngine;
use crate::source::merger::parse_csv;

const EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioExpectation {
    pub name: String,
    #[serde(rename = "expectedMasterRows")]
    pub expected_master_rows: Option<usize>,
    #[serde(default)]
    pub metrics: HashMap<String, MetricExpectation>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricExpectation {
    #[serde(rename = "sixWeekCy")]
    pub six_week_cy: Option<[f64; 6]>,
    #[serde(rename = "twelveMonthCy")]
    pub twelve_month_cy: Option<[f64; 12]>,
    pub mtd: Option<f64>,
    pub qtd: Option<f64>,
    pub ytd: Option<f64>,
}

pub struct ScenarioCase {
    pub name: String,
    pub config_yaml: String,
    pub csv: String,
    pub expectation: ScenarioExpectation,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub passed: bool,
    pub failures: Vec<String>,
}

/// Finds every `scenario*` subdirectory under `root` and loads it.
pub fn discover_scenarios(root: &Path) -> EngineResult<Vec<ScenarioCase>> {
    let mut cases = Vec::new();
    if !root.is_dir() {
        return Ok(cases);
    }
    let mut entries: Vec<_> = fs::read_dir(root)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| n.starts_with("scenario"))
        })
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        cases.push(load_scenario(&entry.path())?);
    }
    Ok(cases)
}

/// Loads a single scenario directory's three fixture files.
pub fn load_scenario(dir: &Path) -> EngineResult<ScenarioCase> {
    let csv = fs::read_to_string(dir.join("original.csv"))?;
    let config_yaml = fs::read_to_string(dir.join("config.yaml"))?;
    let testconfig = fs::read_to_string(dir.join("testconfig.yml"))?;
    let expectation: ScenarioExpectation = serde_yaml::from_str(&testconfig)?;
    Ok(ScenarioCase {
        name: expectation.name.clone(),
        config_yaml,
        csv,
        expectation,
    })
}

/// Runs the pipeline for one scenario (CSV as the sole master table —
/// scenarios exercise the Metric Engine and Deck Builder, not live DB
/// connectors) and diffs the result against its golden expectation.
pub fn run_scenario(case: &ScenarioCase) -> EngineResult<ScenarioReport> {
    let config = config::load(&case.config_yaml)?;
    let master = parse_csv(&case.csv)?;
    let mut failures = Vec::new();

    if let Some(expected_rows) = case.expectation.expected_master_rows {
        if master.rows.len() != expected_rows {
            failures.push(format!(
                "master table rows: expected {expected_rows}, got {}",
                master.rows.len()
            ));
        }
    }

    let mut engine = MetricEngine::build(&config, &master)?;
    for (metric_name, expect) in &case.expectation.metrics {
        let rollup = engine.rollup_for(metric_name)?;

        if let Some(expected) = &expect.six_week_cy {
            let actual: Vec<Option<f64>> = rollup.weekly_cy.iter().map(|v| v.as_option()).collect();
            compare_series(metric_name, "six-week", expected, &actual, &mut failures);
        }
        if let Some(expected) = &expect.twelve_month_cy {
            let actual: Vec<Option<f64>> = rollup.monthly_cy.iter().map(|v| v.as_option()).collect();
            compare_series(metric_name, "twelve-month", expected, &actual, &mut failures);
        }
        if let Some(expected) = expect.mtd {
            compare_scalar(metric_name, "MTD", expected, rollup.mtd_cy.as_option(), &mut failures);
        }
        if let Some(expected) = expect.qtd {
            compare_scalar(metric_name, "QTD", expected, rollup.qtd_cy.as_option(), &mut failures);
        }
        if let Some(expected) = expect.ytd {
            compare_scalar(metric_name, "YTD", expected, rollup.ytd_cy.as_option(), &mut failures);
        }
    }

    Ok(ScenarioReport {
        name: case.expectation.name.clone(),
        passed: failures.is_empty(),
        failures,
    })
}

fn compare_series(
    metric_name: &str,
    label: &str,
    expected: &[f64],
    actual: &[Option<f64>],
    failures: &mut Vec<String>,
) {
    let expected_opt: Vec<Option<f64>> = expected.iter().map(|v| Some(*v)).collect();
    let matches = expected_opt.len() == actual.len()
        && expected_opt
            .iter()
            .zip(actual.iter())
            .all(|(e, a)| approx_eq_opt(*e, *a));
    if !matches {
        failures.push(format!(
            "{metric_name}: {label} series mismatch: expected {expected_opt:?}, got {actual:?}"
        ));
    }
}

fn compare_scalar(metric_name: &str, label: &str, expected: f64, actual: Option<f64>, failures: &mut Vec<String>) {
    if !approx_eq_opt(Some(expected), actual) {
        failures.push(format!(
            "{metric_name}: {label} mismatch: expected {expected:?}, got {actual:?}"
        ));
    }
}

fn approx_eq_opt(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => (x - y).abs() <= EPSILON * x.abs().max(1.0),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_scenario(dir: &Path) {
        let mut csv = String::from("Date,Impressions\n");
        for i in 0..14i64 {
            let date = chrono::NaiveDate::from_ymd_opt(2021, 9, 12).unwrap() + chrono::Duration::days(i);
            csv.push_str(&format!("{},{}\n", date.format("%Y-%m-%d"), (i + 1) * 10));
        }
        fs::write(dir.join("original.csv"), csv).unwrap();
        fs::write(
            dir.join("config.yaml"),
            r#"
setup:
  weekEnding: 25-SEP-2021
metrics:
  Impressions:
    column: Impressions
    aggf: sum
"#,
        )
        .unwrap();
        let mut f = fs::File::create(dir.join("testconfig.yml")).unwrap();
        // All 14 rows (12-25 Sep) fall inside the MTD window (1-25 Sep);
        // values are 10, 20, .. 140, summing to 10 * (14*15/2) = 1050.
        writeln!(
            f,
            "name: tiny_scenario\nexpectedMasterRows: 14\nmetrics:\n  Impressions:\n    mtd: 1050.0\n"
        )
        .unwrap();
    }

    #[test]
    fn run_scenario_passes_against_a_correct_golden_file() {
        let dir = tempdir().unwrap();
        write_scenario(dir.path());
        let case = load_scenario(dir.path()).unwrap();
        let report = run_scenario(&case).unwrap();
        assert!(report.passed, "failures: {:?}", report.failures);
    }

    #[test]
    fn discover_scenarios_finds_scenario_prefixed_directories_only() {
        let root = tempdir().unwrap();
        let scenario_dir = root.path().join("scenario_1");
        fs::create_dir(&scenario_dir).unwrap();
        write_scenario(&scenario_dir);
        fs::create_dir(root.path().join("not_a_scenario")).unwrap();

        let cases = discover_scenarios(root.path()).unwrap();
        assert_eq!(cases.len(), 1);
    }

    #[test]
    fn run_scenario_reports_a_mismatch() {
        let dir = tempdir().unwrap();
        write_scenario(dir.path());
        fs::write(
            dir.path().join("testconfig.yml"),
            "name: tiny_scenario\nmetrics:\n  Impressions:\n    mtd: 999999.0\n",
        )
        .unwrap();
        let case = load_scenario(dir.path()).unwrap();
        let report = run_scenario(&case).unwrap();
        assert!(!report.passed);
        assert_eq!(report.failures.len(), 1);
    }
}
