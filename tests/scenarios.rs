//! Runs every fixture under `tests/fixtures/` through the Test Harness and
//! asserts it matches its golden expectation. Mirrors the same
//! `discover_scenarios`/`run_scenario` pair that backs `GET /wbr-unit-test`.

use std::path::Path;

use wbr_engine::harness;

#[test]
fn all_fixture_scenarios_pass() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let cases = harness::discover_scenarios(&root).expect("discover scenarios");
    assert!(!cases.is_empty(), "expected at least one scenario fixture");

    let mut failed = Vec::new();
    for case in &cases {
        let report = harness::run_scenario(case).expect("run scenario");
        if !report.passed {
            failed.push(format!("{}: {:?}", report.name, report.failures));
        }
    }

    assert!(failed.is_empty(), "scenario failures:\n{}", failed.join("\n"));
}
