//! Parses and validates the YAML deck configuration.
//!
//! Parsing is two-pass: `serde_yaml` deserializes the document into the
//! `Raw*` structs below (structural pass — a malformed document fails here
//! with a single `EngineError::Config`), then [`validate`] walks the parsed
//! tree and gathers every semantic problem it can find (missing metric
//! references, cycles, reserved-suffix collisions, bad masks) before
//! returning, per the "total where feasible" rule.

pub mod connections;
pub mod env;

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::calendar::parse_fiscal_year_end_month;
use crate::error::{ConfigProblem, EngineError, EngineResult};
use crate::formatter::Mask;

pub use connections::{ConnectionConfig, ConnectionKind, ConnectionsFile};

const RESERVED_SUFFIXES: [&str; 3] = ["WOW", "MOM", "YOY"];

#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    pub setup: RawSetup,
    #[serde(default, rename = "dataSources")]
    pub data_sources: HashMap<String, DataSourceGroup>,
    #[serde(default)]
    pub annotations: Option<RawAnnotations>,
    #[serde(default)]
    pub metrics: HashMap<String, RawMetric>,
    #[serde(default)]
    pub deck: Vec<RawBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSetup {
    #[serde(rename = "weekEnding")]
    pub week_ending: String,
    #[serde(rename = "weekNumber")]
    pub week_number: Option<u32>,
    pub title: Option<String>,
    #[serde(rename = "fiscalYearEndMonth")]
    pub fiscal_year_end_month: Option<String>,
    #[serde(rename = "blockStartingNumber")]
    pub block_starting_number: Option<u32>,
    #[serde(default)]
    pub tooltip: bool,
    #[serde(rename = "dbConfigUrl")]
    pub db_config_url: Option<String>,
}

/// `dataSources.<connectionName>` — a mapping of query-alias to query, plus
/// the special `csvFiles` key mapping alias to a URL or path.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DataSourceGroup {
    CsvFiles(HashMap<String, CsvFileRef>),
    Queries(HashMap<String, QueryRef>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRef {
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvFileRef {
    #[serde(rename = "urlOrPath")]
    pub url_or_path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawAnnotations {
    Flat(Vec<String>),
    Structured {
        #[serde(default, rename = "csvFiles")]
        csv_files: Vec<String>,
        #[serde(default, rename = "dataSources")]
        data_sources: HashMap<String, HashMap<String, QueryRef>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFn {
    Sum,
    Mean,
    Min,
    Max,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ComparisonMethodCfg {
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "bps")]
    Bps,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawMetric {
    Filter {
        filter: RawFilter,
        aggf: AggFn,
        #[serde(rename = "metricComparisonMethod")]
        comparison_method: Option<ComparisonMethodCfg>,
    },
    Function {
        function: RawFunction,
        #[serde(rename = "metricComparisonMethod")]
        comparison_method: Option<ComparisonMethodCfg>,
    },
    Basic {
        column: String,
        aggf: AggFn,
        #[serde(rename = "metricComparisonMethod")]
        comparison_method: Option<ComparisonMethodCfg>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFilter {
    #[serde(rename = "baseColumn")]
    pub base_column: String,
    pub query: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFunction {
    pub sum: Option<Vec<RawOperand>>,
    pub difference: Option<Vec<RawOperand>>,
    pub divide: Option<Vec<RawOperand>>,
    pub product: Option<Vec<RawOperand>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawOperand {
    Metric { metric: MetricRef },
    Value { value: ValueRef },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValueRef {
    pub n: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    #[serde(rename = "uiType")]
    pub ui_type: String,
    pub title: Option<String>,
    #[serde(rename = "yScaling")]
    pub y_scaling: Option<String>,
    #[serde(rename = "graphPriorYearFlag", default)]
    pub graph_prior_year_flag: bool,
    #[serde(rename = "xAxisMonthlyDisplay")]
    pub x_axis_monthly_display: Option<String>,
    #[serde(default, rename = "yAxis")]
    pub y_axis: Vec<RawYAxisEntry>,
    #[serde(default)]
    pub rows: Vec<RawTableRow>,
    pub id: Option<String>,
    pub source: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawYAxisEntry {
    #[serde(rename = "legendName")]
    pub legend_name: String,
    pub metric: String,
    #[serde(rename = "lineStyle")]
    pub line_style: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTableRow {
    #[serde(rename = "rowHeader")]
    pub row_header: String,
    pub metric: Option<String>,
    #[serde(rename = "rowStyle", default)]
    pub row_style: Option<String>,
}

/// A validated, ready-to-run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub week_ending: NaiveDate,
    pub fiscal_year_end_month: u32,
    pub title: String,
    pub block_starting_number: u32,
    pub tooltip: bool,
    pub data_sources: HashMap<String, DataSourceGroup>,
    pub annotations: Option<RawAnnotations>,
    pub metrics: HashMap<String, RawMetric>,
    pub deck: Vec<RawBlock>,
}

/// Parses and validates a YAML document end to end.
pub fn load(yaml: &str) -> EngineResult<Config> {
    let raw: RawConfig = serde_yaml::from_str(yaml)?;
    validate(raw)
}

pub fn validate(raw: RawConfig) -> EngineResult<Config> {
    let mut problems: Vec<ConfigProblem> = Vec::new();

    if let Err(e) = parse_week_ending(&raw.setup.week_ending) {
        problems.push(ConfigProblem::new("setup.weekEnding", e));
    }

    let fiscal_year_end_month = raw
        .setup
        .fiscal_year_end_month
        .as_deref()
        .map(|s| {
            parse_fiscal_year_end_month(s).ok_or_else(|| {
                format!("unrecognized fiscalYearEndMonth: {s:?}")
            })
        })
        .transpose()
        .unwrap_or_else(|e| {
            problems.push(ConfigProblem::new("setup.fiscalYearEndMonth", e));
            None
        })
        .unwrap_or(12);

    let block_starting_number = raw.setup.block_starting_number.unwrap_or(1);
    if block_starting_number < 1 {
        problems.push(ConfigProblem::new(
            "setup.blockStartingNumber",
            "must be >= 1",
        ));
    }

    // Every dataSources.<conn>.<alias> key becomes a column-name prefix
    // (`alias.column`, per Invariant 3) and must be a valid identifier.
    for (connection_name, group) in &raw.data_sources {
        let aliases: Vec<&str> = match group {
            DataSourceGroup::CsvFiles(files) => files.keys().map(|s| s.as_str()).collect(),
            DataSourceGroup::Queries(queries) => queries.keys().map(|s| s.as_str()).collect(),
        };
        for alias in aliases {
            if !is_valid_namespace_identifier(alias) {
                problems.push(ConfigProblem::new(
                    format!("dataSources.{connection_name}.{alias}"),
                    format!(
                        "{alias:?} is not a valid namespace identifier (must start with a letter or \
                         underscore and contain only letters, digits, or underscores)"
                    ),
                ));
            }
        }
    }

    // Known metric names: declared metrics plus their auto WOW/MOM/YOY.
    for name in raw.metrics.keys() {
        if ends_with_reserved_suffix(name) {
            problems.push(ConfigProblem::new(
                format!("metrics.{name}"),
                "metric names ending in WOW, MOM, or YOY are reserved for auto-generated growth metrics",
            ));
        }
    }

    let known_metrics: HashSet<&str> = raw.metrics.keys().map(|s| s.as_str()).collect();

    // Validate every function metric's operand references and collect edges
    // for the cycle check.
    let mut edges: Vec<(String, String)> = Vec::new();
    for (name, metric) in &raw.metrics {
        if let RawMetric::Function { function, .. } = metric {
            let operands = function_operands(function);
            if operands.is_empty() {
                problems.push(ConfigProblem::new(
                    format!("metrics.{name}.function"),
                    "exactly one operation key (sum, difference, divide, product) is required",
                ));
            }
            for operand in operands {
                if let RawOperand::Metric { metric: m } = operand {
                    let base = strip_reserved_suffix(&m.name).unwrap_or(m.name.as_str());
                    if !known_metrics.contains(base) {
                        problems.push(ConfigProblem::new(
                            format!("metrics.{name}.function"),
                            format!("references undefined metric {:?}", m.name),
                        ));
                    } else {
                        edges.push((name.clone(), m.name.clone()));
                    }
                }
            }
        }
    }

    if let Some(cycle) = find_cycle(&edges) {
        problems.push(ConfigProblem::new(
            "metrics",
            format!("cycle in function-metric dependencies: {}", cycle.join(" -> ")),
        ));
    }

    // Validate deck block references.
    for (i, block) in raw.deck.iter().enumerate() {
        let path = format!("deck[{i}]");
        match block.ui_type.as_str() {
            "6_12Graph" => {
                if block.y_axis.is_empty() {
                    problems.push(ConfigProblem::new(&path, "6_12Graph requires a non-empty yAxis"));
                }
                let mut seen_line_styles = HashSet::new();
                for entry in &block.y_axis {
                    if !metric_is_known(&entry.metric, &known_metrics) {
                        problems.push(ConfigProblem::new(
                            &path,
                            format!("yAxis references undefined metric {:?}", entry.metric),
                        ));
                    }
                    if !seen_line_styles.insert(entry.line_style.clone()) {
                        tracing::warn!(
                            block = i,
                            line_style = %entry.line_style,
                            "lineStyle repeated within a block; first declaration wins"
                        );
                    }
                }
                if let Some(mask) = &block.y_scaling {
                    if let Err(e) = Mask::parse(mask) {
                        problems.push(ConfigProblem::new(format!("{path}.yScaling"), e));
                    }
                }
            }
            "6_WeeksTable" | "12_MonthsTable" => {
                for row in &block.rows {
                    if let Some(metric) = &row.metric {
                        if !metric_is_known(metric, &known_metrics) {
                            problems.push(ConfigProblem::new(
                                &path,
                                format!("row references undefined metric {:?}", metric),
                            ));
                        }
                    }
                }
            }
            "section" => {}
            "embedded_content" => {
                if block.source.is_none() {
                    problems.push(ConfigProblem::new(&path, "embedded_content requires source"));
                }
            }
            other => {
                problems.push(ConfigProblem::new(
                    &path,
                    format!("unknown uiType {other:?}"),
                ));
            }
        }
    }

    if !problems.is_empty() {
        return Err(EngineError::Config(problems));
    }

    let week_ending = parse_week_ending(&raw.setup.week_ending).expect("validated above");

    Ok(Config {
        week_ending,
        fiscal_year_end_month,
        title: raw.setup.title.unwrap_or_default(),
        block_starting_number,
        tooltip: raw.setup.tooltip,
        data_sources: raw.data_sources,
        annotations: raw.annotations,
        metrics: raw.metrics,
        deck: raw.deck,
    })
}

/// A valid `dataSources` alias: starts with a letter or underscore,
/// followed by letters, digits, or underscores. No dots (the separator used
/// to build `alias.columnName`) or other punctuation.
fn is_valid_namespace_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn metric_is_known(name: &str, known: &HashSet<&str>) -> bool {
    known.contains(name) || strip_reserved_suffix(name).map_or(false, |base| known.contains(base))
}

fn function_operands(function: &RawFunction) -> Vec<&RawOperand> {
    function
        .sum
        .as_ref()
        .or(function.difference.as_ref())
        .or(function.divide.as_ref())
        .or(function.product.as_ref())
        .map(|v| v.iter().collect())
        .unwrap_or_default()
}

fn ends_with_reserved_suffix(name: &str) -> bool {
    RESERVED_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// If `name` is `<base><WOW|MOM|YOY>`, returns `<base>`.
pub fn strip_reserved_suffix(name: &str) -> Option<&str> {
    RESERVED_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
}

fn parse_week_ending(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%d-%b-%Y")
        .map_err(|_| format!("expected DD-MMM-YYYY, got {s:?}"))
}

/// Detects a cycle in the directed graph `functionMetric -> operandMetric`
/// via DFS, returning the offending path if one exists.
fn find_cycle(edges: &[(String, String)]) -> Option<Vec<String>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in edges {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(Mark::Done) = marks.get(node) {
            return None;
        }
        if let Some(Mark::Visiting) = marks.get(node) {
            let start = stack.iter().position(|n| *n == node).unwrap_or(0);
            let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        marks.insert(node, Mark::Visiting);
        stack.push(node);
        if let Some(neighbors) = adjacency.get(node) {
            for next in neighbors {
                if let Some(cycle) = visit(next, adjacency, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for (from, _) in edges {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(from.as_str(), &adjacency, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
setup:
  weekEnding: 25-SEP-2021
metrics:
  Impressions:
    column: Impressions
    aggf: sum
deck:
  - uiType: 6_12Graph
    yScaling: "##.2MM"
    yAxis:
      - legendName: Impressions
        metric: Impressions
        lineStyle: primary
"#
    }

    #[test]
    fn loads_minimal_valid_config() {
        let cfg = load(minimal_yaml()).unwrap();
        assert_eq!(cfg.week_ending, NaiveDate::from_ymd_opt(2021, 9, 25).unwrap());
        assert_eq!(cfg.fiscal_year_end_month, 12);
        assert_eq!(cfg.block_starting_number, 1);
    }

    #[test]
    fn rejects_bad_week_ending_format() {
        let yaml = "setup:\n  weekEnding: 2021-09-25\n";
        let err = load(yaml).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn rejects_reserved_metric_suffix() {
        let yaml = r#"
setup:
  weekEnding: 25-SEP-2021
metrics:
  RevenueYOY:
    column: Revenue
    aggf: sum
"#;
        let err = load(yaml).unwrap_err();
        match err {
            EngineError::Config(problems) => {
                assert!(problems.iter().any(|p| p.path.contains("RevenueYOY")));
            }
            _ => panic!("expected config error"),
        }
    }

    #[test]
    fn rejects_function_metric_cycle() {
        let yaml = r#"
setup:
  weekEnding: 25-SEP-2021
metrics:
  A:
    function:
      sum:
        - metric: { name: B }
  B:
    function:
      sum:
        - metric: { name: A }
"#;
        let err = load(yaml).unwrap_err();
        match err {
            EngineError::Config(problems) => {
                assert!(problems.iter().any(|p| p.message.contains("cycle")));
            }
            _ => panic!("expected config error"),
        }
    }

    #[test]
    fn deck_block_referencing_unknown_metric_is_rejected() {
        let yaml = r#"
setup:
  weekEnding: 25-SEP-2021
metrics:
  Impressions:
    column: Impressions
    aggf: sum
deck:
  - uiType: 6_12Graph
    yAxis:
      - legendName: Clicks
        metric: Clicks
        lineStyle: primary
"#;
        let err = load(yaml).unwrap_err();
        match err {
            EngineError::Config(problems) => {
                assert!(problems.iter().any(|p| p.message.contains("Clicks")));
            }
            _ => panic!("expected config error"),
        }
    }

    #[test]
    fn deck_block_may_reference_auto_generated_growth_metric() {
        let yaml = r#"
setup:
  weekEnding: 25-SEP-2021
metrics:
  Impressions:
    column: Impressions
    aggf: sum
deck:
  - uiType: 6_WeeksTable
    rows:
      - rowHeader: Impressions YOY
        metric: ImpressionsYOY
"#;
        assert!(load(yaml).is_ok());
    }

    #[test]
    fn rejects_data_source_alias_that_is_not_a_valid_identifier() {
        let yaml = r#"
setup:
  weekEnding: 25-SEP-2021
dataSources:
  MyPg:
    "main.alias":
      query: "select Date, PageViews from events"
"#;
        let err = load(yaml).unwrap_err();
        match err {
            EngineError::Config(problems) => {
                assert!(problems
                    .iter()
                    .any(|p| p.path.contains("MyPg") && p.message.contains("main.alias")));
            }
            _ => panic!("expected config error"),
        }
    }

    #[test]
    fn accepts_valid_data_source_aliases() {
        let yaml = r#"
setup:
  weekEnding: 25-SEP-2021
dataSources:
  MyPg:
    main:
      query: "select Date, PageViews from events"
  csvFiles:
    ext:
      urlOrPath: "https://example.com/data.csv"
"#;
        assert!(load(yaml).is_ok());
    }
}
