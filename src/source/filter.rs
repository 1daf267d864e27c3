//! Row-wise predicate evaluation for filter metrics.
//!
//! Filter queries are a single comparison against a post-merge column name,
//! e.g. `Country == 'US'` or `RevenueUSD > 0`. This is intentionally not a
//! general expression language — the spec scopes filter metrics to exactly
//! this shape (Invariant 5: "Filter queries reference only post-merge column
//! names").

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, EngineResult};
use crate::metrics::table::CellValue;

static PREDICATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(==|!=|>=|<=|>|<)\s*(.+?)\s*$"#).unwrap()
});

enum Literal {
    Text(String),
    Number(f64),
}

fn parse_literal(raw: &str) -> Literal {
    let trimmed = raw.trim();
    if (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
        || (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
    {
        Literal::Text(trimmed[1..trimmed.len() - 1].to_string())
    } else if let Ok(n) = trimmed.parse::<f64>() {
        Literal::Number(n)
    } else {
        Literal::Text(trimmed.to_string())
    }
}

/// Evaluates `query` against one row's values, returning whether the row
/// should be kept.
pub fn evaluate_predicate(query: &str, row: &BTreeMap<String, CellValue>) -> EngineResult<bool> {
    let caps = PREDICATE_RE
        .captures(query)
        .ok_or_else(|| EngineError::Data(format!("unparseable filter query: {query:?}")))?;
    let column = &caps[1];
    let op = &caps[2];
    let literal = parse_literal(&caps[3]);

    let cell = row.get(column).unwrap_or(&CellValue::Null);

    let result = match (&literal, cell) {
        (Literal::Text(expected), CellValue::Text(actual)) => compare_text(op, actual, expected),
        (Literal::Number(expected), CellValue::Number(actual)) => compare_num(op, *actual, *expected),
        _ => false,
    };
    Ok(result)
}

fn compare_text(op: &str, actual: &str, expected: &str) -> bool {
    match op {
        "==" => actual == expected,
        "!=" => actual != expected,
        _ => false,
    }
}

fn compare_num(op: &str, actual: f64, expected: f64) -> bool {
    match op {
        "==" => actual == expected,
        "!=" => actual != expected,
        ">" => actual > expected,
        "<" => actual < expected,
        ">=" => actual >= expected,
        "<=" => actual <= expected,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(column: &str, value: CellValue) -> BTreeMap<String, CellValue> {
        let mut m = BTreeMap::new();
        m.insert(column.to_string(), value);
        m
    }

    #[test]
    fn text_equality() {
        let r = row("Country", CellValue::Text("US".to_string()));
        assert!(evaluate_predicate("Country == 'US'", &r).unwrap());
        assert!(!evaluate_predicate("Country == 'JP'", &r).unwrap());
    }

    #[test]
    fn numeric_comparison() {
        let r = row("RevenueUSD", CellValue::Number(42.0));
        assert!(evaluate_predicate("RevenueUSD > 0", &r).unwrap());
        assert!(!evaluate_predicate("RevenueUSD > 100", &r).unwrap());
    }

    #[test]
    fn unparseable_query_is_a_data_error() {
        let r = row("Country", CellValue::Text("US".to_string()));
        assert!(evaluate_predicate("garbage", &r).is_err());
    }
}
