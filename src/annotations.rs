//! Annotation Resolver: loads annotation rows (`Date, MetricName,
//! EventDescription`), filters to the trailing 6-week window (CY and PY),
//! and dedupes by metric name — last in source order wins.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::calendar::Calendar;
use crate::config::{Config, RawAnnotations};
use crate::error::{EngineError, EngineResult};
use crate::source::connector::ConnectorFactory;

/// One surviving annotation, ready to attach to any block referencing its
/// metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub date: NaiveDate,
    pub metric_name: String,
    pub event_description: String,
}

/// Output of annotation resolution: the surviving annotations keyed by
/// metric name, plus the non-fatal problems recorded for the deck's
/// `eventErrors`.
#[derive(Debug, Clone, Default)]
pub struct ResolvedAnnotations {
    pub by_metric: HashMap<String, Annotation>,
    pub event_errors: Vec<String>,
}

pub struct AnnotationResolver {
    factory: ConnectorFactory,
    http: reqwest::Client,
}

impl AnnotationResolver {
    pub fn new(factory: ConnectorFactory) -> Self {
        Self {
            factory,
            http: reqwest::Client::new(),
        }
    }

    /// Loads every declared annotation source, then filters and dedupes per
    /// `spec.md` §4.7.
    pub async fn resolve(
        &self,
        config: &Config,
        calendar: &Calendar,
        known_metrics: &HashSet<String>,
        connections: &[crate::config::connections::ConnectionConfig],
    ) -> EngineResult<ResolvedAnnotations> {
        let raw_rows = self.load_all(config, connections).await?;
        Ok(filter_and_dedupe(raw_rows, calendar, known_metrics))
    }

    async fn load_all(
        &self,
        config: &Config,
        connections: &[crate::config::connections::ConnectionConfig],
    ) -> EngineResult<Vec<AnnotationRow>> {
        let Some(annotations) = &config.annotations else {
            return Ok(Vec::new());
        };

        let mut rows = Vec::new();
        match annotations {
            RawAnnotations::Flat(paths) => {
                for path in paths {
                    rows.extend(self.load_csv(path).await?);
                }
            }
            RawAnnotations::Structured {
                csv_files,
                data_sources,
            } => {
                for path in csv_files {
                    rows.extend(self.load_csv(path).await?);
                }
                for (connection_name, queries) in data_sources {
                    let conn_config = connections
                        .iter()
                        .find(|c| &c.name == connection_name)
                        .ok_or_else(|| {
                            EngineError::config(
                                format!("annotations.dataSources.{connection_name}"),
                                "no matching entry in connections.yaml",
                            )
                        })?;
                    let connector = self.factory.build(conn_config).await?;
                    for query_ref in queries.values() {
                        let table = connector.execute(&query_ref.query).await?;
                        rows.extend(annotation_rows_from_table(&table)?);
                    }
                }
            }
        }
        Ok(rows)
    }

    async fn load_csv(&self, url_or_path: &str) -> EngineResult<Vec<AnnotationRow>> {
        let contents = if url_or_path.starts_with("http://") || url_or_path.starts_with("https://") {
            self.http.get(url_or_path).send().await?.text().await?
        } else {
            std::fs::read_to_string(url_or_path)?
        };
        parse_annotation_csv(&contents)
    }
}

struct AnnotationRow {
    date: NaiveDate,
    metric_name: String,
    event_description: String,
}

/// Parses a three-column `Date,MetricName,EventDescription` CSV.
fn parse_annotation_csv(contents: &str) -> EngineResult<Vec<AnnotationRow>> {
    let mut reader = csv::Reader::from_reader(contents.as_bytes());
    let headers = reader.headers()?.clone();
    let date_idx = header_index(&headers, "date")?;
    let metric_idx = header_index(&headers, "metricname")?;
    let desc_idx = header_index(&headers, "eventdescription")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let date_str = record.get(date_idx).unwrap_or("");
        let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(date_str, "%m/%d/%Y"))
            .map_err(|_| EngineError::Data(format!("unparseable annotation date: {date_str:?}")))?;
        rows.push(AnnotationRow {
            date,
            metric_name: record.get(metric_idx).unwrap_or("").to_string(),
            event_description: record.get(desc_idx).unwrap_or("").to_string(),
        });
    }
    Ok(rows)
}

fn header_index(headers: &csv::StringRecord, wanted: &str) -> EngineResult<usize> {
    headers
        .iter()
        .position(|h| h.to_lowercase().replace([' ', '_'], "") == wanted)
        .ok_or_else(|| EngineError::Data(format!("annotation source is missing a {wanted:?} column")))
}

fn annotation_rows_from_table(table: &crate::metrics::table::DailyTable) -> EngineResult<Vec<AnnotationRow>> {
    let metric_col = table
        .columns
        .iter()
        .find(|c| c.eq_ignore_ascii_case("MetricName") || c.to_lowercase().ends_with(".metricname"))
        .ok_or_else(|| EngineError::Data("annotation query result has no MetricName column".to_string()))?
        .clone();
    let desc_col = table
        .columns
        .iter()
        .find(|c| c.eq_ignore_ascii_case("EventDescription") || c.to_lowercase().ends_with(".eventdescription"))
        .ok_or_else(|| {
            EngineError::Data("annotation query result has no EventDescription column".to_string())
        })?
        .clone();

    let mut rows = Vec::new();
    for row in &table.rows {
        let metric_name = row
            .values
            .get(&metric_col)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let event_description = row
            .values
            .get(&desc_col)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        rows.push(AnnotationRow {
            date: row.date,
            metric_name,
            event_description,
        });
    }
    Ok(rows)
}

/// Keeps rows in the trailing 6 CY weeks or 6 PY weeks, drops rows whose
/// `MetricName` isn't a known metric (recording the drop), and dedupes by
/// metric name keeping the last row in source order.
fn filter_and_dedupe(
    rows: Vec<AnnotationRow>,
    calendar: &Calendar,
    known_metrics: &HashSet<String>,
) -> ResolvedAnnotations {
    let cy_weeks = calendar.cy_weeks();
    let py_weeks = calendar.py_weeks();
    let in_window = |date: NaiveDate| {
        cy_weeks.iter().any(|w| w.contains(date)) || py_weeks.iter().any(|w| w.contains(date))
    };

    let mut by_metric: HashMap<String, Annotation> = HashMap::new();
    let mut event_errors = Vec::new();

    for row in rows {
        if !in_window(row.date) {
            continue;
        }
        if !metric_known(&row.metric_name, known_metrics) {
            event_errors.push(format!(
                "annotation on {} references unknown metric {:?}",
                row.date, row.metric_name
            ));
            continue;
        }
        // Last in source order wins (spec.md §9 Open Questions).
        by_metric.insert(
            row.metric_name.clone(),
            Annotation {
                date: row.date,
                metric_name: row.metric_name,
                event_description: row.event_description,
            },
        );
    }

    ResolvedAnnotations {
        by_metric,
        event_errors,
    }
}

fn metric_known(name: &str, known: &HashSet<String>) -> bool {
    known.contains(name) || crate::config::strip_reserved_suffix(name).is_some_and(|base| known.contains(base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn calendar() -> Calendar {
        Calendar::new(NaiveDate::from_ymd_opt(2021, 9, 25).unwrap(), 12)
    }

    #[test]
    fn drops_rows_outside_the_trailing_window() {
        let rows = vec![
            AnnotationRow {
                date: NaiveDate::from_ymd_opt(2021, 9, 8).unwrap(),
                metric_name: "Clicks".into(),
                event_description: "Campaign launch".into(),
            },
            AnnotationRow {
                date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
                metric_name: "Clicks".into(),
                event_description: "Old".into(),
            },
        ];
        let known: HashSet<String> = ["Clicks".to_string()].into_iter().collect();
        let resolved = filter_and_dedupe(rows, &calendar(), &known);
        assert_eq!(resolved.by_metric.len(), 1);
        assert_eq!(
            resolved.by_metric["Clicks"].event_description,
            "Campaign launch"
        );
    }

    #[test]
    fn unknown_metric_is_recorded_as_an_event_error() {
        let rows = vec![AnnotationRow {
            date: NaiveDate::from_ymd_opt(2021, 9, 8).unwrap(),
            metric_name: "Bogus".into(),
            event_description: "???".into(),
        }];
        let known: HashSet<String> = HashSet::new();
        let resolved = filter_and_dedupe(rows, &calendar(), &known);
        assert!(resolved.by_metric.is_empty());
        assert_eq!(resolved.event_errors.len(), 1);
    }

    #[test]
    fn duplicate_metric_names_keep_the_last_in_source_order() {
        let rows = vec![
            AnnotationRow {
                date: NaiveDate::from_ymd_opt(2021, 9, 8).unwrap(),
                metric_name: "Clicks".into(),
                event_description: "First".into(),
            },
            AnnotationRow {
                date: NaiveDate::from_ymd_opt(2021, 9, 15).unwrap(),
                metric_name: "Clicks".into(),
                event_description: "Second".into(),
            },
        ];
        let known: HashSet<String> = ["Clicks".to_string()].into_iter().collect();
        let resolved = filter_and_dedupe(rows, &calendar(), &known);
        assert_eq!(resolved.by_metric["Clicks"].event_description, "Second");
    }
}
