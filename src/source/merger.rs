//! Source Loader + Source Merger: runs every declared query and CSV file,
//! namespaces each source's columns as `sourceAlias.columnName`, and merges
//! them into one master table via an outer join on `Date`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::{Config, DataSourceGroup};
use crate::error::{EngineError, EngineResult};
use crate::metrics::table::{CellValue, DailyTable};
use crate::source::connector::ConnectorFactory;
use crate::source::credentials::CredentialResolver;

/// One namespaced source's rows, prior to merging.
struct LoadedSource {
    alias_prefix: String,
    table: DailyTable,
    /// CSV-loaded columns win over DB-loaded columns for the same qualified
    /// name and date.
    is_csv: bool,
}

pub struct SourceLoader {
    factory: ConnectorFactory,
    http: reqwest::Client,
}

impl SourceLoader {
    pub fn new(credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            factory: ConnectorFactory::new(credentials),
            http: reqwest::Client::new(),
        }
    }

    /// Loads every `dataSources` entry and merges them into one master
    /// table keyed by `Date`, with `sourceAlias.columnName` column names.
    pub async fn load_and_merge(
        &self,
        config: &Config,
        connections: &[crate::config::connections::ConnectionConfig],
    ) -> EngineResult<DailyTable> {
        let mut loaded = Vec::new();

        for (connection_name, group) in &config.data_sources {
            match group {
                DataSourceGroup::Queries(queries) => {
                    let conn_config = connections
                        .iter()
                        .find(|c| &c.name == connection_name)
                        .ok_or_else(|| {
                            EngineError::config(
                                format!("dataSources.{connection_name}"),
                                "no matching entry in connections.yaml",
                            )
                        })?;
                    let connector = self.factory.build(conn_config).await?;
                    for (alias, query_ref) in queries {
                        let table = connector.execute(&query_ref.query).await?;
                        loaded.push(LoadedSource {
                            alias_prefix: alias.clone(),
                            table,
                            is_csv: false,
                        });
                    }
                }
                DataSourceGroup::CsvFiles(files) => {
                    for (alias, file_ref) in files {
                        let table = self.load_csv(&file_ref.url_or_path).await?;
                        loaded.push(LoadedSource {
                            alias_prefix: alias.clone(),
                            table,
                            is_csv: true,
                        });
                    }
                }
            }
        }

        Ok(merge(loaded))
    }

    async fn load_csv(&self, url_or_path: &str) -> EngineResult<DailyTable> {
        let contents = if url_or_path.starts_with("http://") || url_or_path.starts_with("https://") {
            self.http.get(url_or_path).send().await?.text().await?
        } else {
            std::fs::read_to_string(url_or_path)?
        };
        parse_csv(&contents)
    }
}

/// Parses a CSV whose first column is `Date` (`YYYY-MM-DD`) and remaining
/// columns are named values, numeric where parseable and text otherwise.
pub fn parse_csv(contents: &str) -> EngineResult<DailyTable> {
    let mut reader = csv::Reader::from_reader(contents.as_bytes());
    let headers = reader.headers()?.clone();
    let date_index = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("date"))
        .ok_or_else(|| EngineError::Data("CSV has no Date column".to_string()))?;
    let columns: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != date_index)
        .map(|(_, h)| h.to_string())
        .collect();

    let mut table = DailyTable::new(columns);
    for record in reader.records() {
        let record = record?;
        let date_str = record
            .get(date_index)
            .ok_or_else(|| EngineError::Data("CSV row missing Date cell".to_string()))?;
        let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(date_str, "%m/%d/%Y"))
            .map_err(|_| EngineError::Data(format!("unparseable CSV date: {date_str:?}")))?;

        let mut values = BTreeMap::new();
        for (i, field) in record.iter().enumerate() {
            if i == date_index {
                continue;
            }
            let name = headers[i].to_string();
            let value = if let Ok(n) = field.parse::<f64>() {
                CellValue::Number(n)
            } else if field.is_empty() {
                CellValue::Null
            } else {
                CellValue::Text(field.to_string())
            };
            values.insert(name, value);
        }
        table.push_row(date, values);
    }
    Ok(table)
}

/// Outer-joins every loaded source on `Date`, namespacing columns as
/// `alias.columnName`. A source that returns more than one row for the same
/// date (sub-date grain, or two CSV rows sharing a date) keeps every row —
/// per spec.md §4.5 these are combined later by a metric's `aggf`, not
/// collapsed here. Joining multiple sources on a date where more than one of
/// them has several rows produces the cross product of their rows for that
/// date, same as a SQL outer join would. When two sources produce the same
/// qualified column for the same date, the CSV-loaded value wins.
fn merge(sources: Vec<LoadedSource>) -> DailyTable {
    let mut columns: Vec<String> = Vec::new();

    struct SourceRows {
        is_csv: bool,
        by_date: BTreeMap<NaiveDate, Vec<BTreeMap<String, CellValue>>>,
    }

    let mut source_rows: Vec<SourceRows> = Vec::new();
    for source in sources {
        let mut by_date: BTreeMap<NaiveDate, Vec<BTreeMap<String, CellValue>>> = BTreeMap::new();
        for row in &source.table.rows {
            let mut qualified = BTreeMap::new();
            for (column, value) in &row.values {
                let name = format!("{}.{}", source.alias_prefix, column);
                if !columns.contains(&name) {
                    columns.push(name.clone());
                }
                qualified.insert(name, value.clone());
            }
            by_date.entry(row.date).or_default().push(qualified);
        }
        source_rows.push(SourceRows {
            is_csv: source.is_csv,
            by_date,
        });
    }

    let all_dates: BTreeSet<NaiveDate> = source_rows
        .iter()
        .flat_map(|s| s.by_date.keys().copied())
        .collect();

    let mut table = DailyTable::new(columns);
    for date in all_dates {
        // Cross product across sources: a source absent for this date
        // contributes a single empty row so the join stays "outer".
        let mut combos: Vec<BTreeMap<String, (CellValue, bool)>> = vec![BTreeMap::new()];
        for source in &source_rows {
            let variants = source.by_date.get(&date);
            let Some(variants) = variants else {
                // Source has no row for this date; outer join keeps the
                // combos from prior sources unchanged.
                continue;
            };

            let mut next_combos = Vec::with_capacity(combos.len() * variants.len());
            for combo in &combos {
                for variant in variants {
                    let mut merged = combo.clone();
                    for (column, value) in variant {
                        let should_overwrite = match merged.get(column) {
                            None => true,
                            Some((_, existing_is_csv)) => source.is_csv && !existing_is_csv,
                        };
                        if should_overwrite {
                            merged.insert(column.clone(), (value.clone(), source.is_csv));
                        }
                    }
                    next_combos.push(merged);
                }
            }
            combos = next_combos;
        }

        for combo in combos {
            let values = combo.into_iter().map(|(k, (v, _))| (k, v)).collect();
            table.push_row(date, values);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(column: &str, date: NaiveDate, value: CellValue) -> DailyTable {
        let mut t = DailyTable::new(vec![column.to_string()]);
        let mut row = BTreeMap::new();
        row.insert(column.to_string(), value);
        t.push_row(date, row);
        t
    }

    #[test]
    fn merge_namespaces_columns_by_alias() {
        let date = NaiveDate::from_ymd_opt(2021, 9, 20).unwrap();
        let a = LoadedSource {
            alias_prefix: "Ads".to_string(),
            table: table("Clicks", date, CellValue::Number(5.0)),
            is_csv: false,
        };
        let merged = merge(vec![a]);
        assert_eq!(merged.columns, vec!["Ads.Clicks".to_string()]);
    }

    #[test]
    fn csv_value_overrides_db_value_for_same_qualified_column() {
        let date = NaiveDate::from_ymd_opt(2021, 9, 20).unwrap();
        let db = LoadedSource {
            alias_prefix: "Ads".to_string(),
            table: table("Clicks", date, CellValue::Number(5.0)),
            is_csv: false,
        };
        let csv = LoadedSource {
            alias_prefix: "Ads".to_string(),
            table: table("Clicks", date, CellValue::Number(9.0)),
            is_csv: true,
        };
        let merged = merge(vec![db, csv]);
        let value = merged.column("Ads.Clicks");
        assert_eq!(value[0].1, CellValue::Number(9.0));
    }

    #[test]
    fn duplicate_date_rows_within_a_single_source_are_preserved() {
        let date = NaiveDate::from_ymd_opt(2021, 9, 20).unwrap();
        let mut sub_date = DailyTable::new(vec!["Clicks".to_string()]);
        for v in [5.0, 7.0] {
            let mut row = BTreeMap::new();
            row.insert("Clicks".to_string(), CellValue::Number(v));
            sub_date.push_row(date, row);
        }
        let source = LoadedSource {
            alias_prefix: "Ads".to_string(),
            table: sub_date,
            is_csv: false,
        };
        let merged = merge(vec![source]);
        let values = merged.column("Ads.Clicks");
        assert_eq!(values.len(), 2, "both same-date rows must survive the merge");
        let nums: Vec<f64> = values.iter().filter_map(|(_, v)| v.as_f64()).collect();
        assert_eq!(nums, vec![5.0, 7.0]);
    }

    #[test]
    fn duplicate_date_rows_across_sources_join_on_unrelated_columns() {
        let date = NaiveDate::from_ymd_opt(2021, 9, 20).unwrap();
        let clicks = LoadedSource {
            alias_prefix: "Ads".to_string(),
            table: table("Clicks", date, CellValue::Number(5.0)),
            is_csv: false,
        };
        let impressions = LoadedSource {
            alias_prefix: "Ads".to_string(),
            table: table("Impressions", date, CellValue::Number(50.0)),
            is_csv: false,
        };
        let merged = merge(vec![clicks, impressions]);
        assert_eq!(merged.rows.len(), 1, "same-date rows from different columns still join into one row");
        assert_eq!(merged.column("Ads.Clicks")[0].1, CellValue::Number(5.0));
        assert_eq!(merged.column("Ads.Impressions")[0].1, CellValue::Number(50.0));
    }

    #[test]
    fn parse_csv_reads_date_and_numeric_columns() {
        let contents = "Date,Impressions\n2021-09-20,100\n2021-09-21,200\n";
        let table = parse_csv(contents).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.columns, vec!["Impressions".to_string()]);
    }
}
