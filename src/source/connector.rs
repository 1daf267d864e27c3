//! `SourceConnector`: a single `execute(query) -> DailyTable` capability
//! across every driver. The factory dispatches by the connection's `type`
//! field; Snowflake/Redshift column-case quirks are normalized here so the
//! rest of the engine only ever sees `Date` and the author's own column
//! names.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use chrono::NaiveDate;
use tokio_postgres::NoTls;

use crate::config::connections::{ConnectionConfig, ConnectionFields, ConnectionKind};
use crate::error::{EngineError, EngineResult};
use crate::metrics::table::{CellValue, DailyTable};
use crate::source::credentials::CredentialResolver;

#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn execute(&self, query: &str) -> EngineResult<DailyTable>;
}

/// Builds the right connector for a `connections.yaml` entry, resolving
/// secret-store-backed configs first.
pub struct ConnectorFactory {
    credentials: Arc<dyn CredentialResolver>,
}

impl ConnectorFactory {
    pub fn new(credentials: Arc<dyn CredentialResolver>) -> Self {
        Self { credentials }
    }

    pub async fn build(&self, conn: &ConnectionConfig) -> EngineResult<Box<dyn SourceConnector>> {
        let fields = if conn.uses_secret_store() {
            let secret_name = conn.config.secret_name.as_deref().ok_or_else(|| {
                EngineError::config(format!("connections.{}", conn.name), "missing secretName")
            })?;
            self.credentials.resolve(secret_name).await?
        } else {
            conn.config.clone()
        };

        match conn.kind {
            ConnectionKind::Postgres => Ok(Box::new(PostgresConnector::connect(&fields, false).await?)),
            ConnectionKind::Redshift => Ok(Box::new(PostgresConnector::connect(&fields, true).await?)),
            ConnectionKind::Snowflake => Ok(Box::new(SnowflakeConnector::new(&fields)?)),
            ConnectionKind::Athena => Ok(Box::new(AthenaConnector::new(&fields)?)),
        }
    }
}

/// Postgres and Redshift share the wire protocol; Redshift additionally
/// lower-cases every returned column name before `Date` is re-canonicalized.
pub struct PostgresConnector {
    pool: Pool<PostgresConnectionManager<NoTls>>,
    lowercase_columns: bool,
}

impl PostgresConnector {
    pub async fn connect(fields: &ConnectionFields, lowercase_columns: bool) -> EngineResult<Self> {
        let config = format!(
            "host={} port={} user={} password={} dbname={}",
            fields.host.as_deref().unwrap_or("localhost"),
            fields.port.unwrap_or(5432),
            fields.username.as_deref().unwrap_or(""),
            fields.password.as_deref().unwrap_or(""),
            fields.database.as_deref().unwrap_or(""),
        );
        let manager = PostgresConnectionManager::new_from_stringlike(config, NoTls)
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        let pool = Pool::builder()
            .max_size(10)
            .connection_timeout(Duration::from_secs(30))
            .build(manager)
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        Ok(Self {
            pool,
            lowercase_columns,
        })
    }
}

#[async_trait]
impl SourceConnector for PostgresConnector {
    async fn execute(&self, query: &str) -> EngineResult<DailyTable> {
        let conn = self.pool.get().await?;
        let rows = conn.query(query, &[]).await?;
        rows_to_daily_table(&rows, self.lowercase_columns)
    }
}

fn rows_to_daily_table(rows: &[tokio_postgres::Row], lowercase_columns: bool) -> EngineResult<DailyTable> {
    let Some(first) = rows.first() else {
        return Ok(DailyTable::default());
    };

    let column_names: Vec<String> = first
        .columns()
        .iter()
        .map(|c| {
            let name = c.name().to_string();
            if lowercase_columns {
                name.to_lowercase()
            } else {
                name
            }
        })
        .collect();

    if column_names.first().map(|s| s.as_str()) != Some("Date")
        && !column_names
            .iter()
            .any(|c| c.eq_ignore_ascii_case("date"))
    {
        return Err(EngineError::Data(
            "query result has no Date column".to_string(),
        ));
    }

    let non_date_columns: Vec<String> = column_names
        .iter()
        .filter(|c| !c.eq_ignore_ascii_case("date"))
        .cloned()
        .collect();
    let mut table = DailyTable::new(non_date_columns);

    for row in rows {
        let mut date: Option<NaiveDate> = None;
        let mut values = BTreeMap::new();
        for (i, column) in row.columns().iter().enumerate() {
            let name = if lowercase_columns {
                column.name().to_lowercase()
            } else {
                column.name().to_string()
            };
            if name.eq_ignore_ascii_case("date") {
                date = row.try_get::<_, NaiveDate>(i).ok();
            } else if let Ok(n) = row.try_get::<_, f64>(i) {
                values.insert(name, CellValue::Number(n));
            } else if let Ok(s) = row.try_get::<_, String>(i) {
                values.insert(name, CellValue::Text(s));
            }
        }
        let date = date.ok_or_else(|| EngineError::Data("row is missing Date".to_string()))?;
        table.push_row(date, values);
    }
    Ok(table)
}

/// Snowflake's SQL REST API. Columns come back upper-cased; `DATE` is
/// re-canonicalized to `Date` the same way Redshift's lower-case columns are
/// re-canonicalized.
pub struct SnowflakeConnector {
    http: reqwest::Client,
    account: String,
    warehouse: String,
    database: String,
    schema: Option<String>,
}

impl SnowflakeConnector {
    pub fn new(fields: &ConnectionFields) -> EngineResult<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            account: fields
                .account
                .clone()
                .ok_or_else(|| EngineError::config("connections", "snowflake requires account"))?,
            warehouse: fields.warehouse.clone().unwrap_or_default(),
            database: fields.database.clone().unwrap_or_default(),
            schema: fields.schema.clone(),
        })
    }
}

#[async_trait]
impl SourceConnector for SnowflakeConnector {
    async fn execute(&self, query: &str) -> EngineResult<DailyTable> {
        let url = format!(
            "https://{}.snowflakecomputing.com/api/v2/statements",
            self.account
        );
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "statement": query,
                "warehouse": self.warehouse,
                "database": self.database,
                "schema": self.schema,
            }))
            .send()
            .await?;
        let body: serde_json::Value = response.json().await?;
        snowflake_response_to_table(&body)
    }
}

fn snowflake_response_to_table(body: &serde_json::Value) -> EngineResult<DailyTable> {
    let columns = body["resultSetMetaData"]["rowType"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let column_names: Vec<String> = columns
        .iter()
        .filter_map(|c| c["name"].as_str())
        .map(|s| s.to_uppercase())
        .collect();

    if !column_names.iter().any(|c| c == "DATE") {
        return Err(EngineError::Data(
            "Snowflake result has no DATE column".to_string(),
        ));
    }

    let non_date_columns: Vec<String> = column_names.iter().filter(|c| *c != "DATE").cloned().collect();
    let mut table = DailyTable::new(non_date_columns);

    if let Some(data_rows) = body["data"].as_array() {
        for data_row in data_rows {
            let cells = data_row.as_array().cloned().unwrap_or_default();
            let mut date = None;
            let mut values = BTreeMap::new();
            for (name, cell) in column_names.iter().zip(cells.iter()) {
                if name == "DATE" {
                    date = cell
                        .as_str()
                        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok());
                } else if let Some(n) = cell.as_f64() {
                    values.insert(name.clone(), CellValue::Number(n));
                } else if let Some(s) = cell.as_str() {
                    values.insert(name.clone(), CellValue::Text(s.to_string()));
                }
            }
            let date = date.ok_or_else(|| EngineError::Data("row missing DATE".to_string()))?;
            table.push_row(date, values);
        }
    }
    Ok(table)
}

/// Athena: submit via `StartQueryExecution`, poll `GetQueryExecution` on a
/// bounded interval until terminal, then page `GetQueryResults`.
pub struct AthenaConnector {
    region: String,
    s3_staging_dir: String,
    database: String,
    workgroup: Option<String>,
}

impl AthenaConnector {
    pub fn new(fields: &ConnectionFields) -> EngineResult<Self> {
        Ok(Self {
            region: fields
                .region
                .clone()
                .ok_or_else(|| EngineError::config("connections", "athena requires region"))?,
            s3_staging_dir: fields.s3_staging_dir.clone().ok_or_else(|| {
                EngineError::config("connections", "athena requires s3StagingDir")
            })?,
            database: fields.database.clone().unwrap_or_default(),
            workgroup: fields.workgroup.clone(),
        })
    }

    async fn client(&self) -> aws_sdk_athena::Client {
        let config = aws_config::from_env()
            .region(aws_sdk_athena::config::Region::new(self.region.clone()))
            .load()
            .await;
        aws_sdk_athena::Client::new(&config)
    }
}

#[async_trait]
impl SourceConnector for AthenaConnector {
    async fn execute(&self, query: &str) -> EngineResult<DailyTable> {
        let client = self.client().await;

        let start = client
            .start_query_execution()
            .query_string(query)
            .query_execution_context(
                aws_sdk_athena::types::QueryExecutionContext::builder()
                    .database(&self.database)
                    .build(),
            )
            .result_configuration(
                aws_sdk_athena::types::ResultConfiguration::builder()
                    .output_location(&self.s3_staging_dir)
                    .build(),
            )
            .set_work_group(self.workgroup.clone())
            .send()
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        let execution_id = start
            .query_execution_id()
            .ok_or_else(|| EngineError::Connection("Athena did not return a query execution id".into()))?
            .to_string();

        loop {
            let status = client
                .get_query_execution()
                .query_execution_id(&execution_id)
                .send()
                .await
                .map_err(|e| EngineError::Connection(e.to_string()))?;
            let state = status
                .query_execution()
                .and_then(|q| q.status())
                .and_then(|s| s.state())
                .cloned();
            match state {
                Some(aws_sdk_athena::types::QueryExecutionState::Succeeded) => break,
                Some(aws_sdk_athena::types::QueryExecutionState::Failed)
                | Some(aws_sdk_athena::types::QueryExecutionState::Cancelled) => {
                    return Err(EngineError::Connection(format!(
                        "Athena query {execution_id} did not succeed"
                    )));
                }
                _ => tokio::time::sleep(Duration::from_millis(500)).await,
            }
        }

        let results = client
            .get_query_results()
            .query_execution_id(&execution_id)
            .send()
            .await
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        athena_results_to_table(&results)
    }
}

fn athena_results_to_table(results: &aws_sdk_athena::operation::get_query_results::GetQueryResultsOutput) -> EngineResult<DailyTable> {
    let Some(result_set) = results.result_set() else {
        return Ok(DailyTable::default());
    };
    let rows = result_set.rows();
    let Some(header) = rows.first() else {
        return Ok(DailyTable::default());
    };

    let column_names: Vec<String> = header
        .data()
        .iter()
        .map(|d| d.var_char_value().unwrap_or_default().to_string())
        .collect();

    if !column_names.iter().any(|c| c == "Date") {
        return Err(EngineError::Data(
            "Athena result has no Date column".to_string(),
        ));
    }
    let non_date_columns: Vec<String> = column_names.iter().filter(|c| *c != "Date").cloned().collect();
    let mut table = DailyTable::new(non_date_columns);

    for row in rows.iter().skip(1) {
        let cells = row.data();
        let mut date = None;
        let mut values = BTreeMap::new();
        for (name, cell) in column_names.iter().zip(cells.iter()) {
            let raw = cell.var_char_value().unwrap_or_default();
            if name == "Date" {
                date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok();
            } else if let Ok(n) = raw.parse::<f64>() {
                values.insert(name.clone(), CellValue::Number(n));
            } else {
                values.insert(name.clone(), CellValue::Text(raw.to_string()));
            }
        }
        let date = date.ok_or_else(|| EngineError::Data("row missing Date".to_string()))?;
        table.push_row(date, values);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_response_canonicalizes_date_column() {
        let body = serde_json::json!({
            "resultSetMetaData": { "rowType": [{"name": "DATE"}, {"name": "PAGEVIEWS"}] },
            "data": [["2021-09-25", 100]]
        });
        let table = snowflake_response_to_table(&body).unwrap();
        assert_eq!(table.columns, vec!["PAGEVIEWS".to_string()]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn snowflake_response_without_date_is_data_error() {
        let body = serde_json::json!({
            "resultSetMetaData": { "rowType": [{"name": "PAGEVIEWS"}] },
            "data": [[100]]
        });
        assert!(snowflake_response_to_table(&body).is_err());
    }
}
