//! HTTP surface: thin glue around the library pipeline in `lib.rs`. Routes
//! mirror the external interface sketched in `spec.md` §6. Publication and
//! object-storage are out of scope per the spec's non-goals — `DeckPublisher`
//! is a trait boundary with only an in-memory double behind it here, the
//! same way `CredentialResolver` models the secret-store boundary without
//! actually vendoring a secrets backend.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use wbr_engine::config::{self, connections::ConnectionsFile, Config};
use wbr_engine::error::{EngineError, EngineResult};
use wbr_engine::harness;
use wbr_engine::observability;
use wbr_engine::source::credentials::{CredentialResolver, StaticResolver};
use wbr_engine::{build_deck, BuildInputs};

#[derive(Clone)]
pub struct AppState {
    pub credentials: Arc<dyn CredentialResolver>,
    pub publisher: Arc<dyn DeckPublisher>,
    pub scenario_root: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/report", post(report))
        .route("/get-wbr-metrics", post(report))
        .route("/publish-wbr-report", post(publish))
        .route("/publish-protected-report", post(publish_protected))
        .route("/download_yaml", post(download_yaml))
        .route("/wbr-unit-test", get(run_unit_tests))
        .route("/metrics", get(metrics_endpoint))
        .route("/health", get(health))
        .with_state(state)
}

/// Overrides `POST /report` accepts as query parameters, layered onto the
/// parsed YAML before validation.
#[derive(Debug, Deserialize, Default)]
pub struct ReportOverrides {
    #[serde(rename = "weekEnding")]
    pub week_ending: Option<String>,
    #[serde(rename = "weekNumber")]
    pub week_number: Option<u32>,
    pub title: Option<String>,
    #[serde(rename = "fiscalYearEndMonth")]
    pub fiscal_year_end_month: Option<String>,
    #[serde(rename = "blockStartingNumber")]
    pub block_starting_number: Option<u32>,
    pub tooltip: Option<bool>,
    pub password: Option<String>,
    #[serde(rename = "outputType", default)]
    pub output_type: OutputType,
}

#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputType {
    #[default]
    Json,
    Html,
}

async fn report(
    State(state): State<AppState>,
    Query(overrides): Query<ReportOverrides>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, EngineError> {
    let (yaml, csv, connections) = extract_report_payload(multipart).await?;
    let yaml = apply_overrides(&yaml, &overrides);
    let config = config::load(&yaml)?;

    let deck = build_deck(
        &config,
        BuildInputs {
            connections: &connections,
            credentials: Arc::clone(&state.credentials),
            csv_override: csv.as_deref(),
        },
    )
    .await?;

    match overrides.output_type {
        OutputType::Json => Ok(Json(serde_json::to_value(&deck).map_err(|e| {
            EngineError::Internal(format!("failed to serialize deck: {e}"))
        })?)),
        OutputType::Html => Ok(Json(json!({ "html": render_html_stub(&deck) }))),
    }
}

#[derive(Debug, Deserialize)]
struct PublishRequest {
    deck: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct PublishResponse {
    path: String,
}

async fn publish(
    State(state): State<AppState>,
    Json(body): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, EngineError> {
    let id = state.publisher.publish(body.deck, None)?;
    Ok(Json(PublishResponse {
        path: format!("/reports/{id}"),
    }))
}

#[derive(Debug, Deserialize)]
struct PublishQuery {
    password: Option<String>,
}

async fn publish_protected(
    State(state): State<AppState>,
    Query(query): Query<PublishQuery>,
    Json(body): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, EngineError> {
    let id = state.publisher.publish(body.deck, query.password)?;
    Ok(Json(PublishResponse {
        path: format!("/reports/{id}"),
    }))
}

/// Takes a CSV and returns a starter YAML: one basic `sum` metric and one
/// `6_12Graph` block per numeric column.
async fn download_yaml(mut multipart: Multipart) -> Result<Json<serde_json::Value>, EngineError> {
    let mut csv_contents = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| EngineError::Data(e.to_string()))?
    {
        if field.name() == Some("csv") {
            csv_contents = Some(
                field
                    .text()
                    .await
                    .map_err(|e| EngineError::Data(e.to_string()))?,
            );
        }
    }
    let csv = csv_contents.ok_or_else(|| EngineError::Data("missing csv field".to_string()))?;
    let table = wbr_engine::source::merger::parse_csv(&csv)?;

    let mut metrics = serde_yaml::Mapping::new();
    let mut y_axis = Vec::new();
    for column in &table.columns {
        let mut metric = serde_yaml::Mapping::new();
        metric.insert("column".into(), column.clone().into());
        metric.insert("aggf".into(), "sum".into());
        metrics.insert(column.clone().into(), metric.into());

        let mut entry = serde_yaml::Mapping::new();
        entry.insert("legendName".into(), column.clone().into());
        entry.insert("metric".into(), column.clone().into());
        entry.insert("lineStyle".into(), "primary".into());
        y_axis.push(serde_yaml::Value::Mapping(entry));
    }

    let mut block = serde_yaml::Mapping::new();
    block.insert("uiType".into(), "6_12Graph".into());
    block.insert("yAxis".into(), serde_yaml::Value::Sequence(y_axis));

    let mut setup = serde_yaml::Mapping::new();
    setup.insert(
        "weekEnding".into(),
        table
            .rows
            .last()
            .map(|r| r.date.format("%d-%b-%Y").to_string())
            .unwrap_or_default()
            .into(),
    );

    let mut doc = serde_yaml::Mapping::new();
    doc.insert("setup".into(), setup.into());
    doc.insert("metrics".into(), metrics.into());
    doc.insert(
        "deck".into(),
        serde_yaml::Value::Sequence(vec![serde_yaml::Value::Mapping(block)]),
    );

    let yaml = serde_yaml::to_string(&serde_yaml::Value::Mapping(doc))
        .map_err(|e| EngineError::Internal(format!("failed to render starter yaml: {e}")))?;
    Ok(Json(json!({ "yaml": yaml })))
}

#[derive(Debug, Serialize)]
struct UnitTestResponse {
    scenarios: Vec<harness::ScenarioReport>,
}

async fn run_unit_tests(State(state): State<AppState>) -> Result<Json<UnitTestResponse>, EngineError> {
    let cases = harness::discover_scenarios(&state.scenario_root)?;
    let mut scenarios = Vec::with_capacity(cases.len());
    for case in &cases {
        scenarios.push(harness::run_scenario(case)?);
    }
    Ok(Json(UnitTestResponse { scenarios }))
}

async fn metrics_endpoint() -> String {
    observability::render()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "service": "wbr-engine", "version": env!("CARGO_PKG_VERSION") }))
}

/// Pulls the `yaml`, optional `csv`, and optional `connections` fields out
/// of a `POST /report` multipart body.
async fn extract_report_payload(
    mut multipart: Multipart,
) -> EngineResult<(String, Option<String>, Vec<wbr_engine::config::connections::ConnectionConfig>)> {
    let mut yaml = None;
    let mut csv = None;
    let mut connections = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| EngineError::Data(e.to_string()))?
    {
        match field.name() {
            Some("yaml") | Some("config") => {
                yaml = Some(field.text().await.map_err(|e| EngineError::Data(e.to_string()))?)
            }
            Some("csv") => csv = Some(field.text().await.map_err(|e| EngineError::Data(e.to_string()))?),
            Some("connections") => {
                let text = field.text().await.map_err(|e| EngineError::Data(e.to_string()))?;
                let file: ConnectionsFile = serde_yaml::from_str(&text)?;
                connections = file.connections;
            }
            _ => {}
        }
    }

    let yaml = yaml.ok_or_else(|| EngineError::config("<root>", "missing yaml field"))?;
    Ok((yaml, csv, connections))
}

/// Layers query-parameter overrides onto the parsed YAML document's
/// `setup` section before validation.
fn apply_overrides(yaml: &str, overrides: &ReportOverrides) -> String {
    let Ok(serde_yaml::Value::Mapping(mut doc)) = serde_yaml::from_str(yaml) else {
        return yaml.to_string();
    };
    let setup = doc
        .entry(serde_yaml::Value::String("setup".to_string()))
        .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    if let serde_yaml::Value::Mapping(setup) = setup {
        if let Some(v) = &overrides.week_ending {
            setup.insert("weekEnding".into(), v.clone().into());
        }
        if let Some(v) = overrides.week_number {
            setup.insert("weekNumber".into(), v.into());
        }
        if let Some(v) = &overrides.title {
            setup.insert("title".into(), v.clone().into());
        }
        if let Some(v) = &overrides.fiscal_year_end_month {
            setup.insert("fiscalYearEndMonth".into(), v.clone().into());
        }
        if let Some(v) = overrides.block_starting_number {
            setup.insert("blockStartingNumber".into(), v.into());
        }
        if let Some(v) = overrides.tooltip {
            setup.insert("tooltip".into(), v.into());
        }
    }
    serde_yaml::to_string(&serde_yaml::Value::Mapping(doc)).unwrap_or_else(|_| yaml.to_string())
}

fn render_html_stub(deck: &wbr_engine::deck::Deck) -> String {
    format!(
        "<html><body><h1>{}</h1><p>{} blocks</p></body></html>",
        deck.title,
        deck.blocks.len()
    )
}

/// Persists a finished deck document and hands back an addressable path.
/// The spec scopes real object-storage publication out — this is the
/// contract boundary, backed by an in-memory store suitable for tests and
/// for a single-process deployment.
pub trait DeckPublisher: Send + Sync {
    fn publish(&self, deck: serde_json::Value, password: Option<String>) -> EngineResult<String>;
    fn get(&self, id: &str) -> Option<serde_json::Value>;
}

#[derive(Default)]
pub struct InMemoryPublisher {
    decks: Mutex<HashMap<String, (serde_json::Value, Option<String>)>>,
}

impl DeckPublisher for InMemoryPublisher {
    fn publish(&self, deck: serde_json::Value, password: Option<String>) -> EngineResult<String> {
        let id = Uuid::new_v4().to_string();
        self.decks
            .lock()
            .expect("publisher mutex poisoned")
            .insert(id.clone(), (deck, password));
        Ok(id)
    }

    fn get(&self, id: &str) -> Option<serde_json::Value> {
        self.decks
            .lock()
            .expect("publisher mutex poisoned")
            .get(id)
            .map(|(deck, _)| deck.clone())
    }
}

pub fn default_state(scenario_root: PathBuf) -> AppState {
    AppState {
        credentials: Arc::new(StaticResolver(HashMap::new())),
        publisher: Arc::new(InMemoryPublisher::default()),
        scenario_root,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_layers_week_ending_onto_setup() {
        let yaml = "setup:\n  weekEnding: 01-JAN-2020\n";
        let overrides = ReportOverrides {
            week_ending: Some("25-SEP-2021".to_string()),
            ..Default::default()
        };
        let result = apply_overrides(yaml, &overrides);
        assert!(result.contains("25-SEP-2021"));
    }

    #[test]
    fn in_memory_publisher_round_trips_a_deck() {
        let publisher = InMemoryPublisher::default();
        let id = publisher.publish(json!({"title": "x"}), None).unwrap();
        assert_eq!(publisher.get(&id), Some(json!({"title": "x"})));
    }
}
