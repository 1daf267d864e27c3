//! Metric engine and deck builder for Weekly Business Review reports.
//!
//! The public entry point is [`build_deck`]: given a parsed [`config::Config`]
//! and an optional CSV override, it runs the whole pipeline — Source Loader
//! → Source Merger → Metric Engine → Annotation Resolver → Deck Builder —
//! and returns the render-agnostic [`deck::Deck`] document.

pub mod annotations;
pub mod axis;
pub mod calendar;
pub mod config;
pub mod deck;
pub mod error;
pub mod formatter;
pub mod harness;
pub mod metrics;
pub mod observability;
pub mod source;

use std::collections::HashSet;
use std::sync::Arc;

use crate::annotations::{AnnotationResolver, ResolvedAnnotations};
use crate::config::connections::ConnectionConfig;
use crate::config::Config;
use crate::deck::Deck;
use crate::error::EngineResult;
use crate::metrics::engine::MetricEngine;
use crate::metrics::table::DailyTable;
use crate::source::connector::ConnectorFactory;
use crate::source::credentials::CredentialResolver;
use crate::source::merger::SourceLoader;

/// Every input a single deck build needs beyond the parsed config: the
/// connections a `dataSources`/`annotations.dataSources` entry may resolve
/// against, the credential resolver for secret-backed connections, and an
/// optional request-time CSV upload that overrides the merged table
/// entirely (per Invariant "CSV-override precedence").
pub struct BuildInputs<'a> {
    pub connections: &'a [ConnectionConfig],
    pub credentials: Arc<dyn CredentialResolver>,
    pub csv_override: Option<&'a str>,
}

/// Runs the full pipeline for one request and returns the finished deck.
pub async fn build_deck(config: &Config, inputs: BuildInputs<'_>) -> EngineResult<Deck> {
    let stage_start = std::time::Instant::now();
    let master = match inputs.csv_override {
        Some(csv) => source::merger::parse_csv(csv)?,
        None => {
            let loader = SourceLoader::new(Arc::clone(&inputs.credentials));
            loader.load_and_merge(config, inputs.connections).await?
        }
    };
    observability::record_stage("source_load_merge", stage_start.elapsed().as_secs_f64());

    let stage_start = std::time::Instant::now();
    let mut engine = MetricEngine::build(config, &master)?;
    observability::record_stage("metric_engine", stage_start.elapsed().as_secs_f64());

    let known_metrics: HashSet<String> = config.metrics.keys().cloned().collect();
    let calendar = engine.calendar().clone();
    let factory = ConnectorFactory::new(Arc::clone(&inputs.credentials));
    let resolver = AnnotationResolver::new(factory);

    let stage_start = std::time::Instant::now();
    let annotations: ResolvedAnnotations = resolver
        .resolve(config, &calendar, &known_metrics, inputs.connections)
        .await?;
    for _ in &annotations.event_errors {
        observability::record_warning("annotation");
    }
    observability::record_stage("annotations", stage_start.elapsed().as_secs_f64());

    let stage_start = std::time::Instant::now();
    let built = deck::build_deck(config, &mut engine, &annotations)?;
    observability::record_stage("deck_builder", stage_start.elapsed().as_secs_f64());

    Ok(built)
}
