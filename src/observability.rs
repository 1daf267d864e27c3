//! Prometheus metrics for the service itself (request counts, pipeline
//! stage durations) — infrastructure observability, kept deliberately
//! separate in naming from the business "Metric Engine" this crate builds
//! decks with.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub struct ServiceMetrics {
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
    pub pipeline_stage_duration_seconds: HistogramVec,
    pub evaluation_warnings_total: IntCounterVec,
}

pub static METRICS: Lazy<ServiceMetrics> = Lazy::new(|| {
    let requests_total = IntCounterVec::new(
        Opts::new("wbr_http_requests_total", "Total HTTP requests handled"),
        &["route", "status"],
    )
    .expect("metric registration");
    REGISTRY
        .register(Box::new(requests_total.clone()))
        .expect("metric registration");

    let request_duration_seconds = HistogramVec::new(
        HistogramOpts::new(
            "wbr_http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["route"],
    )
    .expect("metric registration");
    REGISTRY
        .register(Box::new(request_duration_seconds.clone()))
        .expect("metric registration");

    let pipeline_stage_duration_seconds = HistogramVec::new(
        HistogramOpts::new(
            "wbr_pipeline_stage_duration_seconds",
            "Duration of a single deck-build pipeline stage",
        ),
        &["stage"],
    )
    .expect("metric registration");
    REGISTRY
        .register(Box::new(pipeline_stage_duration_seconds.clone()))
        .expect("metric registration");

    let evaluation_warnings_total = IntCounterVec::new(
        Opts::new(
            "wbr_evaluation_warnings_total",
            "Non-fatal EvaluationError/AnnotationWarning occurrences",
        ),
        &["kind"],
    )
    .expect("metric registration");
    REGISTRY
        .register(Box::new(evaluation_warnings_total.clone()))
        .expect("metric registration");

    ServiceMetrics {
        requests_total,
        request_duration_seconds,
        pipeline_stage_duration_seconds,
        evaluation_warnings_total,
    }
});

/// Renders the registry in the Prometheus text exposition format for the
/// `/metrics` endpoint.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .expect("prometheus encoding never fails on valid metric families");
    String::from_utf8(buffer).expect("prometheus text encoder always emits valid utf8")
}

/// Records one pipeline stage's wall-clock duration.
pub fn record_stage(stage: &str, seconds: f64) {
    METRICS
        .pipeline_stage_duration_seconds
        .with_label_values(&[stage])
        .observe(seconds);
}

/// Records a non-fatal evaluation warning (division-by-zero, missing
/// operand, annotation mismatch) for dashboarding.
pub fn record_warning(kind: &str) {
    METRICS.evaluation_warnings_total.with_label_values(&[kind]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        record_stage("metric_engine", 0.01);
        let text = render();
        assert!(text.contains("wbr_pipeline_stage_duration_seconds"));
    }
}
