use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// A single structured validation failure surfaced by the Config Validator.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigProblem {
    pub path: String,
    pub message: String,
}

impl ConfigProblem {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Engine-wide error taxonomy. `EvaluationError` and `AnnotationWarning` are
/// deliberately absent: those are recovered locally by the Metric Engine and
/// Annotation Resolver respectively and never propagate as an `EngineError`.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("config error: {0:?}")]
    Config(Vec<ConfigProblem>),

    #[error("data error: {0}")]
    Data(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Config(vec![ConfigProblem::new(path, message)])
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        EngineError::config("<root>", e.to_string())
    }
}

impl From<csv::Error> for EngineError {
    fn from(e: csv::Error) -> Self {
        EngineError::Data(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Data(e.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Connection(e.to_string())
    }
}

impl From<tokio_postgres::Error> for EngineError {
    fn from(e: tokio_postgres::Error) -> Self {
        EngineError::Connection(e.to_string())
    }
}

impl<E> From<bb8::RunError<E>> for EngineError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(e: bb8::RunError<E>) -> Self {
        EngineError::Connection(format!("pool error: {e}"))
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, kind, detail) = match &self {
            EngineError::Config(problems) => (
                StatusCode::BAD_REQUEST,
                "ConfigError",
                json!({ "errors": problems }),
            ),
            EngineError::Data(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "DataError", json!(msg)),
            EngineError::Connection(msg) => {
                (StatusCode::BAD_GATEWAY, "ConnectionError", json!(msg))
            }
            EngineError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error building deck");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalError",
                    json!("an internal error occurred"),
                )
            }
        };

        tracing::warn!(%kind, "request failed");

        let body = Json(json!({ "kind": kind, "detail": detail }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_carries_all_problems() {
        let err = EngineError::Config(vec![
            ConfigProblem::new("setup.weekEnding", "missing"),
            ConfigProblem::new("metrics.Foo", "unknown aggf"),
        ]);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn data_error_maps_to_422() {
        let err = EngineError::Data("source missing Date column".into());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
