use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

mod app;

use app::AppState;
use wbr_engine::config::env::EnvConfig;
use wbr_engine::source::credentials::{CredentialResolver, SecretsManagerResolver, StaticResolver};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let env_config = EnvConfig::from_env();
    tracing::info!(bind_addr = %env_config.bind_addr, "starting wbr-engine");

    let credentials = build_credential_resolver(&env_config);
    let scenario_root = std::env::var("WBR_SCENARIO_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("tests/fixtures"));

    let state = AppState {
        credentials,
        publisher: std::sync::Arc::new(app::InMemoryPublisher::default()),
        scenario_root,
    };

    let router = app::router(state);
    let listener = tokio::net::TcpListener::bind(&env_config.bind_addr).await?;
    tracing::info!(bind_addr = %env_config.bind_addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Uses Secrets Manager when `WBR_USE_SECRETS_MANAGER` is set, otherwise
/// falls back to an empty static resolver — connections that don't defer
/// to a secret store never need one resolved.
fn build_credential_resolver(env_config: &EnvConfig) -> std::sync::Arc<dyn CredentialResolver> {
    if std::env::var("WBR_USE_SECRETS_MANAGER").is_ok() {
        std::sync::Arc::new(SecretsManagerResolver::new(env_config.aws_region.clone()))
    } else {
        std::sync::Arc::new(StaticResolver(std::collections::HashMap::new()))
    }
}
