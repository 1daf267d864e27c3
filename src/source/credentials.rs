//! Resolves `service: aws` connection entries against AWS Secrets Manager.
//! A trait boundary so the test harness can substitute a fixed-value
//! resolver without touching AWS at all.

use async_trait::async_trait;

use crate::config::connections::ConnectionFields;
use crate::error::{EngineError, EngineResult};

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, secret_name: &str) -> EngineResult<ConnectionFields>;
}

/// Fetches a secret's JSON payload and deserializes it directly into
/// [`ConnectionFields`] — the secret is expected to hold the same keys a
/// literal `connections.yaml` entry would.
pub struct SecretsManagerResolver {
    region: String,
}

impl SecretsManagerResolver {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    async fn client(&self) -> aws_sdk_secretsmanager::Client {
        let config = aws_config::from_env()
            .region(aws_sdk_secretsmanager::config::Region::new(self.region.clone()))
            .load()
            .await;
        aws_sdk_secretsmanager::Client::new(&config)
    }
}

#[async_trait]
impl CredentialResolver for SecretsManagerResolver {
    async fn resolve(&self, secret_name: &str) -> EngineResult<ConnectionFields> {
        let client = self.client().await;
        let output = client
            .get_secret_value()
            .secret_id(secret_name)
            .send()
            .await
            .map_err(|e| EngineError::Connection(format!("secretsmanager: {e}")))?;
        let payload = output
            .secret_string()
            .ok_or_else(|| EngineError::Connection(format!("secret {secret_name:?} has no string value")))?;
        serde_json::from_str(payload)
            .map_err(|e| EngineError::Connection(format!("secret {secret_name:?} is not valid JSON: {e}")))
    }
}

/// Fixed-value resolver for tests and for the Test Harness, which must run
/// without reaching any real secret store.
pub struct StaticResolver(pub std::collections::HashMap<String, ConnectionFields>);

#[async_trait]
impl CredentialResolver for StaticResolver {
    async fn resolve(&self, secret_name: &str) -> EngineResult<ConnectionFields> {
        self.0
            .get(secret_name)
            .cloned()
            .ok_or_else(|| EngineError::Connection(format!("no static secret named {secret_name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_returns_configured_fields() {
        let mut map = std::collections::HashMap::new();
        map.insert(
            "wbr/prod/pg".to_string(),
            ConnectionFields {
                host: Some("db.internal".to_string()),
                ..Default::default()
            },
        );
        let resolver = StaticResolver(map);
        let fields = resolver.resolve("wbr/prod/pg").await.unwrap();
        assert_eq!(fields.host.as_deref(), Some("db.internal"));
    }

    #[tokio::test]
    async fn unknown_secret_is_a_connection_error() {
        let resolver = StaticResolver(std::collections::HashMap::new());
        assert!(resolver.resolve("missing").await.is_err());
    }
}
