//! Schema for `connections.yaml`, referenced by `setup.dbConfigUrl`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionsFile {
    pub version: String,
    pub connections: Vec<ConnectionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConnectionKind,
    pub config: ConnectionFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Postgres,
    Redshift,
    Snowflake,
    Athena,
}

/// The union of every connector's config fields. Unused fields for a given
/// `kind` are simply `None` — validated against `kind` in
/// [`ConnectionConfig::validate_fields`].
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConnectionFields {
    /// When present, the remaining fields are resolved from this secret
    /// instead of being read literally from the YAML.
    pub service: Option<String>,
    #[serde(rename = "secretName")]
    pub secret_name: Option<String>,

    // Postgres / Redshift
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,

    // Snowflake
    pub account: Option<String>,
    pub user: Option<String>,
    pub warehouse: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,

    // Athena
    pub region: Option<String>,
    #[serde(rename = "s3StagingDir")]
    pub s3_staging_dir: Option<String>,
    pub workgroup: Option<String>,
}

impl ConnectionConfig {
    /// Whether the connector's config is resolved from an AWS secret rather
    /// than read from the YAML literally.
    pub fn uses_secret_store(&self) -> bool {
        self.config.service.as_deref() == Some("aws")
    }

    /// Validates that the required type-specific fields are present, unless
    /// the config defers to a secret store (in which case the secret's
    /// contents are validated at resolution time, not here).
    pub fn validate_fields(&self) -> Result<(), String> {
        if self.uses_secret_store() {
            if self.config.secret_name.is_none() {
                return Err("service: aws requires secretName".to_string());
            }
            return Ok(());
        }

        let missing = |fields: &[(&str, &Option<String>)]| -> Vec<&'static str> {
            fields
                .iter()
                .filter(|(_, v)| v.is_none())
                .map(|(name, _)| *name)
                .collect()
        };

        let problems = match self.kind {
            ConnectionKind::Postgres | ConnectionKind::Redshift => missing(&[
                ("host", &self.config.host),
                ("username", &self.config.username),
                ("password", &self.config.password),
                ("database", &self.config.database),
            ]),
            ConnectionKind::Snowflake => missing(&[
                ("account", &self.config.account),
                ("user", &self.config.user),
                ("password", &self.config.password),
                ("warehouse", &self.config.warehouse),
                ("database", &self.config.database),
            ]),
            ConnectionKind::Athena => missing(&[
                ("region", &self.config.region),
                ("s3StagingDir", &self.config.s3_staging_dir),
                ("database", &self.config.database),
            ]),
        };

        if problems.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "connection {:?} of type {:?} is missing fields: {}",
                self.name,
                self.kind,
                problems.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_postgres_connection() {
        let yaml = r#"
version: "1.0"
connections:
  - name: MyPg
    type: postgres
    config:
      host: db.internal
      port: 5432
      username: reader
      password: secret
      database: wbr
"#;
        let file: ConnectionsFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.connections.len(), 1);
        assert!(file.connections[0].validate_fields().is_ok());
    }

    #[test]
    fn athena_requires_staging_dir() {
        let yaml = r#"
version: "1.0"
connections:
  - name: MyAthena
    type: athena
    config:
      region: us-east-1
      database: wbr
"#;
        let file: ConnectionsFile = serde_yaml::from_str(yaml).unwrap();
        assert!(file.connections[0].validate_fields().is_err());
    }

    #[test]
    fn secret_backed_connection_only_requires_secret_name() {
        let yaml = r#"
version: "1.0"
connections:
  - name: MyPg
    type: postgres
    config:
      service: aws
      secretName: wbr/prod/pg
"#;
        let file: ConnectionsFile = serde_yaml::from_str(yaml).unwrap();
        assert!(file.connections[0].validate_fields().is_ok());
    }
}
