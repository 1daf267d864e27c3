//! Ambient process configuration, read once at startup — distinct from the
//! per-request deck YAML the rest of `config` parses. Mirrors the teacher
//! crate's `Config::from_env` shape: every field has a sane development
//! default so the binary runs without an `.env` file.

use std::env;

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub bind_addr: String,
    pub default_fiscal_year_end_month: String,
    pub aws_region: String,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            default_fiscal_year_end_month: env::var("DEFAULT_FISCAL_YEAR_END_MONTH")
                .unwrap_or_else(|_| "DEC".to_string()),
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            default_fiscal_year_end_month: "DEC".to_string(),
            aws_region: "us-east-1".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_env_config_is_usable_without_any_env_vars() {
        let cfg = EnvConfig::default();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.default_fiscal_year_end_month, "DEC");
    }
}
