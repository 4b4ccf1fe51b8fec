use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::llm_client::{DEFAULT_API_URL, DEFAULT_MODEL};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub llm: LlmSettings,
    pub generation_timeout: Duration,
    pub store_timeout: Duration,
    pub require_personalization: bool,
    pub archive: Option<ArchiveSettings>,
    pub notification_webhook_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
}

/// Provider settings for the chat-completion client.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// S3 / MinIO settings for the generated-content archive. Present only when
/// `S3_BUCKET` is set.
#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub bucket: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let temperature: f32 = parse_env_or("LLM_TEMPERATURE", 0.3)?;
        if !(0.0..=1.0).contains(&temperature) {
            bail!("LLM_TEMPERATURE must be between 0.0 and 1.0 (got {temperature})");
        }

        let archive = optional_env("S3_BUCKET").map(|bucket| ArchiveSettings {
            bucket,
            endpoint: optional_env("S3_ENDPOINT"),
            access_key_id: optional_env("AWS_ACCESS_KEY_ID"),
            secret_access_key: optional_env("AWS_SECRET_ACCESS_KEY"),
        });

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            db_max_connections: parse_env_or("DB_MAX_CONNECTIONS", 10)?,
            llm: LlmSettings {
                api_key: require_env("LLM_API_KEY")?,
                api_url: optional_env("LLM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                model: optional_env("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                temperature,
                max_tokens: parse_env_or("LLM_MAX_TOKENS", 4000)?,
            },
            generation_timeout: Duration::from_secs(parse_env_or("GENERATION_TIMEOUT_SECS", 60)?),
            store_timeout: Duration::from_secs(parse_env_or("STORE_TIMEOUT_SECS", 10)?),
            require_personalization: parse_env_or("REQUIRE_PERSONALIZATION", true)?,
            archive,
            notification_webhook_url: optional_env("NOTIFICATION_WEBHOOK_URL"),
            port: parse_env_or("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{key} has an invalid value '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_reads_port() {
        let port: u16 = parse_value("PORT", " 9090 ").unwrap();
        assert_eq!(port, 9090);
    }

    #[test]
    fn test_parse_value_error_names_variable() {
        let err = parse_value::<u64>("GENERATION_TIMEOUT_SECS", "soon").unwrap_err();
        assert!(err.to_string().contains("GENERATION_TIMEOUT_SECS"));
    }

    #[test]
    fn test_parse_value_reads_bool() {
        let required: bool = parse_value("REQUIRE_PERSONALIZATION", "false").unwrap();
        assert!(!required);
    }
}
