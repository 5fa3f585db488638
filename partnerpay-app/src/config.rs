//! Configuration loading from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use partnerpay_types::domain::DEFAULT_RATE_LIMIT_PER_MINUTE;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("unknown LOG_FORMAT {other:?}, expected `pretty` or `json`"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub default_rate_limit_per_minute: u32,
    pub webhook_queue_capacity: usize,
    pub webhook_timeout: Duration,
    pub log_format: LogFormat,
    /// OTLP collector; tracing export is off when unset.
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = get("PORT", "3000")
            .parse()
            .context("PORT must be a port number")?;

        let database_url = get("DATABASE_URL", "memory://");

        let default_rate_limit_per_minute: u32 = get(
            "DEFAULT_RATE_LIMIT_PER_MINUTE",
            &DEFAULT_RATE_LIMIT_PER_MINUTE.to_string(),
        )
        .parse()
        .context("DEFAULT_RATE_LIMIT_PER_MINUTE must be a positive integer")?;
        if default_rate_limit_per_minute == 0 {
            anyhow::bail!("DEFAULT_RATE_LIMIT_PER_MINUTE must be a positive integer");
        }

        let webhook_queue_capacity = get("WEBHOOK_QUEUE_CAPACITY", "1024")
            .parse()
            .context("WEBHOOK_QUEUE_CAPACITY must be a positive integer")?;

        let webhook_timeout = Duration::from_secs(
            get("WEBHOOK_TIMEOUT_SECS", "10")
                .parse()
                .context("WEBHOOK_TIMEOUT_SECS must be a number of seconds")?,
        );

        let log_format = get("LOG_FORMAT", "pretty").parse()?;

        let otlp_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.trim().is_empty());

        Ok(Self {
            port,
            database_url,
            default_rate_limit_per_minute,
            webhook_queue_capacity,
            webhook_timeout,
            log_format,
            otlp_endpoint,
        })
    }
}
